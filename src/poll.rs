//! Selector plumbing and the cross-thread request queue of a processor.
//!
//! Only the processor thread touches its [`Selector`]. Every other thread talks
//! to the processor through a [`Mailbox`]: the request is queued, then the
//! selector is woken so the processor drains the queue at the top of its next
//! iteration.

use std::{
    io,
    net::SocketAddr,
    sync::{mpsc, Arc},
    time::{Duration, Instant},
};

use bytes::Bytes;
use mio::{
    net::{TcpListener, TcpStream},
    Events, Poll, Registry, Token, Waker,
};

use crate::{
    codec::Codec,
    error::{Error, Result},
    event::Readiness,
    session::{Session, SessionId},
};

pub(crate) const WAKER_TOKEN: Token = Token(usize::MAX);

pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

/// A connection handed to a processor for ownership.
pub(crate) struct Registration<C: Codec> {
    pub stream: TcpStream,
    pub session: Session<C>,
    /// Outbound connection still waiting for establishment.
    pub connecting: bool,
    /// Caller blocked in `connect`, waiting for the outcome.
    pub reply: Option<mpsc::Sender<Result<()>>>,
}

pub(crate) enum Command<C: Codec> {
    Register(Registration<C>),
    Listen(TcpListener, SocketAddr, Token),
    Write(SessionId, Bytes),
    Close(SessionId),
    Execute(Task),
    Shutdown(Instant),
}

/// Sending half of a processor's request queue.
pub(crate) struct Mailbox<C: Codec> {
    index: usize,
    sender: mpsc::Sender<Command<C>>,
    waker: Arc<Waker>,
}

impl<C: Codec> Clone for Mailbox<C> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            sender: self.sender.clone(),
            waker: Arc::clone(&self.waker),
        }
    }
}

impl<C: Codec> Mailbox<C> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Queues `command` and wakes the processor.
    pub fn send(&self, command: Command<C>) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| Error::ProcessorGone(self.index))?;
        self.waker.wake()?;
        Ok(())
    }
}

/// Multiplexing selector owned by one processor.
pub(crate) struct Selector {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
}

impl Selector {
    pub fn new(events_capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(events_capacity),
            waker: Arc::new(waker),
        })
    }

    /// Creates the mailbox/receiver pair feeding this selector's processor.
    pub fn channel<C: Codec>(&self, index: usize) -> (Mailbox<C>, mpsc::Receiver<Command<C>>) {
        let (sender, receiver) = mpsc::channel();
        let mailbox = Mailbox {
            index,
            sender,
            waker: Arc::clone(&self.waker),
        };
        (mailbox, receiver)
    }

    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Waits for readiness and copies the ready set into `ready`, skipping
    /// waker notifications. An interrupted wait yields an empty set.
    pub fn select(&mut self, timeout: Option<Duration>, ready: &mut Vec<Readiness>) -> io::Result<()> {
        ready.clear();
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        ready.extend(
            self.events
                .iter()
                .filter(|event| event.token() != WAKER_TOKEN)
                .map(Readiness::from),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::LengthFieldCodec;

    #[test]
    fn test_select_times_out() {
        let mut selector = Selector::new(16).unwrap();
        let mut ready = Vec::new();
        selector
            .select(Some(Duration::from_millis(10)), &mut ready)
            .unwrap();
        assert!(ready.is_empty());
    }

    #[test]
    fn test_mailbox_wakes_selector() {
        let mut selector = Selector::new(16).unwrap();
        let (mailbox, receiver) = selector.channel::<LengthFieldCodec>(0);
        mailbox.send(Command::Close(SessionId::new(7))).unwrap();

        let started = Instant::now();
        let mut ready = Vec::new();
        selector
            .select(Some(Duration::from_secs(5)), &mut ready)
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(ready.is_empty());
        assert!(matches!(receiver.try_recv(), Ok(Command::Close(id)) if id == SessionId::new(7)));
    }

    #[test]
    fn test_mailbox_reports_gone_processor() {
        let selector = Selector::new(16).unwrap();
        let (mailbox, receiver) = selector.channel::<LengthFieldCodec>(3);
        drop(receiver);
        assert!(matches!(
            mailbox.send(Command::Close(SessionId::new(1))),
            Err(Error::ProcessorGone(3))
        ));
    }
}
