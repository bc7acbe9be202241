//! The select loop run by each processor thread.
//!
//! ```text
//!  ┌──────────── one iteration ─────────────┐
//!  │ 1. drain mailbox (register, write,     │
//!  │    close, execute, shutdown)           │
//!  │ 2. check shutdown deadline             │
//!  │ 3. select(poll_interval)               │
//!  │ 4. re-read channels left unfinished    │
//!  │ 5. dispatch ready set:                 │
//!  │      acceptor  → GroupCore::admit      │
//!  │      connecting→ finish connect        │
//!  │      readable  → read once + decode    │
//!  │      writable  → flush write queue     │
//!  │ 6. close idle sessions                 │
//!  └────────────────────────────────────────┘
//! ```
//!
//! The processor is the only owner of its selector, its channels and their
//! buffers. Faults on a channel are reported to the listener and close that
//! channel only; only a selector failure stops the loop.

use std::{
    any::Any,
    cell::Cell,
    collections::{HashMap, VecDeque},
    io::{self, Write},
    net::{Shutdown, SocketAddr},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    time::{Duration, Instant},
};

use bytes::{Buf, Bytes};
use mio::{
    net::{TcpListener, TcpStream},
    Interest, Token,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    buffer::MessageBuffer,
    codec::{Codec, Decoded},
    error::{BoxError, CodecError, Error, Result},
    event::Readiness,
    group::GroupCore,
    listener::{CloseReason, Listener},
    poll::{Command, Mailbox, Registration, Selector},
    session::{Session, SessionState},
};

thread_local! {
    static CURRENT: Cell<Option<(u64, usize)>> = const { Cell::new(None) };
}

/// `(group id, processor index)` of the processor running on this thread.
pub(crate) fn current() -> Option<(u64, usize)> {
    CURRENT.with(Cell::get)
}

#[derive(Debug, Default)]
pub(crate) struct ProcessorStats {
    pub sessions: AtomicUsize,
}

/// Handle to one processor of a group.
///
/// Lets callers inspect the processor and schedule work on its thread. The
/// handle does not keep the processor alive; once the processor has stopped,
/// [`execute`](Self::execute) fails with [`Error::ProcessorGone`].
pub struct ProcessorHandle<C: Codec> {
    mailbox: Mailbox<C>,
    stats: Arc<ProcessorStats>,
}

impl<C: Codec> Clone for ProcessorHandle<C> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<C: Codec> std::fmt::Debug for ProcessorHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorHandle")
            .field("index", &self.index())
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl<C: Codec> ProcessorHandle<C> {
    pub(crate) fn new(mailbox: Mailbox<C>, stats: Arc<ProcessorStats>) -> Self {
        Self { mailbox, stats }
    }

    pub fn index(&self) -> usize {
        self.mailbox.index()
    }

    /// Number of sessions currently assigned to this processor.
    pub fn session_count(&self) -> usize {
        self.stats.sessions.load(Ordering::Acquire)
    }

    /// Runs `task` on the processor thread at the start of its next iteration.
    ///
    /// The task must not block. A panicking task is logged and discarded.
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.mailbox.send(Command::Execute(Box::new(task)))
    }
}

/// I/O state of one session, owned by the processor thread.
struct Channel<C: Codec> {
    stream: TcpStream,
    session: Session<C>,
    buffer: MessageBuffer,
    codec_state: C::State,
    write_queue: VecDeque<Bytes>,
    interest: Interest,
    connecting: bool,
    /// `on_session_connected` has been delivered.
    announced: bool,
    /// Flushing its queue before a shutdown close; no more reads.
    draining: bool,
    reply: Option<mpsc::Sender<Result<()>>>,
}

pub(crate) struct EventProcessor<C: Codec, L: Listener<C>> {
    index: usize,
    selector: Selector,
    mailbox: mpsc::Receiver<Command<C>>,
    channels: HashMap<Token, Channel<C>>,
    acceptors: HashMap<Token, (TcpListener, SocketAddr)>,
    core: Arc<GroupCore<C>>,
    listener: Arc<L>,
    rescan: Vec<Token>,
    shutdown: Option<Instant>,
    last_idle_check: Instant,
}

impl<C: Codec, L: Listener<C>> EventProcessor<C, L> {
    pub fn new(
        index: usize,
        selector: Selector,
        mailbox: mpsc::Receiver<Command<C>>,
        core: Arc<GroupCore<C>>,
        listener: Arc<L>,
    ) -> Self {
        Self {
            index,
            selector,
            mailbox,
            channels: HashMap::new(),
            acceptors: HashMap::new(),
            core,
            listener,
            rescan: Vec::new(),
            shutdown: None,
            last_idle_check: Instant::now(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Runs the select loop until the group shuts it down or the selector fails.
    pub fn run(mut self) -> Result<()> {
        CURRENT.with(|current| current.set(Some((self.core.group_id(), self.index))));
        info!(processor = self.index, "event processor started");

        let mut ready = Vec::with_capacity(self.core.config().events_capacity);
        let result = loop {
            self.drain_mailbox();

            if let Some(deadline) = self.shutdown {
                if self.channels.is_empty() {
                    break Ok(());
                }
                if Instant::now() >= deadline {
                    self.force_close_all();
                    break Ok(());
                }
            }

            let timeout = self.next_timeout();
            if let Err(e) = self.selector.select(Some(timeout), &mut ready) {
                error!(processor = self.index, error = %e, "selector failure, stopping processor");
                self.abort_all(&e);
                break Err(Error::Selector(e));
            }

            let rescanned = rescan_set(std::mem::take(&mut self.rescan));
            for token in &rescanned {
                self.read(*token);
            }
            for readiness in &ready {
                self.dispatch(readiness, &rescanned);
            }
            self.close_idle();
        };

        // Refuse registrations that raced with the shutdown.
        self.shutdown.get_or_insert_with(Instant::now);
        self.drain_mailbox();
        for (_, (mut acceptor, _)) in self.acceptors.drain() {
            let _ = self.selector.registry().deregister(&mut acceptor);
        }
        CURRENT.with(|current| current.set(None));
        info!(processor = self.index, "event processor stopped");
        result
    }

    fn next_timeout(&self) -> Duration {
        if !self.rescan.is_empty() {
            return Duration::ZERO;
        }
        let interval = self.core.config().poll_interval;
        match self.shutdown {
            Some(deadline) => interval.min(deadline.saturating_duration_since(Instant::now())),
            None => interval,
        }
    }

    fn drain_mailbox(&mut self) {
        while let Ok(command) = self.mailbox.try_recv() {
            match command {
                Command::Register(registration) => self.register(registration),
                Command::Listen(listener, addr, token) => self.listen(listener, addr, token),
                Command::Write(id, bytes) => self.enqueue_write(Token(id.as_u64() as usize), bytes),
                Command::Close(id) => self.close_requested(Token(id.as_u64() as usize)),
                Command::Execute(task) => {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                        error!(
                            processor = self.index,
                            panic = %panic_message(payload),
                            "scheduled task panicked"
                        );
                    }
                }
                Command::Shutdown(deadline) => self.begin_shutdown(deadline),
            }
        }
    }

    /// Handles one ready event. Channels in `rescanned` were already read
    /// this iteration and are not read again.
    fn dispatch(&mut self, readiness: &Readiness, rescanned: &[Token]) {
        let token = readiness.token();
        if self.acceptors.contains_key(&token) {
            self.accept(token);
            return;
        }

        let connecting = match self.channels.get(&token) {
            Some(channel) => channel.connecting,
            None => return,
        };
        if connecting {
            self.finish_connect(token);
            return;
        }
        if needs_read(readiness, rescanned) {
            self.read(token);
        }
        if readiness.is_writable() {
            self.flush(token);
        }
    }

    fn listen(&mut self, mut listener: TcpListener, addr: SocketAddr, token: Token) {
        if self.shutdown.is_some() {
            debug!(processor = self.index, %addr, "listener dropped during shutdown");
            return;
        }
        match self
            .selector
            .registry()
            .register(&mut listener, token, Interest::READABLE)
        {
            Ok(()) => {
                info!(processor = self.index, %addr, "accepting connections");
                self.acceptors.insert(token, (listener, addr));
            }
            Err(e) => error!(processor = self.index, %addr, error = %e, "failed to register listener"),
        }
    }

    fn accept(&mut self, token: Token) {
        loop {
            let accepted = match self.acceptors.get(&token) {
                Some((listener, _)) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, peer_addr)) => self.core.admit(stream, peer_addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(processor = self.index, error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn register(&mut self, registration: Registration<C>) {
        let Registration {
            mut stream,
            session,
            connecting,
            reply,
        } = registration;

        if self.shutdown.is_some() {
            debug!(processor = self.index, session = %session.id(), "registration refused during shutdown");
            let _ = stream.shutdown(Shutdown::Both);
            session.set_state(SessionState::Closed);
            self.core.release(&session);
            if let Some(reply) = reply {
                let _ = reply.send(Err(Error::IllegalState("event group is stopping")));
            }
            return;
        }

        let token = Token(session.id().as_u64() as usize);
        let interest = if connecting {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if let Err(e) = self.selector.registry().register(&mut stream, token, interest) {
            warn!(processor = self.index, session = %session.id(), error = %e, "failed to register session");
            session.set_state(SessionState::Closed);
            self.core.release(&session);
            let error = Error::ConnectionEstablishment {
                addr: session.peer_addr(),
                source: e,
            };
            match reply {
                Some(reply) => {
                    let _ = reply.send(Err(error));
                }
                None => self.notify_exception(&session, &error),
            }
            return;
        }

        debug!(
            processor = self.index,
            session = %session.id(),
            peer = %session.peer_addr(),
            connecting,
            "session registered"
        );
        self.channels.insert(
            token,
            Channel {
                stream,
                session,
                buffer: MessageBuffer::with_capacity(self.core.config().read_chunk_size),
                codec_state: C::State::default(),
                write_queue: VecDeque::new(),
                interest,
                connecting,
                announced: false,
                draining: false,
                reply,
            },
        );
        if !connecting {
            self.establish(token);
        }
    }

    fn finish_connect(&mut self, token: Token) {
        let Some(channel) = self.channels.get_mut(&token) else {
            return;
        };
        let outcome = match channel.stream.take_error() {
            Ok(Some(e)) | Err(e) => Err(e),
            Ok(None) => match channel.stream.peer_addr() {
                Ok(_) => Ok(true),
                Err(e)
                    if e.kind() == io::ErrorKind::NotConnected
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    Ok(false)
                }
                Err(e) => Err(e),
            },
        };

        match outcome {
            Ok(false) => {}
            Ok(true) => {
                channel.connecting = false;
                if self.core.config().no_delay {
                    if let Err(e) = channel.stream.set_nodelay(true) {
                        trace!(session = %channel.session.id(), error = %e, "failed to set TCP_NODELAY");
                    }
                }
                let interest = if channel.write_queue.is_empty() {
                    Interest::READABLE
                } else {
                    Interest::READABLE | Interest::WRITABLE
                };
                self.set_interest(token, interest);
                self.establish(token);
                self.flush(token);
            }
            Err(e) => self.fail_connect(token, e),
        }
    }

    fn fail_connect(&mut self, token: Token, source: io::Error) {
        let Some(mut channel) = self.channels.remove(&token) else {
            return;
        };
        let _ = self.selector.registry().deregister(&mut channel.stream);
        let session = channel.session.clone();
        session.set_state(SessionState::Closed);
        self.core.release(&session);
        debug!(processor = self.index, session = %session.id(), error = %source, "connect failed");

        let error = Error::ConnectionEstablishment {
            addr: session.peer_addr(),
            source,
        };
        match channel.reply.take() {
            Some(reply) => {
                let _ = reply.send(Err(error));
            }
            None => self.notify_exception(&session, &error),
        }
    }

    /// Marks a registered channel connected and announces it to the listener.
    fn establish(&mut self, token: Token) {
        let Some(channel) = self.channels.get_mut(&token) else {
            return;
        };
        let session = channel.session.clone();
        session.set_state(SessionState::Connected);
        session.touch(Instant::now());
        channel.announced = true;
        if let Some(reply) = channel.reply.take() {
            let _ = reply.send(Ok(()));
        }
        // Bytes may have arrived before the channel was readable to us.
        self.rescan.push(token);
        debug!(processor = self.index, session = %session.id(), peer = %session.peer_addr(), "session connected");

        let listener = Arc::clone(&self.listener);
        if let Err(e) = guard(|| listener.on_session_connected(&session)) {
            self.fail(token, e);
        }
    }

    /// Reads once from the channel, then decodes everything buffered.
    fn read(&mut self, token: Token) {
        let chunk = self.core.config().read_chunk_size;
        let Some(channel) = self.channels.get_mut(&token) else {
            return;
        };
        if channel.connecting || channel.draining {
            return;
        }

        match channel.buffer.read_once(&mut channel.stream, chunk) {
            Ok(0) => self.close(token, CloseReason::Peer),
            Ok(n) => {
                channel.session.touch(Instant::now());
                trace!(session = %channel.session.id(), bytes = n, "read");
                // Edge-triggered selector: only WouldBlock proves the socket
                // drained. More data or a pending EOF is picked up next pass.
                self.rescan.push(token);
                self.decode(token);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => self.rescan.push(token),
            Err(e) => self.fail(token, Error::Io(e)),
        }
    }

    fn decode(&mut self, token: Token) {
        let max_buffer = self.core.config().max_buffer_size;
        loop {
            let Some(channel) = self.channels.get_mut(&token) else {
                return;
            };
            let decoded = self
                .core
                .codec()
                .decode(&mut channel.codec_state, &mut channel.buffer);
            match decoded {
                Ok(Decoded::Message(message)) => {
                    let session = channel.session.clone();
                    trace!(session = %session.id(), "message decoded");
                    let listener = Arc::clone(&self.listener);
                    if let Err(e) = guard(|| listener.on_message_received(&session, message)) {
                        self.fail(token, e);
                        return;
                    }
                }
                Ok(Decoded::NeedMore) => {
                    let len = channel.buffer.len();
                    if len > max_buffer {
                        let error = CodecError::BufferOverflow {
                            len,
                            max: max_buffer,
                        };
                        self.fail(token, Error::Decode(error));
                    }
                    return;
                }
                Err(e) => {
                    self.fail(token, Error::Decode(e));
                    return;
                }
            }
        }
    }

    fn enqueue_write(&mut self, token: Token, bytes: Bytes) {
        let Some(channel) = self.channels.get_mut(&token) else {
            trace!(processor = self.index, token = token.0, "write for unknown session dropped");
            return;
        };
        channel.write_queue.push_back(bytes);
        if !channel.connecting {
            self.flush(token);
        }
    }

    /// Writes queued buffers until the queue is empty or the socket would block.
    fn flush(&mut self, token: Token) {
        let Some(channel) = self.channels.get_mut(&token) else {
            return;
        };
        if channel.connecting {
            return;
        }

        match write_queued(channel) {
            Ok(true) => {
                if channel.draining {
                    self.close(token, CloseReason::Shutdown);
                } else {
                    self.set_interest(token, Interest::READABLE);
                }
            }
            Ok(false) => {
                let interest = if channel.draining {
                    Interest::WRITABLE
                } else {
                    Interest::READABLE | Interest::WRITABLE
                };
                self.set_interest(token, interest);
            }
            Err(e) => self.fail(token, Error::Io(e)),
        }
    }

    fn set_interest(&mut self, token: Token, interest: Interest) {
        let Some(channel) = self.channels.get_mut(&token) else {
            return;
        };
        if channel.interest == interest {
            return;
        }
        match self
            .selector
            .registry()
            .reregister(&mut channel.stream, token, interest)
        {
            Ok(()) => channel.interest = interest,
            Err(e) => self.fail(token, Error::Io(e)),
        }
    }

    fn close_requested(&mut self, token: Token) {
        let connecting = match self.channels.get(&token) {
            Some(channel) => channel.connecting,
            None => return,
        };
        if connecting {
            self.fail_connect(
                token,
                io::Error::new(io::ErrorKind::ConnectionAborted, "closed before connect completed"),
            );
        } else {
            self.close(token, CloseReason::Local);
        }
    }

    /// Reports `error` to the listener and closes the channel.
    fn fail(&mut self, token: Token, error: Error) {
        let Some(channel) = self.channels.get(&token) else {
            return;
        };
        let session = channel.session.clone();
        if matches!(error, Error::ListenerPanic(_)) {
            error!(processor = self.index, session = %session.id(), %error, "listener panicked");
        } else {
            debug!(processor = self.index, session = %session.id(), %error, "session failed");
        }
        self.notify_exception(&session, &error);
        self.close(token, CloseReason::Error);
    }

    /// Moves the channel through `Closing` to `Closed` and releases it.
    ///
    /// Queued writes get one non-blocking flush attempt, except after an error;
    /// whatever remains is discarded.
    fn close(&mut self, token: Token, reason: CloseReason) {
        let Some(mut channel) = self.channels.remove(&token) else {
            return;
        };
        let session = channel.session.clone();
        session.set_state(SessionState::Closing);

        if reason != CloseReason::Error && !channel.write_queue.is_empty() {
            if let Err(e) = write_queued(&mut channel) {
                trace!(session = %session.id(), error = %e, "final flush failed");
            }
        }
        let discarded = channel.write_queue.len();
        let _ = self.selector.registry().deregister(&mut channel.stream);
        let _ = channel.stream.shutdown(Shutdown::Both);
        drop(channel.stream);

        session.set_state(SessionState::Closed);
        self.core.release(&session);
        debug!(
            processor = self.index,
            session = %session.id(),
            %reason,
            discarded,
            "session closed"
        );

        if channel.announced {
            let listener = Arc::clone(&self.listener);
            if let Err(e) = guard(|| {
                listener.on_session_closed(&session, reason);
                Ok(())
            }) {
                error!(session = %session.id(), error = %e, "listener failed while closing session");
            }
        }
    }

    fn notify_exception(&self, session: &Session<C>, error: &Error) {
        let listener = Arc::clone(&self.listener);
        if let Err(e) = guard(|| {
            listener.on_exception_caught(session, error);
            Ok(())
        }) {
            error!(session = %session.id(), error = %e, "listener failed while handling an exception");
        }
    }

    fn begin_shutdown(&mut self, deadline: Instant) {
        if self.shutdown.is_some() {
            return;
        }
        self.shutdown = Some(deadline);
        for (_, (mut acceptor, addr)) in self.acceptors.drain() {
            let _ = self.selector.registry().deregister(&mut acceptor);
            info!(processor = self.index, %addr, "stopped accepting connections");
        }

        let tokens: Vec<Token> = self.channels.keys().copied().collect();
        debug!(processor = self.index, sessions = tokens.len(), "draining sessions");
        for token in tokens {
            let Some(channel) = self.channels.get_mut(&token) else {
                continue;
            };
            if channel.connecting {
                self.fail_connect(
                    token,
                    io::Error::new(io::ErrorKind::ConnectionAborted, "event group is stopping"),
                );
            } else if channel.write_queue.is_empty() {
                self.close(token, CloseReason::Shutdown);
            } else {
                channel.draining = true;
                self.flush(token);
            }
        }
    }

    fn force_close_all(&mut self) {
        let tokens: Vec<Token> = self.channels.keys().copied().collect();
        for token in tokens {
            let Some(channel) = self.channels.get(&token) else {
                continue;
            };
            let session = channel.session.clone();
            warn!(processor = self.index, session = %session.id(), "session force-closed at shutdown deadline");
            self.notify_exception(&session, &Error::ForcedShutdown(session.id()));
            self.close(token, CloseReason::ForcedShutdown);
        }
    }

    fn abort_all(&mut self, cause: &io::Error) {
        let tokens: Vec<Token> = self.channels.keys().copied().collect();
        for token in tokens {
            let error = Error::Selector(io::Error::new(cause.kind(), cause.to_string()));
            self.fail(token, error);
        }
    }

    fn close_idle(&mut self) {
        let Some(idle_timeout) = self.core.config().idle_timeout else {
            return;
        };
        let now = Instant::now();
        if now.duration_since(self.last_idle_check) < self.core.config().poll_interval {
            return;
        }
        self.last_idle_check = now;

        let idle: Vec<Token> = self
            .channels
            .iter()
            .filter(|(_, channel)| {
                !channel.connecting
                    && !channel.draining
                    && now.saturating_duration_since(channel.session.last_activity()) >= idle_timeout
            })
            .map(|(token, _)| *token)
            .collect();
        for token in idle {
            self.close(token, CloseReason::IdleTimeout);
        }
    }
}

/// Sorted, duplicate-free set of channels to read before dispatching.
fn rescan_set(mut tokens: Vec<Token>) -> Vec<Token> {
    tokens.sort_unstable();
    tokens.dedup();
    tokens
}

fn needs_read(readiness: &Readiness, rescanned: &[Token]) -> bool {
    (readiness.is_readable() || readiness.is_error())
        && rescanned.binary_search(&readiness.token()).is_err()
}

/// Writes until the queue drains (`Ok(true)`) or the socket would block (`Ok(false)`).
fn write_queued<C: Codec>(channel: &mut Channel<C>) -> io::Result<bool> {
    while let Some(front) = channel.write_queue.front_mut() {
        match channel.stream.write(front) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                channel.session.touch(Instant::now());
                trace!(session = %channel.session.id(), bytes = n, "wrote");
                if n == front.len() {
                    channel.write_queue.pop_front();
                } else {
                    front.advance(n);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Runs a listener callback, turning errors and panics into [`Error`]s.
fn guard<F>(callback: F) -> Result<()>
where
    F: FnOnce() -> std::result::Result<(), BoxError>,
{
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Error::Listener(e)),
        Err(payload) => Err(Error::ListenerPanic(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_maps_errors_and_panics() {
        assert!(guard(|| Ok(())).is_ok());
        assert!(matches!(
            guard(|| Err("boom".into())),
            Err(Error::Listener(e)) if e.to_string() == "boom"
        ));
        assert!(matches!(
            guard(|| panic!("listener exploded")),
            Err(Error::ListenerPanic(message)) if message == "listener exploded"
        ));
    }

    #[test]
    fn test_rescan_set_sorted_and_unique() {
        let tokens = rescan_set(vec![Token(9), Token(2), Token(9), Token(5), Token(2)]);
        assert_eq!(tokens, vec![Token(2), Token(5), Token(9)]);
    }

    #[test]
    fn test_rescanned_channel_not_read_twice() {
        let rescanned = rescan_set(vec![Token(4), Token(7)]);
        assert!(!needs_read(&Readiness::new(Token(7), true, false), &rescanned));
        assert!(needs_read(&Readiness::new(Token(5), true, false), &rescanned));
        assert!(!needs_read(&Readiness::new(Token(5), false, true), &rescanned));
    }

    #[test]
    fn test_current_is_unset_outside_processors() {
        assert!(current().is_none());
    }
}
