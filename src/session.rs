//! Application-facing handle of one connection.
//!
//! A [`Session`] is a cheap, cloneable handle. The socket, receive buffer and
//! write queue behind it are owned by a single processor thread; the handle only
//! carries identity, observable state and a mailbox into that processor, so it
//! can be used from any thread without touching the I/O state directly.
//!
//! ```text
//!   any thread                       owning processor thread
//!   Session::send ──encode──▶ Write(id, bytes) ──▶ write queue ──▶ socket
//!   Session::close ─────────▶ Close(id)        ──▶ Closing ──▶ Closed
//! ```

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::{Duration, Instant},
};

use bytes::BytesMut;

use crate::{
    codec::Codec,
    error::{Error, Result},
    poll::{Command, Mailbox},
};

/// Unique identifier for sessions.
///
/// Assigned from a group-wide counter when the connection is accepted or
/// initiated, and stable for the lifetime of the session. It doubles as the
/// selector token of the channel inside its processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        SessionId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connection state. Transitions only move forward; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Connected = 1,
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Connected,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

pub struct Session<C: Codec> {
    shared: Arc<Shared<C>>,
}

struct Shared<C: Codec> {
    id: SessionId,
    peer_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    state: AtomicU8,
    close_requested: AtomicBool,
    created: Instant,
    last_activity_ms: AtomicU64,
    codec: Arc<C>,
    mailbox: Mailbox<C>,
    attributes: Mutex<HashMap<String, String>>,
    attachment: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

impl<C: Codec> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Codec> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("processor", &self.processor_index())
            .field("peer_addr", &self.shared.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Codec> Session<C> {
    pub(crate) fn new(
        id: SessionId,
        peer_addr: SocketAddr,
        local_addr: Option<SocketAddr>,
        state: SessionState,
        codec: Arc<C>,
        mailbox: Mailbox<C>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                peer_addr,
                local_addr,
                state: AtomicU8::new(state as u8),
                close_requested: AtomicBool::new(false),
                created: Instant::now(),
                last_activity_ms: AtomicU64::new(0),
                codec,
                mailbox,
                attributes: Mutex::new(HashMap::new()),
                attachment: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Index of the processor owning this session within its group.
    pub fn processor_index(&self) -> usize {
        self.shared.mailbox.index()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.shared.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// `true` while the session is connected and no close has been requested.
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Connected
            && !self.shared.close_requested.load(Ordering::Acquire)
    }

    /// Time of the last successful read or write.
    pub fn last_activity(&self) -> Instant {
        let elapsed = self.shared.last_activity_ms.load(Ordering::Relaxed);
        self.shared.created + Duration::from_millis(elapsed)
    }

    /// Encodes `message` and queues it for transmission by the owning processor.
    ///
    /// Safe to call from any thread. Messages sent through the same session are
    /// written in call order. Encoding happens on the calling thread, so an
    /// encode failure is returned here and the session stays open.
    pub fn send(&self, message: &C::Message) -> Result<()> {
        if self.state() >= SessionState::Closing
            || self.shared.close_requested.load(Ordering::Acquire)
        {
            return Err(Error::SessionClosed(self.id()));
        }
        let mut dst = BytesMut::new();
        self.shared
            .codec
            .encode(message, &mut dst)
            .map_err(Error::Encode)?;
        if dst.is_empty() {
            return Ok(());
        }
        self.shared
            .mailbox
            .send(Command::Write(self.id(), dst.freeze()))
    }

    /// Requests the session to close. Idempotent and callable from any thread;
    /// the close itself runs on the owning processor.
    pub fn close(&self) {
        if self.shared.close_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        // A gone processor has already released the channel.
        let _ = self.shared.mailbox.send(Command::Close(self.id()));
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes().insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes().get(key).cloned()
    }

    pub fn remove_attribute(&self, key: &str) -> Option<String> {
        self.attributes().remove(key)
    }

    /// Stores an opaque user value on the session, replacing any previous one.
    pub fn set_attachment<T: Any + Send + Sync>(&self, value: T) {
        *self
            .shared
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(value));
    }

    /// Returns the attachment if one is set and it has type `T`.
    pub fn attachment<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let slot = self
            .shared
            .attachment
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slot.clone()?.downcast::<T>().ok()
    }

    fn attributes(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.shared
            .attributes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.shared.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn touch(&self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.shared.created).as_millis() as u64;
        self.shared.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::LengthFieldCodec, poll::Selector};
    use bytes::Bytes;
    use std::sync::mpsc;

    fn detached_session(
        state: SessionState,
    ) -> (Session<LengthFieldCodec>, mpsc::Receiver<Command<LengthFieldCodec>>) {
        let selector = Selector::new(8).unwrap();
        let (mailbox, receiver) = selector.channel(1);
        let session = Session::new(
            SessionId::new(42),
            "127.0.0.1:4000".parse().unwrap(),
            None,
            state,
            Arc::new(LengthFieldCodec::default()),
            mailbox,
        );
        (session, receiver)
    }

    #[test]
    fn test_send_encodes_and_queues() {
        let (session, receiver) = detached_session(SessionState::Connected);
        session.send(&Bytes::from_static(b"A")).unwrap();
        match receiver.try_recv().unwrap() {
            Command::Write(id, bytes) => {
                assert_eq!(id, SessionId::new(42));
                assert_eq!(&bytes[..], &[0, 0, 0, 1, b'A']);
            }
            _ => panic!("expected a write command"),
        }
    }

    #[test]
    fn test_close_is_queued_once() {
        let (session, receiver) = detached_session(SessionState::Connected);
        session.close();
        session.close();
        assert!(matches!(receiver.try_recv(), Ok(Command::Close(_))));
        assert!(receiver.try_recv().is_err());
        assert!(!session.is_open());
        assert!(matches!(
            session.send(&Bytes::from_static(b"late")),
            Err(Error::SessionClosed(_))
        ));
    }

    #[test]
    fn test_encode_error_is_synchronous() {
        let selector = Selector::new(8).unwrap();
        let (mailbox, receiver) = selector.channel(0);
        let session = Session::new(
            SessionId::new(1),
            "127.0.0.1:4000".parse().unwrap(),
            None,
            SessionState::Connected,
            Arc::new(LengthFieldCodec::new(1)),
            mailbox,
        );
        assert!(matches!(
            session.send(&Bytes::from_static(b"too long")),
            Err(Error::Encode(_))
        ));
        assert!(receiver.try_recv().is_err());
        assert!(session.is_open());
    }

    #[test]
    fn test_attributes_and_attachment() {
        let (session, _receiver) = detached_session(SessionState::Connecting);
        session.set_attribute("user", "alice");
        assert_eq!(session.attribute("user").as_deref(), Some("alice"));
        assert_eq!(session.remove_attribute("user").as_deref(), Some("alice"));
        assert!(session.attribute("user").is_none());

        session.set_attachment(17u32);
        assert_eq!(session.attachment::<u32>().as_deref(), Some(&17));
        assert!(session.attachment::<String>().is_none());
    }

    #[test]
    fn test_state_transitions_are_visible_to_clones() {
        let (session, _receiver) = detached_session(SessionState::Connecting);
        let clone = session.clone();
        assert!(!clone.is_open());
        session.set_state(SessionState::Connected);
        assert!(clone.is_open());
        session.set_state(SessionState::Closed);
        assert_eq!(clone.state(), SessionState::Closed);
    }
}
