use std::fmt;

use tracing::warn;

use crate::{
    codec::Codec,
    error::{BoxError, Error},
    session::Session,
};

/// Why a session was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// [`Session::close`] was called.
    Local,
    /// The peer closed the connection.
    Peer,
    /// A transport, codec or listener error closed the session.
    Error,
    /// No traffic within the configured idle timeout.
    IdleTimeout,
    /// Closed cleanly while the group was stopping.
    Shutdown,
    /// Still open when the group's drain deadline expired.
    ForcedShutdown,
}

impl CloseReason {
    pub fn is_forced(&self) -> bool {
        matches!(self, CloseReason::ForcedShutdown)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseReason::Local => "local",
            CloseReason::Peer => "peer",
            CloseReason::Error => "error",
            CloseReason::IdleTimeout => "idle-timeout",
            CloseReason::Shutdown => "shutdown",
            CloseReason::ForcedShutdown => "forced-shutdown",
        };
        f.write_str(name)
    }
}

/// Application callbacks for session lifecycle and message events.
///
/// Every method runs on the thread of the processor that owns the session, so
/// callbacks for one session never overlap and messages arrive in the order
/// they were decoded. Callbacks must not block: a slow callback stalls every
/// session served by the same processor.
///
/// ## Error Handling
///
/// Returning an error from [`on_message_received`](Listener::on_message_received)
/// or [`on_session_connected`](Listener::on_session_connected) closes the
/// session; the error is first passed to
/// [`on_exception_caught`](Listener::on_exception_caught). A panicking callback
/// is treated the same way and never takes the processor down.
pub trait Listener<C: Codec>: Send + Sync + 'static {
    /// Called once when the session becomes connected
    fn on_session_connected(&self, session: &Session<C>) -> Result<(), BoxError> {
        let _ = session;
        Ok(())
    }

    /// Called for every decoded message, in arrival order
    fn on_message_received(&self, session: &Session<C>, message: C::Message)
        -> Result<(), BoxError>;

    /// Called when a fault is detected on the session
    fn on_exception_caught(&self, session: &Session<C>, error: &Error) {
        warn!(session = %session.id(), %error, "unhandled session error");
    }

    /// Called once when the session is closed
    fn on_session_closed(&self, session: &Session<C>, reason: CloseReason) {
        let _ = (session, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::ForcedShutdown.to_string(), "forced-shutdown");
        assert!(CloseReason::ForcedShutdown.is_forced());
        assert!(!CloseReason::Shutdown.is_forced());
    }
}
