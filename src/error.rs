use std::{io, net::SocketAddr, result::Result as StdResult};

use thiserror::Error;

use crate::session::SessionId;

/// Boxed error returned by application listener callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = StdResult<T, Error>;

/// Errors produced by the reactor, its sessions and the group that owns them.
///
/// Errors raised before a session exists (binding, connecting, calling
/// [`EventGroup::processor`](crate::EventGroup::processor) from the wrong thread)
/// are returned to the caller. Once a session exists every fault is delivered
/// through [`Listener::on_exception_caught`](crate::Listener::on_exception_caught).
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to establish connection with {addr}: {source}")]
    ConnectionEstablishment {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connection to {0} was not established within the connect timeout")]
    ConnectTimeout(SocketAddr),

    #[error("decode error: {0}")]
    Decode(CodecError),

    #[error("encode error: {0}")]
    Encode(CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("current thread is not an event processor of this group")]
    Affinity,

    #[error("session {0} did not close within the shutdown timeout")]
    ForcedShutdown(SessionId),

    #[error("listener error: {0}")]
    Listener(BoxError),

    #[error("listener panicked: {0}")]
    ListenerPanic(String),

    #[error("selector failure: {0}")]
    Selector(io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    #[error("event processor {0} is gone")]
    ProcessorGone(usize),
}

impl Error {
    /// Whether the error was caused by the transport rather than the payload.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::ConnectionEstablishment { .. })
    }
}

/// Errors a [`Codec`](crate::Codec) reports while framing bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("frame of {len} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("receive buffer holds {len} bytes, above the limit of {max} bytes")]
    BufferOverflow { len: usize, max: usize },

    #[error("invalid UTF-8 in frame")]
    InvalidUtf8,

    #[error("malformed frame: {0}")]
    Malformed(String),
}
