use mio::{event::Event, Token};
use std::fmt;

/// Owned snapshot of a selector event, detached from the `Events` buffer so the
/// processor can mutate its sessions while walking the ready list.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    token: Token,
    is_readable: bool,
    is_writable: bool,
    is_error: bool,
    is_read_closed: bool,
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness")
            .field("token", &self.token)
            .field("is_readable", &self.is_readable)
            .field("is_writable", &self.is_writable)
            .field("is_error", &self.is_error)
            .field("is_read_closed", &self.is_read_closed)
            .finish()
    }
}

impl Readiness {
    pub fn new(token: Token, is_readable: bool, is_writable: bool) -> Self {
        Self {
            token,
            is_readable,
            is_writable,
            is_error: false,
            is_read_closed: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Data (or EOF) can be read; for a listening socket, a connection is acceptable.
    pub fn is_readable(&self) -> bool {
        self.is_readable || self.is_read_closed
    }

    /// The socket accepts writes; for a pending outbound connection, the connect finished.
    pub fn is_writable(&self) -> bool {
        self.is_writable
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            token: event.token(),
            is_readable: event.is_readable(),
            is_writable: event.is_writable(),
            is_error: event.is_error(),
            is_read_closed: event.is_read_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_flags() {
        let readiness = Readiness::new(Token(3), true, false);
        assert_eq!(readiness.token(), Token(3));
        assert!(readiness.is_readable());
        assert!(!readiness.is_writable());
        assert!(!readiness.is_error());
    }
}
