//! # Mill-NIO
//! A multi-reactor, non-blocking TCP engine built on [`mio`].
//!
//! Mill-NIO runs a fixed group of event processors, each a single thread owning
//! its own selector. Connections are spread over the processors, decoded into
//! application messages by a pluggable [`Codec`] and delivered to a
//! [`Listener`]. Everything that happens to a session happens on the thread of
//! the processor that owns it, so callbacks for one session never race.
//!
//! ## Features
//! - **Multi-reactor**: N processors, each with its own selector and thread
//! - **Pluggable framing**: length-prefixed and line-delimited codecs included
//! - **Thread-safe sessions**: [`Session::send`] and [`Session::close`] work from any thread
//! - **Fault isolation**: codec errors, I/O errors and listener panics close only the affected session
//! - **Graceful shutdown**: pending writes drain until a deadline, then sessions are force-closed
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────┐  bind/connect   ┌────────────────┐   Register/Write/Close
//! │ EventGroup  │───────────────▶│   GroupCore     │──────────┐
//! └─────────────┘                 │ (session index) │          │
//!                                 └────────────────┘          ▼
//!        ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐
//!        │ EventProcessor 0 │   │ EventProcessor 1 │   │ EventProcessor N │
//!        │ Selector+Mailbox │   │ Selector+Mailbox │   │ Selector+Mailbox │
//!        └────────┬─────────┘   └────────┬─────────┘   └────────┬─────────┘
//!                 ▼                      ▼                      ▼
//!             sessions ──decode──▶ Listener callbacks ◀──decode── sessions
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mill_nio::prelude::*;
//! use std::time::Duration;
//!
//! struct Greeter;
//!
//! impl Listener<LineCodec> for Greeter {
//!     fn on_session_connected(&self, session: &Session<LineCodec>) -> Result<(), BoxError> {
//!         session.send(&"welcome".to_string())?;
//!         Ok(())
//!     }
//!
//!     fn on_message_received(
//!         &self,
//!         session: &Session<LineCodec>,
//!         line: String,
//!     ) -> Result<(), BoxError> {
//!         if line == "quit" {
//!             session.close();
//!         } else {
//!             session.send(&line.to_uppercase())?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GroupConfig::builder()
//!         .processors(4)
//!         .bind("127.0.0.1:7000".parse()?)
//!         .build();
//!     let group = EventGroup::new(config, LineCodec::default(), Greeter)?;
//!     group.start()?;
//!
//!     std::thread::sleep(Duration::from_secs(60));
//!     group.stop(Duration::from_secs(5))?;
//!     Ok(())
//! }
//! ```
//!
//! - [`EventGroup`]: processor pool, bind/connect and lifecycle
//! - [`Session`]: per-connection handle for sending, closing and user data
//! - [`codec`]: the [`Codec`] trait and built-in framings
//! - [`listener`]: application callbacks and [`CloseReason`]
//! - [`config`]: [`GroupConfig`] and its builder
//! - [`error`]: error types and result handling

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod group;
pub mod listener;
pub(crate) mod poll;
pub mod processor;
pub mod session;

pub use buffer::MessageBuffer;
pub use codec::{Codec, Decoded, LengthFieldCodec, LineCodec};
pub use config::{Distribution, GroupConfig, GroupConfigBuilder};
pub use error::{BoxError, CodecError, Error, Result};
pub use group::EventGroup;
pub use listener::{CloseReason, Listener};
pub use processor::ProcessorHandle;
pub use session::{Session, SessionId, SessionState};

/// Re-exports of the items needed to write a listener and run a group.
///
/// ```rust
/// use mill_nio::prelude::*;
/// ```
pub mod prelude {
    pub use crate::codec::{Codec, Decoded, LengthFieldCodec, LineCodec};
    pub use crate::config::{Distribution, GroupConfig};
    pub use crate::error::{BoxError, Error};
    pub use crate::group::EventGroup;
    pub use crate::listener::{CloseReason, Listener};
    pub use crate::session::{Session, SessionId, SessionState};
}
