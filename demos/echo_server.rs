//! Length-prefixed echo server.
//!
//! ```text
//! cargo run --example echo_server -- 127.0.0.1:9000
//! RUST_LOG=mill_nio=debug cargo run --example echo_server
//! ```
//!
//! Every frame received is sent back on the same session. The server stops
//! gracefully after the duration given by `ECHO_SECONDS` (default 60).

use bytes::Bytes;
use mill_nio::prelude::*;
use std::{
    env,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
    thread,
    time::Duration,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Default)]
struct EchoListener {
    frames: AtomicU64,
}

impl Listener<LengthFieldCodec> for EchoListener {
    fn on_session_connected(&self, session: &Session<LengthFieldCodec>) -> Result<(), BoxError> {
        info!(session = %session.id(), peer = %session.peer_addr(), "client connected");
        Ok(())
    }

    fn on_message_received(
        &self,
        session: &Session<LengthFieldCodec>,
        message: Bytes,
    ) -> Result<(), BoxError> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        session.send(&message)?;
        Ok(())
    }

    fn on_exception_caught(&self, session: &Session<LengthFieldCodec>, error: &Error) {
        warn!(session = %session.id(), %error, "session error");
    }

    fn on_session_closed(&self, session: &Session<LengthFieldCodec>, reason: CloseReason) {
        info!(session = %session.id(), %reason, "client disconnected");
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logging();

    let addr: SocketAddr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9000".to_string())
        .parse()?;
    let seconds: u64 = env::var("ECHO_SECONDS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(60);

    let config = GroupConfig::builder()
        .idle_timeout(Some(Duration::from_secs(30)))
        .bind(addr)
        .build();
    let group = EventGroup::new(config, LengthFieldCodec::default(), EchoListener::default())?;
    group.start()?;
    info!(addrs = ?group.local_addrs(), processors = group.config().processors, "echo server running");

    thread::sleep(Duration::from_secs(seconds));

    group.stop(Duration::from_secs(5))?;
    info!(
        frames = group.listener().frames.load(Ordering::Relaxed),
        "echo server stopped"
    );
    Ok(())
}
