//! Accepts TCP connections and spawns one session task per connection.
//!
//! Simplified from `tvix-store`'s `listener` module: that one wraps
//! `tokio_listener` to also support systemd socket activation and Unix
//! sockets for tonic's `Connected` trait. This service only ever speaks raw
//! TCP to its own framing, so a plain `TcpListener` accept loop suffices.

use fcatalog_engine::CatalogRegistry;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::session::{run_session, SessionConfig};

/// Runs the accept loop until a fatal I/O error occurs on the listener
/// itself. A failure to accept one connection is logged and does not stop
/// the loop; a failure of `accept()` itself (exhausted file descriptors, the
/// listener having been closed) does.
pub async fn serve(
    listener: TcpListener,
    registry: CatalogRegistry,
    config: SessionConfig,
) -> std::io::Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                return Err(e);
            }
        };
        info!(%peer, "accepted connection");

        let registry = registry.clone();
        tokio::spawn(run_session(stream, peer, registry, config));
    }
}
