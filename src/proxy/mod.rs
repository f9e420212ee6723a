//! Proxy agents and the protocol pieces they share.
//!
//! Local side: a SOCKS5 listener (and optional static tunnels) that carry
//! each client over its own encrypted connection to the remote agent.
//! Remote side: a tunnel listener that decrypts, dials the destination in
//! the clear, and relays.

pub mod address;
pub mod local;
pub mod relay;
pub mod remote;
pub mod socks5;
pub mod tcptun;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::error::{Error, Result};
use address::Address;
use relay::RelayOutcome;

pub use address::Host;
pub use relay::relay;

/// Pause after a failed accept, so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bind a listening socket, reporting failure as [`Error::Bind`].
///
/// A bare `:port` listens on all IPv4 interfaces.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let result = match addr.strip_prefix(':') {
        Some(port) => TcpListener::bind(format!("0.0.0.0:{}", port)).await,
        None => TcpListener::bind(addr).await,
    };
    result.map_err(|source| Error::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Log a failed accept and back off before the next one.
async fn accept_backoff(err: &io::Error) {
    tracing::warn!("Accept error: {}", err);
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

/// Log the end of one session.
fn log_outcome(peer: SocketAddr, target: &Address, outcome: &RelayOutcome) {
    match &outcome.error {
        None => tracing::debug!(
            "{} <-> {} closed ({} bytes up, {} bytes down)",
            peer,
            target,
            outcome.client_to_upstream,
            outcome.upstream_to_client
        ),
        Some(e) => log_failure(peer, e),
    }
}

/// Log a session that ended in an error.
fn log_failure(peer: SocketAddr, err: &Error) {
    if err.is_security_event() {
        tracing::warn!("Session from {} rejected: {}", peer, err);
    } else {
        tracing::debug!("Session from {} failed: {}", peer, err);
    }
}
