//! Remote agent: decrypts tunnels and dials their destinations.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::crypto::{Cipher, CipherStream};
use crate::error::{Error, Result};
use crate::proxy::address::Address;
use crate::proxy::{accept_backoff, bind, log_failure, log_outcome, relay};

/// How long a new tunnel may take to deliver its salt and target address.
const TARGET_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the tunnel listener on `listen_addr`.
///
/// Returns only if the listener cannot be bound.
pub async fn run_tunnel_server(listen_addr: &str, cipher: Cipher) -> Result<()> {
    let listener = bind(listen_addr).await?;
    tracing::info!("Tunnel server listening on {}", listen_addr);
    serve(listener, cipher).await;
    Ok(())
}

/// Accept tunnel connections from an already bound listener.
pub async fn serve(listener: TcpListener, cipher: Cipher) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!("Tunnel connection from {}", peer);

                let cipher = cipher.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_tunnel(stream, peer, cipher).await {
                        log_failure(peer, &e);
                    }
                });
            }
            Err(e) => accept_backoff(&e).await,
        }
    }
}

async fn handle_tunnel(stream: TcpStream, peer: SocketAddr, cipher: Cipher) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut tunnel = CipherStream::new(stream, cipher);

    // A bad address means a bad tunnel; there is nothing to negotiate.
    let target = read_target(&mut tunnel).await?;
    tracing::debug!("{} tunnels to {}", peer, target);

    let mut destination = target.connect().await?;
    let outcome = relay(&mut tunnel, &mut destination).await;
    log_outcome(peer, &target, &outcome);
    Ok(())
}

/// Read the target address that opens every tunnel.
///
/// A peer that stays silent past [`TARGET_TIMEOUT`] is treated as having
/// hung up mid-message.
async fn read_target<S: AsyncRead + Unpin>(tunnel: &mut S) -> Result<Address> {
    timeout(TARGET_TIMEOUT, Address::read_from(tunnel))
        .await
        .map_err(|_| Error::TruncatedMessage)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherKind;
    use tokio::io::{duplex, AsyncWriteExt};
    use tokio::time::Instant;

    fn cipher() -> Cipher {
        Cipher::from_password(CipherKind::ChaCha20Poly1305, "remote")
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_tunnel_times_out() {
        let (_peer, agent) = duplex(1024);
        let mut tunnel = CipherStream::new(agent, cipher());

        let start = Instant::now();
        let err = read_target(&mut tunnel).await.unwrap_err();
        assert!(matches!(err, Error::TruncatedMessage));
        assert!(start.elapsed() >= TARGET_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_read_within_timeout() {
        let (peer, agent) = duplex(1024);
        let mut sender = CipherStream::new(peer, cipher());
        let target = Address::domain("example.com", 443).unwrap();
        sender.write_all(&target.encode()).await.unwrap();
        sender.flush().await.unwrap();

        let mut tunnel = CipherStream::new(agent, cipher());
        assert_eq!(read_target(&mut tunnel).await.unwrap(), target);
    }
}
