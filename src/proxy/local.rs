//! Local agent: SOCKS5 listener in front of the encrypted tunnel.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::crypto::{Cipher, CipherStream};
use crate::error::Result;
use crate::proxy::address::Address;
use crate::proxy::{accept_backoff, bind, log_failure, log_outcome, relay, socks5};

/// Run the SOCKS5 listener on `listen_addr`, tunnelling to `server`.
///
/// Returns only if the listener cannot be bound.
pub async fn run_socks5_proxy(listen_addr: &str, server: Address, cipher: Cipher) -> Result<()> {
    let listener = bind(listen_addr).await?;
    tracing::info!("SOCKS5 proxy listening on {}", listen_addr);
    serve(listener, server, cipher).await;
    Ok(())
}

/// Accept SOCKS5 clients from an already bound listener.
pub async fn serve(listener: TcpListener, server: Address, cipher: Cipher) {
    let server = Arc::new(server);
    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                tracing::debug!("SOCKS5 connection from {}", peer);

                let server = Arc::clone(&server);
                let cipher = cipher.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_socks5_client(client, peer, &server, cipher).await {
                        log_failure(peer, &e);
                    }
                });
            }
            Err(e) => accept_backoff(&e).await,
        }
    }
}

/// Open an encrypted connection to `server` announcing `target`.
///
/// The encoded address is flushed before returning, so the remote agent can
/// dial while the client is still composing its first request.
pub async fn open_tunnel(
    server: &Address,
    cipher: Cipher,
    target: &Address,
) -> Result<CipherStream<TcpStream>> {
    let stream = server.connect().await?;
    stream.set_nodelay(true)?;

    let mut tunnel = CipherStream::new(stream, cipher);
    tunnel.write_all(&target.encode()).await?;
    tunnel.flush().await?;
    Ok(tunnel)
}

async fn handle_socks5_client(
    mut client: TcpStream,
    peer: SocketAddr,
    server: &Address,
    cipher: Cipher,
) -> Result<()> {
    let target = socks5::handshake(&mut client).await?;
    tracing::debug!("{} requests {}", peer, target);

    let mut tunnel = open_tunnel(server, cipher, &target).await?;
    let outcome = relay(&mut client, &mut tunnel).await;
    log_outcome(peer, &target, &outcome);
    Ok(())
}
