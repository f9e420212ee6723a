//! Static TCP tunnels: fixed `listen=target` pairs carried over the same
//! encrypted tunnel as SOCKS5 traffic, without a handshake.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};

use crate::crypto::Cipher;
use crate::error::{Error, Result};
use crate::proxy::address::Address;
use crate::proxy::local::open_tunnel;
use crate::proxy::{accept_backoff, bind, log_failure, log_outcome, relay};

/// One static mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TcpTunnel {
    /// Local listen address
    pub listen: String,
    /// Destination the remote agent dials
    pub target: Address,
}

impl FromStr for TcpTunnel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (listen, target) = s
            .split_once('=')
            .ok_or_else(|| Error::config(format!("tcptun entry {:?} is not listen=target", s)))?;
        let listen = listen.trim();
        if listen.is_empty() {
            return Err(Error::config(format!("tcptun entry {:?} has no listen address", s)));
        }
        let target = target
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("tcptun entry {:?}: {}", s, e)))?;
        Ok(Self {
            listen: listen.to_string(),
            target,
        })
    }
}

impl TryFrom<String> for TcpTunnel {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TcpTunnel> for String {
    fn from(t: TcpTunnel) -> Self {
        t.to_string()
    }
}

impl fmt::Display for TcpTunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.listen, self.target)
    }
}

/// Parse a comma separated `-tcptun` list.
pub fn parse_list(s: &str) -> Result<Vec<TcpTunnel>> {
    s.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse)
        .collect()
}

/// Run one static tunnel.
///
/// Returns only if the listener cannot be bound.
pub async fn run_tcp_tunnel(tunnel: TcpTunnel, server: Address, cipher: Cipher) -> Result<()> {
    let listener = bind(&tunnel.listen).await?;
    tracing::info!("TCP tunnel {} listening", tunnel);
    serve(listener, tunnel.target, server, cipher).await;
    Ok(())
}

/// Accept connections for one static tunnel from an already bound listener.
pub async fn serve(listener: TcpListener, target: Address, server: Address, cipher: Cipher) {
    let target = Arc::new(target);
    let server = Arc::new(server);
    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                let target = Arc::clone(&target);
                let server = Arc::clone(&server);
                let cipher = cipher.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(client, peer, &target, &server, cipher).await {
                        log_failure(peer, &e);
                    }
                });
            }
            Err(e) => accept_backoff(&e).await,
        }
    }
}

async fn handle_client(
    mut client: TcpStream,
    peer: SocketAddr,
    target: &Address,
    server: &Address,
    cipher: Cipher,
) -> Result<()> {
    let mut tunnel = open_tunnel(server, cipher, target).await?;
    let outcome = relay(&mut client, &mut tunnel).await;
    log_outcome(peer, target, &outcome);
    Ok(())
}
