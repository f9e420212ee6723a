//! Server side of the SOCKS5 handshake (RFC 1928, CONNECT only).
//!
//! ```text
//! client                         agent
//!   05 N METHODS...        ->
//!                          <-    05 00
//!   05 CMD 00 ATYP ADDR PORT ->
//!                          <-    05 00 00 01 00 00 00 00 00 00
//! ```
//!
//! Only "no authentication" is offered. Failures are signalled by closing
//! the connection; no error reply is written.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::proxy::address::Address;

/// Protocol version byte.
pub const SOCKS_VERSION: u8 = 0x05;

/// "No authentication required" method.
pub const METHOD_NO_AUTH: u8 = 0x00;

/// CONNECT command.
pub const CMD_CONNECT: u8 = 0x01;

/// Reply to the greeting.
pub const METHOD_REPLY: [u8; 2] = [SOCKS_VERSION, METHOD_NO_AUTH];

/// Success reply, bound address 0.0.0.0:0.
pub const SUCCEEDED_REPLY: [u8; 10] = [SOCKS_VERSION, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

/// Where a handshake currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for the version/method greeting
    AwaitingGreeting,
    /// Method selected, waiting for the CONNECT request
    AwaitingRequest,
    /// Success reply sent; the connection now carries payload
    Established,
    /// The handshake failed and the connection must be closed
    Failed,
}

/// One handshake against a freshly accepted client connection.
pub struct Handshake<'a, S> {
    stream: &'a mut S,
    state: HandshakeState,
}

impl<'a, S> Handshake<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Start a handshake on `stream`.
    pub fn new(stream: &'a mut S) -> Self {
        Self {
            stream,
            state: HandshakeState::AwaitingGreeting,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Drive the handshake to completion and return the requested destination.
    ///
    /// Any error leaves the handshake in [`HandshakeState::Failed`].
    pub async fn run(&mut self) -> Result<Address> {
        match self.drive().await {
            Ok(addr) => Ok(addr),
            Err(e) => {
                self.state = HandshakeState::Failed;
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<Address> {
        if self.state != HandshakeState::AwaitingGreeting {
            return Err(Error::Network(io::Error::other(format!(
                "handshake cannot restart from {:?}",
                self.state
            ))));
        }

        self.negotiate_method().await?;
        self.state = HandshakeState::AwaitingRequest;

        let destination = self.read_request().await?;
        self.stream.write_all(&SUCCEEDED_REPLY).await?;
        self.stream.flush().await?;
        self.state = HandshakeState::Established;

        Ok(destination)
    }

    async fn negotiate_method(&mut self) -> Result<()> {
        let mut header = [0u8; 2];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(Error::from_read)?;
        check_version(header[0])?;

        // Offered methods are read and ignored; the reply always picks "no auth".
        let mut methods = vec![0u8; header[1] as usize];
        self.stream
            .read_exact(&mut methods)
            .await
            .map_err(Error::from_read)?;

        self.stream.write_all(&METHOD_REPLY).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_request(&mut self) -> Result<Address> {
        let mut header = [0u8; 4];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(Error::from_read)?;
        let [version, command, _reserved, atyp] = header;

        check_version(version)?;
        if command != CMD_CONNECT {
            return Err(Error::UnsupportedCommand(command));
        }

        Address::read_body(atyp, &mut *self.stream).await
    }
}

fn check_version(actual: u8) -> Result<()> {
    if actual != SOCKS_VERSION {
        return Err(Error::ProtocolVersionMismatch {
            expected: SOCKS_VERSION,
            actual,
        });
    }
    Ok(())
}

/// Run a full handshake on `stream`, returning the destination.
pub async fn handshake<S>(stream: &mut S) -> Result<Address>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    Handshake::new(stream).run().await
}
