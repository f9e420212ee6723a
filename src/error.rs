//! Error types for the tunnel.

use std::io;

use thiserror::Error;

/// Result type alias for tunnel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up or running a proxied session.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad flag, bad `ss://` address, bad key material
    #[error("configuration error: {0}")]
    Config(String),

    /// SOCKS version byte was not 5
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch {
        /// Version this agent speaks
        expected: u8,
        /// Version byte the client sent
        actual: u8,
    },

    /// SOCKS command other than CONNECT
    #[error("unsupported SOCKS command: 0x{0:02x}")]
    UnsupportedCommand(u8),

    /// Address bytes could not be decoded
    #[error("malformed address: {0}")]
    MalformedAddress(String),

    /// Peer closed the connection in the middle of a message
    #[error("truncated message")]
    TruncatedMessage,

    /// Authentication tag mismatch or an impossible frame on the tunnel
    #[error("tunnel corrupted: authentication failed")]
    TunnelCorrupted,

    /// Could not reach the remote peer or the final destination
    #[error("failed to dial {target}: {source}")]
    Dial {
        /// Address that could not be reached
        target: String,
        /// Underlying connect error
        #[source]
        source: io::Error,
    },

    /// Cancellation signal raised by the other relay direction
    #[error("relay direction cancelled")]
    RelayTimeout,

    /// Listening socket could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested listen address
        addr: String,
        /// Underlying bind error
        #[source]
        source: io::Error,
    },

    /// Network I/O error
    #[error("network error: {0}")]
    Network(io::Error),

    /// Cryptographic setup failure
    #[error("cryptographic error: {0}")]
    Crypto(String),
}

impl Error {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new cryptographic error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    /// Create a new malformed address error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedAddress(msg.into())
    }

    /// Wrap this error so it can cross an `AsyncRead`/`AsyncWrite` boundary.
    ///
    /// `From<io::Error>` recovers the original variant on the other side.
    pub fn into_io(self) -> io::Error {
        match self {
            Error::Network(e) => e,
            Error::TruncatedMessage => io::Error::new(io::ErrorKind::UnexpectedEof, self),
            Error::RelayTimeout => io::Error::new(io::ErrorKind::TimedOut, self),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }

    /// Classify an error from a `read_exact` on a session connection.
    ///
    /// A bare end-of-stream means the peer hung up mid-message.
    pub fn from_read(err: io::Error) -> Self {
        match Error::from(err) {
            Error::Network(e) if e.kind() == io::ErrorKind::UnexpectedEof => Error::TruncatedMessage,
            other => other,
        }
    }

    /// The intentional cross-direction unblock of the duplex relay.
    pub fn is_relay_timeout(&self) -> bool {
        matches!(self, Error::RelayTimeout)
    }

    /// Failures worth flagging as possible tampering or probing.
    pub fn is_security_event(&self) -> bool {
        matches!(self, Error::TunnelCorrupted)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let wrapped = err.get_ref().is_some_and(|inner| inner.is::<Error>());
        if !wrapped {
            return Error::Network(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Error::Network(io::Error::other(other)),
            None => Error::Network(io::Error::other("empty wrapped error")),
        }
    }
}
