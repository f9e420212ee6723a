//! Bidirectional byte relay between two established connections.
//!
//! Both directions run concurrently inside [`relay`] and are joined before
//! it returns. The first direction to stop arms a shared [`Deadline`]; every
//! pending and later read or write in the other direction then fails fast
//! with [`Error::RelayTimeout`], which is not reported to the caller.

use std::future::Future;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::crypto::MAX_PAYLOAD_SIZE;
use crate::error::Error;

/// Bytes moved per read; one full tunnel chunk.
pub const RELAY_BUFFER_SIZE: usize = MAX_PAYLOAD_SIZE;

/// Result of one relayed session.
#[derive(Debug, Default)]
pub struct RelayOutcome {
    /// Bytes copied from the client side to the upstream side
    pub client_to_upstream: u64,
    /// Bytes copied from the upstream side to the client side
    pub upstream_to_client: u64,
    /// First genuine error, if any
    pub error: Option<Error>,
}

impl RelayOutcome {
    /// True when both directions ended without a genuine error.
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// A one-shot cancellation point shared by the two relay directions.
///
/// Once armed it stays armed, so checks made after the fact fire at once.
#[derive(Debug)]
pub struct Deadline {
    tx: watch::Sender<bool>,
}

impl Deadline {
    /// Create an unarmed deadline.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Make every current and future [`race`](Self::race) fail.
    pub fn arm(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the deadline has been armed.
    pub fn is_armed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the deadline is armed.
    pub async fn expired(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once armed.
        let _ = rx.wait_for(|armed| *armed).await;
    }

    /// Run `op` unless the deadline fires first.
    ///
    /// An armed deadline wins even when `op` is also ready.
    pub async fn race<F, T>(&self, op: F) -> Result<T, Error>
    where
        F: Future<Output = io::Result<T>>,
    {
        tokio::select! {
            biased;
            () = self.expired() => Err(Error::RelayTimeout),
            res = op => res.map_err(Error::from),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy `client` to `upstream` and back until either direction stops.
///
/// Neither connection is closed here; the caller owns both.
pub async fn relay<A, B>(client: &mut A, upstream: &mut B) -> RelayOutcome
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = Deadline::new();
    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut upstream_rd, mut upstream_wr) = tokio::io::split(upstream);

    let ((sent, sent_err), (received, received_err)) = tokio::join!(
        pipe(&mut client_rd, &mut upstream_wr, &deadline),
        pipe(&mut upstream_rd, &mut client_wr, &deadline),
    );

    let error = [sent_err, received_err]
        .into_iter()
        .flatten()
        .find(|e| !e.is_relay_timeout());

    RelayOutcome {
        client_to_upstream: sent,
        upstream_to_client: received,
        error,
    }
}

/// One relay direction. Returns bytes written and the error that ended it.
async fn pipe<R, W>(reader: &mut R, writer: &mut W, deadline: &Deadline) -> (u64, Option<Error>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut copied = 0u64;

    let result = loop {
        let n = match deadline.race(reader.read(&mut buf)).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e),
        };

        let write = async {
            writer.write_all(&buf[..n]).await?;
            writer.flush().await
        };
        if let Err(e) = deadline.race(write).await {
            break Err(e);
        }
        copied += n as u64;
    };

    deadline.arm();
    (copied, result.err())
}
