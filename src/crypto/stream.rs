//! Encrypted byte stream over a raw connection.
//!
//! Each direction is framed independently:
//!
//! ```text
//! [salt][len(2) + tag][payload + tag][len(2) + tag][payload + tag]...
//! ```
//!
//! The writer sends a fresh random salt before its first chunk; the reader
//! picks up the peer's salt from the first bytes it receives. Both derive the
//! direction's subkey from that salt, so nonces restart at zero under a key
//! that is never reused.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::crypto::{AeadCipher, Cipher, SecureRandom, LENGTH_SIZE, MAX_PAYLOAD_SIZE, TAG_SIZE};
use crate::error::Error;

/// Bytes requested from the underlying connection per read.
const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Salt,
    Length,
    Payload(usize),
    Corrupted,
}

struct DecryptReader {
    cipher: Option<AeadCipher>,
    state: ReadState,
    /// Raw bytes from the connection not yet consumed by a frame.
    incoming: BytesMut,
    /// Decrypted bytes not yet handed to the caller.
    plaintext: BytesMut,
}

struct EncryptWriter {
    cipher: Option<AeadCipher>,
    /// Sealed bytes not yet accepted by the connection.
    outgoing: BytesMut,
}

/// A connection wrapper that encrypts on write and decrypts on read.
///
/// Reads are cancel-safe: a partially received frame stays buffered inside
/// the stream when the read future is dropped.
pub struct CipherStream<S> {
    inner: S,
    cipher: Cipher,
    reader: DecryptReader,
    writer: EncryptWriter,
}

impl<S> CipherStream<S> {
    /// Wrap `inner` with the given cipher parameters.
    pub fn new(inner: S, cipher: Cipher) -> Self {
        Self {
            inner,
            cipher,
            reader: DecryptReader {
                cipher: None,
                state: ReadState::Salt,
                incoming: BytesMut::new(),
                plaintext: BytesMut::new(),
            },
            writer: EncryptWriter {
                cipher: None,
                outgoing: BytesMut::new(),
            },
        }
    }

    /// Unwrap the underlying connection, discarding buffered data.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

/// Read until `buf` holds at least `needed` bytes.
///
/// Yields `false` on a clean EOF with nothing buffered and
/// [`Error::TruncatedMessage`] on EOF in the middle of a frame.
fn poll_fill<S: AsyncRead + Unpin>(
    inner: &mut S,
    cx: &mut Context<'_>,
    buf: &mut BytesMut,
    needed: usize,
) -> Poll<io::Result<bool>> {
    let mut chunk = [0u8; READ_CHUNK];
    while buf.len() < needed {
        let mut read_buf = ReadBuf::new(&mut chunk);
        ready!(Pin::new(&mut *inner).poll_read(cx, &mut read_buf))?;

        let filled = read_buf.filled();
        if filled.is_empty() {
            if buf.is_empty() {
                return Poll::Ready(Ok(false));
            }
            return Poll::Ready(Err(Error::TruncatedMessage.into_io()));
        }
        buf.extend_from_slice(filled);
    }
    Poll::Ready(Ok(true))
}

impl DecryptReader {
    fn corrupted(&mut self) -> io::Error {
        self.state = ReadState::Corrupted;
        self.cipher = None;
        self.incoming.clear();
        Error::TunnelCorrupted.into_io()
    }

    fn open_block(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut block = self.incoming.split_to(len).to_vec();
        let opened = match self.cipher.as_mut() {
            Some(cipher) => cipher.open_in_place(&mut block),
            None => Err(Error::TunnelCorrupted),
        };
        match opened {
            Ok(()) => Ok(block),
            Err(_) => Err(self.corrupted()),
        }
    }

    fn poll_read<S: AsyncRead + Unpin>(
        &mut self,
        cx: &mut Context<'_>,
        inner: &mut S,
        master: &Cipher,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.plaintext.is_empty() {
                let n = buf.remaining().min(self.plaintext.len());
                buf.put_slice(&self.plaintext[..n]);
                self.plaintext.advance(n);
                return Poll::Ready(Ok(()));
            }

            match self.state {
                ReadState::Corrupted => {
                    return Poll::Ready(Err(Error::TunnelCorrupted.into_io()));
                }
                ReadState::Salt => {
                    let salt_len = master.kind().salt_len();
                    if !ready!(poll_fill(inner, cx, &mut self.incoming, salt_len))? {
                        return Poll::Ready(Ok(()));
                    }
                    let salt = self.incoming.split_to(salt_len);
                    self.cipher = Some(master.session(&salt).map_err(Error::into_io)?);
                    self.state = ReadState::Length;
                }
                ReadState::Length => {
                    let needed = LENGTH_SIZE + TAG_SIZE;
                    if !ready!(poll_fill(inner, cx, &mut self.incoming, needed))? {
                        return Poll::Ready(Ok(()));
                    }
                    let block = self.open_block(needed)?;
                    let len = u16::from_be_bytes([block[0], block[1]]) as usize;
                    if len == 0 || len > MAX_PAYLOAD_SIZE {
                        return Poll::Ready(Err(self.corrupted()));
                    }
                    self.state = ReadState::Payload(len);
                }
                ReadState::Payload(len) => {
                    let needed = len + TAG_SIZE;
                    if !ready!(poll_fill(inner, cx, &mut self.incoming, needed))? {
                        return Poll::Ready(Err(Error::TruncatedMessage.into_io()));
                    }
                    let block = self.open_block(needed)?;
                    self.plaintext.extend_from_slice(&block);
                    self.state = ReadState::Length;
                }
            }
        }
    }
}

impl EncryptWriter {
    fn seal_chunk(&mut self, master: &Cipher, data: &[u8]) -> Result<(), Error> {
        if self.cipher.is_none() {
            let salt = SecureRandom::salt(master.kind().salt_len());
            self.cipher = Some(master.session(&salt)?);
            self.outgoing.extend_from_slice(&salt);
        }
        let cipher = self
            .cipher
            .as_mut()
            .ok_or_else(|| Error::crypto("writer cipher missing"))?;

        let mut length = (data.len() as u16).to_be_bytes().to_vec();
        cipher.seal_in_place(&mut length)?;
        self.outgoing.extend_from_slice(&length);

        let mut payload = Vec::with_capacity(data.len() + TAG_SIZE);
        payload.extend_from_slice(data);
        cipher.seal_in_place(&mut payload)?;
        self.outgoing.extend_from_slice(&payload);
        Ok(())
    }

    fn poll_drain<S: AsyncWrite + Unpin>(
        &mut self,
        cx: &mut Context<'_>,
        inner: &mut S,
    ) -> Poll<io::Result<()>> {
        while !self.outgoing.is_empty() {
            let n = ready!(Pin::new(&mut *inner).poll_write(cx, &self.outgoing))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.outgoing.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CipherStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.reader.poll_read(cx, &mut this.inner, &this.cipher, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CipherStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.writer.poll_drain(cx, &mut this.inner))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let n = buf.len().min(MAX_PAYLOAD_SIZE);
        this.writer
            .seal_chunk(&this.cipher, &buf[..n])
            .map_err(Error::into_io)?;

        // The chunk is accepted; what the connection cannot take now goes
        // out on the next write or flush.
        if let Poll::Ready(Err(e)) = this.writer.poll_drain(cx, &mut this.inner) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.writer.poll_drain(cx, &mut this.inner))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.writer.poll_drain(cx, &mut this.inner))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}
