//! Newline-delimited framing over byte streams.
//!
//! Servers write one JSON message per line on stdout, but a read may return
//! any slice of that stream: half a message, several messages, or a message
//! followed by the start of the next one. [`LineFramer`] accumulates chunks
//! and yields complete lines, keeping the trailing fragment for the next
//! chunk. [`LineReader`] drives a framer from an [`AsyncRead`].
//!
//! On the way out, [`LineWriter`] serializes whole messages one at a time so
//! that concurrent senders never interleave partial payloads.

use std::collections::VecDeque;

use async_lock::Mutex;
use bytes::{Buf, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Maximum size of a single line in either direction (16 MiB).
pub const MAX_LINE_SIZE: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Splits an append-only byte stream into lines.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    /// Set while skipping the rest of an oversize line.
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(MAX_LINE_SIZE)
    }
}

impl LineFramer {
    /// Create a framer that drops lines longer than `max_line` bytes.
    #[must_use]
    pub fn new(max_line: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    /// Append a chunk and return every line it completes.
    ///
    /// Lines are returned without their terminator and with surrounding
    /// whitespace trimmed; blank lines are skipped. Invalid UTF-8 is replaced
    /// rather than rejected, since such a line cannot be a protocol message
    /// anyway.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();

        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let raw = self.buf.split_to(pos + 1);
            self.scanned = 0;
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if raw.len() - 1 > self.max_line {
                tracing::warn!(size = raw.len() - 1, max = self.max_line, "Dropping oversize line");
                continue;
            }
            if let Some(line) = Self::decode(&raw[..pos]) {
                lines.push(line);
            }
        }

        self.scanned = self.buf.len();
        if self.buf.len() > self.max_line {
            tracing::warn!(
                size = self.buf.len(),
                max = self.max_line,
                "Dropping oversize partial line"
            );
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
        }

        lines
    }

    /// Take whatever unterminated fragment remains at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.buf.split();
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        Self::decode(&rest)
    }

    /// Bytes currently retained as an incomplete line.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buf.remaining()
    }

    fn decode(raw: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

/// Reads complete lines from an async byte source.
#[derive(Debug)]
pub struct LineReader<R> {
    reader: R,
    framer: LineFramer,
    ready: VecDeque<String>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wrap a reader with the default line size limit.
    pub fn new(reader: R) -> Self {
        Self::with_framer(reader, LineFramer::default())
    }

    /// Wrap a reader with a custom framer.
    pub fn with_framer(reader: R, framer: LineFramer) -> Self {
        Self {
            reader,
            framer,
            ready: VecDeque::new(),
            eof: false,
        }
    }

    /// Read the next complete line.
    ///
    /// Returns `Ok(None)` once the source is exhausted. A final line without a
    /// trailing newline is still returned.
    pub async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
                self.ready.extend(self.framer.finish());
            } else {
                tracing::trace!(bytes = n, "Read chunk");
                self.ready.extend(self.framer.push(&chunk[..n]));
            }
        }
    }
}

/// Writes one serialized message per line, flushing after each.
///
/// The inner writer sits behind an async mutex: a message is written and
/// flushed in full before the next sender gets the lock. A send that is
/// cancelled part way leaves a torn line behind; the next send terminates it
/// first so the peer can resync at the newline.
#[derive(Debug)]
pub struct LineWriter<W> {
    inner: Mutex<Option<Sink<W>>>,
}

#[derive(Debug)]
struct Sink<W> {
    writer: W,
    /// Set while a line is partially written.
    torn: bool,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(Some(Sink {
                writer,
                torn: false,
            })),
        }
    }

    /// Serialize `message` as one line and flush it.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<(), TransportError> {
        let json = serde_json::to_string(message)?;
        self.send_line(&json).await
    }

    /// Write a pre-serialized line and flush it.
    pub async fn send_line(&self, line: &str) -> Result<(), TransportError> {
        if line.len() > MAX_LINE_SIZE {
            return Err(TransportError::MessageTooLarge {
                size: line.len(),
                max: MAX_LINE_SIZE,
            });
        }

        let mut guard = self.inner.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::ConnectionClosed)?;
        if sink.torn {
            tracing::debug!("Terminating line torn by a cancelled write");
            sink.writer.write_all(b"\n").await?;
        }
        sink.torn = true;
        sink.writer.write_all(line.as_bytes()).await?;
        sink.writer.write_all(b"\n").await?;
        sink.torn = false;
        sink.writer.flush().await?;
        tracing::trace!(bytes = line.len(), "Wrote line");
        Ok(())
    }

    /// Shut down and drop the writer, signalling end of input to the peer.
    ///
    /// Waits for any send in progress. Closing twice is a no-op.
    pub async fn close(&self) {
        let sink = self.inner.lock().await.take();
        if let Some(mut sink) = sink {
            // The peer may already be gone.
            let _ = sink.writer.shutdown().await;
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}
