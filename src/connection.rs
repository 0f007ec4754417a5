//! Connection layer (C2): line-framed duplex channel per client.
//!
//! The raw non-blocking socket machinery is supplied by `tokio`
//! (out of scope per spec.md §1: "low-level line-buffered socket
//! reads"); this module supplies the part that *is* in scope — the
//! fixed-length line framing, truncation of over-long lines, and the
//! logon/okay/closed connection lifecycle.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;

/// No line exceeds this many bytes; longer lines are truncated rather
/// than rejected (spec.md §4.1).
pub const READBUF_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Unvalidated,
    Okay { user: usize },
    Closed,
}

/// A connection's write half plus its logon state. The read half lives
/// in a dedicated reader task (see `server.rs`) that only ever forwards
/// complete lines back to the core loop; all writes happen directly
/// from the core loop so a short write is observed synchronously.
#[derive(Debug)]
pub struct Connection {
    pub status: ConnStatus,
    writer: OwnedWriteHalf,
}

impl Connection {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self { status: ConnStatus::Unvalidated, writer }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.status, ConnStatus::Closed)
    }

    pub fn user(&self) -> Option<usize> {
        match self.status {
            ConnStatus::Okay { user } => Some(user),
            _ => None,
        }
    }

    /// Best-effort write of one already-newline-terminated line. A
    /// short or failed write is fatal for the connection; the caller
    /// is responsible for transitioning `status` to `Closed` when this
    /// returns `Err`.
    pub async fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes()).await
    }
}

/// Bounded-length line reader built on a plain `AsyncRead`.
///
/// Buffers raw bytes across calls (several lines can arrive in one
/// socket read, and one line can span several reads); a line longer
/// than `READBUF_LEN` is truncated to that length rather than growing
/// memory unboundedly or erroring.
pub struct LineReader<R> {
    inner: R,
    raw: std::collections::VecDeque<u8>,
    current: Vec<u8>,
    discarding: bool,
}

impl<R: AsyncReadExt + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, raw: std::collections::VecDeque::new(), current: Vec::new(), discarding: false }
    }

    /// Returns `Ok(Some(line))` for a complete line (without the
    /// trailing `\n`/`\r\n`), `Ok(None)` on EOF, or `Err` on I/O
    /// failure.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            while let Some(byte) = self.raw.pop_front() {
                if byte == b'\n' {
                    self.discarding = false;
                    let mut line = std::mem::take(&mut self.current);
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                if !self.discarding {
                    if self.current.len() < READBUF_LEN {
                        self.current.push(byte);
                    } else {
                        self.discarding = true;
                    }
                }
            }

            let mut chunk = [0u8; 1024];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.raw.extend(chunk[..n].iter().copied());
        }
    }
}
