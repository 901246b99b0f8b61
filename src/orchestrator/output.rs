//! Bounded output buffer with absolute byte positions.
//!
//! Positions count every byte appended since the buffer was created, so a
//! consumer polling with `since(position)` keeps a stable cursor even after
//! old bytes are evicted. Evicted bytes are simply skipped: the returned
//! position advances past the gap.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Append-only byte buffer that drops its oldest bytes past `capacity`.
#[derive(Debug)]
pub struct OutputBuffer {
    capacity: usize,
    data: VecDeque<u8>,
    /// Absolute position of `data[0]`.
    base: usize,
}

impl OutputBuffer {
    /// Create an empty buffer. A zero capacity is treated as one byte.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            data: VecDeque::new(),
            base: 0,
        }
    }

    /// Append bytes, evicting from the front to stay within capacity.
    pub fn append(&mut self, chunk: &[u8]) {
        if chunk.len() >= self.capacity {
            let skip = chunk.len() - self.capacity;
            self.base += self.data.len() + skip;
            self.data.clear();
            self.data.extend(&chunk[skip..]);
            return;
        }
        let overflow = (self.data.len() + chunk.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.data.drain(..overflow);
            self.base += overflow;
        }
        self.data.extend(chunk);
    }

    /// Bytes appended at or after `position`, plus the new cursor.
    ///
    /// A `position` older than the retained window starts at the oldest
    /// retained byte; one beyond the end yields nothing and moves the
    /// cursor back to the end.
    #[must_use]
    pub fn since(&self, position: usize) -> (Bytes, usize) {
        let end = self.position();
        let start = position.max(self.base);
        if start >= end {
            return (Bytes::new(), end);
        }
        let offset = start - self.base;
        let chunk: Vec<u8> = self.data.range(offset..).copied().collect();
        (Bytes::from(chunk), end)
    }

    /// Total bytes ever appended.
    #[must_use]
    pub fn position(&self) -> usize {
        self.base + self.data.len()
    }

    /// Bytes evicted so far.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.base
    }

    /// Retained byte count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Buffer shared between one assignment's readers and its slot.
pub type SharedOutput = Arc<Mutex<OutputBuffer>>;

/// Create a fresh shared buffer.
#[must_use]
pub fn shared(capacity: usize) -> SharedOutput {
    Arc::new(Mutex::new(OutputBuffer::new(capacity)))
}

/// Copy everything from `source` into `buffer` until EOF or cancellation.
pub async fn pump<R>(mut source: R, buffer: SharedOutput, cancel: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0_u8; 8192];
    loop {
        let read = tokio::select! {
            () = cancel.cancelled() => break,
            read = source.read(&mut chunk) => read,
        };
        match read {
            Ok(0) => break,
            Ok(n) => buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .append(&chunk[..n]),
            Err(err) => {
                debug!(%err, "output stream closed with error");
                break;
            }
        }
    }
}
