//! Random-access image streams
//!
//! Every byte source in a volume (compressed image streams, raw zip
//! segments, fixed-pattern streams, assembled maps) implements
//! [`ImageStream`]. Streams are cursor-free: `read_at` takes the absolute
//! position, so one stream can back any number of map regions and readers
//! without a shared position. Per-reader cursors live in [`StreamChannel`].

pub mod bevvy;
pub mod cache;
pub mod chunked;
pub mod segment;
pub mod symbolic;

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

pub use chunked::{ChunkAddress, ChunkedStream, StreamConfig};
pub use segment::SegmentStream;
pub use symbolic::{RepeatedStream, SymbolicStream};

/// Declared size of streams with no logical end (fixed-pattern streams)
pub const UNBOUNDED_SIZE: u64 = i64::MAX as u64;

// =============================================================================
// Stream Trait
// =============================================================================

/// What backs a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Chunked, segmented, possibly compressed `aff4:ImageStream`
    Chunked,
    /// Single zip entry
    Segment,
    /// Infinite fixed byte pattern
    Pattern,
    /// Materialized `aff4:Map`
    Map,
}

/// Read-only random-access byte stream
pub trait ImageStream: Send + Sync {
    /// Resource identifier of the stream
    fn resource_id(&self) -> &str;

    /// Logical size in bytes ([`UNBOUNDED_SIZE`] for pattern streams)
    fn size(&self) -> u64;

    /// Read up to `buf.len()` bytes at `pos`; `Ok(0)` at or past the end
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize>;

    fn kind(&self) -> StreamKind;

    /// Release resources; repeated calls are no-ops
    fn close(&self) -> io::Result<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }
}

/// Shared handle to a stream
pub type StreamHandle = Arc<dyn ImageStream>;

/// Bytes readable from `pos` in a stream of `size` bytes, capped at `want`
pub(crate) fn available(size: u64, pos: u64, want: usize) -> usize {
    if pos >= size {
        0
    } else {
        (size - pos).min(want as u64) as usize
    }
}

/// Read until `buf` is full or the stream ends; returns bytes read
pub fn read_full(stream: &dyn ImageStream, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        let n = stream.read_at(offset + read as u64, &mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}

/// Read a whole stream into memory
pub fn read_to_vec(stream: &dyn ImageStream) -> io::Result<Vec<u8>> {
    let size = usize::try_from(stream.size()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "stream too large to buffer")
    })?;
    let mut buf = vec![0u8; size];
    let n = read_full(stream, 0, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

fn read_only() -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, "AFF4 streams are read-only")
}

// =============================================================================
// Channel (cursor over a stream)
// =============================================================================

/// Positioned reader over a stream
///
/// One cursor per channel; share the underlying [`StreamHandle`] rather than
/// the channel between threads.
pub struct StreamChannel {
    stream: StreamHandle,
    position: u64,
}

impl StreamChannel {
    pub fn new(stream: StreamHandle) -> Self {
        Self {
            stream,
            position: 0,
        }
    }

    pub fn stream(&self) -> &StreamHandle {
        &self.stream
    }

    pub fn size(&self) -> u64 {
        self.stream.size()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the cursor; positions past the end clamp to `size - 1`
    pub fn set_position(&mut self, position: u64) -> io::Result<()> {
        self.ensure_open()?;
        let size = self.stream.size();
        self.position = if size != UNBOUNDED_SIZE && position >= size {
            size.saturating_sub(1)
        } else {
            position
        };
        Ok(())
    }

    /// Read at `offset` until `buf` is full or the stream ends, keeping the cursor
    pub fn read_full_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        let saved = self.position;
        let result = read_full(self.stream.as_ref(), offset, buf);
        self.position = saved;
        result
    }

    pub fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(read_only())
    }

    pub fn truncate(&mut self, _size: u64) -> io::Result<()> {
        Err(read_only())
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_open()
    }

    pub fn close(&mut self) -> io::Result<()> {
        self.stream.close()
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.stream.is_open() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream is closed"))
        }
    }
}

impl Read for StreamChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.stream.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for StreamChannel {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(delta) => self.stream.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;
        self.set_position(target)?;
        Ok(self.position)
    }
}
