//! Raw zip segment streams
//!
//! Any volume entry can be read as a stream. Stored entries are read in
//! place from the volume; deflated entries are inflated into memory, up to
//! [`MAX_BUFFERED_SEGMENT`] bytes.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{trace, warn};

use super::{available, ImageStream, StreamKind};
use crate::archive::{Archive, EntryInfo};
use crate::error::{Aff4Error, Aff4Result};

/// Largest compressed segment that will be buffered in memory
pub const MAX_BUFFERED_SEGMENT: u64 = 32 * 1024 * 1024;

enum Backing {
    Stored {
        archive: Arc<dyn Archive>,
        data_offset: u64,
    },
    Buffered(Vec<u8>),
}

/// Stream over a single volume entry
pub struct SegmentStream {
    resource: String,
    size: u64,
    backing: Backing,
    closed: AtomicBool,
}

impl SegmentStream {
    /// Open `entry` of `archive` as the stream `resource`
    pub fn open(resource: &str, archive: Arc<dyn Archive>, entry: &EntryInfo) -> Aff4Result<Self> {
        let backing = if entry.stored {
            Backing::Stored {
                archive,
                data_offset: entry.data_offset,
            }
        } else if entry.size < MAX_BUFFERED_SEGMENT {
            Backing::Buffered(archive.read_entry(&entry.name)?)
        } else {
            return Err(Aff4Error::Unsupported(format!(
                "Compressed segment {} is larger than {} bytes",
                entry.name, MAX_BUFFERED_SEGMENT
            )));
        };
        let size = match &backing {
            Backing::Buffered(data) => {
                if data.len() as u64 != entry.size {
                    warn!(
                        entry = %entry.name,
                        declared = entry.size,
                        inflated = data.len(),
                        "Segment inflated to a different size than declared"
                    );
                }
                data.len() as u64
            }
            Backing::Stored { .. } => entry.size,
        };
        trace!(resource = %resource, entry = %entry.name, stored = entry.stored, size, "Opened segment");
        Ok(Self {
            resource: resource.to_string(),
            size,
            backing,
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.backing, Backing::Buffered(_))
    }
}

impl ImageStream for SegmentStream {
    fn resource_id(&self) -> &str {
        &self.resource
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Aff4Error::Closed.into());
        }
        let n = available(self.size, pos, buf.len());
        if n == 0 {
            return Ok(0);
        }
        match &self.backing {
            Backing::Stored {
                archive,
                data_offset,
            } => {
                let read = archive.read_at(data_offset + pos, &mut buf[..n])?;
                if read < n {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("Short read in segment {}", self.resource),
                    ));
                }
                Ok(read)
            }
            Backing::Buffered(data) => {
                let start = pos as usize;
                buf[..n].copy_from_slice(&data[start..start + n]);
                Ok(n)
            }
        }
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Segment
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}
