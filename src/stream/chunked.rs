//! Chunked image streams (`aff4:ImageStream`)
//!
//! Stream bytes are cut into `chunk_size` chunks, each stored compressed (or
//! verbatim when compression did not help), and grouped `chunks_per_segment`
//! to a segment ("bevvy"). A read at offset `o` resolves as:
//!
//! ```text
//! chunk_id   = o / chunk_size
//! segment_id = chunk_id / chunks_per_segment
//! local_id   = chunk_id % chunks_per_segment
//! ```
//!
//! The segment's index gives the chunk's `(offset, raw_length)`; the raw
//! bytes are read from the volume and decompressed unless `raw_length ==
//! chunk_size`. Segment indexes and decompressed chunks are each held in a
//! bounded best-effort cache.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use super::bevvy::BevvyIndex;
use super::cache::BoundedCache;
use super::{available, ImageStream, StreamKind};
use crate::archive::Archive;
use crate::codec::{CompressionCodec, CompressionKind};
use crate::error::{Aff4Error, Aff4Result};
use crate::lexicon::{Lexicon, DEFAULT_CHUNKS_PER_SEGMENT, DEFAULT_CHUNK_SIZE};
use crate::model::MetadataStore;

/// Largest raw length accepted for one chunk of `chunk_size` bytes
pub fn max_raw_chunk(chunk_size: u64) -> u64 {
    chunk_size.saturating_mul(2).saturating_add(1024)
}

// =============================================================================
// Configuration
// =============================================================================

/// Cache sizing for chunked streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Segment indexes kept per stream
    pub bevvy_cache_entries: u64,
    /// Byte budget for decompressed chunks per stream
    pub chunk_cache_bytes: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bevvy_cache_entries: 10,
            chunk_cache_bytes: 8 * 1024 * 1024,
        }
    }
}

impl StreamConfig {
    /// Chunk cache capacity in entries for a given chunk size
    pub fn chunk_cache_entries(&self, chunk_size: u64) -> u64 {
        (self.chunk_cache_bytes / chunk_size.max(1)).max(1)
    }
}

/// Chunk geometry and compression of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLayout {
    pub size: u64,
    pub chunk_size: i32,
    pub chunks_per_segment: i32,
    pub compression: CompressionKind,
}

impl StreamLayout {
    /// Read the layout of `resource`, applying lexicon defaults
    pub fn from_metadata(metadata: &dyn MetadataStore, resource: &str) -> Aff4Result<Self> {
        let method = metadata
            .read_resource(resource, Lexicon::CompressionMethod)
            .or_else(|| metadata.read_string(resource, Lexicon::CompressionMethod))
            .unwrap_or_else(|| Lexicon::NoCompression.value());
        let compression = CompressionKind::for_resource(&method)
            .ok_or_else(|| Aff4Error::Unsupported(format!("Unknown compression method {}", method)))?;
        Ok(Self {
            size: metadata
                .read_long(resource, Lexicon::Size)
                .unwrap_or(0)
                .max(0) as u64,
            chunk_size: metadata
                .read_int(resource, Lexicon::ChunkSize)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            chunks_per_segment: metadata
                .read_int(resource, Lexicon::ChunksInSegment)
                .unwrap_or(DEFAULT_CHUNKS_PER_SEGMENT),
            compression,
        })
    }
}

// =============================================================================
// Addressing
// =============================================================================

/// Where the byte at a stream offset lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkAddress {
    pub chunk_id: u64,
    pub segment_id: u64,
    /// Chunk index within its segment
    pub local_id: u64,
    /// Stream offset of the chunk's first byte
    pub aligned_offset: u64,
}

impl ChunkAddress {
    pub fn of(offset: u64, chunk_size: u64, chunks_per_segment: u64) -> Self {
        let chunk_id = offset / chunk_size;
        Self {
            chunk_id,
            segment_id: chunk_id / chunks_per_segment,
            local_id: chunk_id % chunks_per_segment,
            aligned_offset: chunk_id * chunk_size,
        }
    }
}

// =============================================================================
// Stream
// =============================================================================

/// Random-access reader over a chunked, segmented stream
pub struct ChunkedStream {
    resource: String,
    volume_id: String,
    archive: Arc<dyn Archive>,
    size: u64,
    chunk_size: u64,
    chunks_per_segment: u64,
    codec: CompressionCodec,
    bevvies: BoundedCache<u64, BevvyIndex>,
    chunks: BoundedCache<u64, Vec<u8>>,
    closed: AtomicBool,
}

impl ChunkedStream {
    /// Stream `resource` stored in the volume `volume_id`
    pub fn new(
        resource: &str,
        volume_id: &str,
        archive: Arc<dyn Archive>,
        layout: StreamLayout,
        config: StreamConfig,
    ) -> Aff4Result<Self> {
        let codec = CompressionCodec::new(layout.compression, layout.chunk_size)?;
        if layout.chunks_per_segment <= 0 {
            return Err(Aff4Error::Unsupported(format!(
                "Illegal chunks per segment {}",
                layout.chunks_per_segment
            )));
        }
        let chunk_size = layout.chunk_size as u64;
        debug!(
            resource = %resource,
            size = layout.size,
            chunk_size,
            chunks_per_segment = layout.chunks_per_segment,
            codec = ?layout.compression,
            "Opened image stream"
        );
        Ok(Self {
            resource: resource.to_string(),
            volume_id: volume_id.to_string(),
            archive,
            size: layout.size,
            chunk_size,
            chunks_per_segment: layout.chunks_per_segment as u64,
            codec,
            bevvies: BoundedCache::new(config.bevvy_cache_entries),
            chunks: BoundedCache::new(config.chunk_cache_entries(chunk_size)),
            closed: AtomicBool::new(false),
        })
    }

    /// Stream whose layout is described in `metadata`
    pub fn from_metadata(
        resource: &str,
        volume_id: &str,
        archive: Arc<dyn Archive>,
        metadata: &dyn MetadataStore,
        config: StreamConfig,
    ) -> Aff4Result<Self> {
        let layout = StreamLayout::from_metadata(metadata, resource)?;
        Self::new(resource, volume_id, archive, layout, config)
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunks_per_segment(&self) -> u64 {
        self.chunks_per_segment
    }

    pub fn codec(&self) -> &CompressionCodec {
        &self.codec
    }

    pub fn address(&self, offset: u64) -> ChunkAddress {
        ChunkAddress::of(offset, self.chunk_size, self.chunks_per_segment)
    }

    fn chunk(&self, addr: &ChunkAddress) -> Aff4Result<Arc<Vec<u8>>> {
        self.chunks
            .get_or_load(addr.aligned_offset, || self.load_chunk(addr))
    }

    fn load_chunk(&self, addr: &ChunkAddress) -> Aff4Result<Vec<u8>> {
        let bevvy = self.bevvies.get_or_load(addr.segment_id, || {
            BevvyIndex::load(
                self.archive.as_ref(),
                &self.volume_id,
                &self.resource,
                addr.segment_id,
            )
        })?;
        let point = bevvy.point(addr.local_id).ok_or_else(|| {
            Aff4Error::Missing(format!(
                "Chunk {} of segment {} in {}",
                addr.local_id, addr.segment_id, self.resource
            ))
        })?;

        let limit = max_raw_chunk(self.chunk_size);
        if u64::from(point.length) > limit {
            return Err(Aff4Error::Format(format!(
                "Chunk {} of {} claims {} raw bytes, limit is {}",
                addr.chunk_id, self.resource, point.length, limit
            )));
        }

        let physical = bevvy.data_offset() + point.offset;
        trace!(
            chunk = addr.chunk_id,
            bevvy = addr.segment_id,
            local = addr.local_id,
            physical,
            raw = point.length,
            "Loading chunk"
        );
        let mut raw = vec![0u8; point.length as usize];
        let read = self.archive.read_at(physical, &mut raw)?;
        if read < raw.len() {
            return Err(Aff4Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Short read of chunk {} in {}: {} of {} bytes",
                    addr.chunk_id,
                    self.resource,
                    read,
                    raw.len()
                ),
            )));
        }
        if point.length as u64 == self.chunk_size {
            Ok(raw)
        } else {
            self.codec.decompress(&raw)
        }
    }
}

impl ImageStream for ChunkedStream {
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
        let mut done = 0usize;
        while done < n {
            let offset = pos + done as u64;
            let addr = self.address(offset);
            let chunk = self.chunk(&addr)?;
            let delta = (offset - addr.aligned_offset) as usize;
            let take = chunk.len().saturating_sub(delta).min(n - done);
            if take == 0 {
                break;
            }
            buf[done..done + take].copy_from_slice(&chunk[delta..delta + take]);
            done += take;
        }
        Ok(done)
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Chunked
    }

    fn close(&self) -> io::Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.chunks.clear();
            self.bevvies.clear();
            debug!(resource = %self.resource, "Closed image stream");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}
