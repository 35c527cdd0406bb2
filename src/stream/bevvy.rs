//! Segment (bevvy) indexes
//!
//! Each segment `<stream>/<id:08>` of an image stream has a companion
//! `<stream>/<id:08>.index` entry: an array of 12-byte points giving every
//! chunk's offset within the segment and its raw length.
//!
//! | Offset | Size | Field  |
//! |--------|------|--------|
//! | 0x00   | 8    | offset |
//! | 0x08   | 4    | length |

use tracing::debug;

use crate::archive::{Archive, EntryInfo};
use crate::common::binary::{records, u32_at, u64_at};
use crate::common::names;
use crate::error::{Aff4Error, Aff4Result};

/// Position and raw length of one chunk within its segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentIndexEntry {
    pub offset: u64,
    pub length: u32,
}

impl SegmentIndexEntry {
    pub const SIZE: usize = 12;

    pub fn decode(buf: &[u8]) -> Aff4Result<Self> {
        Ok(Self {
            offset: u64_at(buf, 0)?,
            length: u32_at(buf, 8)?,
        })
    }
}

/// Loaded index of one segment
#[derive(Debug, Clone)]
pub struct BevvyIndex {
    id: u64,
    /// Offset of the segment's data in the volume
    data_offset: u64,
    points: Vec<SegmentIndexEntry>,
}

impl BevvyIndex {
    pub fn new(id: u64, data_offset: u64, points: Vec<SegmentIndexEntry>) -> Self {
        Self {
            id,
            data_offset,
            points,
        }
    }

    /// Locate segment `id` of `stream` in `archive` and load its index
    pub fn load(archive: &dyn Archive, volume_id: &str, stream: &str, id: u64) -> Aff4Result<Self> {
        let segment_name = format!("{stream}/{id:08}");
        let segment = find_entry(archive, &segment_name, volume_id)
            .ok_or_else(|| Aff4Error::Missing(format!("Bevvy segment {segment_name}")))?;
        if !segment.stored {
            return Err(Aff4Error::Unsupported(format!(
                "Bevvy segment {} is compressed",
                segment.name
            )));
        }

        let index_name = format!("{stream}/{id:08}.index");
        let index = find_entry(archive, &index_name, volume_id)
            .ok_or_else(|| Aff4Error::Missing(format!("Bevvy index {index_name}")))?;
        let raw = archive.read_entry(&index.name)?;
        let points = records(&raw, SegmentIndexEntry::SIZE)
            .map(SegmentIndexEntry::decode)
            .collect::<Aff4Result<Vec<_>>>()?;

        debug!(stream = %stream, bevvy = id, points = points.len(), "Loaded bevvy index");
        Ok(Self::new(id, segment.data_offset, points))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    /// Point for the chunk at `local_id` within the segment
    pub fn point(&self, local_id: u64) -> Option<SegmentIndexEntry> {
        usize::try_from(local_id)
            .ok()
            .and_then(|i| self.points.get(i))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Writers differ on escaping, volume prefixes and leading '/'; try each form
fn find_entry(archive: &dyn Archive, resource: &str, volume_id: &str) -> Option<EntryInfo> {
    let sanitized = names::sanitize(resource, volume_id);
    [
        names::encode(resource),
        sanitized.clone(),
        format!("/{sanitized}"),
        resource.to_string(),
    ]
    .iter()
    .find_map(|name| archive.entry(name))
}
