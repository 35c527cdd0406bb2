//! Map region records
//!
//! The `<map>/map` entry is an array of 28-byte little-endian records:
//!
//! | Offset | Size | Field         |
//! |--------|------|---------------|
//! | 0x00   | 8    | offset        |
//! | 0x08   | 8    | length        |
//! | 0x10   | 8    | target offset |
//! | 0x18   | 4    | target id     |

use std::fmt;

use crate::common::binary::{i32_at, u64_at};
use crate::error::Aff4Result;
use crate::stream::StreamHandle;

/// Target id used for regions filled from the gap stream
pub const GAP_TARGET: i32 = -1;

/// One record of the region table as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionRecord {
    pub offset: u64,
    pub length: u64,
    pub target_offset: u64,
    pub target_id: i32,
}

impl RegionRecord {
    pub const SIZE: usize = 28;

    pub fn decode(buf: &[u8]) -> Aff4Result<Self> {
        Ok(Self {
            offset: u64_at(buf, 0)?,
            length: u64_at(buf, 8)?,
            target_offset: u64_at(buf, 16)?,
            target_id: i32_at(buf, 24)?,
        })
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..16].copy_from_slice(&self.length.to_le_bytes());
        out[16..24].copy_from_slice(&self.target_offset.to_le_bytes());
        out[24..28].copy_from_slice(&self.target_id.to_le_bytes());
        out
    }
}

/// A run of the map's address space and the stream serving it
#[derive(Clone)]
pub struct RegionEntry {
    pub offset: u64,
    pub length: u64,
    /// Position in `stream` of the run's first byte
    pub target_offset: u64,
    pub target_id: i32,
    pub stream: StreamHandle,
}

impl RegionEntry {
    pub fn new(record: RegionRecord, stream: StreamHandle) -> Self {
        Self {
            offset: record.offset,
            length: record.length,
            target_offset: record.target_offset,
            target_id: record.target_id,
            stream,
        }
    }

    /// Hole `[offset, offset + length)` served by the gap stream at the same offset
    pub fn gap(offset: u64, length: u64, stream: StreamHandle) -> Self {
        Self {
            offset,
            length,
            target_offset: offset,
            target_id: GAP_TARGET,
            stream,
        }
    }

    /// First offset past the run
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    pub fn contains(&self, pos: u64) -> bool {
        pos >= self.offset && pos < self.end()
    }

    pub fn is_gap(&self) -> bool {
        self.target_id == GAP_TARGET
    }
}

impl fmt::Debug for RegionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionEntry")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("target_offset", &self.target_offset)
            .field("target_id", &self.target_id)
            .field("stream", &self.stream.resource_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::symbolic;

    #[test]
    fn test_decode_record() {
        let record = RegionRecord {
            offset: 0x1000,
            length: 0x2000,
            target_offset: 0x30,
            target_id: 7,
        };
        let raw = record.encode();
        assert_eq!(&raw[24..], &[7, 0, 0, 0]);
        assert_eq!(RegionRecord::decode(&raw).unwrap(), record);
        assert!(RegionRecord::decode(&raw[..27]).is_err());
    }

    #[test]
    fn test_negative_target_id() {
        let mut raw = [0u8; RegionRecord::SIZE];
        raw[24..28].copy_from_slice(&(-1i32).to_le_bytes());
        assert_eq!(RegionRecord::decode(&raw).unwrap().target_id, -1);
    }

    #[test]
    fn test_gap_entry() {
        let gap = RegionEntry::gap(100, 200, symbolic::zero());
        assert!(gap.is_gap());
        assert_eq!(gap.target_offset, 100);
        assert_eq!(gap.end(), 300);
        assert!(gap.contains(100));
        assert!(gap.contains(299));
        assert!(!gap.contains(300));
        assert!(format!("{gap:?}").contains("Zero"));
    }
}
