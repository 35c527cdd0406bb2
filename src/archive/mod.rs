//! Volume archive access
//!
//! An AFF4 volume is a zip file. Readers above this layer only need named
//! entries and positional reads of raw volume bytes, which [`Archive`]
//! provides. [`zip::ZipVolumeFile`] backs it with a memory-mapped file;
//! [`MemoryArchive`] holds stored entries in a byte buffer.

pub mod zip;

use std::collections::HashMap;
use std::io;

use crate::error::{Aff4Error, Aff4Result};

pub use self::zip::ZipVolumeFile;

// =============================================================================
// Entry Metadata
// =============================================================================

/// Location of one named entry inside the volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    /// Offset of the entry's (possibly compressed) data in the volume
    pub data_offset: u64,
    /// Uncompressed size
    pub size: u64,
    pub compressed_size: u64,
    /// True when data is stored without compression
    pub stored: bool,
}

/// Named-entry and positional access to one volume
pub trait Archive: Send + Sync {
    /// Look up an entry by exact name
    fn entry(&self, name: &str) -> Option<EntryInfo>;

    /// All entry names in directory order
    fn entry_names(&self) -> Vec<String>;

    /// Whole (decompressed) contents of an entry
    fn read_entry(&self, name: &str) -> Aff4Result<Vec<u8>>;

    /// Raw volume bytes at `offset`; short only at end of volume
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Archive comment
    fn comment(&self) -> String {
        String::new()
    }
}

/// Copy from an in-memory volume image
pub(crate) fn read_slice(data: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= data.len() {
        return 0;
    }
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

// =============================================================================
// In-memory archive
// =============================================================================

/// Archive of stored entries laid out back to back in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryArchive {
    data: Vec<u8>,
    entries: Vec<EntryInfo>,
    index: HashMap<String, usize>,
    comment: String,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = comment.to_string();
        self
    }

    /// Append a stored entry, replacing any entry of the same name
    pub fn add(&mut self, name: &str, contents: &[u8]) -> &mut Self {
        let info = EntryInfo {
            name: name.to_string(),
            data_offset: self.data.len() as u64,
            size: contents.len() as u64,
            compressed_size: contents.len() as u64,
            stored: true,
        };
        self.data.extend_from_slice(contents);
        match self.index.get(name) {
            Some(&i) => self.entries[i] = info,
            None => {
                self.index.insert(name.to_string(), self.entries.len());
                self.entries.push(info);
            }
        }
        self
    }

    /// Builder form of [`MemoryArchive::add`]
    pub fn entry_with(mut self, name: &str, contents: &[u8]) -> Self {
        self.add(name, contents);
        self
    }
}

impl Archive for MemoryArchive {
    fn entry(&self, name: &str) -> Option<EntryInfo> {
        self.index.get(name).map(|&i| self.entries[i].clone())
    }

    fn entry_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    fn read_entry(&self, name: &str) -> Aff4Result<Vec<u8>> {
        let info = self
            .entry(name)
            .ok_or_else(|| Aff4Error::Missing(format!("Archive entry {}", name)))?;
        let start = info.data_offset as usize;
        Ok(self.data[start..start + info.size as usize].to_vec())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        Ok(read_slice(&self.data, offset, buf))
    }

    fn comment(&self) -> String {
        self.comment.clone()
    }
}
