//! Zip volume access
//!
//! The central directory is parsed with the `zip` crate once at open; entry
//! data is then read straight from a memory map of the volume, so stored
//! segments are served without copying through a decoder.
//!
//! ## Local File Header Layout
//! | Offset | Size | Field                 |
//! |--------|------|-----------------------|
//! | 0x00   | 4    | Signature (PK\x03\x04) |
//! | 0x08   | 2    | Compression method    |
//! | 0x1A   | 2    | File name length (n)  |
//! | 0x1C   | 2    | Extra field length (m)|
//! | 0x1E   | n+m  | Name, extra           |
//!
//! Entry data starts at `header + 30 + n + m`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use flate2::read::DeflateDecoder;
use memmap2::Mmap;
use tracing::debug;

use super::{read_slice, Archive, EntryInfo};
use crate::error::{Aff4Error, Aff4Result};

const LOCAL_HEADER_SIG: &[u8; 4] = b"PK\x03\x04";
const LOCAL_HEADER_LEN: u64 = 30;

/// Memory-mapped zip volume with an entry index
pub struct ZipVolumeFile {
    path: PathBuf,
    mmap: Mmap,
    entries: Vec<EntryInfo>,
    index: HashMap<String, usize>,
    comment: String,
}

impl ZipVolumeFile {
    /// Map `path` and index its central directory
    pub fn open(path: impl AsRef<Path>) -> Aff4Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
            io::Error::new(e.kind(), format!("Failed to mmap {}: {e}", path.display()))
        })?;

        let (entries, index, comment) = {
            let mut archive = zip::ZipArchive::new(Cursor::new(&mmap[..]))
                .map_err(|e| Aff4Error::NotAff4(format!("{}: {e}", path.display())))?;
            let comment = String::from_utf8_lossy(archive.comment()).trim().to_string();

            let mut entries = Vec::with_capacity(archive.len());
            let mut index = HashMap::with_capacity(archive.len());
            for i in 0..archive.len() {
                let entry = archive
                    .by_index_raw(i)
                    .map_err(|e| Aff4Error::Format(format!("Zip entry {i}: {e}")))?;
                let name = entry.name().to_string();
                let info = EntryInfo {
                    name: name.clone(),
                    data_offset: data_offset(&mmap, entry.header_start())?,
                    size: entry.size(),
                    compressed_size: entry.compressed_size(),
                    stored: entry.compression() == zip::CompressionMethod::Stored,
                };
                index.insert(name, entries.len());
                entries.push(info);
            }
            (entries, index, comment)
        };
        debug!(path = %path.display(), entries = entries.len(), "Indexed zip volume");

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            entries,
            index,
            comment,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    fn raw(&self, info: &EntryInfo) -> Aff4Result<&[u8]> {
        let start = info.data_offset as usize;
        let end = start
            .checked_add(info.compressed_size as usize)
            .filter(|&end| end <= self.mmap.len())
            .ok_or_else(|| {
                Aff4Error::Format(format!("Zip entry {} extends past end of volume", info.name))
            })?;
        Ok(&self.mmap[start..end])
    }
}

/// Resolve the data offset of the entry whose local header is at `header`
fn data_offset(data: &[u8], header: u64) -> Aff4Result<u64> {
    let start = header as usize;
    let fixed = data
        .get(start..start + LOCAL_HEADER_LEN as usize)
        .ok_or_else(|| Aff4Error::Format(format!("Truncated local header at {header:#x}")))?;
    if &fixed[..4] != LOCAL_HEADER_SIG {
        return Err(Aff4Error::Format(format!(
            "Bad local header signature at {header:#x}"
        )));
    }
    let name_len = u16::from_le_bytes([fixed[26], fixed[27]]) as u64;
    let extra_len = u16::from_le_bytes([fixed[28], fixed[29]]) as u64;
    Ok(header + LOCAL_HEADER_LEN + name_len + extra_len)
}

impl Archive for ZipVolumeFile {
    fn entry(&self, name: &str) -> Option<EntryInfo> {
        self.index.get(name).map(|&i| self.entries[i].clone())
    }

    fn entry_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    fn read_entry(&self, name: &str) -> Aff4Result<Vec<u8>> {
        let info = self
            .entry(name)
            .ok_or_else(|| Aff4Error::Missing(format!("Zip entry {name}")))?;
        let raw = self.raw(&info)?;
        if info.stored {
            return Ok(raw.to_vec());
        }
        let mut out = Vec::with_capacity(info.size as usize);
        DeflateDecoder::new(raw)
            .read_to_end(&mut out)
            .map_err(|e| Aff4Error::Codec(format!("Failed to inflate {name}: {e}")))?;
        Ok(out)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        Ok(read_slice(&self.mmap, offset, buf))
    }

    fn comment(&self) -> String {
        self.comment.clone()
    }
}
