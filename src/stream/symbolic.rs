//! Fixed-pattern streams
//!
//! `aff4:Zero` and `aff4:SymbolicStreamXX` repeat one byte. `aff4:UnknownData`
//! and `aff4:UnreadableData` repeat a text pattern whose alignment restarts
//! at every 1 MiB of stream position, so byte `p` is
//! `pattern[(p % 1 MiB) % pattern.len()]`.

use std::io;
use std::sync::Arc;

use tracing::warn;

use super::{ImageStream, StreamHandle, StreamKind, UNBOUNDED_SIZE};
use crate::common::MIB;
use crate::lexicon::Lexicon;

const UNKNOWN_PATTERN: &[u8] = b"UNKNOWN";
const UNREADABLE_PATTERN: &[u8] = b"UNREADABLEDATA";

/// Stream of a single repeated byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicStream {
    resource: String,
    symbol: u8,
}

impl SymbolicStream {
    pub fn new(resource: impl Into<String>, symbol: u8) -> Self {
        Self {
            resource: resource.into(),
            symbol,
        }
    }

    /// Stream for a `aff4:SymbolicStreamXX` identifier (`XX` hex)
    ///
    /// An unparsable suffix is logged and yields symbol 0.
    pub fn from_resource(resource: &str) -> Self {
        let prefix = Lexicon::SymbolicData.value();
        let symbol = match resource.strip_prefix(prefix.as_str()) {
            Some(suffix) => u32::from_str_radix(suffix, 16)
                .map(|v| v as u8)
                .unwrap_or_else(|e| {
                    warn!(resource = %resource, error = %e, "Invalid symbolic stream suffix");
                    0
                }),
            None => 0,
        };
        Self::new(resource, symbol)
    }

    pub fn symbol(&self) -> u8 {
        self.symbol
    }
}

impl ImageStream for SymbolicStream {
    fn resource_id(&self) -> &str {
        &self.resource
    }

    fn size(&self) -> u64 {
        UNBOUNDED_SIZE
    }

    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let n = super::available(UNBOUNDED_SIZE, pos, buf.len());
        buf[..n].fill(self.symbol);
        Ok(n)
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Pattern
    }
}

/// Stream of a repeated byte pattern aligned to 1 MiB boundaries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatedStream {
    resource: String,
    pattern: Vec<u8>,
}

impl RepeatedStream {
    /// Pattern stream; an empty pattern reads as zeros
    pub fn new(resource: impl Into<String>, pattern: &[u8]) -> Self {
        let pattern = if pattern.is_empty() {
            vec![0]
        } else {
            pattern.to_vec()
        };
        Self {
            resource: resource.into(),
            pattern,
        }
    }

    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }
}

impl ImageStream for RepeatedStream {
    fn resource_id(&self) -> &str {
        &self.resource
    }

    fn size(&self) -> u64 {
        UNBOUNDED_SIZE
    }

    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        let n = super::available(UNBOUNDED_SIZE, pos, buf.len());
        let len = self.pattern.len() as u64;
        let mut filled = 0usize;
        while filled < n {
            let offset = (pos + filled as u64) % MIB;
            let run = ((MIB - offset) as usize).min(n - filled);
            let mut index = (offset % len) as usize;
            for byte in &mut buf[filled..filled + run] {
                *byte = self.pattern[index];
                index += 1;
                if index == self.pattern.len() {
                    index = 0;
                }
            }
            filled += run;
        }
        Ok(n)
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Pattern
    }
}

// =============================================================================
// Factories
// =============================================================================

/// `aff4:Zero`
pub fn zero() -> StreamHandle {
    Arc::new(SymbolicStream::new(Lexicon::Zero.value(), 0))
}

/// `aff4:UnknownData`
pub fn unknown() -> StreamHandle {
    Arc::new(RepeatedStream::new(Lexicon::UnknownData.value(), UNKNOWN_PATTERN))
}

/// Placeholder for an unresolved target, keeping the original identifier
pub fn unknown_labeled(resource: &str) -> StreamHandle {
    Arc::new(RepeatedStream::new(resource, UNKNOWN_PATTERN))
}

/// `aff4:UnreadableData`
pub fn unreadable() -> StreamHandle {
    Arc::new(RepeatedStream::new(
        Lexicon::UnreadableData.value(),
        UNREADABLE_PATTERN,
    ))
}

/// `aff4:SymbolicStreamXX` for `symbol`
pub fn symbolic(symbol: u8) -> StreamHandle {
    Arc::new(SymbolicStream::new(
        format!("{}{:02X}", Lexicon::SymbolicData.value(), symbol),
        symbol,
    ))
}

/// Built-in stream for a sentinel identifier, `None` for anything else
pub fn builtin(resource: &str) -> Option<StreamHandle> {
    match Lexicon::for_value(resource) {
        Lexicon::Zero => Some(zero()),
        Lexicon::UnknownData => Some(unknown()),
        Lexicon::UnreadableData => Some(unreadable()),
        _ if resource.starts_with(&Lexicon::SymbolicData.value()) => {
            Some(Arc::new(SymbolicStream::from_resource(resource)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamChannel;
    use std::io::Read;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_unknown_pattern_at_start() {
        let stream = unknown();
        let mut buf = [0u8; 16];
        assert_eq!(stream.read_at(0, &mut buf).unwrap(), 16);
        assert_eq!(&buf, b"UNKNOWNUNKNOWNUN");
    }

    #[test]
    fn test_unknown_pattern_straddles_megabyte() {
        let stream = unknown();
        let mut buf = [0u8; 16];
        stream.read_at(MB - 2, &mut buf).unwrap();
        // (1 MiB - 2) % 7 == 2
        assert_eq!(&buf, b"KNUNKNOWNUNKNOWN");
    }

    #[test]
    fn test_unreadable_pattern_straddles_megabyte() {
        let stream = unreadable();
        let mut buf = [0u8; 20];
        stream.read_at(3 * MB - 4, &mut buf).unwrap();

        let pattern = b"UNREADABLEDATA";
        let mut expected = Vec::new();
        for p in (3 * MB - 4)..(3 * MB + 16) {
            expected.push(pattern[((p % MB) % pattern.len() as u64) as usize]);
        }
        assert_eq!(&buf[..], &expected[..]);
        assert_eq!(&buf[4..18], pattern);
    }

    #[test]
    fn test_pattern_across_several_megabytes() {
        let stream = RepeatedStream::new("p", b"ABC");
        let mut buf = vec![0u8; (2 * MB + 10) as usize];
        let start = MB / 2;
        stream.read_at(start, &mut buf).unwrap();
        for (i, &b) in buf.iter().enumerate() {
            let p = start + i as u64;
            assert_eq!(b, b"ABC"[((p % MB) % 3) as usize], "mismatch at {p}");
        }
    }

    #[test]
    fn test_channel_reads_follow_alignment() {
        let mut ch = StreamChannel::new(unknown());
        ch.set_position(MB - 2).unwrap();
        let mut first = [0u8; 2];
        let mut second = [0u8; 3];
        ch.read_exact(&mut first).unwrap();
        ch.read_exact(&mut second).unwrap();
        assert_eq!(&first, b"KN");
        assert_eq!(&second, b"UNK");
    }

    #[test]
    fn test_symbolic_streams() {
        let mut buf = [0xAAu8; 8];
        zero().read_at(12345, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 8]);

        let ff = builtin("http://aff4.org/Schema#SymbolicStreamFF").unwrap();
        ff.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0xFFu8; 8]);

        let s = symbolic(0x41);
        assert_eq!(s.resource_id(), "http://aff4.org/Schema#SymbolicStream41");
        s.read_at(7, &mut buf).unwrap();
        assert_eq!(&buf, b"AAAAAAAA");
    }

    #[test]
    fn test_invalid_symbolic_suffix_reads_zero() {
        let s = SymbolicStream::from_resource("http://aff4.org/Schema#SymbolicStreamZZ");
        assert_eq!(s.symbol(), 0);
    }

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(
            builtin("http://aff4.org/Schema#UnknownData").unwrap().resource_id(),
            "http://aff4.org/Schema#UnknownData"
        );
        assert!(builtin("aff4://c215ba20-5648-4209-a793-1f918c723610").is_none());

        let label = "aff4://c215ba20-5648-4209-a793-1f918c723610";
        let placeholder = unknown_labeled(label);
        assert_eq!(placeholder.resource_id(), label);
        assert_eq!(placeholder.size(), UNBOUNDED_SIZE);
        assert_eq!(placeholder.kind(), StreamKind::Pattern);
    }

    #[test]
    fn test_close_is_noop() {
        let s = unknown();
        s.close().unwrap();
        s.close().unwrap();
        assert!(s.is_open());
    }
}
