//! Chunk decompression
//!
//! A [`CompressionCodec`] is a compression kind plus the fixed chunk size it
//! decompresses to. Every codec produces exactly `chunk_size` bytes: short
//! output is zero padded, surplus output is an error. Callers skip the codec
//! for chunks stored verbatim (raw length == chunk size).

use std::io::Read;

use flate2::read::{DeflateDecoder, ZlibDecoder};
use tracing::trace;

use crate::error::{Aff4Error, Aff4Result};
use crate::lexicon::Lexicon;

/// Supported chunk compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionKind {
    /// Chunks stored without compression
    Stored,
    /// Raw deflate (RFC 1951)
    Deflate,
    /// Zlib-wrapped deflate (RFC 1950)
    Zlib,
    /// LZ4 block format
    Lz4,
    /// Snappy raw block format
    Snappy,
}

impl CompressionKind {
    /// Map a `aff4:compressionMethod` identifier to a kind
    pub fn for_resource(id: &str) -> Option<CompressionKind> {
        match Lexicon::for_value(id) {
            Lexicon::NoCompression => Some(CompressionKind::Stored),
            Lexicon::DeflateCompression => Some(CompressionKind::Deflate),
            Lexicon::ZlibCompression => Some(CompressionKind::Zlib),
            Lexicon::Lz4Compression => Some(CompressionKind::Lz4),
            Lexicon::SnappyCompression => Some(CompressionKind::Snappy),
            _ => None,
        }
    }

    pub fn lexicon(self) -> Lexicon {
        match self {
            CompressionKind::Stored => Lexicon::NoCompression,
            CompressionKind::Deflate => Lexicon::DeflateCompression,
            CompressionKind::Zlib => Lexicon::ZlibCompression,
            CompressionKind::Lz4 => Lexicon::Lz4Compression,
            CompressionKind::Snappy => Lexicon::SnappyCompression,
        }
    }
}

/// Decompressor for one stream's chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompressionCodec {
    kind: CompressionKind,
    chunk_size: usize,
}

impl CompressionCodec {
    /// Codec of `kind` producing `chunk_size`-byte chunks
    pub fn new(kind: CompressionKind, chunk_size: i32) -> Aff4Result<Self> {
        if chunk_size <= 0 {
            return Err(Aff4Error::Unsupported(format!(
                "Illegal chunk size {}",
                chunk_size
            )));
        }
        Ok(Self {
            kind,
            chunk_size: chunk_size as usize,
        })
    }

    /// Codec for a `aff4:compressionMethod` identifier
    pub fn for_resource(id: &str, chunk_size: i32) -> Aff4Result<Self> {
        let kind = CompressionKind::for_resource(id)
            .ok_or_else(|| Aff4Error::Unsupported(format!("Unknown compression method {}", id)))?;
        Self::new(kind, chunk_size)
    }

    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Lexicon identifier of this codec
    pub fn codec_id(&self) -> String {
        self.kind.lexicon().value()
    }

    /// Decompress one raw chunk into a `chunk_size` buffer
    pub fn decompress(&self, source: &[u8]) -> Aff4Result<Vec<u8>> {
        trace!(kind = ?self.kind, raw = source.len(), "Decompressing chunk");
        let mut out = vec![0u8; self.chunk_size];
        match self.kind {
            CompressionKind::Stored => {
                let n = source.len().min(out.len());
                out[..n].copy_from_slice(&source[..n]);
            }
            CompressionKind::Deflate => inflate_into(DeflateDecoder::new(source), &mut out)?,
            CompressionKind::Zlib => inflate_into(ZlibDecoder::new(source), &mut out)?,
            CompressionKind::Lz4 => {
                lz4_flex::block::decompress_into(source, &mut out)
                    .map_err(|e| Aff4Error::Codec(format!("LZ4 block error: {e}")))?;
            }
            CompressionKind::Snappy => {
                let len = snap::raw::decompress_len(source)
                    .map_err(|e| Aff4Error::Codec(format!("Snappy header error: {e}")))?;
                if len > out.len() {
                    return Err(Aff4Error::Codec(format!(
                        "Snappy chunk expands to {} bytes, chunk size is {}",
                        len,
                        out.len()
                    )));
                }
                snap::raw::Decoder::new()
                    .decompress(source, &mut out)
                    .map_err(|e| Aff4Error::Codec(format!("Snappy block error: {e}")))?;
            }
        }
        Ok(out)
    }
}

/// Fill `out` from a streaming inflater; output larger than `out` is rejected
fn inflate_into<R: Read>(mut decoder: R, out: &mut [u8]) -> Aff4Result<()> {
    let mut filled = 0;
    while filled < out.len() {
        let n = decoder
            .read(&mut out[filled..])
            .map_err(|e| Aff4Error::Codec(format!("Inflate error: {e}")))?;
        if n == 0 {
            return Ok(());
        }
        filled += n;
    }
    let mut probe = [0u8; 1];
    let extra = decoder
        .read(&mut probe)
        .map_err(|e| Aff4Error::Codec(format!("Inflate error: {e}")))?;
    if extra != 0 {
        return Err(Aff4Error::Codec(format!(
            "Inflated chunk exceeds chunk size {}",
            out.len()
        )));
    }
    Ok(())
}
