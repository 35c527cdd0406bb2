//! Error types for AFF4 volume access and map materialisation

use std::fmt;
use std::io;

/// Result type alias for AFF4 operations
pub type Aff4Result<T> = Result<T, Aff4Error>;

/// Errors that can occur while opening volumes or reading image data
#[derive(Debug)]
pub enum Aff4Error {
    /// I/O error (volume read, short read)
    Io(io::Error),
    /// File is not an AFF4 volume (no description, version or turtle)
    NotAff4(String),
    /// Volume declares a version this reader does not understand
    UnsupportedVersion(String),
    /// Unsupported codec identifier, chunk size or container layout
    Unsupported(String),
    /// A required segment or resource is absent
    Missing(String),
    /// Malformed metadata or binary structure
    Format(String),
    /// Chunk decompression failure
    Codec(String),
    /// Operation on a closed stream, map or volume
    Closed,
}

impl fmt::Display for Aff4Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aff4Error::Io(e) => write!(f, "I/O error: {}", e),
            Aff4Error::NotAff4(e) => write!(f, "Not an AFF4 volume: {}", e),
            Aff4Error::UnsupportedVersion(e) => write!(f, "Unsupported AFF4 version: {}", e),
            Aff4Error::Unsupported(e) => write!(f, "Unsupported: {}", e),
            Aff4Error::Missing(e) => write!(f, "Missing: {}", e),
            Aff4Error::Format(e) => write!(f, "Format error: {}", e),
            Aff4Error::Codec(e) => write!(f, "Decompression error: {}", e),
            Aff4Error::Closed => write!(f, "Resource is closed"),
        }
    }
}

impl std::error::Error for Aff4Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Aff4Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Aff4Error {
    fn from(e: io::Error) -> Self {
        Aff4Error::Io(e)
    }
}

/// Stream reads surface as `io::Result`, so failures below them convert back
impl From<Aff4Error> for io::Error {
    fn from(e: Aff4Error) -> Self {
        match e {
            Aff4Error::Io(inner) => inner,
            Aff4Error::Missing(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            Aff4Error::Unsupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            Aff4Error::Closed => io::Error::new(io::ErrorKind::BrokenPipe, "resource is closed"),
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
