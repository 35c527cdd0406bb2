//! AFF4 vocabulary
//!
//! Every identifier the reader understands is a variant of [`Lexicon`]. The
//! string form only appears at the boundary: [`Lexicon::value`] and
//! [`Lexicon::for_value`] share one lookup table.

use uuid::Uuid;

/// Base IRI of the AFF4 schema
pub const AFF4_BASE_URI: &str = "http://aff4.org/Schema#";

/// Full IRI of `rdf:type`
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Prefix applied to generated resource identifiers
pub const AFF4_URN_PREFIX: &str = "aff4://";

/// Default chunk size of an image stream
pub const DEFAULT_CHUNK_SIZE: i32 = 32 * 1024;

/// Default number of chunks held in one segment (bevvy)
pub const DEFAULT_CHUNKS_PER_SEGMENT: i32 = 2048;

/// Metadata file holding the volume's triples
pub const INFORMATION_TURTLE: &str = "information.turtle";

/// File holding the volume's resource identifier
pub const CONTAINER_DESCRIPTION: &str = "container.description";

/// File holding the volume format version
pub const VERSION_DESCRIPTION: &str = "version.txt";

/// Closed set of AFF4 identifiers (types, properties, codecs, built-in streams)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lexicon {
    /// Identifier with no lexicon entry
    Unknown,

    // Resource types
    ZipVolume,
    Map,
    ImageStream,
    Image,
    ContiguousImage,
    DiscontiguousImage,
    DiskImage,
    VolumeImage,
    MemoryImage,
    CaseDetails,

    // Built-in streams
    Zero,
    UnknownData,
    UnreadableData,
    /// Prefix of `aff4:SymbolicStreamXX` identifiers
    SymbolicData,

    // Compression methods
    SnappyCompression,
    DeflateCompression,
    Lz4Compression,
    NoCompression,
    ZlibCompression,

    // Properties
    Tool,
    MajorVersion,
    MinorVersion,
    CreationTime,
    Size,
    ChunkSize,
    ChunksInSegment,
    CompressionMethod,
    MapGapDefaultStream,
    DataStream,
    DependentStream,
    Target,
    Stored,
    AcquisitionCompletionState,
    AcquisitionType,
    PageSize,
    MemoryPageTableEntryOffset,
    MemoryInstalledSize,
    MemoryAddressableSize,
    BlockSize,
    DiskDeviceName,
    DiskFirmware,
    DiskInterfaceType,
    DiskMake,
    DiskModel,
    DiskSerial,
    SectorCount,
    CaseName,
    CaseDescription,
    Examiner,
}

/// Suffix or absolute value for each variant; suffixes are joined to [`AFF4_BASE_URI`]
enum Iri {
    Schema(&'static str),
    Absolute(&'static str),
}

const TABLE: &[(Lexicon, Iri)] = &[
    (Lexicon::Unknown, Iri::Schema("Unknown")),
    (Lexicon::ZipVolume, Iri::Schema("ZipVolume")),
    (Lexicon::Map, Iri::Schema("Map")),
    (Lexicon::ImageStream, Iri::Schema("ImageStream")),
    (Lexicon::Image, Iri::Schema("Image")),
    (Lexicon::ContiguousImage, Iri::Schema("ContiguousImage")),
    (Lexicon::DiscontiguousImage, Iri::Schema("DiscontiguousImage")),
    (Lexicon::DiskImage, Iri::Schema("DiskImage")),
    (Lexicon::VolumeImage, Iri::Schema("VolumeImage")),
    (Lexicon::MemoryImage, Iri::Schema("MemoryImage")),
    (Lexicon::CaseDetails, Iri::Schema("CaseDetails")),
    (Lexicon::Zero, Iri::Schema("Zero")),
    (Lexicon::UnknownData, Iri::Schema("UnknownData")),
    (Lexicon::UnreadableData, Iri::Schema("UnreadableData")),
    (Lexicon::SymbolicData, Iri::Schema("SymbolicStream")),
    (Lexicon::SnappyCompression, Iri::Absolute("http://code.google.com/p/snappy/")),
    (Lexicon::DeflateCompression, Iri::Absolute("https://tools.ietf.org/html/rfc1951")),
    (Lexicon::Lz4Compression, Iri::Absolute("https://code.google.com/p/lz4/")),
    (Lexicon::NoCompression, Iri::Schema("NullCompressor")),
    (Lexicon::ZlibCompression, Iri::Absolute("https://www.ietf.org/rfc/rfc1950.txt")),
    (Lexicon::Tool, Iri::Schema("tool")),
    (Lexicon::MajorVersion, Iri::Schema("majorVersion")),
    (Lexicon::MinorVersion, Iri::Schema("minorVersion")),
    (Lexicon::CreationTime, Iri::Schema("creationTime")),
    (Lexicon::Size, Iri::Schema("size")),
    (Lexicon::ChunkSize, Iri::Schema("chunkSize")),
    (Lexicon::ChunksInSegment, Iri::Schema("chunksInSegment")),
    (Lexicon::CompressionMethod, Iri::Schema("compressionMethod")),
    (Lexicon::MapGapDefaultStream, Iri::Schema("mapGapDefaultStream")),
    (Lexicon::DataStream, Iri::Schema("dataStream")),
    (Lexicon::DependentStream, Iri::Schema("dependentStream")),
    (Lexicon::Target, Iri::Schema("target")),
    (Lexicon::Stored, Iri::Schema("stored")),
    (Lexicon::AcquisitionCompletionState, Iri::Schema("acquisitionCompletionState")),
    (Lexicon::AcquisitionType, Iri::Schema("acquisitionType")),
    (Lexicon::PageSize, Iri::Schema("pageSize")),
    (Lexicon::MemoryPageTableEntryOffset, Iri::Schema("memoryPageTableEntryOffset")),
    (Lexicon::MemoryInstalledSize, Iri::Schema("memoryInstalledSize")),
    (Lexicon::MemoryAddressableSize, Iri::Schema("memoryAddressableSize")),
    (Lexicon::BlockSize, Iri::Schema("blockSize")),
    (Lexicon::DiskDeviceName, Iri::Schema("diskDeviceName")),
    (Lexicon::DiskFirmware, Iri::Schema("diskFirmware")),
    (Lexicon::DiskInterfaceType, Iri::Schema("diskInterfaceType")),
    (Lexicon::DiskMake, Iri::Schema("diskMake")),
    (Lexicon::DiskModel, Iri::Schema("diskModel")),
    (Lexicon::DiskSerial, Iri::Schema("diskSerial")),
    (Lexicon::SectorCount, Iri::Schema("sectorCount")),
    (Lexicon::CaseName, Iri::Schema("caseName")),
    (Lexicon::CaseDescription, Iri::Schema("caseDescription")),
    (Lexicon::Examiner, Iri::Schema("examiner")),
];

impl Lexicon {
    /// Full IRI of this identifier
    pub fn value(self) -> String {
        for (lex, iri) in TABLE {
            if *lex == self {
                return match iri {
                    Iri::Schema(suffix) => format!("{AFF4_BASE_URI}{suffix}"),
                    Iri::Absolute(value) => (*value).to_string(),
                };
            }
        }
        format!("{AFF4_BASE_URI}Unknown")
    }

    /// Look up the variant for a full IRI, [`Lexicon::Unknown`] if there is none
    pub fn for_value(value: &str) -> Lexicon {
        TABLE
            .iter()
            .find(|(_, iri)| match iri {
                Iri::Schema(suffix) => value
                    .strip_prefix(AFF4_BASE_URI)
                    .is_some_and(|rest| rest == *suffix),
                Iri::Absolute(abs) => value == *abs,
            })
            .map(|(lex, _)| *lex)
            .unwrap_or(Lexicon::Unknown)
    }

    /// True when `value` names this identifier
    pub fn matches(self, value: &str) -> bool {
        Lexicon::for_value(value) == self
    }
}

/// True for identifiers served by a built-in fixed-pattern stream
pub fn is_builtin_stream(resource: &str) -> bool {
    matches!(
        Lexicon::for_value(resource),
        Lexicon::Zero | Lexicon::UnknownData | Lexicon::UnreadableData
    ) || resource.starts_with(&Lexicon::SymbolicData.value())
}

/// Generate a fresh `aff4://<uuid>` resource identifier
pub fn generate_id() -> String {
    format!("{AFF4_URN_PREFIX}{}", Uuid::new_v4())
}
