//! Builders for in-memory and on-disk test volumes

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::archive::MemoryArchive;
use crate::codec::CompressionKind;
use crate::common::names;
use crate::error::Aff4Result;
use crate::lexicon::{Lexicon, CONTAINER_DESCRIPTION, INFORMATION_TURTLE, RDF_TYPE, VERSION_DESCRIPTION};
use crate::map::RegionRecord;
use crate::model::{turtle, Model};
use crate::resolver::{Aff4Resource, Volume, VolumeResolver};
use crate::stream::tests::BytesStream;

const XSD: &str = "http://www.w3.org/2001/XMLSchema#";

/// Deterministic bytes in runs of 8 so chunks compress
pub(crate) fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i / 8) % 251) as u8).collect()
}

fn compress(kind: CompressionKind, chunk: &[u8]) -> Vec<u8> {
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use flate2::Compression;

    match kind {
        CompressionKind::Stored => chunk.to_vec(),
        CompressionKind::Deflate => {
            let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
            enc.write_all(chunk).unwrap();
            enc.finish().unwrap()
        }
        CompressionKind::Zlib => {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
            enc.write_all(chunk).unwrap();
            enc.finish().unwrap()
        }
        CompressionKind::Lz4 => lz4_flex::block::compress(chunk),
        CompressionKind::Snappy => snap::raw::Encoder::new().compress_vec(chunk).unwrap(),
    }
}

// =============================================================================
// Volume builder
// =============================================================================

/// Assembles the entries and turtle of one volume
#[derive(Clone)]
pub(crate) struct VolumeBuilder {
    volume_id: String,
    entries: Vec<(String, Vec<u8>)>,
    turtle: String,
    version: Option<String>,
    description: Option<String>,
    with_turtle: bool,
}

impl VolumeBuilder {
    pub(crate) fn new(volume_id: &str) -> Self {
        let builder = Self {
            volume_id: volume_id.to_string(),
            entries: Vec::new(),
            turtle: String::new(),
            version: Some("major=1\nminor=0\ntool=aff4-reader tests\n".to_string()),
            description: None,
            with_turtle: true,
        };
        builder
            .typed(volume_id, Lexicon::ZipVolume)
            .triple(
                volume_id,
                &Lexicon::CreationTime.value(),
                &format!("\"2016-12-07T03:40:09.126Z\"^^<{XSD}dateTime>"),
            )
    }

    pub(crate) fn version(mut self, text: &str) -> Self {
        self.version = Some(text.to_string());
        self
    }

    pub(crate) fn without_version(mut self) -> Self {
        self.version = None;
        self
    }

    pub(crate) fn without_turtle(mut self) -> Self {
        self.with_turtle = false;
        self
    }

    pub(crate) fn description(mut self, text: &str) -> Self {
        self.description = Some(text.to_string());
        self
    }

    pub(crate) fn entry(mut self, name: &str, data: &[u8]) -> Self {
        self.entries.push((name.to_string(), data.to_vec()));
        self
    }

    /// Raw triple; `object` is turtle syntax
    pub(crate) fn triple(mut self, subject: &str, predicate: &str, object: &str) -> Self {
        self.turtle
            .push_str(&format!("<{subject}> <{predicate}> {object} .\n"));
        self
    }

    pub(crate) fn typed(self, subject: &str, rdf_type: Lexicon) -> Self {
        self.triple(subject, RDF_TYPE, &format!("<{}>", rdf_type.value()))
    }

    /// Plain string literal property
    pub(crate) fn property(self, subject: &str, property: Lexicon, value: &str) -> Self {
        self.triple(subject, &property.value(), &format!("\"{value}\""))
    }

    pub(crate) fn resource_property(self, subject: &str, property: Lexicon, iri: &str) -> Self {
        self.triple(subject, &property.value(), &format!("<{iri}>"))
    }

    fn long(self, subject: &str, property: Lexicon, value: u64) -> Self {
        self.triple(subject, &property.value(), &format!("\"{value}\"^^<{XSD}long>"))
    }

    /// Chunked image stream stored in this volume
    pub(crate) fn image_stream(
        self,
        stream: &str,
        data: &[u8],
        chunk_size: usize,
        chunks_per_segment: usize,
        kind: CompressionKind,
    ) -> Self {
        let chunks: Vec<Vec<u8>> = data
            .chunks(chunk_size)
            .map(|chunk| {
                let mut padded = chunk.to_vec();
                padded.resize(chunk_size, 0);
                let compressed = compress(kind, &padded);
                if compressed.len() >= chunk_size {
                    padded
                } else {
                    compressed
                }
            })
            .collect();

        let mut builder = self;
        for (id, group) in chunks.chunks(chunks_per_segment).enumerate() {
            let mut segment = Vec::new();
            let mut index = Vec::new();
            for chunk in group {
                index.extend_from_slice(&(segment.len() as u64).to_le_bytes());
                index.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
                segment.extend_from_slice(chunk);
            }
            let name = names::encode(&format!("{stream}/{id:08}"));
            builder = builder
                .entry(&name, &segment)
                .entry(&format!("{name}.index"), &index);
        }

        let volume_id = builder.volume_id.clone();
        builder
            .typed(stream, Lexicon::ImageStream)
            .long(stream, Lexicon::Size, data.len() as u64)
            .triple(
                stream,
                &Lexicon::ChunkSize.value(),
                &format!("\"{chunk_size}\"^^<{XSD}int>"),
            )
            .triple(
                stream,
                &Lexicon::ChunksInSegment.value(),
                &format!("\"{chunks_per_segment}\"^^<{XSD}int>"),
            )
            .resource_property(stream, Lexicon::CompressionMethod, &kind.lexicon().value())
            .resource_property(stream, Lexicon::Stored, &volume_id)
    }

    /// Map with its target index and region table
    pub(crate) fn map(
        self,
        map: &str,
        size: u64,
        targets: &[&str],
        regions: &[(u64, u64, u64, i32)],
    ) -> Self {
        let idx: String = targets.iter().map(|t| format!("{t}\n")).collect();
        let table: Vec<u8> = regions
            .iter()
            .flat_map(|&(offset, length, target_offset, target_id)| {
                RegionRecord {
                    offset,
                    length,
                    target_offset,
                    target_id,
                }
                .encode()
            })
            .collect();
        let volume_id = self.volume_id.clone();
        self.entry(&names::encode(&format!("{map}/idx")), idx.as_bytes())
            .entry(&names::encode(&format!("{map}/map")), &table)
            .typed(map, Lexicon::Map)
            .long(map, Lexicon::Size, size)
            .resource_property(map, Lexicon::Stored, &volume_id)
    }

    /// Disk image whose data is `map`
    pub(crate) fn image(self, image: &str, map: &str, size: u64) -> Self {
        self.typed(image, Lexicon::Image)
            .typed(image, Lexicon::DiskImage)
            .long(image, Lexicon::Size, size)
            .resource_property(image, Lexicon::DataStream, map)
    }

    pub(crate) fn turtle(&self) -> String {
        self.turtle.clone()
    }

    pub(crate) fn model(&self) -> Model {
        turtle::parse(self.turtle.as_bytes()).unwrap()
    }

    fn all_entries(&self) -> Vec<(String, Vec<u8>, bool)> {
        let mut out = Vec::new();
        if let Some(version) = &self.version {
            out.push((VERSION_DESCRIPTION.to_string(), version.clone().into_bytes(), true));
        }
        if let Some(description) = &self.description {
            out.push((CONTAINER_DESCRIPTION.to_string(), description.clone().into_bytes(), true));
        }
        if self.with_turtle {
            out.push((INFORMATION_TURTLE.to_string(), self.turtle().into_bytes(), true));
        }
        for (name, data) in &self.entries {
            out.push((name.clone(), data.clone(), false));
        }
        out
    }

    pub(crate) fn archive(&self) -> MemoryArchive {
        let mut archive = MemoryArchive::new().with_comment(&self.volume_id);
        for (name, data, _) in self.all_entries() {
            archive.add(&name, &data);
        }
        archive
    }

    /// Write a zip volume; metadata entries deflated, data entries stored
    pub(crate) fn write_zip(&self, path: impl AsRef<Path>) {
        use zip::write::SimpleFileOptions;
        use zip::CompressionMethod;

        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.set_comment(self.volume_id.clone());
        for (name, data, deflate) in self.all_entries() {
            let method = if deflate {
                CompressionMethod::Deflated
            } else {
                CompressionMethod::Stored
            };
            let options = SimpleFileOptions::default().compression_method(method);
            zip.start_file(name, options).unwrap();
            zip.write_all(&data).unwrap();
        }
        zip.finish().unwrap();
    }
}

// =============================================================================
// Mock volumes
// =============================================================================

/// Volume serving in-memory streams and counting closes
pub(crate) struct MockVolume {
    id: String,
    streams: HashMap<String, Vec<u8>>,
    closes: AtomicUsize,
    closed: AtomicBool,
}

impl MockVolume {
    pub(crate) fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            streams: HashMap::new(),
            closes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_stream(mut self, id: &str, data: &[u8]) -> Self {
        self.streams.insert(id.to_string(), data.to_vec());
        self
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Volume for MockVolume {
    fn resource_id(&self) -> &str {
        &self.id
    }

    fn open(&self, resource: &str) -> Option<Aff4Resource> {
        self.streams
            .get(resource)
            .map(|data| Aff4Resource::Stream(Arc::new(BytesStream::new(resource, data.clone()))))
    }

    fn has_resource(&self, resource: &str) -> bool {
        self.streams.contains_key(resource)
    }

    fn close(&self) -> Aff4Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// Resolver over a fixed set of volumes and streams
#[derive(Default)]
pub(crate) struct MockResolver {
    volumes: HashMap<String, Arc<MockVolume>>,
    streams: HashMap<String, Vec<u8>>,
}

impl MockResolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_volume(mut self, volume: Arc<MockVolume>) -> Self {
        self.volumes.insert(volume.id.clone(), volume);
        self
    }

    pub(crate) fn with_stream(mut self, id: &str, data: &[u8]) -> Self {
        self.streams.insert(id.to_string(), data.to_vec());
        self
    }
}

impl VolumeResolver for MockResolver {
    fn resource_id(&self) -> &str {
        "aff4://mock-resolver"
    }

    fn open(&self, resource: &str) -> Option<Aff4Resource> {
        if let Some(volume) = self.volumes.get(resource) {
            return Some(Aff4Resource::Volume(Arc::clone(volume) as Arc<dyn Volume>));
        }
        self.streams
            .get(resource)
            .map(|data| Aff4Resource::Stream(Arc::new(BytesStream::new(resource, data.clone()))))
    }

    fn has_resource(&self, resource: &str) -> bool {
        self.volumes.contains_key(resource) || self.streams.contains_key(resource)
    }
}
