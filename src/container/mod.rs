//! AFF4 zip volumes
//!
//! A volume is a zip file holding:
//! - `container.description` (or the zip comment): the volume's resource id
//! - `version.txt`: `major=`, `minor=`, `tool=` lines; 1.0 and 1.1 are read
//! - `information.turtle`: RDF metadata for every image, map and stream
//! - image stream segments and their indexes, map `idx`/`map` tables
//!
//! [`Aff4Container::open`] dispatches resource ids in a fixed order:
//! the volume itself, images, maps, image streams, then raw segments.
//! Streams opened through a container are closed with it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::archive::{Archive, EntryInfo, ZipVolumeFile};
use crate::common::names;
use crate::error::{Aff4Error, Aff4Result};
use crate::image::Aff4Image;
use crate::lexicon::{Lexicon, CONTAINER_DESCRIPTION, INFORMATION_TURTLE, VERSION_DESCRIPTION};
use crate::map::Aff4Map;
use crate::model::{turtle, MetadataStore, Model};
use crate::resolver::{Aff4Resource, LightResolver, Volume, VolumeResolver};
use crate::stream::segment::SegmentStream;
use crate::stream::{symbolic, ChunkedStream, StreamConfig, StreamHandle};

/// True for file names with an AFF4 volume extension (`.aff4`, `.af4`)
pub fn is_aff4_container(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".aff4") || lower.ends_with(".af4")
}

/// Resource id of the volume at `path`, `None` if it cannot be read
pub fn read_resource_id(path: impl AsRef<Path>) -> Option<String> {
    let path = path.as_ref();
    if !path.is_file() {
        return None;
    }
    match ZipVolumeFile::open(path) {
        Ok(zip) => volume_id(&zip).filter(|id| !id.is_empty()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read volume id");
            None
        }
    }
}

/// `container.description` if present, else the archive comment
fn volume_id(archive: &dyn Archive) -> Option<String> {
    if archive.entry(CONTAINER_DESCRIPTION).is_some() {
        match archive.read_entry(CONTAINER_DESCRIPTION) {
            Ok(raw) => return Some(String::from_utf8_lossy(&raw).trim().to_string()),
            Err(e) => error!(error = %e, "Failed reading {}", CONTAINER_DESCRIPTION),
        }
    }
    let comment = archive.comment().trim().to_string();
    (!comment.is_empty()).then_some(comment)
}

// =============================================================================
// Version
// =============================================================================

/// Contents of `version.txt`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub tool: Option<String>,
}

impl VersionInfo {
    /// Parse `key=value` (or `key: value`) lines; `#`/`!` lines are comments
    pub fn parse(text: &str) -> Aff4Result<Self> {
        let mut major = None;
        let mut minor = None;
        let mut tool = None;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let Some(split) = line.find(['=', ':']) else {
                continue;
            };
            let (key, value) = (line[..split].trim(), line[split + 1..].trim());
            match key {
                "major" => major = Some(value.to_string()),
                "minor" => minor = Some(value.to_string()),
                "tool" => tool = Some(value.to_string()),
                _ => {}
            }
        }

        let number = |v: Option<String>, field: &str| -> Aff4Result<u32> {
            let v = v.ok_or_else(|| {
                Aff4Error::UnsupportedVersion(format!("version.txt has no {field} version"))
            })?;
            v.parse()
                .map_err(|_| Aff4Error::UnsupportedVersion(format!("{field} version {v:?}")))
        };
        Ok(Self {
            major: number(major, "major")?,
            minor: number(minor, "minor")?,
            tool,
        })
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1 && (self.minor == 0 || self.minor == 1)
    }
}

/// Summary of an opened volume
#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    pub resource_id: String,
    pub path: Option<PathBuf>,
    pub version: VersionInfo,
    pub creation_time: Option<DateTime<Utc>>,
    pub images: Vec<String>,
    pub entries: usize,
    pub triples: usize,
}

// =============================================================================
// Container
// =============================================================================

/// An opened AFF4 zip volume
pub struct Aff4Container {
    resource_id: String,
    path: Option<PathBuf>,
    archive: Arc<dyn Archive>,
    model: Model,
    version: VersionInfo,
    creation_time: Option<DateTime<Utc>>,
    config: StreamConfig,
    resolver: RwLock<Option<Arc<dyn VolumeResolver>>>,
    open_streams: Mutex<Vec<StreamHandle>>,
    closed: AtomicBool,
    self_ref: Weak<Aff4Container>,
}

impl Aff4Container {
    /// Open the volume at `path` with a resolver over its directory
    pub fn open(path: impl AsRef<Path>) -> Aff4Result<Arc<Self>> {
        let path = path.as_ref();
        let resolver = LightResolver::for_path(path)?;
        Self::open_with_resolver(path, resolver)
    }

    /// Open the volume at `path` resolving external resources with `resolver`
    pub fn open_with_resolver(
        path: impl AsRef<Path>,
        resolver: Arc<dyn VolumeResolver>,
    ) -> Aff4Result<Arc<Self>> {
        let container = Self::open_file(path, StreamConfig::default())?;
        container.set_resolver(Some(resolver));
        Ok(container)
    }

    /// Open the volume at `path` with no resolver
    pub fn open_file(path: impl AsRef<Path>, config: StreamConfig) -> Aff4Result<Arc<Self>> {
        let path = path.as_ref();
        let meta = fs::metadata(path)?;
        if meta.is_dir() {
            return Err(Aff4Error::Unsupported(format!(
                "{} is a directory; folder volumes are not supported",
                path.display()
            )));
        }
        let zip = ZipVolumeFile::open(path)?;
        Self::from_archive(Arc::new(zip), Some(path.to_path_buf()), config)
    }

    /// Open a volume over an already indexed archive
    pub fn from_archive(
        archive: Arc<dyn Archive>,
        path: Option<PathBuf>,
        config: StreamConfig,
    ) -> Aff4Result<Arc<Self>> {
        let resource_id = volume_id(archive.as_ref())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Aff4Error::NotAff4("no volume identifier".to_string()))?;

        if archive.entry(VERSION_DESCRIPTION).is_none() {
            return Err(Aff4Error::NotAff4(format!("{} missing", VERSION_DESCRIPTION)));
        }
        let raw = archive.read_entry(VERSION_DESCRIPTION)?;
        let version = VersionInfo::parse(&String::from_utf8_lossy(&raw))?;
        if !version.is_supported() {
            return Err(Aff4Error::UnsupportedVersion(format!(
                "{}.{}",
                version.major, version.minor
            )));
        }

        if archive.entry(INFORMATION_TURTLE).is_none() {
            return Err(Aff4Error::NotAff4(format!("{} missing", INFORMATION_TURTLE)));
        }
        let model = turtle::parse(&archive.read_entry(INFORMATION_TURTLE)?)?;
        let creation_time = model.read_datetime(&resource_id, Lexicon::CreationTime);

        info!(
            volume = %resource_id,
            version = %format!("{}.{}", version.major, version.minor),
            triples = model.len(),
            "Opened AFF4 volume"
        );
        Ok(Arc::new_cyclic(|self_ref| Self {
            resource_id,
            path,
            archive,
            model,
            version,
            creation_time,
            config,
            resolver: RwLock::new(None),
            open_streams: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        }))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn archive(&self) -> &Arc<dyn Archive> {
        &self.archive
    }

    pub fn metadata(&self) -> &Model {
        &self.model
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        self.creation_time
    }

    pub fn config(&self) -> StreamConfig {
        self.config
    }

    pub fn resolver(&self) -> Option<Arc<dyn VolumeResolver>> {
        self.resolver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_resolver(&self, resolver: Option<Arc<dyn VolumeResolver>>) {
        *self.resolver.write().unwrap_or_else(PoisonError::into_inner) = resolver;
    }

    fn arc(&self) -> Option<Arc<Self>> {
        self.self_ref.upgrade()
    }

    /// Every `aff4:Image` described in this volume
    pub fn images(&self) -> Vec<Aff4Image> {
        let Some(this) = self.arc() else {
            return Vec::new();
        };
        self.model
            .resources_of_type(Lexicon::Image)
            .into_iter()
            .map(|id| Aff4Image::new(Arc::clone(&this), &id))
            .collect()
    }

    pub fn info(&self) -> ContainerInfo {
        ContainerInfo {
            resource_id: self.resource_id.clone(),
            path: self.path.clone(),
            version: self.version.clone(),
            creation_time: self.creation_time,
            images: self.model.resources_of_type(Lexicon::Image),
            entries: self.archive.entry_names().len(),
            triples: self.model.len(),
        }
    }

    // =========================================================================
    // Resource lookup
    // =========================================================================

    pub fn image(&self, resource: &str) -> Option<Aff4Image> {
        if !self.model.has_type(resource, Lexicon::Image) {
            return None;
        }
        self.arc().map(|this| Aff4Image::new(this, resource))
    }

    pub fn map(&self, resource: &str) -> Option<Arc<Aff4Map>> {
        if !self.model.has_type(resource, Lexicon::Map) {
            return None;
        }
        self.arc().map(|this| Arc::new(Aff4Map::new(this, resource)))
    }

    /// Built-in pattern stream, or a chunked stream stored in this volume
    pub fn image_stream(&self, resource: &str) -> Aff4Result<Option<StreamHandle>> {
        if !Volume::is_open(self) {
            return Ok(None);
        }
        if let Some(stream) = symbolic::builtin(resource) {
            return Ok(Some(stream));
        }
        if !self.model.has_type(resource, Lexicon::ImageStream) {
            return Ok(None);
        }
        let local = match self.model.read_resource(resource, Lexicon::Stored) {
            Some(stored) => stored == self.resource_id,
            None => self
                .segment_entry(&format!("{resource}/00000000.index"))
                .is_some(),
        };
        if !local {
            return Ok(None);
        }
        let stream = ChunkedStream::from_metadata(
            resource,
            &self.resource_id,
            Arc::clone(&self.archive),
            &self.model,
            self.config,
        )?;
        Ok(Some(self.track(Arc::new(stream))))
    }

    /// Raw zip entry for `resource` as a stream
    pub fn segment(&self, resource: &str) -> Aff4Result<Option<StreamHandle>> {
        if !Volume::is_open(self) {
            return Ok(None);
        }
        let Some(entry) = self.segment_entry(resource) else {
            return Ok(None);
        };
        let stream = SegmentStream::open(resource, Arc::clone(&self.archive), &entry)?;
        Ok(Some(self.track(Arc::new(stream))))
    }

    /// Zip entry for a resource name relative to this volume
    pub fn segment_entry(&self, resource: &str) -> Option<EntryInfo> {
        self.archive
            .entry(&names::sanitize(resource, &self.resource_id))
    }

    /// Whole contents of the zip entry for `resource`
    pub fn read_segment(&self, resource: &str) -> Aff4Result<Vec<u8>> {
        let entry = self
            .segment_entry(resource)
            .ok_or_else(|| Aff4Error::Missing(format!("Segment {} in {}", resource, self.resource_id)))?;
        self.archive.read_entry(&entry.name)
    }

    /// Remember `stream` for closing; streams already closed are dropped
    fn track(&self, stream: StreamHandle) -> StreamHandle {
        let mut streams = self.open_streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams.retain(|s| s.is_open());
        streams.push(Arc::clone(&stream));
        stream
    }

    /// Stop tracking `stream`; it is no longer closed with the container
    pub fn release(&self, stream: &StreamHandle) {
        self.open_streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| !Arc::ptr_eq(s, stream));
    }

    /// Number of streams that will be closed with the container
    pub fn open_stream_count(&self) -> usize {
        let mut streams = self.open_streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams.retain(|s| s.is_open());
        streams.len()
    }
}

impl Volume for Aff4Container {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn open(&self, resource: &str) -> Option<Aff4Resource> {
        if resource.trim().is_empty() {
            return None;
        }
        if !self.is_open() {
            debug!(volume = %self.resource_id, resource = %resource, "Volume is closed");
            return None;
        }
        if resource == self.resource_id {
            return self
                .arc()
                .map(|this| Aff4Resource::Volume(this as Arc<dyn Volume>));
        }
        if let Some(image) = self.image(resource) {
            return Some(Aff4Resource::Image(image));
        }
        if let Some(map) = self.map(resource) {
            return Some(Aff4Resource::Map(map));
        }
        match self.image_stream(resource) {
            Ok(Some(stream)) => return Some(Aff4Resource::Stream(stream)),
            Ok(None) => {}
            Err(e) => error!(resource = %resource, error = %e, "Failed to open image stream"),
        }
        match self.segment(resource) {
            Ok(Some(stream)) => return Some(Aff4Resource::Stream(stream)),
            Ok(None) => {}
            Err(e) => error!(resource = %resource, error = %e, "Failed to open segment"),
        }
        debug!(volume = %self.resource_id, resource = %resource, "Resource not in volume");
        None
    }

    fn has_resource(&self, resource: &str) -> bool {
        match self.open(resource) {
            Some(Aff4Resource::Stream(stream)) => {
                self.release(&stream);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    fn close(&self) -> Aff4Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let streams = std::mem::take(
            &mut *self.open_streams.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for stream in &streams {
            if let Err(e) = stream.close() {
                error!(stream = %stream.resource_id(), error = %e, "Failed to close stream");
            }
        }
        debug!(volume = %self.resource_id, streams = streams.len(), "Closed AFF4 volume");
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::MemoryArchive;
    use crate::codec::CompressionKind;
    use crate::stream::{read_to_vec, StreamKind};
    use crate::testutil::{pattern_bytes, VolumeBuilder};

    const VOLUME: &str = "aff4://685e15cc-d0fb-4dbc-ba47-48117fc77044";
    const IMAGE: &str = "aff4://fcbfdce7-4488-4677-abf6-08bc931e195b";
    const MAP: &str = "aff4://c215ba20-5648-4209-a793-1f918c723610";
    const STREAM: &str = "aff4://c215ba20-5648-4209-a793-1f918c723610/data";

    fn builder() -> VolumeBuilder {
        let data = pattern_bytes(100);
        VolumeBuilder::new(VOLUME)
            .image_stream(STREAM, &data, 32, 2, CompressionKind::Zlib)
            .map(MAP, 100, &[STREAM], &[(0, 100, 0, 0)])
            .image(IMAGE, MAP, 100)
    }

    fn open(builder: &VolumeBuilder) -> Arc<Aff4Container> {
        Aff4Container::from_archive(Arc::new(builder.archive()), None, StreamConfig::default())
            .unwrap()
    }

    #[test]
    fn test_is_aff4_container() {
        assert!(is_aff4_container("Base-Linear.aff4"));
        assert!(is_aff4_container("image.AF4"));
        assert!(!is_aff4_container("image.e01"));
        assert!(!is_aff4_container("aff4"));
    }

    #[test]
    fn test_version_parse() {
        let v = VersionInfo::parse("major=1\nminor=1\ntool=Evimetry 2.2.0\n").unwrap();
        assert_eq!(v.major, 1);
        assert_eq!(v.minor, 1);
        assert_eq!(v.tool.as_deref(), Some("Evimetry 2.2.0"));
        assert!(v.is_supported());

        let v = VersionInfo::parse("# comment\nmajor : 2\nminor: 0").unwrap();
        assert!(!v.is_supported());
        assert!(VersionInfo::parse("minor=0").is_err());
        assert!(VersionInfo::parse("major=one\nminor=0").is_err());
    }

    #[test]
    fn test_open_volume() {
        let container = open(&builder());
        assert_eq!(container.resource_id(), VOLUME);
        assert_eq!(container.version().minor, 0);
        assert!(container.creation_time().is_some());
        assert_eq!(container.images().len(), 1);
        assert_eq!(container.images()[0].resource_id(), IMAGE);

        let info = container.info();
        assert_eq!(info.images, vec![IMAGE.to_string()]);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["resource_id"], VOLUME);
        assert_eq!(json["version"]["major"], 1);
    }

    #[test]
    fn test_description_overrides_comment() {
        let archive = builder()
            .description("  aff4://from-description\n")
            .archive();
        let container =
            Aff4Container::from_archive(Arc::new(archive), None, StreamConfig::default()).unwrap();
        assert_eq!(container.resource_id(), "aff4://from-description");
    }

    #[test]
    fn test_rejects_non_aff4() {
        let open = |archive: MemoryArchive| {
            Aff4Container::from_archive(Arc::new(archive), None, StreamConfig::default())
        };
        assert!(matches!(
            open(MemoryArchive::new().entry_with("a", b"b")),
            Err(Aff4Error::NotAff4(_))
        ));
        assert!(matches!(
            open(builder().without_version().archive()),
            Err(Aff4Error::NotAff4(_))
        ));
        assert!(matches!(
            open(builder().version("major=2\nminor=0\n").archive()),
            Err(Aff4Error::UnsupportedVersion(_))
        ));
        assert!(matches!(
            open(builder().without_turtle().archive()),
            Err(Aff4Error::NotAff4(_))
        ));
    }

    #[test]
    fn test_open_dispatch() {
        let container = open(&builder());
        assert!(matches!(container.open(VOLUME), Some(Aff4Resource::Volume(_))));
        assert!(matches!(container.open(IMAGE), Some(Aff4Resource::Image(_))));
        assert!(matches!(container.open(MAP), Some(Aff4Resource::Map(_))));
        assert!(container.open("").is_none());
        assert!(container.open("  ").is_none());
        assert!(container.open("aff4://nothing-here").is_none());

        match container.open(STREAM) {
            Some(Aff4Resource::Stream(s)) => assert_eq!(s.kind(), StreamKind::Chunked),
            other => panic!("unexpected {other:?}"),
        }
        match container.open(&Lexicon::Zero.value()) {
            Some(Aff4Resource::Stream(s)) => assert_eq!(s.kind(), StreamKind::Pattern),
            other => panic!("unexpected {other:?}"),
        }
        match container.open(&format!("{MAP}/idx")) {
            Some(Aff4Resource::Stream(s)) => {
                assert_eq!(s.kind(), StreamKind::Segment);
                assert_eq!(read_to_vec(s.as_ref()).unwrap(), format!("{STREAM}\n").as_bytes());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_image_stream_stored_elsewhere() {
        let builder = builder().triple(
            "aff4://elsewhere",
            &Lexicon::Stored.value(),
            "<aff4://another-volume>",
        );
        let builder = builder.triple(
            "aff4://elsewhere",
            crate::lexicon::RDF_TYPE,
            &format!("<{}>", Lexicon::ImageStream.value()),
        );
        let container = open(&builder);
        assert!(container.image_stream("aff4://elsewhere").unwrap().is_none());
        assert!(!container.has_resource("aff4://elsewhere"));
    }

    #[test]
    fn test_chunked_stream_contents() {
        let container = open(&builder());
        let stream = container.open(STREAM).and_then(Aff4Resource::into_stream).unwrap();
        assert_eq!(read_to_vec(stream.as_ref()).unwrap(), pattern_bytes(100));
    }

    #[test]
    fn test_has_resource_releases_streams() {
        let container = open(&builder());
        assert!(container.has_resource(STREAM));
        assert!(container.has_resource(IMAGE));
        assert_eq!(container.open_stream_count(), 0);
        let _stream = container.open(STREAM);
        assert_eq!(container.open_stream_count(), 1);
    }

    #[test]
    fn test_close_closes_tracked_streams() {
        let container = open(&builder());
        let stream = container.open(STREAM).and_then(Aff4Resource::into_stream).unwrap();
        assert!(stream.is_open());
        container.close().unwrap();
        container.close().unwrap();
        assert!(!container.is_open());
        assert!(!stream.is_open());
        assert_eq!(container.open_stream_count(), 0);
    }

    #[test]
    fn test_closed_streams_are_pruned() {
        let container = open(&builder());
        let stream = container.open(STREAM).and_then(Aff4Resource::into_stream).unwrap();
        assert_eq!(container.open_stream_count(), 1);
        stream.close().unwrap();
        assert_eq!(container.open_stream_count(), 0);
    }

    #[test]
    fn test_closed_volume_opens_nothing() {
        let container = open(&builder());
        container.close().unwrap();
        assert!(container.open(STREAM).is_none());
        assert!(container.open(IMAGE).is_none());
        assert!(container.image_stream(STREAM).unwrap().is_none());
        assert!(container.segment(&format!("{MAP}/idx")).unwrap().is_none());
        assert_eq!(container.open_stream_count(), 0);
    }

    #[test]
    fn test_open_zip_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.aff4");
        builder().write_zip(&path);

        assert_eq!(read_resource_id(&path).as_deref(), Some(VOLUME));
        assert_eq!(read_resource_id(dir.path().join("missing.aff4")), None);

        let container = Aff4Container::open(&path).unwrap();
        assert_eq!(container.resource_id(), VOLUME);
        assert_eq!(container.path(), Some(path.as_path()));
        assert!(container.resolver().is_some());
        let stream = container.open(STREAM).and_then(Aff4Resource::into_stream).unwrap();
        assert_eq!(read_to_vec(stream.as_ref()).unwrap(), pattern_bytes(100));
    }

    #[test]
    fn test_open_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Aff4Container::open_file(dir.path(), StreamConfig::default()),
            Err(Aff4Error::Unsupported(_))
        ));
        assert!(matches!(
            Aff4Container::open_file(dir.path().join("nope.aff4"), StreamConfig::default()),
            Err(Aff4Error::Io(_))
        ));
    }
}
