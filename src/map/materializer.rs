//! Map materialization
//!
//! Builds the region lookup for one `aff4:Map`:
//! 1. pick the gap stream (override, `aff4:mapGapDefaultStream`, or zeros)
//! 2. resolve each line of `<map>/idx` to a stream, numbering them from 0
//! 3. decode `<map>/map` in file order into an [`IntervalMap`], filling holes
//!    with the gap stream
//!
//! Unresolvable targets never fail the build; they are replaced with a
//! placeholder that reads as `UNKNOWN` so the rest of the image stays
//! readable. A missing `idx` or `map` entry does fail it. A target leading
//! back to a map still under construction on this thread gets the same
//! placeholder.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use super::entry::{RegionEntry, RegionRecord};
use super::MapOptions;
use crate::common::binary::records;
use crate::container::Aff4Container;
use crate::error::{Aff4Error, Aff4Result};
use crate::interval::IntervalMap;
use crate::lexicon::Lexicon;
use crate::model::MetadataStore;
use crate::resolver::{self, Aff4Resource, Volume};
use crate::stream::{available, symbolic, ImageStream, StreamHandle, StreamKind};

/// Volume-relative name of a map's resource, without leading '/'
pub(crate) fn relative_name(resource: &str, volume_id: &str) -> String {
    let res = resource.trim_start_matches('/');
    res.strip_prefix(volume_id)
        .unwrap_or(res)
        .trim_start_matches('/')
        .to_string()
}

/// True when the map, or the image it targets, is `aff4:DiscontiguousImage`
pub(crate) fn is_sparse(metadata: &dyn MetadataStore, resource: &str) -> bool {
    if metadata.has_type(resource, Lexicon::DiscontiguousImage) {
        return true;
    }
    metadata
        .read_resource(resource, Lexicon::Target)
        .is_some_and(|target| metadata.has_type(&target, Lexicon::DiscontiguousImage))
}

thread_local! {
    /// Maps being materialized on this thread, outermost first
    static BUILDING: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Marks a map as under construction until dropped
struct BuildGuard;

impl BuildGuard {
    fn enter(resource: &str) -> Self {
        BUILDING.with(|building| building.borrow_mut().push(resource.to_string()));
        BuildGuard
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        BUILDING.with(|building| {
            building.borrow_mut().pop();
        });
    }
}

/// True while `resource` is being materialized further up this thread's stack
fn is_building(resource: &str) -> bool {
    BUILDING.with(|building| building.borrow().iter().any(|r| r == resource))
}

// =============================================================================
// Builder
// =============================================================================

/// One-shot builder of a [`MaterializedMap`]
pub struct MapMaterializer<'a> {
    resource: &'a str,
    parent: &'a Aff4Container,
    options: &'a MapOptions,
}

impl<'a> MapMaterializer<'a> {
    pub fn new(parent: &'a Aff4Container, resource: &'a str, options: &'a MapOptions) -> Self {
        Self {
            resource,
            parent,
            options,
        }
    }

    pub fn build(&self) -> Aff4Result<MaterializedMap> {
        let _guard = BuildGuard::enter(self.resource);
        let metadata = self.parent.metadata();
        let gap = self.gap_stream();
        let size = metadata
            .read_long(self.resource, Lexicon::Size)
            .unwrap_or(0)
            .max(0) as u64;
        let sparse = is_sparse(metadata, self.resource);

        let mut map = MaterializedMap {
            resource: self.resource.to_string(),
            size,
            sparse,
            gap,
            streams: BTreeMap::new(),
            regions: IntervalMap::new(),
            external: Vec::new(),
            closed: AtomicBool::new(false),
        };
        if size == 0 {
            warn!(map = %self.resource, "Map is zero sized");
            return Ok(map);
        }

        let result = self
            .read_targets(&mut map.streams, &mut map.external)
            .and_then(|_| self.read_regions(&mut map));
        if let Err(e) = result {
            // release whatever was opened before the failure
            let _ = map.close();
            return Err(e);
        }
        debug!(
            map = %self.resource,
            size,
            sparse,
            targets = map.streams.len(),
            regions = map.regions.len(),
            external = map.external.len(),
            "Materialized map"
        );
        Ok(map)
    }

    fn entry_name(&self, suffix: &str) -> String {
        let volume_id = Volume::resource_id(self.parent);
        format!("{}/{suffix}", relative_name(self.resource, volume_id))
    }

    fn gap_stream(&self) -> StreamHandle {
        if let Some(stream) = &self.options.gap_stream {
            return Arc::clone(stream);
        }
        self.parent
            .metadata()
            .read_resource(self.resource, Lexicon::MapGapDefaultStream)
            .filter(|id| {
                let cyclic = is_building(id);
                if cyclic {
                    warn!(map = %self.resource, gap = %id, "Gap stream refers back to a map being materialized, using zeros");
                }
                !cyclic
            })
            .and_then(|id| self.parent.open(&id))
            .and_then(Aff4Resource::into_stream)
            .unwrap_or_else(symbolic::zero)
    }

    fn read_targets(
        &self,
        streams: &mut BTreeMap<i32, StreamHandle>,
        external: &mut Vec<Arc<dyn Volume>>,
    ) -> Aff4Result<()> {
        let name = self.entry_name("idx");
        let raw = self.parent.read_segment(&name)?;
        let text = String::from_utf8_lossy(&raw);

        let mut index = 0i32;
        for line in text.lines() {
            if line.is_empty() {
                warn!(entry = %name, "Unexpected empty line in map target index");
                continue;
            }
            let stream = self.resolve_target(line, external);
            trace!(map = %self.resource, index, target = %line, resolved = %stream.resource_id(), "Map target");
            streams.insert(index, stream);
            index += 1;
        }
        Ok(())
    }

    fn resolve_target(&self, line: &str, external: &mut Vec<Arc<dyn Volume>>) -> StreamHandle {
        if let Some(unknown) = &self.options.unknown_stream {
            if Lexicon::UnknownData.matches(line) {
                return Arc::clone(unknown);
            }
        }
        if let Some(stream) = symbolic::builtin(line) {
            return stream;
        }
        if is_building(line) {
            warn!(
                map = %self.resource,
                target = %line,
                "Map target refers back to a map being materialized, substituting unknown data"
            );
            return symbolic::unknown_labeled(line);
        }
        let resolver = self.parent.resolver();
        let resolved = resolver::resolve_stream(
            self.parent,
            resolver.as_deref(),
            self.parent.metadata(),
            line,
            external,
        );
        if let Some(stream) = resolved {
            return stream;
        }

        let replacement = self
            .options
            .missing_stream
            .clone()
            .unwrap_or_else(|| symbolic::unknown_labeled(line));
        warn!(
            map = %self.resource,
            target = %line,
            replacement = %replacement.resource_id(),
            "Unable to locate stream resource, substituting"
        );
        replacement
    }

    fn read_regions(&self, map: &mut MaterializedMap) -> Aff4Result<()> {
        let name = self.entry_name("map");
        let raw = self.parent.read_segment(&name)?;
        if raw.len() % RegionRecord::SIZE != 0 {
            warn!(
                entry = %name,
                trailing = raw.len() % RegionRecord::SIZE,
                "Map table has a partial trailing record"
            );
        }

        let mut expected = 0u64;
        for chunk in records(&raw, RegionRecord::SIZE) {
            let record = RegionRecord::decode(chunk)?;
            if record.length == 0 {
                trace!(map = %self.resource, offset = record.offset, "Skipping empty region");
                continue;
            }
            if record.offset != expected {
                if !map.sparse {
                    warn!(
                        map = %self.resource,
                        "Map expected offset {:#010x}, found offset {:#010x}",
                        expected,
                        record.offset
                    );
                }
                if record.offset > expected {
                    map.put(RegionEntry::gap(
                        expected,
                        record.offset - expected,
                        Arc::clone(&map.gap),
                    ));
                }
                expected = record.offset;
            }

            let stream = match map.streams.get(&record.target_id) {
                Some(stream) => Arc::clone(stream),
                None => {
                    warn!(
                        map = %self.resource,
                        target_id = record.target_id,
                        "Missing stream reference, substituting unknown data"
                    );
                    let stream = self
                        .options
                        .missing_stream
                        .clone()
                        .unwrap_or_else(symbolic::unknown);
                    map.streams.insert(record.target_id, Arc::clone(&stream));
                    stream
                }
            };
            map.put(RegionEntry::new(record, stream));
            expected = record.offset.saturating_add(record.length);
        }

        if expected < map.size {
            map.put(RegionEntry::gap(expected, map.size - expected, Arc::clone(&map.gap)));
        }
        Ok(())
    }
}

// =============================================================================
// Materialized map
// =============================================================================

/// Region table of a map, readable as one stream
pub struct MaterializedMap {
    resource: String,
    size: u64,
    sparse: bool,
    gap: StreamHandle,
    streams: BTreeMap<i32, StreamHandle>,
    regions: IntervalMap<RegionEntry>,
    external: Vec<Arc<dyn Volume>>,
    closed: AtomicBool,
}

impl MaterializedMap {
    fn put(&mut self, entry: RegionEntry) {
        self.regions.put(entry.offset as i64, entry);
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    pub fn gap_stream(&self) -> &StreamHandle {
        &self.gap
    }

    /// Target id to stream
    pub fn stream_table(&self) -> &BTreeMap<i32, StreamHandle> {
        &self.streams
    }

    /// Regions keyed by logical offset
    pub fn regions(&self) -> &IntervalMap<RegionEntry> {
        &self.regions
    }

    /// Volumes opened to resolve targets stored elsewhere
    pub fn external_volumes(&self) -> &[Arc<dyn Volume>] {
        &self.external
    }

    /// Region covering `pos`
    pub fn region_at(&self, pos: u64) -> Option<&RegionEntry> {
        let key = i64::try_from(pos).ok()?;
        self.regions
            .get(key)
            .or_else(|| self.regions.find_previous(key))
            .filter(|entry| entry.contains(pos))
    }
}

impl ImageStream for MaterializedMap {
    fn resource_id(&self) -> &str {
        &self.resource
    }

    fn size(&self) -> u64 {
        self.size
    }

    /// Reads stop at the end of the region covering `pos`
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Aff4Error::Closed.into());
        }
        let n = available(self.size, pos, buf.len());
        if n == 0 {
            return Ok(0);
        }
        // unsorted tables can leave holes and overlaps; a later region start wins
        let next = i64::try_from(pos)
            .ok()
            .and_then(|key| key.checked_add(1))
            .and_then(|key| self.regions.find_next(key))
            .map(|entry| entry.offset)
            .unwrap_or(self.size);
        let limit = next.saturating_sub(pos).min(n as u64);

        if let Some(entry) = self.region_at(pos) {
            let delta = pos - entry.offset;
            let take = (entry.length - delta).min(limit) as usize;
            return entry.stream.read_at(entry.target_offset + delta, &mut buf[..take]);
        }
        self.gap.read_at(pos, &mut buf[..limit as usize])
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Map
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut closed: Vec<&StreamHandle> = Vec::with_capacity(self.streams.len());
        for stream in self.streams.values() {
            if closed.iter().any(|s| Arc::ptr_eq(s, stream)) {
                continue;
            }
            if let Err(e) = stream.close() {
                error!(map = %self.resource, stream = %stream.resource_id(), error = %e, "Failed to close stream");
            }
            closed.push(stream);
        }
        for volume in &self.external {
            if let Err(e) = volume.close() {
                error!(map = %self.resource, volume = %volume.resource_id(), error = %e, "Failed to close volume");
            }
        }
        debug!(map = %self.resource, streams = closed.len(), volumes = self.external.len(), "Closed map");
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}
