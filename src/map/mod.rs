//! AFF4 maps (`aff4:Map`)
//!
//! A map assembles a logical image from regions of other streams. It is
//! materialized on first use (see [`materializer`]) and then read like any
//! other [`ImageStream`].

pub mod entry;
pub mod materializer;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, warn};

use crate::container::Aff4Container;
use crate::error::Aff4Result;
use crate::lexicon::{is_builtin_stream, Lexicon};
use crate::model::MetadataStore;
use crate::resolver::Volume;
use crate::stream::{ImageStream, StreamChannel, StreamHandle};

pub use entry::{RegionEntry, RegionRecord};
pub use materializer::{MapMaterializer, MaterializedMap};

/// Stream overrides applied when a map is materialized
#[derive(Clone, Default)]
pub struct MapOptions {
    /// Replaces the map's `aff4:mapGapDefaultStream`
    pub gap_stream: Option<StreamHandle>,
    /// Replaces `aff4:UnknownData` targets
    pub unknown_stream: Option<StreamHandle>,
    /// Replaces targets that cannot be resolved
    pub missing_stream: Option<StreamHandle>,
}

impl fmt::Debug for MapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = |s: &Option<StreamHandle>| s.as_ref().map(|s| s.resource_id().to_string());
        f.debug_struct("MapOptions")
            .field("gap_stream", &id(&self.gap_stream))
            .field("unknown_stream", &id(&self.unknown_stream))
            .field("missing_stream", &id(&self.missing_stream))
            .finish()
    }
}

struct MapState {
    options: MapOptions,
    built: Option<Arc<MaterializedMap>>,
}

/// A map described in a volume
pub struct Aff4Map {
    resource: String,
    parent: Arc<Aff4Container>,
    size: u64,
    state: Mutex<MapState>,
}

impl Aff4Map {
    pub(crate) fn new(parent: Arc<Aff4Container>, resource: &str) -> Self {
        let size = parent
            .metadata()
            .read_long(resource, Lexicon::Size)
            .unwrap_or(0)
            .max(0) as u64;
        Self {
            resource: resource.to_string(),
            parent,
            size,
            state: Mutex::new(MapState {
                options: MapOptions::default(),
                built: None,
            }),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn container(&self) -> &Arc<Aff4Container> {
        &self.parent
    }

    pub fn is_sparse(&self) -> bool {
        materializer::is_sparse(self.parent.metadata(), &self.resource)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn options(&self) -> MapOptions {
        self.lock().options.clone()
    }

    /// Replace the overrides; ignored once the map is materialized
    pub fn set_options(&self, options: MapOptions) -> bool {
        let mut state = self.lock();
        if state.built.is_some() {
            warn!(map = %self.resource, "Map already materialized, overrides ignored");
            return false;
        }
        state.options = options;
        true
    }

    pub fn set_gap_stream(&self, stream: StreamHandle) -> bool {
        let mut options = self.options();
        options.gap_stream = Some(stream);
        self.set_options(options)
    }

    pub fn set_unknown_stream(&self, stream: StreamHandle) -> bool {
        let mut options = self.options();
        options.unknown_stream = Some(stream);
        self.set_options(options)
    }

    pub fn set_missing_stream(&self, stream: StreamHandle) -> bool {
        let mut options = self.options();
        options.missing_stream = Some(stream);
        self.set_options(options)
    }

    /// Build the region table on first call; later calls return the same map
    pub fn materialize(&self) -> Aff4Result<Arc<MaterializedMap>> {
        let mut state = self.lock();
        if let Some(built) = &state.built {
            return Ok(Arc::clone(built));
        }
        let built = Arc::new(
            MapMaterializer::new(&self.parent, &self.resource, &state.options).build()?,
        );
        state.built = Some(Arc::clone(&built));
        Ok(built)
    }

    /// The materialized map as a stream handle
    pub fn stream(&self) -> Aff4Result<StreamHandle> {
        Ok(self.materialize()? as StreamHandle)
    }

    /// A fresh cursor over the map
    pub fn channel(&self) -> Aff4Result<StreamChannel> {
        Ok(StreamChannel::new(self.stream()?))
    }

    pub fn stream_table(&self) -> Aff4Result<BTreeMap<i32, StreamHandle>> {
        Ok(self.materialize()?.stream_table().clone())
    }

    pub fn regions(&self) -> Aff4Result<Vec<RegionEntry>> {
        Ok(self
            .materialize()?
            .regions()
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    pub fn external_volumes(&self) -> Aff4Result<Vec<Arc<dyn Volume>>> {
        Ok(self.materialize()?.external_volumes().to_vec())
    }

    /// Streams the map reads from, excluding built-in pattern streams
    ///
    /// Uses `aff4:dependentStream` when declared, else the map's target index.
    pub fn dependent_streams(&self) -> Vec<String> {
        let declared = self
            .parent
            .metadata()
            .read_resources(&self.resource, Lexicon::DependentStream);
        if !declared.is_empty() {
            return declared;
        }

        let volume_id = Volume::resource_id(self.parent.as_ref());
        let name = format!("{}/idx", materializer::relative_name(&self.resource, volume_id));
        let raw = match self.parent.read_segment(&name) {
            Ok(raw) => raw,
            Err(e) => {
                error!(map = %self.resource, error = %e, "Failed to read map target index");
                return Vec::new();
            }
        };
        let mut streams = Vec::new();
        for line in String::from_utf8_lossy(&raw).lines() {
            if line.is_empty() {
                warn!(entry = %name, "Unexpected empty line in map target index");
            } else if !is_builtin_stream(line) {
                streams.push(line.to_string());
            }
        }
        streams
    }

    /// Close the materialized map, if any; repeated calls are no-ops
    pub fn close(&self) -> io::Result<()> {
        let built = self.lock().built.clone();
        match built {
            Some(map) => map.close(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Aff4Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aff4Map")
            .field("resource", &self.resource)
            .field("size", &self.size)
            .finish()
    }
}
