//! Resource resolution across volumes
//!
//! An image may be striped over several volumes. A map's targets are first
//! looked up in the volume holding the map; anything not found there is
//! passed to a [`VolumeResolver`], which can open other volumes by id.
//!
//! Resolution order for one target:
//! 1. the local volume
//! 2. the resolver, by the target's own id
//! 3. the resolver, by the volume named in the target's `aff4:stored`
//!    property; that volume is opened and kept so it can be closed later

pub mod light;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Aff4Result;
use crate::image::Aff4Image;
use crate::lexicon::Lexicon;
use crate::map::Aff4Map;
use crate::model::MetadataStore;
use crate::stream::StreamHandle;

pub use light::LightResolver;

// =============================================================================
// Traits
// =============================================================================

/// One opened volume
pub trait Volume: Send + Sync {
    fn resource_id(&self) -> &str;

    /// Open a resource held by this volume
    fn open(&self, resource: &str) -> Option<Aff4Resource>;

    fn has_resource(&self, resource: &str) -> bool;

    /// Close every stream handed out by this volume; repeated calls are no-ops
    fn close(&self) -> Aff4Result<()>;

    fn is_open(&self) -> bool;
}

/// Finds and opens resources outside the current volume
pub trait VolumeResolver: Send + Sync {
    fn resource_id(&self) -> &str;

    fn open(&self, resource: &str) -> Option<Aff4Resource>;

    fn has_resource(&self, resource: &str) -> bool;
}

// =============================================================================
// Resources
// =============================================================================

/// Anything a volume or resolver can open
pub enum Aff4Resource {
    Volume(Arc<dyn Volume>),
    Image(Aff4Image),
    Map(Arc<Aff4Map>),
    Stream(StreamHandle),
}

impl Aff4Resource {
    pub fn resource_id(&self) -> &str {
        match self {
            Aff4Resource::Volume(v) => v.resource_id(),
            Aff4Resource::Image(i) => i.resource_id(),
            Aff4Resource::Map(m) => m.resource_id(),
            Aff4Resource::Stream(s) => s.resource_id(),
        }
    }

    /// Byte stream view: streams as-is, maps materialized
    pub fn into_stream(self) -> Option<StreamHandle> {
        match self {
            Aff4Resource::Stream(stream) => Some(stream),
            Aff4Resource::Map(map) => match map.stream() {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!(map = %map.resource_id(), error = %e, "Failed to materialize map");
                    None
                }
            },
            Aff4Resource::Volume(_) | Aff4Resource::Image(_) => None,
        }
    }

    pub fn into_volume(self) -> Option<Arc<dyn Volume>> {
        match self {
            Aff4Resource::Volume(volume) => Some(volume),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Aff4Resource::Volume(_) => "volume",
            Aff4Resource::Image(_) => "image",
            Aff4Resource::Map(_) => "map",
            Aff4Resource::Stream(_) => "stream",
        }
    }
}

impl fmt::Debug for Aff4Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind_name(), self.resource_id())
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Ask `resolver` for `resource`, falling back to the volume it is stored in
///
/// Volumes opened on the way are pushed to `opened`.
pub fn query_resolver(
    resolver: &dyn VolumeResolver,
    metadata: &dyn MetadataStore,
    resource: &str,
    opened: &mut Vec<Arc<dyn Volume>>,
) -> Option<Aff4Resource> {
    if resolver.has_resource(resource) {
        return resolver.open(resource);
    }
    let stored = metadata.read_resource(resource, Lexicon::Stored)?;
    if !resolver.has_resource(&stored) {
        return None;
    }
    match resolver.open(&stored)? {
        Aff4Resource::Volume(volume) => {
            debug!(resource = %resource, volume = %stored, "Opened external volume");
            opened.push(Arc::clone(&volume));
            volume.open(resource)
        }
        other => Some(other),
    }
}

/// Resolve `resource` to a stream: local volume, then resolver
pub fn resolve_stream(
    local: &dyn Volume,
    resolver: Option<&dyn VolumeResolver>,
    metadata: &dyn MetadataStore,
    resource: &str,
    opened: &mut Vec<Arc<dyn Volume>>,
) -> Option<StreamHandle> {
    if let Some(stream) = local.open(resource).and_then(Aff4Resource::into_stream) {
        return Some(stream);
    }
    let resolver = resolver?;
    query_resolver(resolver, metadata, resource, opened).and_then(Aff4Resource::into_stream)
}
