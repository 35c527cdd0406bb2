//! Directory-scanning volume resolver
//!
//! Indexes every `.aff4`/`.af4` file under a root directory by its volume
//! id. Lookups that miss trigger a rescan, so volumes copied in after the
//! resolver was created are still found.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::{debug, error, info, warn};

use super::{Aff4Resource, Volume, VolumeResolver};
use crate::container::{is_aff4_container, read_resource_id, Aff4Container};
use crate::error::{Aff4Error, Aff4Result};
use crate::lexicon::generate_id;

/// Resolver over the AFF4 volumes in one directory tree
pub struct LightResolver {
    resource_id: String,
    root: PathBuf,
    volumes: Mutex<HashMap<String, PathBuf>>,
    self_ref: Weak<LightResolver>,
}

impl LightResolver {
    /// Resolver rooted at `root`, scanned once up front
    pub fn new(root: impl AsRef<Path>) -> Aff4Result<Arc<Self>> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Aff4Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a readable directory", root.display()),
            )));
        }
        let resolver = Arc::new_cyclic(|self_ref| Self {
            resource_id: generate_id(),
            root: root.to_path_buf(),
            volumes: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        });
        resolver.scan();
        Ok(resolver)
    }

    /// Resolver over `path` if it is a directory, else over its parent
    pub fn for_path(path: impl AsRef<Path>) -> Aff4Result<Arc<Self>> {
        let path = path.as_ref();
        if path.is_dir() {
            return Self::new(path);
        }
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let parent = absolute.parent().ok_or_else(|| {
            Aff4Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} has no parent directory", path.display()),
            ))
        })?;
        Self::new(parent)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Known volume ids and their files
    pub fn volumes(&self) -> Vec<(String, PathBuf)> {
        let mut volumes: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, path)| (id.clone(), path.clone()))
            .collect();
        volumes.sort();
        volumes
    }

    /// Rescan the directory tree for volumes not yet indexed
    pub fn scan(&self) {
        let before = self.lock().len();
        self.scan_dir(&self.root);
        let after = self.lock().len();
        if after != before {
            info!(root = %self.root.display(), volumes = after, "Indexed AFF4 volumes");
        }
    }

    fn scan_dir(&self, dir: &Path) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!(path = %dir.display(), error = %e, "Failed to scan directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.scan_dir(&path);
                continue;
            }
            let is_volume = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_aff4_container);
            if !is_volume || self.lock().values().any(|p| *p == path) {
                continue;
            }
            match read_resource_id(&path) {
                Some(id) => {
                    debug!(volume = %id, path = %path.display(), "Found AFF4 volume");
                    self.lock().insert(id, path);
                }
                None => warn!(path = %path.display(), "Skipping unreadable AFF4 volume"),
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PathBuf>> {
        self.volumes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VolumeResolver for LightResolver {
    fn resource_id(&self) -> &str {
        &self.resource_id
    }

    fn has_resource(&self, resource: &str) -> bool {
        if resource.trim().is_empty() {
            return false;
        }
        if self.lock().contains_key(resource) {
            return true;
        }
        self.scan();
        self.lock().contains_key(resource)
    }

    /// Open the volume `resource` with this resolver attached
    fn open(&self, resource: &str) -> Option<Aff4Resource> {
        if !self.has_resource(resource) {
            return None;
        }
        let path = self.lock().get(resource).cloned()?;
        if !path.is_file() {
            debug!(volume = %resource, path = %path.display(), "Volume file disappeared");
            self.lock().retain(|_, p| *p != path);
            return None;
        }
        let this = self.self_ref.upgrade()?;
        match Aff4Container::open_with_resolver(&path, this) {
            Ok(container) => Some(Aff4Resource::Volume(container as Arc<dyn Volume>)),
            Err(e) => {
                warn!(volume = %resource, path = %path.display(), error = %e, "Failed to open volume");
                None
            }
        }
    }
}
