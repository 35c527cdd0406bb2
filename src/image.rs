//! Forensic images (`aff4:Image`)
//!
//! An image is the logical device description: acquisition details, disk or
//! memory geometry, case details, and the `aff4:dataStream` map that holds
//! its bytes.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::container::Aff4Container;
use crate::lexicon::Lexicon;
use crate::map::Aff4Map;
use crate::model::MetadataStore;

/// Disk geometry and identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskInfo {
    pub block_size: Option<i32>,
    pub sector_count: Option<i64>,
    pub device_name: Option<String>,
    pub firmware: Option<String>,
    pub interface_type: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
}

/// Physical memory layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub page_size: Option<i64>,
    pub page_table_entry_offset: Option<i64>,
    pub installed_size: Option<i64>,
    pub addressable_size: Option<i64>,
}

/// `aff4:CaseDetails` targeting the image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaseInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub examiner: Option<String>,
}

/// Everything the volume metadata says about one image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub resource_id: String,
    /// Type IRIs
    pub types: Vec<String>,
    pub size: Option<i64>,
    pub acquisition_completion_state: Option<String>,
    pub acquisition_type: Option<String>,
    pub data_stream: Option<String>,
    pub dependent_streams: Vec<String>,
    pub disk: Option<DiskInfo>,
    pub memory: Option<MemoryInfo>,
    pub case: Option<CaseInfo>,
}

/// An image described in a volume
#[derive(Clone)]
pub struct Aff4Image {
    parent: Arc<Aff4Container>,
    resource: String,
}

impl Aff4Image {
    pub(crate) fn new(parent: Arc<Aff4Container>, resource: &str) -> Self {
        Self {
            parent,
            resource: resource.to_string(),
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource
    }

    pub fn container(&self) -> &Arc<Aff4Container> {
        &self.parent
    }

    pub fn types(&self) -> Vec<Lexicon> {
        self.parent.metadata().types(&self.resource)
    }

    pub fn size(&self) -> Option<u64> {
        self.parent
            .metadata()
            .read_long(&self.resource, Lexicon::Size)
            .and_then(|s| u64::try_from(s).ok())
    }

    /// Map holding the image bytes
    pub fn map(&self) -> Option<Arc<Aff4Map>> {
        let metadata = self.parent.metadata();
        if let Some(data_stream) = metadata.read_resource(&self.resource, Lexicon::DataStream) {
            return Some(Arc::new(Aff4Map::new(Arc::clone(&self.parent), &data_stream)));
        }
        if metadata.has_type(&self.resource, Lexicon::Map) {
            return Some(Arc::new(Aff4Map::new(Arc::clone(&self.parent), &self.resource)));
        }
        warn!(image = %self.resource, "No aff4:dataStream defined for image");
        None
    }

    pub fn info(&self) -> ImageInfo {
        let m = self.parent.metadata();
        let id = self.resource.as_str();
        let string = |property| m.read_string(id, property);

        let (disk, memory) = if m.has_type(id, Lexicon::MemoryImage) {
            let memory = MemoryInfo {
                page_size: m.read_long(id, Lexicon::PageSize),
                page_table_entry_offset: m.read_long(id, Lexicon::MemoryPageTableEntryOffset),
                installed_size: m.read_long(id, Lexicon::MemoryInstalledSize),
                addressable_size: m.read_long(id, Lexicon::MemoryAddressableSize),
            };
            (None, Some(memory))
        } else {
            let disk = DiskInfo {
                block_size: m.read_int(id, Lexicon::BlockSize),
                sector_count: m.read_long(id, Lexicon::SectorCount),
                device_name: string(Lexicon::DiskDeviceName),
                firmware: string(Lexicon::DiskFirmware),
                interface_type: string(Lexicon::DiskInterfaceType),
                make: string(Lexicon::DiskMake),
                model: string(Lexicon::DiskModel),
                serial: string(Lexicon::DiskSerial),
            };
            (Some(disk), None)
        };

        let case = m
            .resource_targeting(id, Lexicon::CaseDetails)
            .map(|case| CaseInfo {
                name: m.read_string(&case, Lexicon::CaseName),
                description: m.read_string(&case, Lexicon::CaseDescription),
                examiner: m.read_string(&case, Lexicon::Examiner),
            });

        ImageInfo {
            resource_id: self.resource.clone(),
            types: m
                .types(id)
                .into_iter()
                .map(Lexicon::value)
                .collect(),
            size: m.read_long(id, Lexicon::Size),
            acquisition_completion_state: string(Lexicon::AcquisitionCompletionState),
            acquisition_type: string(Lexicon::AcquisitionType),
            data_stream: m.read_resource(id, Lexicon::DataStream),
            dependent_streams: m.read_resources(id, Lexicon::DependentStream),
            disk,
            memory,
            case,
        }
    }
}

impl std::fmt::Debug for Aff4Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aff4Image")
            .field("resource", &self.resource)
            .field("volume", &crate::resolver::Volume::resource_id(self.parent.as_ref()))
            .finish()
    }
}
