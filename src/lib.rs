//! AFF4 forensic image reader
//!
//! Opens AFF4 zip volumes, reads their `information.turtle` metadata and
//! exposes images, maps and streams as random-access byte sources.
//!
//! ```no_run
//! use aff4_reader::{Aff4Container, ImageStream, Volume};
//!
//! let container = Aff4Container::open("Base-Linear.aff4")?;
//! for image in container.images() {
//!     if let Some(stream) = image.map().and_then(|m| m.stream().ok()) {
//!         let mut sector = [0u8; 512];
//!         stream.read_at(0, &mut sector)?;
//!     }
//! }
//! container.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod archive;
pub mod codec;
pub mod common;
pub mod container;
pub mod error;
pub mod image;
pub mod interval;
pub mod lexicon;
pub mod logging;
pub mod map;
pub mod model;
pub mod resolver;
pub mod stream;

#[cfg(test)]
pub(crate) mod testutil;

pub use container::{Aff4Container, ContainerInfo, VersionInfo};
pub use error::{Aff4Error, Aff4Result};
pub use image::{Aff4Image, ImageInfo};
pub use lexicon::Lexicon;
pub use map::{Aff4Map, MapOptions};
pub use resolver::{Aff4Resource, LightResolver, Volume, VolumeResolver};
pub use stream::{ImageStream, StreamChannel, StreamHandle};
