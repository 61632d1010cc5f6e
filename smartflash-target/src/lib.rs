//! Target description schema
//!
//! Programming the flash of a target requires knowing its layout: where the
//! ROM lives, how large the program pages and erase sectors are, and roughly
//! how long erasing and programming take. This crate contains the schema
//! structs for the YAML target description files and a registry of the
//! built-in targets.
#![warn(missing_docs)]

mod cost;
mod geometry;
mod memory;
mod registry;
pub(crate) mod serialize;
mod target;

pub use cost::{CostModel, ZeroThroughput};
pub use geometry::{FlashGeometry, GeometryError};
pub use memory::{MemoryRange, PageInfo, RamRegion, SectorInfo};
pub use registry::{Registry, RegistryError};
pub use target::TargetDescription;
