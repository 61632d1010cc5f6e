use crate::serialize::hex_range;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Represents a region in RAM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RamRegion {
    /// Address range of the region.
    #[serde(serialize_with = "hex_range")]
    pub range: Range<u32>,
}

/// Information about a sector of flash, the smallest unit that can be erased on its own.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SectorInfo {
    /// Base address of the sector.
    pub base_address: u32,
    /// Size of the sector in bytes.
    pub size: u32,
}

impl SectorInfo {
    /// Returns the address range of the sector.
    pub fn address_range(&self) -> Range<u32> {
        self.base_address..self.base_address + self.size
    }
}

/// Information about a page of flash, the unit that is programmed in one go.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PageInfo {
    /// Base address of the page.
    pub base_address: u32,
    /// Size of the page in bytes.
    pub size: u32,
}

impl PageInfo {
    /// Returns the address range of the page.
    pub fn address_range(&self) -> Range<u32> {
        self.base_address..self.base_address + self.size
    }
}

/// Enables the user to do range intersection testing.
pub trait MemoryRange {
    /// Returns true if `self` contains `range` fully.
    fn contains_range(&self, range: &Range<u32>) -> bool;

    /// Returns true if `self` intersects `range` partially.
    fn intersects_range(&self, range: &Range<u32>) -> bool;
}

impl MemoryRange for Range<u32> {
    fn contains_range(&self, range: &Range<u32>) -> bool {
        if range.end == 0 || range.is_empty() {
            false
        } else {
            self.contains(&range.start) && self.contains(&(range.end - 1))
        }
    }

    fn intersects_range(&self, range: &Range<u32>) -> bool {
        if range.end == 0 || range.is_empty() || self.is_empty() {
            false
        } else {
            self.contains(&range.start) && !self.contains(&(range.end - 1))
                || !self.contains(&range.start) && self.contains(&(range.end - 1))
                || self.contains_range(range)
                || range.contains_range(self)
        }
    }
}
