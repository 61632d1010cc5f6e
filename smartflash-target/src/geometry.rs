use crate::memory::{MemoryRange, PageInfo, SectorInfo};
use crate::serialize::hex_u_int;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// The layout of the flash of one target.
///
/// Sectors are the smallest unit that can be erased, pages the unit that is
/// programmed with one operation. Both are uniform over the whole ROM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlashGeometry {
    /// First address of the flash.
    #[serde(serialize_with = "hex_u_int")]
    pub rom_start: u32,
    /// Size of the flash in bytes.
    #[serde(serialize_with = "hex_u_int")]
    pub rom_size: u32,
    /// Size of a program page in bytes.
    #[serde(serialize_with = "hex_u_int")]
    pub page_size: u32,
    /// Size of an erase sector in bytes.
    #[serde(serialize_with = "hex_u_int")]
    pub sector_size: u32,
    /// The value of a byte in flash that was just erased.
    #[serde(
        default = "default_erased_byte_value",
        serialize_with = "hex_u_int"
    )]
    pub erased_byte_value: u8,
    /// The smallest number of bytes the flash controller can program at once.
    ///
    /// Every program operation has to start and end on a multiple of this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_program_length: Option<u32>,
}

fn default_erased_byte_value() -> u8 {
    0xFF
}

/// A flash geometry that cannot be used for programming.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, docsplay::Display)]
pub enum GeometryError {
    /// The {field} ({value:#x}) must be a non-zero power of two.
    NotPowerOfTwo {
        /// Name of the offending field.
        field: &'static str,
        /// Its value.
        value: u32,
    },

    /// The sector size ({sector_size:#x}) is smaller than the page size ({page_size:#x}).
    SectorSmallerThanPage {
        /// Size of a sector in bytes.
        sector_size: u32,
        /// Size of a page in bytes.
        page_size: u32,
    },

    /// The {field} ({value:#010x}) is not aligned to the sector size ({alignment:#x}).
    Misaligned {
        /// Name of the offending field.
        field: &'static str,
        /// Its value.
        value: u32,
        /// The required alignment, the sector size.
        alignment: u32,
    },

    /// The ROM is empty.
    EmptyRom,

    /// The ROM at {start:#010x} with size {size:#x} exceeds the 32-bit address space.
    AddressOverflow {
        /// Start address of the ROM.
        start: u32,
        /// Size of the ROM in bytes.
        size: u32,
    },

    /// The minimum program length {0:#x} must be a power of two no larger than a sector.
    InvalidProgramLength(u32),
}

impl FlashGeometry {
    /// Creates a geometry with an erased value of `0xFF` and no program length constraint.
    pub fn new(rom_start: u32, rom_size: u32, page_size: u32, sector_size: u32) -> Self {
        Self {
            rom_start,
            rom_size,
            page_size,
            sector_size,
            erased_byte_value: default_erased_byte_value(),
            min_program_length: None,
        }
    }

    /// Checks that the geometry describes a flash that can actually be laid out.
    pub fn validate(&self) -> Result<(), GeometryError> {
        for (field, value) in [("page size", self.page_size), ("sector size", self.sector_size)] {
            if !value.is_power_of_two() {
                return Err(GeometryError::NotPowerOfTwo { field, value });
            }
        }

        if self.sector_size < self.page_size {
            return Err(GeometryError::SectorSmallerThanPage {
                sector_size: self.sector_size,
                page_size: self.page_size,
            });
        }

        if self.rom_size == 0 {
            return Err(GeometryError::EmptyRom);
        }

        for (field, value) in [("ROM start", self.rom_start), ("ROM size", self.rom_size)] {
            if value % self.sector_size != 0 {
                return Err(GeometryError::Misaligned {
                    field,
                    value,
                    alignment: self.sector_size,
                });
            }
        }

        if self.rom_start.checked_add(self.rom_size).is_none() {
            return Err(GeometryError::AddressOverflow {
                start: self.rom_start,
                size: self.rom_size,
            });
        }

        if let Some(length) = self.min_program_length {
            if !length.is_power_of_two() || length > self.sector_size {
                return Err(GeometryError::InvalidProgramLength(length));
            }
        }

        Ok(())
    }

    /// Returns the address range of the whole ROM.
    pub fn rom_range(&self) -> Range<u32> {
        self.rom_start..self.rom_start.saturating_add(self.rom_size)
    }

    /// Returns true if `range` lies completely in the ROM.
    pub fn contains(&self, range: &Range<u32>) -> bool {
        self.rom_range().contains_range(range)
    }

    /// Returns the number of program pages in the ROM.
    pub fn page_count(&self) -> u32 {
        self.rom_size / self.page_size
    }

    /// Returns the number of erase sectors in the ROM.
    pub fn sector_count(&self) -> u32 {
        self.rom_size / self.sector_size
    }

    /// Returns the number of program pages in one sector.
    pub fn pages_per_sector(&self) -> u32 {
        self.sector_size / self.page_size
    }

    /// Returns the sector containing `address`, if the address is in the ROM.
    pub fn sector_info(&self, address: u32) -> Option<SectorInfo> {
        if !self.rom_range().contains(&address) {
            return None;
        }

        Some(SectorInfo {
            base_address: address - (address - self.rom_start) % self.sector_size,
            size: self.sector_size,
        })
    }

    /// Returns the page containing `address`, if the address is in the ROM.
    pub fn page_info(&self, address: u32) -> Option<PageInfo> {
        if !self.rom_range().contains(&address) {
            return None;
        }

        Some(PageInfo {
            base_address: address - (address - self.rom_start) % self.page_size,
            size: self.page_size,
        })
    }

    /// Iterates over all sectors of the ROM in ascending order.
    pub fn sectors(&self) -> impl Iterator<Item = SectorInfo> + '_ {
        (0..self.sector_count()).map(move |index| SectorInfo {
            base_address: self.rom_start + index * self.sector_size,
            size: self.sector_size,
        })
    }

    /// Returns true if every byte of `data` has the erased value.
    pub fn is_erased(&self, data: &[u8]) -> bool {
        data.iter().all(|&byte| byte == self.erased_byte_value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn kinetis() -> FlashGeometry {
        FlashGeometry::new(0x0, 0x20000, 0x400, 0x400)
    }

    #[test]
    fn valid_geometry() {
        assert_eq!(kinetis().validate(), Ok(()));
        assert_eq!(kinetis().page_count(), 128);
        assert_eq!(kinetis().sector_count(), 128);
    }

    #[test_case(FlashGeometry::new(0, 0x8000, 0x300, 0x1000), GeometryError::NotPowerOfTwo { field: "page size", value: 0x300 }; "page not power of two")]
    #[test_case(FlashGeometry::new(0, 0x8000, 0x400, 0), GeometryError::NotPowerOfTwo { field: "sector size", value: 0 }; "zero sector")]
    #[test_case(FlashGeometry::new(0, 0x8000, 0x1000, 0x400), GeometryError::SectorSmallerThanPage { sector_size: 0x400, page_size: 0x1000 }; "sector smaller than page")]
    #[test_case(FlashGeometry::new(0x200, 0x8000, 0x400, 0x400), GeometryError::Misaligned { field: "ROM start", value: 0x200, alignment: 0x400 }; "unaligned start")]
    #[test_case(FlashGeometry::new(0, 0, 0x400, 0x400), GeometryError::EmptyRom; "empty rom")]
    #[test_case(FlashGeometry::new(0xffff_0000, 0x10000, 0x400, 0x400), GeometryError::AddressOverflow { start: 0xffff_0000, size: 0x10000 }; "rom at the end of the address space")]
    fn invalid_geometry(geometry: FlashGeometry, expected: GeometryError) {
        assert_eq!(geometry.validate(), Err(expected));
    }

    #[test]
    fn program_length_must_fit_a_sector() {
        let mut geometry = kinetis();
        geometry.min_program_length = Some(6);
        assert_eq!(
            geometry.validate(),
            Err(GeometryError::InvalidProgramLength(6))
        );

        geometry.min_program_length = Some(0x800);
        assert_eq!(
            geometry.validate(),
            Err(GeometryError::InvalidProgramLength(0x800))
        );

        geometry.min_program_length = Some(8);
        assert_eq!(geometry.validate(), Ok(()));
    }

    #[test]
    fn sector_and_page_lookup() {
        let geometry = FlashGeometry::new(0x1400_0000, 0x10_0000, 0x100, 0x1000);

        let sector = geometry.sector_info(0x1400_1234).unwrap();
        assert_eq!(sector.address_range(), 0x1400_1000..0x1400_2000);

        let page = geometry.page_info(0x1400_1234).unwrap();
        assert_eq!(page.address_range(), 0x1400_1200..0x1400_1300);

        assert_eq!(geometry.sector_info(0x1000), None);
        assert_eq!(geometry.page_info(0x1410_0000), None);
        assert_eq!(geometry.pages_per_sector(), 16);
    }

    #[test]
    fn sectors_cover_rom() {
        let geometry = FlashGeometry::new(0x0, 0x4000, 0x40, 0x400);
        let sectors: Vec<_> = geometry.sectors().collect();

        assert_eq!(sectors.len(), 16);
        assert_eq!(sectors[0].base_address, 0x0);
        assert_eq!(sectors[15].address_range().end, 0x4000);
    }

    #[test]
    fn erased_detection_uses_erased_value() {
        let mut geometry = kinetis();
        assert!(geometry.is_erased(&[0xff; 16]));
        assert!(!geometry.is_erased(&[0xff, 0xfe]));

        geometry.erased_byte_value = 0x00;
        assert!(geometry.is_erased(&[0x00; 4]));
    }
}
