use std::fmt::{Debug, Formatter};

use smartflash_target::{FlashGeometry, PageInfo, SectorInfo};

use super::{
    AlignmentError, FlashError, Flasher, OverlapError, ProgramOptions, ProgramResult,
    ProgressObserver,
};

/// The description of a page in flash.
#[derive(Clone)]
pub struct FlashPage {
    address: u32,
    data: Vec<u8>,
    /// Whether the whole content was read from the target.
    restored: bool,
}

impl Debug for FlashPage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "FlashPage {{")?;
        writeln!(f, "    address: {:#010X}", self.address())?;
        writeln!(f, "    size: {:#X}", self.size())?;
        writeln!(f, "    restored: {}", self.restored)?;
        write!(f, "}}")
    }
}

impl FlashPage {
    /// Creates a new page filled with the erased value.
    fn new(page_info: &PageInfo, erased_byte_value: u8) -> Self {
        Self {
            address: page_info.base_address,
            data: vec![erased_byte_value; page_info.size as usize],
            restored: false,
        }
    }

    /// Returns the start address of the page.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Returns the size of the page in bytes.
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// Returns the data slice of the page.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns true if the page content was completely read from the target,
    /// so it is known to match the flash.
    pub fn is_restored(&self) -> bool {
        self.restored
    }

    pub(super) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(super) fn set_restored(&mut self) {
        self.restored = true;
    }
}

/// The description of a sector in flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashSector {
    address: u32,
    size: u32,
    /// Index of the first page of the sector in the layout.
    first_page: usize,
    page_count: usize,
}

impl FlashSector {
    /// Returns the start address of the sector.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Returns the size of the sector in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Returns the range of page indices of the sector in the layout.
    pub fn page_indices(&self) -> std::ops::Range<usize> {
        self.first_page..self.first_page + self.page_count
    }
}

/// A region of a page that is not covered by any data block.
///
/// Its content has to be restored after the sector is erased, or it is left at
/// the erased value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashFill {
    address: u32,
    size: u32,
    page_index: usize,
}

impl FlashFill {
    /// Returns the start address of the fill.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Returns the size of the fill in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Returns the corresponding page index of the fill.
    pub fn page_index(&self) -> usize {
        self.page_index
    }
}

/// The built layout of the data in flash.
///
/// It contains every page of every sector touched by the data, in ascending
/// address order.
#[derive(Debug, Clone)]
pub struct FlashLayout {
    sectors: Vec<FlashSector>,
    pages: Vec<FlashPage>,
    fills: Vec<FlashFill>,
}

impl FlashLayout {
    /// Get the sectors of the flash layout.
    pub fn sectors(&self) -> &[FlashSector] {
        &self.sectors
    }

    /// Get the pages of the flash layout.
    pub fn pages(&self) -> &[FlashPage] {
        &self.pages
    }

    /// Get the fills of the flash layout.
    pub fn fills(&self) -> &[FlashFill] {
        &self.fills
    }

    /// Returns true if the layout contains no data at all.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Returns true if the layout contains every sector of the ROM.
    pub fn covers_rom(&self, geometry: &FlashGeometry) -> bool {
        self.sectors.len() == geometry.sector_count() as usize
    }

    /// Returns the total size of all pages in bytes.
    pub fn size(&self) -> u64 {
        self.pages.iter().map(|page| u64::from(page.size())).sum()
    }

    pub(super) fn pages_mut(&mut self) -> &mut [FlashPage] {
        &mut self.pages
    }
}

/// A block of data that is to be written to flash.
#[derive(Clone)]
struct FlashDataBlock {
    address: u32,
    data: Vec<u8>,
}

impl FlashDataBlock {
    /// Exclusive end address. May lie past the 32 bit address space.
    fn end(&self) -> u64 {
        u64::from(self.address) + self.data.len() as u64
    }

    fn overlaps(&self, other: &FlashDataBlock) -> bool {
        u64::from(self.address) < other.end() && u64::from(other.address) < self.end()
    }
}

/// Collects the data of one programming session.
///
/// Data can be added in any order; overlapping data is rejected as soon as it is
/// added. Nothing happens on the target until [`FlashBuilder::program`] is
/// called, which consumes the builder.
///
/// ```
/// use smartflash::flashing::FlashBuilder;
///
/// let mut builder = FlashBuilder::new();
/// builder.add_data(0x1000, vec![0x55; 16]).unwrap();
/// assert!(builder.add_data(0x100f, vec![0x33; 4]).is_err());
/// ```
#[derive(Default)]
pub struct FlashBuilder {
    data_blocks: Vec<FlashDataBlock>,
}

impl FlashBuilder {
    /// Creates a new `FlashBuilder` with empty data.
    pub fn new() -> Self {
        Self {
            data_blocks: vec![],
        }
    }

    /// Add a block of data to be programmed.
    ///
    /// Programming does not start until the `program` method is called.
    /// Empty blocks are ignored.
    pub fn add_data(&mut self, address: u32, data: impl Into<Vec<u8>>) -> Result<(), OverlapError> {
        let block = FlashDataBlock {
            address,
            data: data.into(),
        };

        if block.data.is_empty() {
            tracing::trace!("Ignoring empty data block at {:#010x}", address);
            return Ok(());
        }

        let overlap = |existing: &FlashDataBlock| OverlapError {
            address,
            size: block.data.len(),
            existing_address: existing.address,
            existing_size: existing.data.len(),
        };

        // Add the block to the sorted data list.
        match self
            .data_blocks
            .binary_search_by_key(&address, |block| block.address)
        {
            // If a block starts at the same address, they overlap.
            Ok(position) => return Err(overlap(&self.data_blocks[position])),
            Err(position) => {
                // The prior block may extend into the new one.
                if let Some(prior) = position.checked_sub(1).and_then(|p| self.data_blocks.get(p)) {
                    if prior.overlaps(&block) {
                        return Err(overlap(prior));
                    }
                }

                // The new block may extend into the next one. Nothing was inserted
                // yet, so the next block is still at `position`.
                if let Some(next) = self.data_blocks.get(position) {
                    if next.overlaps(&block) {
                        return Err(overlap(next));
                    }
                }

                tracing::trace!(
                    "Added data block {:#010x}..{:#010x}",
                    block.address,
                    block.end()
                );
                self.data_blocks.insert(position, block);
            }
        }

        Ok(())
    }

    /// Returns true if no data was added.
    pub fn is_empty(&self) -> bool {
        self.data_blocks.is_empty()
    }

    /// Returns the number of data bytes added.
    pub fn total_bytes(&self) -> u64 {
        self.data_blocks
            .iter()
            .map(|block| block.data.len() as u64)
            .sum()
    }

    /// Iterates over the added blocks in ascending address order.
    pub fn blocks(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.data_blocks
            .iter()
            .map(|block| (block.address, block.data.as_slice()))
    }

    /// Programs all added data to the target.
    ///
    /// Without any data this succeeds immediately and does not access the target.
    pub fn program(
        self,
        flasher: &mut Flasher<'_>,
        options: &ProgramOptions,
        progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<ProgramResult, FlashError> {
        let layout = self.build_sectors_and_pages(flasher.geometry())?;
        flasher.program(layout, self.total_bytes(), options, progress)
    }

    /// Lays out all sectors touched by the data.
    ///
    /// Every page of those sectors is part of the layout. Bytes not covered by a
    /// data block are recorded as fills and hold the erased value.
    pub fn build_sectors_and_pages(
        &self,
        geometry: &FlashGeometry,
    ) -> Result<FlashLayout, FlashError> {
        geometry.validate()?;

        if let Some(alignment) = geometry.min_program_length {
            if geometry.page_size % alignment != 0 {
                return Err(AlignmentError {
                    address: geometry.rom_start,
                    length: geometry.page_size,
                    alignment,
                }
                .into());
            }
        }

        let rom_end = u64::from(geometry.rom_start) + u64::from(geometry.rom_size);
        for block in &self.data_blocks {
            if block.address < geometry.rom_start || block.end() > rom_end {
                return Err(FlashError::AddressNotInFlash {
                    start: block.address,
                    end: block.end(),
                });
            }
        }

        let mut sectors: Vec<FlashSector> = Vec::new();
        let mut pages: Vec<FlashPage> = Vec::new();

        for block in &self.data_blocks {
            // The ROM check above guarantees both ends are in the ROM.
            let Some(first) = geometry.sector_info(block.address) else {
                continue;
            };
            let last_address = (block.end() - 1) as u32;

            let mut sector_address = first.base_address;
            while sector_address <= last_address {
                // Blocks are sorted, so only the last sector can already contain this one.
                let known = sectors
                    .last()
                    .is_some_and(|sector| sector.address == sector_address);
                if !known {
                    let sector_info = SectorInfo {
                        base_address: sector_address,
                        size: geometry.sector_size,
                    };
                    self.add_sector(geometry, &sector_info, &mut sectors, &mut pages);
                }

                match sector_address.checked_add(geometry.sector_size) {
                    Some(next) => sector_address = next,
                    None => break,
                }
            }
        }

        // Copy the data into the pages. Pages are sorted, so a binary search finds the first one.
        let mut covered = vec![Vec::<std::ops::Range<u32>>::new(); pages.len()];
        for block in &self.data_blocks {
            let mut offset = 0usize;
            while offset < block.data.len() {
                let address = block.address + offset as u32;
                let index = match pages.binary_search_by(|page| {
                    if page.address + page.size() <= address {
                        std::cmp::Ordering::Less
                    } else if page.address > address {
                        std::cmp::Ordering::Greater
                    } else {
                        std::cmp::Ordering::Equal
                    }
                }) {
                    Ok(index) => index,
                    Err(_) => {
                        return Err(FlashError::AddressNotInFlash {
                            start: address,
                            end: block.end(),
                        })
                    }
                };

                let page = &mut pages[index];
                let page_offset = (address - page.address) as usize;
                let size = (page.size() as usize - page_offset).min(block.data.len() - offset);

                page.data[page_offset..page_offset + size]
                    .copy_from_slice(&block.data[offset..offset + size]);
                covered[index].push(address..address + size as u32);
                offset += size;
            }
        }

        let fills = Self::collect_fills(&pages, &covered);

        tracing::debug!(
            "Layout has {} sectors, {} pages and {} fills",
            sectors.len(),
            pages.len(),
            fills.len()
        );
        for sector in &sectors {
            tracing::trace!("{:#?}", sector);
        }

        Ok(FlashLayout {
            sectors,
            pages,
            fills,
        })
    }

    fn add_sector(
        &self,
        geometry: &FlashGeometry,
        sector_info: &SectorInfo,
        sectors: &mut Vec<FlashSector>,
        pages: &mut Vec<FlashPage>,
    ) {
        let first_page = pages.len();
        let mut page_address = sector_info.base_address;
        for _ in 0..geometry.pages_per_sector() {
            let page_info = PageInfo {
                base_address: page_address,
                size: geometry.page_size,
            };
            pages.push(FlashPage::new(&page_info, geometry.erased_byte_value));
            page_address = page_address.wrapping_add(geometry.page_size);
        }

        tracing::trace!(
            "Added Sector ({:#010x}..{:#010x})",
            sector_info.base_address,
            u64::from(sector_info.base_address) + u64::from(sector_info.size)
        );

        sectors.push(FlashSector {
            address: sector_info.base_address,
            size: sector_info.size,
            first_page,
            page_count: pages.len() - first_page,
        });
    }

    /// Finds the gaps between the covered ranges of every page.
    ///
    /// The covered ranges of one page are sorted and disjoint, because the data
    /// blocks are.
    fn collect_fills(pages: &[FlashPage], covered: &[Vec<std::ops::Range<u32>>]) -> Vec<FlashFill> {
        let mut fills = Vec::new();

        for (page_index, (page, ranges)) in pages.iter().zip(covered).enumerate() {
            let page_end = page.address + page.size();
            let mut cursor = page.address;

            for range in ranges {
                if range.start > cursor {
                    fills.push(FlashFill {
                        address: cursor,
                        size: range.start - cursor,
                        page_index,
                    });
                }
                cursor = range.end;
            }

            if cursor < page_end {
                fills.push(FlashFill {
                    address: cursor,
                    size: page_end - cursor,
                    page_index,
                });
            }
        }

        fills
    }
}
