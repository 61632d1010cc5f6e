#![allow(missing_docs)]

use smartflash_target::{GeometryError, ZeroThroughput};

use super::FlashPhase;
use crate::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, docsplay::Display)]
/// The data at {address:#010x} ({size} bytes) overlaps the data at {existing_address:#010x} ({existing_size} bytes) added before.
pub struct OverlapError {
    pub address: u32,
    pub size: usize,
    pub existing_address: u32,
    pub existing_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, docsplay::Display)]
/// The {length} byte program operation at {address:#010x} cannot be aligned to the minimum program length of {alignment} bytes.
pub struct AlignmentError {
    pub address: u32,
    pub length: u32,
    pub alignment: u32,
}

/// A device command issued by the flasher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, docsplay::Display)]
pub enum FlashOperation {
    /// chip erase
    EraseChip,
    /// sector erase
    EraseSector,
    /// page program
    ProgramPage,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, docsplay::Display)]
/// The {operation} at {address:#010x} failed with code {error_code}: {cause}
pub struct FlashOperationError {
    pub operation: FlashOperation,
    pub address: u32,
    pub error_code: u32,
    pub cause: String,
}

/// What was already changed on the device when a programming operation failed.
///
/// Sectors and pages are listed by their start address, in the order they were
/// touched. A page listed here holds the new data, every other page in an erased
/// sector is blank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialState {
    pub chip_erased: bool,
    pub erased_sectors: Vec<u32>,
    pub programmed_pages: Vec<u32>,
}

impl PartialState {
    /// Returns true if the device was not modified at all.
    pub fn is_untouched(&self) -> bool {
        !self.chip_erased && self.erased_sectors.is_empty() && self.programmed_pages.is_empty()
    }
}

/// Describes any error that happened during or in preparation for the flashing procedure.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum FlashError {
    /// {0}
    Overlap(#[from] OverlapError),

    /// {0}
    Alignment(#[from] AlignmentError),

    /// The flash description is invalid.
    InvalidGeometry(#[from] GeometryError),

    /// The cost model is invalid.
    InvalidCostModel(#[from] ZeroThroughput),

    /// No flash memory contains the entire requested memory range {start:#010x}..{end:#010x}.
    AddressNotInFlash { start: u32, end: u64 },

    /// The target does not support erasing the whole chip.
    ChipEraseNotSupported,

    /// The transport failed at {address:#010x} while {phase}.
    Transport {
        phase: FlashPhase,
        address: u32,
        #[source]
        source: TransportError,
        partial: PartialState,
    },

    /// The device failed while {phase}.
    Operation {
        phase: FlashPhase,
        #[source]
        source: FlashOperationError,
        partial: PartialState,
    },

    /// The flash content at {address:#010x} does not match the image after programming.
    Verify { address: u32, partial: PartialState },
}

impl FlashError {
    /// Returns what was already modified on the device when the error happened.
    ///
    /// `None` means the device was not modified.
    pub fn partial_state(&self) -> Option<&PartialState> {
        match self {
            FlashError::Transport { partial, .. }
            | FlashError::Operation { partial, .. }
            | FlashError::Verify { partial, .. }
                if !partial.is_untouched() =>
            {
                Some(partial)
            }
            _ => None,
        }
    }

    /// Returns the phase in which the device access failed, if the error came from the device.
    pub fn phase(&self) -> Option<FlashPhase> {
        match self {
            FlashError::Transport { phase, .. } | FlashError::Operation { phase, .. } => {
                Some(*phase)
            }
            FlashError::Verify { .. } => Some(FlashPhase::Verifying),
            _ => None,
        }
    }
}
