use crate::queue::{DeferredReadSet, ReadQueue};
use crate::{DeviceError, TransportError};
use std::ops::Range;

/// The connection to a target whose flash is programmed.
///
/// This is the only way the flashing engine talks to a device. Implementations
/// wrap a debug adapter and the flash routines running on the target. The
/// connection is exclusively borrowed for the duration of one programming
/// operation.
pub trait FlashTarget {
    /// Reads `data.len()` bytes starting at `address`.
    fn read_memory(&mut self, address: u32, data: &mut [u8]) -> Result<(), TransportError>;

    /// Programs `data` to already erased flash at `address`.
    ///
    /// The engine always writes whole program pages.
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError>;

    /// Erases the sector starting at `address`.
    ///
    /// Returns once the device acknowledged that the sector is erased.
    fn erase_sector(&mut self, address: u32) -> Result<(), DeviceError>;

    /// Erases the whole flash.
    ///
    /// Returns once the device acknowledged that the flash is erased.
    fn erase_chip(&mut self) -> Result<(), DeviceError>;

    /// Returns the target to normal run mode.
    fn reset(&mut self) -> Result<(), TransportError>;

    /// Whether [`FlashTarget::erase_chip`] can be used.
    fn supports_chip_erase(&self) -> bool {
        true
    }

    /// Whether [`FlashTarget::page_checksums`] can be used.
    fn supports_checksum(&self) -> bool {
        false
    }

    /// Computes the CRC-32 (IEEE) of every range on the target.
    fn page_checksums(&mut self, ranges: &[Range<u32>]) -> Result<Vec<u32>, TransportError> {
        let _ = ranges;
        Err(TransportError::Unsupported("page checksums"))
    }

    /// Executes all reads of `queue`.
    ///
    /// The default implementation performs one read after the other. Transports
    /// which can keep multiple requests in flight should override this.
    fn execute_reads(&mut self, queue: &ReadQueue) -> Result<DeferredReadSet, TransportError> {
        let mut results = DeferredReadSet::with_capacity(queue.len());
        for (index, range) in queue.iter() {
            let mut data = vec![0; range.len()];
            self.read_memory(range.start, &mut data)?;
            results.push(index, data);
        }
        Ok(results)
    }

    /// Waits until all outstanding transfers completed.
    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
