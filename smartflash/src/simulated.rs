//! An in-memory target with the behaviour of real flash.
//!
//! Programming can only move bits away from the erased value, erasing works on
//! whole sectors, and every transport round trip is counted. Failures can be
//! injected to exercise error paths.

use std::ops::Range;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use smartflash_target::{CostModel, FlashGeometry, MemoryRange, TargetDescription};

use crate::flashing::CRC32;
use crate::queue::{DeferredReadSet, ReadQueue};
use crate::{DeviceError, FlashTarget, TransportError};

/// Error code reported when programming does not cover whole program units.
pub const ERROR_MISALIGNED: u32 = 0x2;
/// Error code reported when erasing an address that is not the start of a sector.
pub const ERROR_NOT_SECTOR_START: u32 = 0x3;
/// Error code reported for accesses to write protected sectors.
pub const ERROR_PROTECTED: u32 = 0x4;
/// Error code reported when the chip erase command is not available.
pub const ERROR_NO_CHIP_ERASE: u32 = 0x5;
/// Error code of injected program failures.
pub const ERROR_INJECTED: u32 = 0x10;

/// A device access recorded by the [`SimulatedTarget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOperation {
    /// Memory was read.
    Read { address: u32, size: u32 },
    /// A page was programmed.
    Write { address: u32, size: u32 },
    /// A sector was erased.
    EraseSector { address: u32 },
    /// The whole chip was erased.
    EraseChip,
    /// Checksums of `count` ranges were computed.
    Checksums { count: usize },
    /// Outstanding transfers were flushed.
    Flush,
    /// The target was reset.
    Reset,
}

/// Counters of the transport traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Number of request/response exchanges with the target.
    pub round_trips: u64,
    /// Bytes read from the target.
    pub bytes_read: u64,
    /// Bytes programmed.
    pub bytes_written: u64,
}

/// Behaviour of a [`SimulatedTarget`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulatedTargetConfig {
    /// Whether the chip erase command is available.
    pub chip_erase_supported: bool,
    /// Whether page checksums can be computed on the target.
    pub checksum_supported: bool,
    /// Whether a batch of reads takes one round trip instead of one per read.
    pub deferred_transfer: bool,
    /// Time one round trip over the transport takes.
    #[serde(with = "millis")]
    pub round_trip: Duration,
    /// Erase and program durations of the cost model are multiplied by this and slept.
    ///
    /// Zero disables sleeping.
    pub time_scale: f64,
}

impl Default for SimulatedTargetConfig {
    fn default() -> Self {
        Self {
            chip_erase_supported: true,
            checksum_supported: true,
            deferred_transfer: true,
            round_trip: Duration::ZERO,
            time_scale: 0.0,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// A target whose flash lives in host memory.
#[derive(Debug, Clone)]
pub struct SimulatedTarget {
    geometry: FlashGeometry,
    cost: CostModel,
    config: SimulatedTargetConfig,
    flash: Vec<u8>,
    operations: Vec<DeviceOperation>,
    stats: TransferStats,
    protected: Vec<Range<u32>>,
    writes_until_failure: Option<usize>,
    round_trips_until_disconnect: Option<u64>,
    disconnected: bool,
}

impl SimulatedTarget {
    /// Creates a target with erased flash and the default configuration.
    pub fn new(geometry: FlashGeometry) -> Self {
        Self::with_config(geometry, CostModel::default(), SimulatedTargetConfig::default())
    }

    /// Creates a target with erased flash.
    pub fn with_config(
        geometry: FlashGeometry,
        cost: CostModel,
        config: SimulatedTargetConfig,
    ) -> Self {
        let flash = vec![geometry.erased_byte_value; geometry.rom_size as usize];
        Self {
            geometry,
            cost,
            config,
            flash,
            operations: vec![],
            stats: TransferStats::default(),
            protected: vec![],
            writes_until_failure: None,
            round_trips_until_disconnect: None,
            disconnected: false,
        }
    }

    /// Creates a target matching a target description.
    pub fn from_description(description: &TargetDescription, mut config: SimulatedTargetConfig) -> Self {
        config.checksum_supported &= description.checksum_supported;
        config.chip_erase_supported &= description.chip_erase_supported;
        Self::with_config(description.flash.clone(), description.cost.clone(), config)
    }

    /// The geometry of the simulated flash.
    pub fn geometry(&self) -> &FlashGeometry {
        &self.geometry
    }

    /// The whole flash content.
    pub fn memory(&self) -> &[u8] {
        &self.flash
    }

    /// Replaces flash content directly, without erase or program semantics.
    pub fn load(&mut self, address: u32, data: &[u8]) {
        let offset = (address - self.geometry.rom_start) as usize;
        self.flash[offset..offset + data.len()].copy_from_slice(data);
    }

    /// All device accesses since creation or the last [`Self::clear_operations`].
    pub fn operations(&self) -> &[DeviceOperation] {
        &self.operations
    }

    /// Forgets the recorded device accesses and transfer counters.
    pub fn clear_operations(&mut self) {
        self.operations.clear();
        self.stats = TransferStats::default();
    }

    /// The transfer counters.
    pub fn stats(&self) -> TransferStats {
        self.stats
    }

    /// Makes erasing and programming in `range` fail.
    pub fn protect(&mut self, range: Range<u32>) {
        self.protected.push(range);
    }

    /// Makes the program command fail after `writes` more successful writes.
    pub fn fail_after_writes(&mut self, writes: usize) {
        self.writes_until_failure = Some(writes);
    }

    /// Drops the connection after `round_trips` more round trips.
    pub fn disconnect_after(&mut self, round_trips: u64) {
        self.round_trips_until_disconnect = Some(round_trips);
    }

    fn round_trip(&mut self) -> Result<(), TransportError> {
        if self.disconnected {
            return Err(TransportError::Disconnected);
        }
        if let Some(remaining) = self.round_trips_until_disconnect.as_mut() {
            if *remaining == 0 {
                self.disconnected = true;
                return Err(TransportError::Disconnected);
            }
            *remaining -= 1;
        }

        self.stats.round_trips += 1;
        if !self.config.round_trip.is_zero() {
            thread::sleep(self.config.round_trip);
        }
        Ok(())
    }

    fn busy(&self, duration: Duration) {
        if self.config.time_scale > 0.0 {
            thread::sleep(duration.mul_f64(self.config.time_scale));
        }
    }

    fn offset(&self, range: &Range<u32>) -> Result<Range<usize>, TransportError> {
        if range.is_empty() {
            return Ok(0..0);
        }
        if !self.geometry.contains(range) {
            return Err(TransportError::Fault {
                address: range.start,
            });
        }
        let start = (range.start - self.geometry.rom_start) as usize;
        Ok(start..start + (range.end - range.start) as usize)
    }

    fn check_protection(&self, range: &Range<u32>) -> Result<(), DeviceError> {
        if self
            .protected
            .iter()
            .any(|protected| protected.intersects_range(range))
        {
            return Err(DeviceError::Rejected {
                code: ERROR_PROTECTED,
                cause: format!("{:#010x} is write protected", range.start),
            });
        }
        Ok(())
    }

    fn read_into(&mut self, address: u32, data: &mut [u8]) -> Result<(), TransportError> {
        let range = address..address + data.len() as u32;
        let offset = self.offset(&range)?;
        data.copy_from_slice(&self.flash[offset]);
        self.stats.bytes_read += data.len() as u64;
        self.operations.push(DeviceOperation::Read {
            address,
            size: data.len() as u32,
        });
        Ok(())
    }
}

impl FlashTarget for SimulatedTarget {
    fn read_memory(&mut self, address: u32, data: &mut [u8]) -> Result<(), TransportError> {
        self.round_trip()?;
        self.read_into(address, data)
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
        self.round_trip()?;

        let range = address..address + data.len() as u32;
        let offset = self.offset(&range)?;

        let unit = self
            .geometry
            .min_program_length
            .unwrap_or(1)
            .max(1);
        let page = self.geometry.page_info(address);
        let crosses_page = page.map_or(true, |page| !page.address_range().contains_range(&range));
        if address % unit != 0 || data.len() as u32 % unit != 0 || crosses_page {
            return Err(DeviceError::Rejected {
                code: ERROR_MISALIGNED,
                cause: format!(
                    "program of {} bytes at {:#010x} is not within one page",
                    data.len(),
                    address
                ),
            });
        }

        self.check_protection(&range)?;

        if let Some(remaining) = self.writes_until_failure.as_mut() {
            if *remaining == 0 {
                return Err(DeviceError::Rejected {
                    code: ERROR_INJECTED,
                    cause: "program verification failed".to_owned(),
                });
            }
            *remaining -= 1;
        }

        let erased = self.geometry.erased_byte_value;
        for (cell, &value) in self.flash[offset].iter_mut().zip(data) {
            *cell = match erased {
                0xFF => *cell & value,
                0x00 => *cell | value,
                _ => value,
            };
        }

        self.busy(self.cost.program_time(data.len() as u64));
        self.stats.bytes_written += data.len() as u64;
        self.operations.push(DeviceOperation::Write {
            address,
            size: data.len() as u32,
        });
        Ok(())
    }

    fn erase_sector(&mut self, address: u32) -> Result<(), DeviceError> {
        self.round_trip()?;

        let sector = self
            .geometry
            .sector_info(address)
            .ok_or(TransportError::Fault { address })?;
        if sector.base_address != address {
            return Err(DeviceError::Rejected {
                code: ERROR_NOT_SECTOR_START,
                cause: format!("{address:#010x} is not the start of a sector"),
            });
        }
        self.check_protection(&sector.address_range())?;

        let offset = self.offset(&sector.address_range())?;
        let erased = self.geometry.erased_byte_value;
        self.flash[offset].fill(erased);

        self.busy(self.cost.sector_erase_time());
        self.operations.push(DeviceOperation::EraseSector { address });
        Ok(())
    }

    fn erase_chip(&mut self) -> Result<(), DeviceError> {
        self.round_trip()?;

        if !self.config.chip_erase_supported {
            return Err(DeviceError::Rejected {
                code: ERROR_NO_CHIP_ERASE,
                cause: "chip erase is not supported".to_owned(),
            });
        }
        self.check_protection(&self.geometry.rom_range())?;

        let erased = self.geometry.erased_byte_value;
        self.flash.fill(erased);

        self.busy(self.cost.chip_erase_time());
        self.operations.push(DeviceOperation::EraseChip);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TransportError> {
        self.round_trip()?;
        self.operations.push(DeviceOperation::Reset);
        Ok(())
    }

    fn supports_chip_erase(&self) -> bool {
        self.config.chip_erase_supported
    }

    fn supports_checksum(&self) -> bool {
        self.config.checksum_supported
    }

    fn page_checksums(&mut self, ranges: &[Range<u32>]) -> Result<Vec<u32>, TransportError> {
        if !self.config.checksum_supported {
            return Err(TransportError::Unsupported("page checksums"));
        }
        self.round_trip()?;

        let mut checksums = Vec::with_capacity(ranges.len());
        let mut bytes = 0u64;
        for range in ranges {
            let offset = self.offset(range)?;
            bytes += offset.len() as u64;
            checksums.push(CRC32.checksum(&self.flash[offset]));
        }

        self.busy(self.cost.checksum_time(bytes));
        self.operations.push(DeviceOperation::Checksums {
            count: ranges.len(),
        });
        Ok(checksums)
    }

    fn execute_reads(&mut self, queue: &ReadQueue) -> Result<DeferredReadSet, TransportError> {
        let mut results = DeferredReadSet::with_capacity(queue.len());
        if queue.is_empty() {
            return Ok(results);
        }

        if self.config.deferred_transfer {
            self.round_trip()?;
        }
        for (index, range) in queue.iter() {
            if !self.config.deferred_transfer {
                self.round_trip()?;
            }
            let mut data = vec![0; range.len()];
            self.read_into(range.start, &mut data)?;
            results.push(index, data);
        }
        Ok(results)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        self.round_trip()?;
        self.operations.push(DeviceOperation::Flush);
        Ok(())
    }
}
