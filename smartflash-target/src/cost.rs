use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Static timing characteristics of a target's flash and debug link.
///
/// These values are read from the YAML target description files and are the
/// starting point for every erase strategy decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CostModel {
    /// Time it takes to erase the whole chip, in milliseconds.
    pub chip_erase_ms: u32,
    /// Time it takes to erase one sector, in milliseconds.
    pub sector_erase_ms: u32,
    /// Effective program throughput including the transfer of the data to the target.
    pub program_bytes_per_second: u32,
    /// Throughput of reading flash contents back over the debug link.
    pub read_bytes_per_second: u32,
    /// Throughput of computing page checksums on the target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_bytes_per_second: Option<u32>,
}

// ~40KB/s over CMSIS-DAP HID, 130ms per 1KB page program, 48ms per sector, 174ms chip erase.
impl Default for CostModel {
    fn default() -> Self {
        Self {
            chip_erase_ms: 174,
            sector_erase_ms: 48,
            program_bytes_per_second: 7_800,
            read_bytes_per_second: 40_000,
            checksum_bytes_per_second: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, docsplay::Display)]
/// The {0} of the cost model must not be zero.
pub struct ZeroThroughput(pub &'static str);

impl CostModel {
    /// Checks that all throughputs are usable as divisors.
    pub fn validate(&self) -> Result<(), ZeroThroughput> {
        if self.program_bytes_per_second == 0 {
            return Err(ZeroThroughput("program throughput"));
        }
        if self.read_bytes_per_second == 0 {
            return Err(ZeroThroughput("read throughput"));
        }
        if self.checksum_bytes_per_second == Some(0) {
            return Err(ZeroThroughput("checksum throughput"));
        }
        Ok(())
    }

    /// The time one chip erase takes.
    pub fn chip_erase_time(&self) -> Duration {
        Duration::from_millis(self.chip_erase_ms.into())
    }

    /// The time one sector erase takes.
    pub fn sector_erase_time(&self) -> Duration {
        Duration::from_millis(self.sector_erase_ms.into())
    }

    /// The time programming `bytes` bytes takes.
    pub fn program_time(&self, bytes: u64) -> Duration {
        transfer_time(bytes, self.program_bytes_per_second)
    }

    /// The time reading `bytes` bytes back takes.
    pub fn read_time(&self, bytes: u64) -> Duration {
        transfer_time(bytes, self.read_bytes_per_second)
    }

    /// The time computing checksums over `bytes` bytes on the target takes.
    ///
    /// Without a configured checksum throughput this is ten times faster than reading.
    pub fn checksum_time(&self, bytes: u64) -> Duration {
        match self.checksum_bytes_per_second {
            Some(rate) => transfer_time(bytes, rate),
            None => self.read_time(bytes) / 10,
        }
    }
}

fn transfer_time(bytes: u64, bytes_per_second: u32) -> Duration {
    if bytes_per_second == 0 {
        return Duration::MAX;
    }
    Duration::from_secs_f64(bytes as f64 / f64::from(bytes_per_second))
}
