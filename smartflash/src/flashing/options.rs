use serde::{Deserialize, Serialize};

use super::EraseStrategy;

/// Which comparison is used to find the pages that changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPreference {
    /// Use checksums if the target can compute them, otherwise read pages back.
    #[default]
    Auto,
    /// Prefer checksums. Falls back to reading back if the target lacks support.
    Checksum,
    /// Always read pages back.
    ReadBack,
}

/// Options to customize a programming operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramOptions {
    /// If `smart_flash` is `true`, the current flash content is analyzed and only
    /// pages that differ are erased and programmed.
    ///
    /// Otherwise every page is treated as changed.
    pub smart_flash: bool,
    /// Forces an erase strategy. The analysis is skipped when this is set.
    pub strategy: Option<EraseStrategy>,
    /// The comparison used by the analysis.
    pub analysis: AnalysisPreference,
    /// Accept matching checksums without reading the page back.
    ///
    /// CRC-32 collisions are rare, but a collision leaves stale data in flash.
    pub trust_checksums: bool,
    /// If `keep_unwritten` is `true`, bytes of erased sectors that are not part of the
    /// image are read before erasing and restored afterwards.
    ///
    /// This is necessary because the flash can only be erased in sectors. Otherwise
    /// those bytes are left erased.
    pub keep_unwritten: bool,
    /// Read the flash back after programming and compare it to the image.
    pub verify: bool,
    /// The number of pages whose reads are kept in flight together.
    pub read_ahead: usize,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        Self {
            smart_flash: true,
            strategy: None,
            analysis: AnalysisPreference::Auto,
            trust_checksums: false,
            keep_unwritten: true,
            verify: false,
            read_ahead: 8,
        }
    }
}
