use std::time::Duration;

use super::{AnalysisMethod, CostEstimate, EraseStrategy, PageClassification};

/// Number of pages per classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassificationSummary {
    /// Pages that already hold the desired content.
    pub unchanged: usize,
    /// Pages that differ.
    pub changed: usize,
    /// Pages that are meant to be blank and already are.
    pub blank_erased: usize,
}

impl ClassificationSummary {
    /// Counts the classifications.
    pub fn from_classifications(classifications: &[PageClassification]) -> Self {
        let mut summary = Self::default();
        for classification in classifications {
            match classification {
                PageClassification::Unchanged => summary.unchanged += 1,
                PageClassification::Changed => summary.changed += 1,
                PageClassification::BlankErased => summary.blank_erased += 1,
            }
        }
        summary
    }

    /// Returns the number of classified pages.
    pub fn total(&self) -> usize {
        self.unchanged + self.changed + self.blank_erased
    }
}

/// What a successful programming operation did, and how long it took.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramResult {
    /// The strategy the plan was built with.
    pub strategy: EraseStrategy,
    /// The number of data bytes supplied by the caller.
    pub total_bytes: u64,
    /// The number of bytes written to the device, including restored bytes.
    pub bytes_programmed: u64,
    /// Whether the whole chip was erased.
    pub chip_erased: bool,
    /// The number of erased sectors, without a chip erase.
    pub sectors_erased: usize,
    /// The number of programmed pages.
    pub pages_programmed: usize,
    /// Time spent reading the bytes to preserve.
    pub fill_time: Duration,
    /// Time spent comparing the flash to the image, if it was compared.
    pub analyze_time: Option<Duration>,
    /// The comparison method, if the flash was compared.
    pub analyze_strategy: Option<AnalysisMethod>,
    /// Time spent erasing.
    pub erase_time: Duration,
    /// Time spent programming.
    pub program_time: Duration,
    /// Time spent reading programmed pages back, if verification was enabled.
    pub verify_time: Option<Duration>,
    /// Time of the whole operation.
    pub total_time: Duration,
    /// The classifications the plan was built from.
    pub classification: ClassificationSummary,
    /// The cost estimates of the plan. `None` if nothing had to be planned.
    pub estimate: Option<CostEstimate>,
}

impl ProgramResult {
    pub(crate) fn new(strategy: EraseStrategy, total_bytes: u64) -> Self {
        Self {
            strategy,
            total_bytes,
            bytes_programmed: 0,
            chip_erased: false,
            sectors_erased: 0,
            pages_programmed: 0,
            fill_time: Duration::ZERO,
            analyze_time: None,
            analyze_strategy: None,
            erase_time: Duration::ZERO,
            program_time: Duration::ZERO,
            verify_time: None,
            total_time: Duration::ZERO,
            classification: ClassificationSummary::default(),
            estimate: None,
        }
    }

    /// Returns true if the device was not modified.
    pub fn is_noop(&self) -> bool {
        !self.chip_erased && self.sectors_erased == 0 && self.pages_programmed == 0
    }
}
