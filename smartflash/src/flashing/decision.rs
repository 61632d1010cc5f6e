use std::time::Duration;

use serde::{Deserialize, Serialize};
use smartflash_target::{CostModel, FlashGeometry, ZeroThroughput};

use super::{AnalysisMethod, FlashLayout, PageClassification, ProgramResult};

/// How the flash is erased before programming.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, docsplay::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum EraseStrategy {
    /// chip erase
    ChipErase,
    /// page erase
    PageErase,
}

/// Estimates how long device operations take.
///
/// The decision engine only sees this trait, so target families can bring their
/// own timing model.
pub trait EstimateCost {
    /// Time one chip erase takes.
    fn chip_erase_time(&self) -> Duration;

    /// Time erasing one sector takes.
    fn sector_erase_time(&self) -> Duration;

    /// Time programming `bytes` bytes takes.
    fn program_time(&self, bytes: u64) -> Duration;

    /// Time comparing `bytes` bytes with the given method takes.
    fn analysis_time(&self, method: AnalysisMethod, bytes: u64) -> Duration;

    /// Checks that the model yields finite estimates.
    fn validate(&self) -> Result<(), ZeroThroughput> {
        Ok(())
    }
}

impl EstimateCost for CostModel {
    fn chip_erase_time(&self) -> Duration {
        CostModel::chip_erase_time(self)
    }

    fn sector_erase_time(&self) -> Duration {
        CostModel::sector_erase_time(self)
    }

    fn program_time(&self, bytes: u64) -> Duration {
        CostModel::program_time(self, bytes)
    }

    fn analysis_time(&self, method: AnalysisMethod, bytes: u64) -> Duration {
        match method {
            AnalysisMethod::Crc32 => self.checksum_time(bytes),
            AnalysisMethod::ReadBack => self.read_time(bytes),
        }
    }

    fn validate(&self) -> Result<(), ZeroThroughput> {
        CostModel::validate(self)
    }
}

/// Weight of the newest measurement in the moving averages of [`MeasuredCostModel`].
const SMOOTHING: f64 = 0.5;

/// A cost model that learns from the timings of completed operations.
///
/// Until a value was measured, the static model is used for it.
#[derive(Debug, Clone)]
pub struct MeasuredCostModel {
    base: CostModel,
    chip_erase: Option<f64>,
    sector_erase: Option<f64>,
    program_bytes_per_second: Option<f64>,
}

impl MeasuredCostModel {
    /// Creates a model that starts out with the values of `base`.
    pub fn new(base: CostModel) -> Self {
        Self {
            base,
            chip_erase: None,
            sector_erase: None,
            program_bytes_per_second: None,
        }
    }

    /// Returns the static model this model started from.
    pub fn base(&self) -> &CostModel {
        &self.base
    }

    /// Folds the timings of a completed operation into the model.
    pub fn update(&mut self, result: &ProgramResult) {
        let erase = result.erase_time.as_secs_f64();
        match result.strategy {
            EraseStrategy::ChipErase if result.chip_erased => {
                self.chip_erase = Some(blend(self.chip_erase, erase));
            }
            _ if result.sectors_erased > 0 => {
                let per_sector = erase / result.sectors_erased as f64;
                self.sector_erase = Some(blend(self.sector_erase, per_sector));
            }
            _ => {}
        }

        let program = result.program_time.as_secs_f64();
        if result.bytes_programmed > 0 && program > 0.0 {
            let rate = result.bytes_programmed as f64 / program;
            self.program_bytes_per_second = Some(blend(self.program_bytes_per_second, rate));
        }

        tracing::debug!(
            "Measured cost model: chip erase {:?}, sector erase {:?}, program {:.0} B/s",
            EstimateCost::chip_erase_time(self),
            EstimateCost::sector_erase_time(self),
            self.program_bytes_per_second
                .unwrap_or(f64::from(self.base.program_bytes_per_second))
        );
    }
}

fn blend(previous: Option<f64>, measured: f64) -> f64 {
    match previous {
        Some(previous) => previous * (1.0 - SMOOTHING) + measured * SMOOTHING,
        None => measured,
    }
}

impl EstimateCost for MeasuredCostModel {
    fn chip_erase_time(&self) -> Duration {
        self.chip_erase
            .map_or_else(|| self.base.chip_erase_time(), Duration::from_secs_f64)
    }

    fn sector_erase_time(&self) -> Duration {
        self.sector_erase
            .map_or_else(|| self.base.sector_erase_time(), Duration::from_secs_f64)
    }

    fn program_time(&self, bytes: u64) -> Duration {
        match self.program_bytes_per_second {
            Some(rate) if rate > 0.0 => Duration::from_secs_f64(bytes as f64 / rate),
            _ => self.base.program_time(bytes),
        }
    }

    fn analysis_time(&self, method: AnalysisMethod, bytes: u64) -> Duration {
        self.base.analysis_time(method, bytes)
    }

    fn validate(&self) -> Result<(), ZeroThroughput> {
        self.base.validate()
    }
}

/// The estimated durations of both strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostEstimate {
    /// `None` if chip erase is not an option.
    pub chip_erase: Option<Duration>,
    /// Erasing the sectors with changed pages and programming them again.
    pub page_erase: Duration,
}

/// A single device command of a [`ProgramPlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedOperation {
    /// Erase the whole chip.
    EraseChip,
    /// Erase one sector.
    EraseSector {
        /// Start address of the sector.
        address: u32,
    },
    /// Program one page of the layout.
    ProgramPage {
        /// Index of the page in the layout.
        index: usize,
        /// Start address of the page.
        address: u32,
    },
}

/// The operations of one programming run.
///
/// All erase operations come first, then the pages are programmed, both in
/// ascending address order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramPlan {
    strategy: EraseStrategy,
    operations: Vec<PlannedOperation>,
    estimate: CostEstimate,
}

impl ProgramPlan {
    /// Returns the chosen strategy.
    pub fn strategy(&self) -> EraseStrategy {
        self.strategy
    }

    /// Returns the operations in execution order.
    pub fn operations(&self) -> &[PlannedOperation] {
        &self.operations
    }

    /// Returns the estimates the strategy was chosen by.
    pub fn estimate(&self) -> CostEstimate {
        self.estimate
    }

    /// Returns true if nothing has to be done on the device.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns the number of erase operations.
    pub fn erase_count(&self) -> usize {
        self.operations
            .iter()
            .filter(|operation| !matches!(operation, PlannedOperation::ProgramPage { .. }))
            .count()
    }

    /// Returns the number of program operations.
    pub fn program_count(&self) -> usize {
        self.operations.len() - self.erase_count()
    }
}

/// Chooses between erasing the whole chip and erasing only what changed.
pub struct EraseDecisionEngine<'a> {
    geometry: &'a FlashGeometry,
    cost: &'a dyn EstimateCost,
    chip_erase_allowed: bool,
}

impl<'a> EraseDecisionEngine<'a> {
    /// Creates an engine which may choose chip erase.
    pub fn new(geometry: &'a FlashGeometry, cost: &'a dyn EstimateCost) -> Self {
        Self {
            geometry,
            cost,
            chip_erase_allowed: true,
        }
    }

    /// Sets whether chip erase is an option at all.
    pub fn chip_erase_allowed(mut self, allowed: bool) -> Self {
        self.chip_erase_allowed = allowed;
        self
    }

    /// Estimates both strategies for a classified layout.
    pub fn estimate(
        &self,
        layout: &FlashLayout,
        classifications: &[PageClassification],
    ) -> CostEstimate {
        let chip_erase = self.chip_erase_allowed.then(|| {
            let bytes: u64 = layout
                .pages()
                .iter()
                .filter(|page| !self.geometry.is_erased(page.data()))
                .map(|page| u64::from(page.size()))
                .sum();
            self.cost
                .chip_erase_time()
                .saturating_add(self.cost.program_time(bytes))
        });

        let mut page_erase = Duration::ZERO;
        for sector in layout.sectors() {
            let pages = sector.page_indices();
            if !self.sector_changed(pages.clone(), classifications) {
                continue;
            }
            let bytes: u64 = layout.pages()[pages]
                .iter()
                .filter(|page| !self.geometry.is_erased(page.data()))
                .map(|page| u64::from(page.size()))
                .sum();
            page_erase = page_erase
                .saturating_add(self.cost.sector_erase_time())
                .saturating_add(self.cost.program_time(bytes));
        }

        CostEstimate {
            chip_erase,
            page_erase,
        }
    }

    /// Chooses the cheaper strategy and plans it. Ties go to page erase.
    pub fn decide(
        &self,
        layout: &FlashLayout,
        classifications: &[PageClassification],
    ) -> ProgramPlan {
        let estimate = self.estimate(layout, classifications);
        let strategy = match estimate.chip_erase {
            Some(chip_erase) if chip_erase < estimate.page_erase => EraseStrategy::ChipErase,
            _ => EraseStrategy::PageErase,
        };

        tracing::debug!(
            "Chip erase estimate: {:?}, page erase estimate: {:?}, using {}",
            estimate.chip_erase,
            estimate.page_erase,
            strategy
        );

        self.build(strategy, estimate, layout, classifications)
    }

    /// Plans a given strategy.
    pub fn plan(
        &self,
        strategy: EraseStrategy,
        layout: &FlashLayout,
        classifications: &[PageClassification],
    ) -> ProgramPlan {
        let estimate = self.estimate(layout, classifications);
        self.build(strategy, estimate, layout, classifications)
    }

    fn build(
        &self,
        strategy: EraseStrategy,
        estimate: CostEstimate,
        layout: &FlashLayout,
        classifications: &[PageClassification],
    ) -> ProgramPlan {
        let mut erases = Vec::new();
        let mut programs = Vec::new();

        let program_sector = |pages: std::ops::Range<usize>, programs: &mut Vec<PlannedOperation>| {
            for index in pages {
                let page = &layout.pages()[index];
                if !self.geometry.is_erased(page.data()) {
                    programs.push(PlannedOperation::ProgramPage {
                        index,
                        address: page.address(),
                    });
                }
            }
        };

        match strategy {
            EraseStrategy::ChipErase => {
                erases.push(PlannedOperation::EraseChip);
                for sector in layout.sectors() {
                    program_sector(sector.page_indices(), &mut programs);
                }
            }
            EraseStrategy::PageErase => {
                for sector in layout.sectors() {
                    if self.sector_changed(sector.page_indices(), classifications) {
                        erases.push(PlannedOperation::EraseSector {
                            address: sector.address(),
                        });
                        program_sector(sector.page_indices(), &mut programs);
                    }
                }
            }
        }

        erases.append(&mut programs);
        ProgramPlan {
            strategy,
            operations: erases,
            estimate,
        }
    }

    // Pages without a classification count as changed.
    fn sector_changed(
        &self,
        pages: std::ops::Range<usize>,
        classifications: &[PageClassification],
    ) -> bool {
        pages.into_iter().any(|index| {
            classifications
                .get(index)
                .map_or(true, |classification| *classification == PageClassification::Changed)
        })
    }
}
