use std::time::Instant;

use smartflash_target::FlashGeometry;

use super::progress::ProgressReporter;
use super::{
    AnalysisMethod, ClassificationSummary, EraseDecisionEngine, EraseStrategy, EstimateCost,
    FlashError, FlashLayout, FlashOperation, FlashOperationError, FlashPhase, PageAnalyzer,
    PageClassification, PartialState, PlannedOperation, ProgramOptions, ProgramPlan,
    ProgramResult, ProgressObserver,
};
use crate::queue::ReadQueue;
use crate::{DeviceError, FlashTarget, TransportError};

/// Where a [`Flasher`] is in its last programming operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    /// Nothing was started yet.
    Idle,
    /// The operation is in the given phase.
    Running(FlashPhase),
    /// The last operation succeeded.
    Done,
    /// The last operation failed in the given phase.
    ///
    /// `None` if it was rejected before the target was accessed.
    Failed(Option<FlashPhase>),
}

/// Programs flash layouts to a target.
///
/// The flasher borrows the target connection exclusively. Each call to
/// [`Flasher::program`] runs through reading the bytes to preserve, analyzing,
/// erasing, programming and optionally verifying, one after the other. All
/// erase operations finish before the first page is programmed.
pub struct Flasher<'a> {
    target: &'a mut dyn FlashTarget,
    geometry: &'a FlashGeometry,
    cost: &'a dyn EstimateCost,
    state: FlashState,
}

impl<'a> Flasher<'a> {
    /// Creates a flasher for a target with the given flash geometry.
    ///
    /// Fails if the geometry is inconsistent or the cost model has a zero throughput.
    pub fn new(
        target: &'a mut dyn FlashTarget,
        geometry: &'a FlashGeometry,
        cost: &'a dyn EstimateCost,
    ) -> Result<Self, FlashError> {
        geometry.validate()?;
        cost.validate()?;

        Ok(Self {
            target,
            geometry,
            cost,
            state: FlashState::Idle,
        })
    }

    /// Returns the flash geometry of the target.
    pub fn geometry(&self) -> &'a FlashGeometry {
        self.geometry
    }

    /// Returns the state of the last programming operation.
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Gives access to the target connection between programming operations.
    pub fn target(&mut self) -> &mut dyn FlashTarget {
        &mut *self.target
    }

    /// Returns the target to normal run mode and releases the connection.
    pub fn finish(self) -> Result<(), TransportError> {
        tracing::debug!("Resetting the target");
        self.target.reset()
    }

    /// Programs a layout built by a [`FlashBuilder`](super::FlashBuilder).
    ///
    /// `total_bytes` is the number of data bytes the layout was built from.
    #[tracing::instrument(skip_all, fields(pages = layout.pages().len()))]
    pub fn program(
        &mut self,
        mut layout: FlashLayout,
        total_bytes: u64,
        options: &ProgramOptions,
        progress: Option<&mut dyn ProgressObserver>,
    ) -> Result<ProgramResult, FlashError> {
        let start = Instant::now();
        self.state = FlashState::Idle;

        let mut progress = ProgressReporter::new(progress);
        let mut result = ProgramResult::new(
            options.strategy.unwrap_or(EraseStrategy::PageErase),
            total_bytes,
        );

        if layout.is_empty() {
            tracing::debug!("Nothing to program");
            self.state = FlashState::Done;
            progress.finished();
            return Ok(result);
        }

        if options.strategy == Some(EraseStrategy::ChipErase) && !self.target.supports_chip_erase()
        {
            self.state = FlashState::Failed(None);
            return Err(FlashError::ChipEraseNotSupported);
        }

        progress.started();

        match self.run(&mut layout, options, &mut progress, &mut result) {
            Ok(()) => {
                self.state = FlashState::Done;
                result.total_time = start.elapsed();
                tracing::info!(
                    "Programmed {} pages using {} in {:?}",
                    result.pages_programmed,
                    result.strategy,
                    result.total_time
                );
                progress.finished();
                Ok(result)
            }
            Err(error) => {
                let phase = error.phase().or(match self.state {
                    FlashState::Running(phase) => Some(phase),
                    _ => None,
                });
                tracing::debug!("Programming failed in {:?}: {}", phase, error);
                self.state = FlashState::Failed(phase);
                Err(error)
            }
        }
    }

    fn run(
        &mut self,
        layout: &mut FlashLayout,
        options: &ProgramOptions,
        progress: &mut ProgressReporter<'_>,
        result: &mut ProgramResult,
    ) -> Result<(), FlashError> {
        if options.keep_unwritten {
            let t = Instant::now();
            self.fill_pages(layout, progress)?;
            result.fill_time = t.elapsed();
        }

        let plan = self.plan(layout, options, progress, result)?;
        result.strategy = plan.strategy();
        result.estimate = Some(plan.estimate());

        if plan.is_empty() {
            tracing::debug!("Flash already holds the image");
            return Ok(());
        }

        let (erases, programs) = plan.operations().split_at(plan.erase_count());

        let mut total = 0.0;
        for operation in plan.operations() {
            total += self.weight(operation);
        }
        if options.verify {
            total += programs.len() as f64 * self.verify_weight();
        }
        progress.set_total(total);

        self.enter(FlashPhase::Erasing, progress);

        // Reads of the analysis must not overtake the first mutation.
        self.target
            .flush()
            .map_err(|source| FlashError::Transport {
                phase: FlashPhase::Erasing,
                address: layout.pages()[0].address(),
                source,
                partial: PartialState::default(),
            })?;

        let mut partial = PartialState::default();

        let t = Instant::now();
        for operation in erases {
            self.erase(operation, &mut partial, result)?;
            progress.advance(self.weight(operation));
        }
        result.erase_time = t.elapsed();
        tracing::info!("Erasing took {:?}", result.erase_time);

        self.enter(FlashPhase::Programming, progress);
        let t = Instant::now();
        for operation in programs {
            if let PlannedOperation::ProgramPage { index, address } = *operation {
                let page = &layout.pages()[index];
                tracing::trace!("Programming page at {:#010x}", address);
                self.target
                    .write_memory(address, page.data())
                    .map_err(|error| {
                        device_error(
                            error,
                            FlashPhase::Programming,
                            FlashOperation::ProgramPage,
                            address,
                            &partial,
                        )
                    })?;
                partial.programmed_pages.push(address);
                result.pages_programmed += 1;
                result.bytes_programmed += u64::from(page.size());
                progress.advance(self.weight(operation));
            }
        }
        result.program_time = t.elapsed();
        tracing::info!("Programming took {:?}", result.program_time);

        if options.verify {
            self.enter(FlashPhase::Verifying, progress);
            let t = Instant::now();
            self.verify(layout, programs, options.read_ahead, &partial, progress)?;
            result.verify_time = Some(t.elapsed());
        }

        Ok(())
    }

    /// Reads the bytes of all touched pages that are not part of the image.
    fn fill_pages(
        &mut self,
        layout: &mut FlashLayout,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<(), FlashError> {
        let fills = layout.fills().to_vec();
        if fills.is_empty() {
            return Ok(());
        }

        self.enter(FlashPhase::Filling, progress);

        let mut queue = ReadQueue::new();
        let scheduled: Vec<_> = fills
            .iter()
            .map(|fill| queue.schedule(fill.address()..fill.address() + fill.size()))
            .collect();

        let transport_error = |source: TransportError| FlashError::Transport {
            phase: FlashPhase::Filling,
            address: fills[0].address(),
            source,
            partial: PartialState::default(),
        };

        let mut results = self.target.execute_reads(&queue).map_err(transport_error)?;

        for (fill, index) in fills.iter().zip(scheduled) {
            let data = results.take(index).map_err(|_| {
                transport_error(TransportError::Other(format!(
                    "no data returned for {:#010x}",
                    fill.address()
                )))
            })?;

            let page = &mut layout.pages_mut()[fill.page_index()];
            let offset = (fill.address() - page.address()) as usize;
            page.data_mut()[offset..offset + data.len()].copy_from_slice(&data);
            if fill.size() == page.size() {
                page.set_restored();
            }
        }

        tracing::debug!("Read {} fills ({} bytes)", fills.len(), queue.total_bytes());
        Ok(())
    }

    fn plan(
        &mut self,
        layout: &FlashLayout,
        options: &ProgramOptions,
        progress: &mut ProgressReporter<'_>,
        result: &mut ProgramResult,
    ) -> Result<ProgramPlan, FlashError> {
        let all_changed = vec![PageClassification::Changed; layout.pages().len()];
        let supports_chip_erase = self.target.supports_chip_erase();

        if let Some(strategy) = options.strategy {
            tracing::debug!("Using forced {}", strategy);
            return Ok(EraseDecisionEngine::new(self.geometry, self.cost)
                .chip_erase_allowed(supports_chip_erase)
                .plan(strategy, layout, &all_changed));
        }

        // A chip erase also destroys everything outside the layout.
        let chip_erase_allowed =
            supports_chip_erase && (layout.covers_rom(self.geometry) || !options.keep_unwritten);
        let engine =
            EraseDecisionEngine::new(self.geometry, self.cost).chip_erase_allowed(chip_erase_allowed);

        if !options.smart_flash {
            result.classification = ClassificationSummary::from_classifications(&all_changed);
            return Ok(engine.decide(layout, &all_changed));
        }

        let analyzer = PageAnalyzer::select(
            options.analysis,
            &*self.target,
            options.read_ahead,
            options.trust_checksums,
        );

        self.enter(FlashPhase::Analyzing, progress);
        let t = Instant::now();
        let classifications = analyzer
            .classify(&mut *self.target, self.geometry, layout.pages())
            .map(|page| page.map(|page| page.classification))
            .collect::<Result<Vec<_>, _>>()?;
        let analyze_time = t.elapsed();

        result.analyze_time = Some(analyze_time);
        result.analyze_strategy = Some(analyzer.method());
        result.classification = ClassificationSummary::from_classifications(&classifications);

        tracing::info!(
            "Analyzing {} pages using {} took {:?}",
            classifications.len(),
            analyzer.method(),
            analyze_time
        );
        tracing::debug!("Classification: {:?}", result.classification);

        Ok(engine.decide(layout, &classifications))
    }

    fn erase(
        &mut self,
        operation: &PlannedOperation,
        partial: &mut PartialState,
        result: &mut ProgramResult,
    ) -> Result<(), FlashError> {
        match *operation {
            PlannedOperation::EraseChip => {
                tracing::debug!("Erasing the whole chip");
                self.target.erase_chip().map_err(|error| {
                    device_error(
                        error,
                        FlashPhase::Erasing,
                        FlashOperation::EraseChip,
                        self.geometry.rom_start,
                        partial,
                    )
                })?;
                partial.chip_erased = true;
                result.chip_erased = true;
            }
            PlannedOperation::EraseSector { address } => {
                tracing::debug!("Erasing sector at address {:#010x}", address);
                self.target.erase_sector(address).map_err(|error| {
                    device_error(
                        error,
                        FlashPhase::Erasing,
                        FlashOperation::EraseSector,
                        address,
                        partial,
                    )
                })?;
                partial.erased_sectors.push(address);
                result.sectors_erased += 1;
            }
            PlannedOperation::ProgramPage { .. } => {}
        }
        Ok(())
    }

    fn verify(
        &mut self,
        layout: &FlashLayout,
        programs: &[PlannedOperation],
        read_ahead: usize,
        partial: &PartialState,
        progress: &mut ProgressReporter<'_>,
    ) -> Result<(), FlashError> {
        let pages: Vec<(usize, u32)> = programs
            .iter()
            .filter_map(|operation| match *operation {
                PlannedOperation::ProgramPage { index, address } => Some((index, address)),
                _ => None,
            })
            .collect();

        for batch in pages.chunks(read_ahead.max(1)) {
            let mut queue = ReadQueue::new();
            let scheduled: Vec<_> = batch
                .iter()
                .map(|&(index, address)| {
                    let page = &layout.pages()[index];
                    (index, address, queue.schedule(address..address + page.size()))
                })
                .collect();

            let transport_error = |source: TransportError| FlashError::Transport {
                phase: FlashPhase::Verifying,
                address: batch[0].1,
                source,
                partial: partial.clone(),
            };

            let mut results = self.target.execute_reads(&queue).map_err(transport_error)?;

            for (index, address, token) in scheduled {
                let data = results.take(token).map_err(|_| {
                    transport_error(TransportError::Other(format!(
                        "no data returned for page {address:#010x}"
                    )))
                })?;
                if data != layout.pages()[index].data() {
                    return Err(FlashError::Verify {
                        address,
                        partial: partial.clone(),
                    });
                }
                progress.advance(self.verify_weight());
            }
        }

        Ok(())
    }

    fn enter(&mut self, phase: FlashPhase, progress: &mut ProgressReporter<'_>) {
        tracing::debug!("Started {}", phase);
        self.state = FlashState::Running(phase);
        progress.phase(phase);
    }

    /// Progress weight of an operation, its estimated duration in seconds.
    fn weight(&self, operation: &PlannedOperation) -> f64 {
        let duration = match operation {
            PlannedOperation::EraseChip => self.cost.chip_erase_time(),
            PlannedOperation::EraseSector { .. } => self.cost.sector_erase_time(),
            PlannedOperation::ProgramPage { .. } => {
                self.cost.program_time(self.geometry.page_size.into())
            }
        };
        duration.as_secs_f64()
    }

    fn verify_weight(&self) -> f64 {
        self.cost
            .analysis_time(AnalysisMethod::ReadBack, self.geometry.page_size.into())
            .as_secs_f64()
    }
}

fn device_error(
    error: DeviceError,
    phase: FlashPhase,
    operation: FlashOperation,
    address: u32,
    partial: &PartialState,
) -> FlashError {
    match error {
        DeviceError::Transport(source) => FlashError::Transport {
            phase,
            address,
            source,
            partial: partial.clone(),
        },
        DeviceError::Rejected { code, cause } => FlashError::Operation {
            phase,
            source: FlashOperationError {
                operation,
                address,
                error_code: code,
                cause,
            },
            partial: partial.clone(),
        },
    }
}
