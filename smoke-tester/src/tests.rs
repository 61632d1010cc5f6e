use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context, Result};
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, Rng, SeedableRng};
use smartflash::flashing::{
    flash_block, AnalysisMethod, EraseStrategy, FlashBuilder, FlashPhase, Flasher,
    ProgramOptions, ProgramResult, ProgressObserver, ProgressState,
};
use smartflash::simulated::SimulatedTarget;
use smartflash::FlashTarget;

use crate::dut_definition::DutDefinition;
use crate::logging;

/// Measurements of one flash test run.
///
/// Rates are in bytes per second.
#[derive(Debug, Clone, Default)]
pub struct FlashTestResult {
    pub target: String,
    pub passed: usize,
    pub count: usize,
    pub chip_erase_rate_erased: Option<f64>,
    pub chip_erase_rate: Option<f64>,
    pub page_erase_rate: Option<f64>,
    pub page_erase_rate_same: Option<f64>,
    pub analyze: Option<AnalysisMethod>,
    pub analyze_time: Option<Duration>,
    pub analyze_rate: Option<f64>,
}

impl FlashTestResult {
    /// A result for a DUT whose tests could not be run.
    pub fn failed(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn passed(&self) -> bool {
        self.count > 0 && self.passed == self.count
    }
}

#[derive(Default)]
struct Tally {
    passed: usize,
    count: usize,
}

impl Tally {
    fn run(&mut self, name: &str, test: impl FnOnce() -> Result<bool>) {
        println!("\n\n------ Test {name} ------");
        self.count += 1;

        match test() {
            Ok(true) => {
                println!("{}", "TEST PASSED".green().bold());
                self.passed += 1;
            }
            Ok(false) => println!("{}", "TEST FAILED".red().bold()),
            Err(error) => println!("{} {error:#}", "TEST FAILED:".red().bold()),
        }
    }
}

/// Draws a progress bar and checks the progress reports of the engine.
///
/// Reports stay within `[0, 1]` and never decrease, except for the `0.0` that
/// starts the next operation.
struct ProgressChecker {
    multi_progress: MultiProgress,
    style: ProgressStyle,
    bar: Option<ProgressBar>,
    state: ProgressState,
    backwards_progress: bool,
    violation: Option<String>,
}

impl ProgressChecker {
    fn new() -> Result<Self> {
        let style = ProgressStyle::with_template(
            "{msg:.green.bold} {spinner} {percent:>3}% [{bar:20}] (took {elapsed})",
        )?
        .progress_chars("##-");

        Ok(Self {
            multi_progress: MultiProgress::new(),
            style,
            bar: None,
            state: ProgressState::default(),
            backwards_progress: false,
            violation: None,
        })
    }

    fn observer(&mut self) -> Option<&mut dyn ProgressObserver> {
        Some(self)
    }

    /// Prepares for the next operation. The last value is kept.
    fn begin(&mut self) {
        self.state.done = false;
        self.violation = None;
    }

    /// Fails if the last operation reported invalid progress.
    fn check(&mut self) -> Result<()> {
        if let Some(bar) = self.bar.take() {
            bar.abandon();
            logging::clear_progress_bar();
        }
        match self.violation.take() {
            Some(violation) => bail!(violation),
            None => Ok(()),
        }
    }

    fn violate(&mut self, violation: String) {
        tracing::warn!("{}", violation);
        self.violation.get_or_insert(violation);
    }

    fn bar(&mut self) -> &ProgressBar {
        self.bar.get_or_insert_with(|| {
            let bar = self
                .multi_progress
                .add(ProgressBar::new(1000).with_style(self.style.clone()));
            logging::set_progress_bar(self.multi_progress.clone());
            bar
        })
    }
}

impl ProgressObserver for ProgressChecker {
    fn report(&mut self, progress: f32) {
        if !(0.0..=1.0).contains(&progress) {
            self.violate(format!("Progress {progress} is out of range"));
            return;
        }
        if !(progress == 0.0 && self.state.prev == 1.0 || progress >= self.state.prev) {
            self.violate(format!(
                "Progress went from {} to {}",
                self.state.prev, progress
            ));
        }
        if self.state.done {
            self.violate("Completion was reported twice".to_string());
        }

        if progress == 0.0 {
            self.state.prev = 0.0;
            self.backwards_progress = false;
        }
        if progress < self.state.prev {
            self.backwards_progress = true;
        }
        self.state.prev = progress;

        self.bar().set_position((progress * 1000.0).round() as u64);

        if progress >= 1.0 {
            self.state.done = true;
            if let Some(bar) = self.bar.take() {
                bar.finish();
                logging::clear_progress_bar();
            }
            if self.backwards_progress {
                self.violate("Progress went backwards during flash".to_string());
            }
        }
    }

    fn phase(&mut self, phase: FlashPhase) {
        self.bar().set_message(phase.to_string());
    }
}

/// Generates the image used when a DUT definition names no binary.
///
/// The image fills one eighth of the ROM and is the same on every run.
fn test_image(rom_size: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(rom_size as u64);
    let mut data = vec![0; rom_size / 8];
    rng.fill(&mut data[..]);
    data
}

fn read_back(flasher: &mut Flasher<'_>, address: u32, size: usize) -> Result<Vec<u8>> {
    let mut data = vec![0; size];
    FlashTarget::read_memory(flasher.target(), address, &mut data)
        .with_context(|| format!("Failed to read back {size} bytes at {address:#010x}"))?;
    Ok(data)
}

/// Time the device spent erasing and programming.
fn write_time(info: &ProgramResult) -> Duration {
    info.erase_time + info.program_time
}

fn rate(bytes: usize, time: Duration) -> Option<f64> {
    let seconds = time.as_secs_f64();
    (seconds > 0.0).then(|| bytes as f64 / seconds)
}

fn pad(data: &[u8], value: u8, size: usize) -> Vec<u8> {
    let mut padded = data.to_vec();
    padded.resize(data.len() + size, value);
    padded
}

/// Flashes `data`, reads it back and checks the strategy that was used.
fn flash_and_compare(
    flasher: &mut Flasher<'_>,
    progress: &mut ProgressChecker,
    address: u32,
    data: &[u8],
    smart: bool,
    chip_erase: Option<bool>,
    expected: EraseStrategy,
) -> Result<bool> {
    progress.begin();
    let info = flash_block(flasher, address, data, smart, chip_erase, progress.observer())?;
    progress.check()?;

    let flashed = read_back(flasher, address, data.len())?;
    Ok(flashed == data && info.strategy == expected)
}

/// Runs the flash test sequence against a simulation of the DUT.
///
/// The decision tests at the end depend on the flash content the earlier
/// tests leave behind, so the order matters.
pub fn test_flashing(definition: &DutDefinition) -> Result<FlashTestResult> {
    let description = &definition.target;
    let geometry = description.flash.clone();
    let rom_start = geometry.rom_start;
    let rom_size = geometry.rom_size as usize;
    let page_size = geometry.page_size as usize;
    let rom_middle = rom_start + geometry.rom_size / 2;

    let data = match &definition.flash_test_binary {
        Some(binary) => {
            println!("Binary: {}", binary.display());
            std::fs::read(binary)
                .with_context(|| format!("Failed to read test binary '{}'", binary.display()))?
        }
        None => test_image(rom_size),
    };
    ensure!(!data.is_empty(), "The test binary is empty");
    ensure!(
        data.len() < rom_size,
        "The test binary ({} bytes) does not leave any of the {} bytes of flash unused",
        data.len(),
        rom_size
    );
    let unused = rom_size - data.len();

    let mut target = SimulatedTarget::from_description(description, definition.simulation.clone());
    let mut flasher = Flasher::new(&mut target, &geometry, &description.cost)
        .context("Failed to set up the flasher")?;

    let mut progress = ProgressChecker::new()?;
    let mut result = FlashTestResult {
        target: description.name.clone(),
        ..FlashTestResult::default()
    };
    let mut tally = Tally::default();
    let start_time = Instant::now();

    tally.run("Basic Page Erase", || {
        flash_and_compare(
            &mut flasher,
            &mut progress,
            rom_start,
            &data,
            false,
            Some(false),
            EraseStrategy::PageErase,
        )
    });

    tally.run("Basic Chip Erase", || {
        flash_and_compare(
            &mut flasher,
            &mut progress,
            rom_start,
            &data,
            false,
            Some(true),
            EraseStrategy::ChipErase,
        )
    });

    tally.run("Smart Page Erase", || {
        flash_and_compare(
            &mut flasher,
            &mut progress,
            rom_start,
            &data,
            true,
            Some(false),
            EraseStrategy::PageErase,
        )
    });

    tally.run("Smart Chip Erase", || {
        flash_and_compare(
            &mut flasher,
            &mut progress,
            rom_start,
            &data,
            true,
            Some(true),
            EraseStrategy::ChipErase,
        )
    });

    tally.run("Basic Page Erase (Entire chip)", || {
        let new_data = pad(&data, 0x77, unused);
        progress.begin();
        let info = flash_block(
            &mut flasher,
            rom_start,
            &new_data,
            false,
            Some(false),
            progress.observer(),
        )?;
        progress.check()?;

        result.page_erase_rate = rate(new_data.len(), write_time(&info));
        Ok(info.strategy == EraseStrategy::PageErase)
    });

    tally.run("Offset Write", || {
        let new_data = vec![0x55; page_size * 2];
        flash_and_compare(
            &mut flasher,
            &mut progress,
            rom_middle,
            &new_data,
            true,
            None,
            EraseStrategy::PageErase,
        )
    });

    tally.run("Multiple Block Writes", || {
        let more_data = vec![0x33; page_size * 2];
        // Not page aligned, so the block covers three pages.
        let address = rom_middle + 1;

        let mut builder = FlashBuilder::new();
        builder.add_data(rom_start, data.clone())?;
        builder.add_data(address, more_data.clone())?;

        progress.begin();
        builder.program(&mut flasher, &ProgramOptions::default(), progress.observer())?;
        progress.check()?;

        let flashed = read_back(&mut flasher, rom_start, data.len())?;
        let flashed_more = read_back(&mut flasher, address, more_data.len())?;
        Ok(flashed == data && flashed_more == more_data)
    });

    tally.run("Overlapping Blocks", || {
        let new_data = vec![0x33; page_size];

        let mut builder = FlashBuilder::new();
        builder.add_data(rom_middle, new_data.clone())?;
        match builder.add_data(rom_middle + 1, new_data) {
            Ok(()) => Ok(false),
            Err(error) => {
                println!("Error: {error}");
                Ok(true)
            }
        }
    });

    tally.run("Empty Block Write", || {
        progress.begin();
        FlashBuilder::new().program(&mut flasher, &ProgramOptions::default(), progress.observer())?;
        progress.check()?;
        Ok(true)
    });

    tally.run("Missing Progress Callback", || {
        flash_block(&mut flasher, rom_start, &data, true, None, None)?;
        Ok(true)
    });

    tally.run("Chip Erase Decision", || {
        let new_data = pad(&data, 0xff, unused);
        progress.begin();
        let info = flash_block(&mut flasher, rom_start, &new_data, true, None, progress.observer())?;
        progress.check()?;

        if info.strategy != EraseStrategy::ChipErase {
            return Ok(false);
        }
        result.chip_erase_rate_erased = rate(new_data.len(), write_time(&info));
        Ok(true)
    });

    tally.run("Chip Erase Decision 2", || {
        let new_data = pad(&data, 0x00, unused);
        progress.begin();
        let info = flash_block(&mut flasher, rom_start, &new_data, true, None, progress.observer())?;
        progress.check()?;

        if info.strategy != EraseStrategy::ChipErase {
            return Ok(false);
        }
        result.chip_erase_rate = rate(new_data.len(), write_time(&info));
        Ok(true)
    });

    tally.run("Page Erase Decision", || {
        let new_data = pad(&data, 0x00, unused);
        progress.begin();
        let info = flash_block(&mut flasher, rom_start, &new_data, true, None, progress.observer())?;
        progress.check()?;

        if info.strategy != EraseStrategy::PageErase {
            return Ok(false);
        }
        // Nothing is written, so this rate is bounded by the analysis.
        result.page_erase_rate_same = rate(new_data.len(), info.total_time);
        result.analyze = info.analyze_strategy;
        result.analyze_time = info.analyze_time;
        result.analyze_rate = info
            .analyze_time
            .and_then(|time| rate(new_data.len(), time));
        Ok(true)
    });

    tally.run("Page Erase Decision 2", || {
        let size_same = unused * 5 / 6;
        let size_differ = unused - size_same;
        let new_data = pad(&pad(&data, 0x00, size_same), 0x55, size_differ);
        progress.begin();
        let info = flash_block(&mut flasher, rom_start, &new_data, true, None, progress.observer())?;
        progress.check()?;

        Ok(info.strategy == EraseStrategy::PageErase)
    });

    result.passed = tally.passed;
    result.count = tally.count;

    println!("\n\nTest Summary:");
    println!("Pass count {} of {} tests", tally.passed, tally.count);
    if result.passed() {
        println!("{}", "FLASH TEST SCRIPT PASSED".green().bold());
    } else {
        println!("{}", "FLASH TEST SCRIPT FAILED".red().bold());
    }
    println!("Total time for flashing: {:.2?}", start_time.elapsed());

    flasher.finish().context("Failed to reset the target")?;

    let stats = target.stats();
    tracing::info!(
        "{} round trips, {} bytes read, {} bytes written",
        stats.round_trips,
        stats.bytes_read,
        stats.bytes_written
    );

    Ok(result)
}

fn kilobytes_per_second(rate: Option<f64>) -> String {
    match rate {
        Some(rate) => format!("{:.3} KB/s", rate / 1000.0),
        None => "n/a".to_string(),
    }
}

/// Prints the analyzer and throughput tables of all DUTs.
pub fn print_perf_info(results: &[FlashTestResult]) {
    println!("\n\n------ Analyzer Performance ------");
    println!("{:<14}{:<12}{:<18}{:<18}", "Target", "Analyzer", "Rate", "Time");
    println!();
    for result in results {
        let analyzer = result
            .analyze
            .map_or_else(|| "-".to_string(), |method| method.to_string());
        let (rate, time) = if result.passed() {
            (
                kilobytes_per_second(result.analyze_rate),
                result
                    .analyze_time
                    .map_or_else(|| "n/a".to_string(), |time| format!("{:.3} s", time.as_secs_f64())),
            )
        } else {
            ("Fail".to_string(), "Fail".to_string())
        };
        println!("{:<14}{:<12}{:<18}{:<18}", result.target, analyzer, rate, time);
    }
    println!();

    println!("\n\n------ Test Rate ------");
    println!(
        "{:<14}{:<20}{:<20}{:<20}",
        "Target", "Chip Erase", "Page Erase", "Page Erase (Same data)"
    );
    println!();
    for result in results {
        let (chip_erase, page_erase, page_erase_same) = if result.passed() {
            (
                kilobytes_per_second(result.chip_erase_rate),
                kilobytes_per_second(result.page_erase_rate),
                kilobytes_per_second(result.page_erase_rate_same),
            )
        } else {
            ("Fail".to_string(), "Fail".to_string(), "Fail".to_string())
        };
        println!(
            "{:<14}{:<20}{:<20}{:<20}",
            result.target, chip_erase, page_erase, page_erase_same
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dut_definition::DefinitionSource;
    use pretty_assertions::assert_eq;
    use smartflash::simulated::SimulatedTargetConfig;
    use smartflash_target::Registry;
    use test_case::test_case;

    fn definition(name: &str) -> DutDefinition {
        let registry = Registry::from_builtin_targets().unwrap();
        DutDefinition {
            target: registry.get_target(name).unwrap(),
            flash_test_binary: None,
            simulation: SimulatedTargetConfig::default(),
            source: DefinitionSource::Cli,
        }
    }

    #[test]
    fn test_image_is_deterministic() {
        assert_eq!(test_image(0x8000), test_image(0x8000));
        assert_eq!(test_image(0x8000).len(), 0x1000);
    }

    #[test_case("kl25z")]
    #[test_case("kl46z")]
    #[test_case("k22f")]
    #[test_case("k64f")]
    #[test_case("lpc11u24")]
    #[test_case("lpc1768")]
    #[test_case("lpc4330")]
    #[test_case("lpc800")]
    #[test_case("nrf51822")]
    #[test_case("maxwsnenv")]
    #[test_case("max32600mbed")]
    fn sequence_passes_on_builtin_target(name: &str) {
        for (checksum_supported, method) in
            [(true, AnalysisMethod::Crc32), (false, AnalysisMethod::ReadBack)]
        {
            let mut definition = definition(name);
            definition.simulation.checksum_supported = checksum_supported;

            let result = test_flashing(&definition).unwrap();

            assert_eq!(
                (result.passed, result.count),
                (14, 14),
                "{name} with checksums {checksum_supported}"
            );
            assert_eq!(result.analyze, Some(method), "{name}");
        }
    }

    #[test]
    fn builtin_targets_are_all_covered() {
        let registry = Registry::from_builtin_targets().unwrap();
        assert_eq!(registry.target_names().count(), 11);
    }

    #[test]
    fn progress_checker_accepts_consecutive_operations() {
        let mut checker = ProgressChecker::new().unwrap();
        for values in [&[0.0, 0.5, 1.0][..], &[0.0, 1.0], &[1.0]] {
            checker.begin();
            for &value in values {
                checker.report(value);
            }
            checker.check().unwrap();
        }
    }

    #[test]
    fn progress_checker_rejects_backwards_progress() {
        let mut checker = ProgressChecker::new().unwrap();
        checker.begin();
        checker.report(0.0);
        checker.report(0.6);
        checker.report(0.4);
        checker.report(1.0);
        assert!(checker.check().is_err());
    }

    #[test]
    fn rate_of_instant_operation_is_unknown() {
        assert_eq!(rate(100, Duration::ZERO), None);
        assert_eq!(rate(100, Duration::from_millis(500)), Some(200.0));
    }
}
