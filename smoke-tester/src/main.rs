use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use smartflash_target::Registry;

use crate::{
    dut_definition::{DefinitionSource, DutDefinition},
    logging::LevelFilter,
    tests::{print_perf_info, test_flashing, FlashTestResult},
};

mod dut_definition;
mod logging;
mod tests;

/// Runs the flash acceptance tests against simulated devices.
#[derive(clap::Parser)]
#[clap(name = "smoke tester")]
struct Opt {
    /// Directory with the TOML definitions of the devices under test.
    #[clap(
        long,
        value_name = "DIRECTORY",
        conflicts_with = "target",
        required_unless_present = "target"
    )]
    dut_definitions: Option<PathBuf>,

    /// Name of a single target to test with the default simulation.
    #[clap(long, value_name = "TARGET")]
    target: Option<String>,

    /// YAML files with additional target descriptions.
    #[clap(long = "target-description", value_name = "YAML")]
    target_descriptions: Vec<PathBuf>,

    /// Log level. Without it, `RUST_LOG` is used.
    #[clap(long, value_enum, env = "SMOKE_TESTER_LOG_LEVEL")]
    log_level: Option<LevelFilter>,
}

fn main() -> Result<()> {
    let opt = Opt::parse();

    logging::setup_logging(opt.log_level);

    let mut registry = Registry::from_builtin_targets()?;
    for description in &opt.target_descriptions {
        registry
            .add_target_from_yaml(description)
            .with_context(|| format!("Failed to load targets from '{}'", description.display()))?;
    }

    let definitions = match (&opt.dut_definitions, &opt.target) {
        (Some(dut_definitions), _) => {
            let definitions = DutDefinition::collect(dut_definitions, &registry)?;
            println!("Found {} target definitions.", definitions.len());
            definitions
        }
        (None, Some(target)) => vec![DutDefinition::new(target, &registry)?],
        (None, None) => bail!("Either a DUT definition directory or a target is required"),
    };

    let num_duts = definitions.len();

    let mut tests_ok = true;
    let mut results = Vec::with_capacity(num_duts);

    for (i, definition) in definitions.iter().enumerate() {
        print!("DUT [{}/{}] - Starting test", i + 1, num_duts);

        if let DefinitionSource::File(path) = &definition.source {
            print!(" - {}", path.display());
        }

        println!();
        println!("Target: {:?}", definition.target.name);

        match test_flashing(definition) {
            Ok(result) if result.passed() => {
                println!("DUT [{}/{}] - Tests Passed", i + 1, num_duts);
                results.push(result);
            }
            Ok(result) => {
                tests_ok = false;
                println!("DUT [{}/{}] - Tests Failed", i + 1, num_duts);
                results.push(result);
            }
            Err(e) => {
                tests_ok = false;

                println!("DUT [{}/{}] - Error message: {:#}", i + 1, num_duts, e);
                println!("DUT [{}/{}] - Tests Failed", i + 1, num_duts);
                results.push(FlashTestResult::failed(definition.target.name.clone()));
            }
        }
    }

    print_perf_info(&results);

    if tests_ok {
        Ok(())
    } else {
        bail!("Not all tests successful");
    }
}
