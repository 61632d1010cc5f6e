//! # DUT Definitions
//!
//! This module handles the definition of the different devices under test (DUTs),
//! which are used by the tester.

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use smartflash::simulated::SimulatedTargetConfig;
use smartflash_target::{Registry, TargetDescription};
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDutDefinition {
    /// Name of the target, resolved with the target registry.
    target: String,
    /// Image used for the flash tests. Relative paths are relative to the definition file.
    flash_test_binary: Option<PathBuf>,
    /// Timing and capabilities of the simulated device.
    #[serde(default)]
    simulation: SimulatedTargetConfig,
}

impl RawDutDefinition {
    /// Try to parse a DUT definition from a file.
    fn from_file(file: &Path) -> Result<Self> {
        let file_content = std::fs::read_to_string(file)?;

        let definition: RawDutDefinition = toml::from_str(&file_content)?;

        Ok(definition)
    }
}

#[derive(Debug, Clone)]
pub enum DefinitionSource {
    Cli,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct DutDefinition {
    pub target: TargetDescription,

    /// Image to flash. Without one, a generated image is used.
    pub flash_test_binary: Option<PathBuf>,

    pub simulation: SimulatedTargetConfig,

    /// Source of the DUT definition.
    pub source: DefinitionSource,
}

impl DutDefinition {
    /// Creates a definition for a target from the registry with the default simulation.
    pub fn new(target: &str, registry: &Registry) -> Result<Self> {
        let target = registry
            .get_target(target)
            .with_context(|| format!("Unable to find target '{target}'"))?;

        Ok(Self {
            target,
            flash_test_binary: None,
            simulation: SimulatedTargetConfig::default(),
            source: DefinitionSource::Cli,
        })
    }

    /// Collect all DUT definitions from a directory.
    ///
    /// This will try to parse all TOML files in the given directory
    /// into DUT definitions, in the order of their file names.
    ///
    /// For TOML files which do not contain a valid DUT definition,
    /// an error is returned. Errors are also returned in case of
    /// IO errors, or if the given path is not a directory.
    pub fn collect(directory: impl AsRef<Path>, registry: &Registry) -> Result<Vec<DutDefinition>> {
        let directory = directory.as_ref();

        ensure!(
            directory.is_dir(),
            "Unable to collect target definitions from path '{}'. Path is not a directory.",
            directory.display()
        );

        let mut files = Vec::new();
        for file in directory.read_dir()? {
            let file_path = file?.path();

            if file_path.extension().is_some_and(|ext| ext == "toml") {
                files.push(file_path);
            }
        }
        files.sort();

        files
            .iter()
            .map(|file_path| {
                DutDefinition::from_file(file_path, registry)
                    .with_context(|| format!("Failed to parse definition '{}'", file_path.display()))
            })
            .collect()
    }

    /// Try to parse a DUT definition from a file.
    fn from_file(file: &Path, registry: &Registry) -> Result<Self> {
        let raw_definition = RawDutDefinition::from_file(file)?;

        let target = registry
            .get_target(&raw_definition.target)
            .with_context(|| format!("Unable to find target '{}'", raw_definition.target))?;

        let flash_test_binary = raw_definition.flash_test_binary.map(|binary| {
            match file.parent() {
                Some(parent) if binary.is_relative() => parent.join(binary),
                _ => binary,
            }
        });

        Ok(Self {
            target,
            flash_test_binary,
            simulation: raw_definition.simulation,
            source: DefinitionSource::File(file.to_path_buf()),
        })
    }
}
