//! Lookup of target descriptions by name.

use crate::{GeometryError, TargetDescription, ZeroThroughput};
use std::fs::File;
use std::path::Path;

const BUILTIN_TARGETS: &str = include_str!("../targets/builtin.yaml");

/// Error type for all errors which occur when working with the registry.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum RegistryError {
    /// The requested target '{0}' was not found.
    TargetNotFound(String),

    /// The name '{name}' matches more than one target: {candidates:?}
    Ambiguous {
        /// The requested name.
        name: String,
        /// All targets the name is a prefix of.
        candidates: Vec<String>,
    },

    /// The flash description of target '{name}' is invalid.
    InvalidGeometry {
        /// Name of the target.
        name: String,
        /// What is wrong with the geometry.
        #[source]
        source: GeometryError,
    },

    /// The cost model of target '{name}' is invalid.
    InvalidCostModel {
        /// Name of the target.
        name: String,
        /// The throughput that is zero.
        #[source]
        source: ZeroThroughput,
    },

    /// An IO error was encountered while reading a target description.
    Io(#[from] std::io::Error),

    /// An error occurred while parsing a YAML target description.
    Yaml(#[from] serde_yaml::Error),
}

/// A set of known target descriptions.
#[derive(Debug, Clone)]
pub struct Registry {
    targets: Vec<TargetDescription>,
}

impl Registry {
    /// Creates a registry with only the built-in targets.
    pub fn from_builtin_targets() -> Result<Self, RegistryError> {
        let mut registry = Self { targets: vec![] };
        registry.add_targets_from_yaml_str(BUILTIN_TARGETS)?;
        Ok(registry)
    }

    /// Returns the names of all known targets.
    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|target| target.name.as_str())
    }

    /// Returns the names of all targets which start with `name`, ignoring case.
    pub fn search_targets(&self, name: &str) -> Vec<String> {
        let name = name.to_ascii_lowercase();
        self.targets
            .iter()
            .filter(|target| target.name.to_ascii_lowercase().starts_with(&name))
            .map(|target| target.name.clone())
            .collect()
    }

    /// Resolves a target by its name.
    ///
    /// An exact match (ignoring case) always wins. Otherwise the name may be a
    /// prefix of exactly one known target.
    pub fn get_target(&self, name: &str) -> Result<TargetDescription, RegistryError> {
        if let Some(target) = self
            .targets
            .iter()
            .find(|target| target.name.eq_ignore_ascii_case(name))
        {
            return Ok(target.clone());
        }

        let candidates = self.search_targets(name);
        match candidates.as_slice() {
            [] => Err(RegistryError::TargetNotFound(name.to_owned())),
            [found] => {
                tracing::warn!(
                    "Found target {} which matches given partial name {}. Consider specifying its full name.",
                    found,
                    name,
                );
                self.targets
                    .iter()
                    .find(|target| &target.name == found)
                    .cloned()
                    .ok_or_else(|| RegistryError::TargetNotFound(name.to_owned()))
            }
            _ => Err(RegistryError::Ambiguous {
                name: name.to_owned(),
                candidates,
            }),
        }
    }

    /// Adds all targets of a YAML file, replacing known targets with the same name.
    pub fn add_target_from_yaml(&mut self, path_to_yaml: &Path) -> Result<(), RegistryError> {
        let file = File::open(path_to_yaml)?;
        let targets: Vec<TargetDescription> = serde_yaml::from_reader(file)?;
        self.add_targets(targets)
    }

    /// Adds all targets of a YAML document, replacing known targets with the same name.
    pub fn add_targets_from_yaml_str(&mut self, yaml: &str) -> Result<(), RegistryError> {
        let targets: Vec<TargetDescription> = serde_yaml::from_str(yaml)?;
        self.add_targets(targets)
    }

    fn add_targets(&mut self, targets: Vec<TargetDescription>) -> Result<(), RegistryError> {
        for target in targets {
            target
                .flash
                .validate()
                .map_err(|source| RegistryError::InvalidGeometry {
                    name: target.name.clone(),
                    source,
                })?;
            target
                .cost
                .validate()
                .map_err(|source| RegistryError::InvalidCostModel {
                    name: target.name.clone(),
                    source,
                })?;

            if let Some(index) = self
                .targets
                .iter()
                .position(|old| old.name.eq_ignore_ascii_case(&target.name))
            {
                tracing::debug!("Replacing target description {}", target.name);
                self.targets.remove(index);
            }
            self.targets.push(target);
        }

        Ok(())
    }
}
