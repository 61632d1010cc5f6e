use crate::{CostModel, FlashGeometry, RamRegion};
use serde::{Deserialize, Serialize};

/// Everything the flashing engine needs to know about one kind of target.
///
/// A description is resolved once, when the target is selected, and handed to
/// the engine as an immutable record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDescription {
    /// The name of the target, used to select it from the registry.
    pub name: String,
    /// RAM of the target, where flash helpers and checksum code run.
    pub ram: RamRegion,
    /// Layout of the target flash.
    pub flash: FlashGeometry,
    /// Timing characteristics used to choose an erase strategy.
    #[serde(default)]
    pub cost: CostModel,
    /// Whether page checksums can be computed on the target.
    #[serde(default = "default_true")]
    pub checksum_supported: bool,
    /// Whether the target supports erasing the whole chip with one command.
    #[serde(default = "default_true")]
    pub chip_erase_supported: bool,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Registry;

    #[test]
    fn addresses_are_written_as_hex() {
        let target = Registry::from_builtin_targets()
            .unwrap()
            .get_target("lpc4330")
            .unwrap();
        let yaml = serde_yaml::to_string(&target).unwrap();

        assert!(yaml.contains("0x14000000"), "{yaml}");
        assert!(yaml.contains("0x10020000"), "{yaml}");
        assert!(yaml.contains("0xff"), "{yaml}");
        assert!(!yaml.contains("min_program_length"), "{yaml}");
    }
}
