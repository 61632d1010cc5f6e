use super::{
    EraseStrategy, FlashBuilder, FlashError, Flasher, ProgramOptions, ProgramResult,
    ProgressObserver,
};

/// Programs a single block of data.
///
/// `chip_erase` forces the erase strategy: `Some(true)` erases the whole chip,
/// `Some(false)` only the touched sectors. With `None` the cheaper strategy is
/// chosen. `smart` enables the comparison with the current flash content.
///
/// If you need more options, have a look at [`flash_block_with_options`].
pub fn flash_block(
    flasher: &mut Flasher<'_>,
    address: u32,
    data: &[u8],
    smart: bool,
    chip_erase: Option<bool>,
    progress: Option<&mut dyn ProgressObserver>,
) -> Result<ProgramResult, FlashError> {
    let options = ProgramOptions {
        smart_flash: smart,
        strategy: chip_erase.map(|chip_erase| {
            if chip_erase {
                EraseStrategy::ChipErase
            } else {
                EraseStrategy::PageErase
            }
        }),
        ..ProgramOptions::default()
    };

    flash_block_with_options(flasher, address, data, &options, progress)
}

/// Programs a single block of data with the given options.
///
/// The block has to lie completely in the flash, which is checked before the
/// target is accessed.
pub fn flash_block_with_options(
    flasher: &mut Flasher<'_>,
    address: u32,
    data: &[u8],
    options: &ProgramOptions,
    progress: Option<&mut dyn ProgressObserver>,
) -> Result<ProgramResult, FlashError> {
    let end = u64::from(address) + data.len() as u64;
    let geometry = flasher.geometry();
    let rom_end = u64::from(geometry.rom_start) + u64::from(geometry.rom_size);
    if address < geometry.rom_start || end > rom_end {
        return Err(FlashError::AddressNotInFlash {
            start: address,
            end,
        });
    }

    let mut builder = FlashBuilder::new();
    builder.add_data(address, data)?;
    builder.program(flasher, options, progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedTarget;
    use pretty_assertions::assert_eq;
    use smartflash_target::{CostModel, FlashGeometry};

    #[test]
    fn block_outside_rom_is_rejected_before_device_access() {
        let mut target = SimulatedTarget::new(FlashGeometry::new(0x0, 0x1000, 0x100, 0x100));
        let geometry = target.geometry().clone();
        let cost = CostModel::default();

        {
            let mut flasher = Flasher::new(&mut target, &geometry, &cost).unwrap();
            let error = flash_block(&mut flasher, 0xf80, &[0; 0x100], true, None, None)
                .unwrap_err();
            assert!(matches!(
                error,
                FlashError::AddressNotInFlash {
                    start: 0xf80,
                    end: 0x1080
                }
            ));
        }

        assert!(target.operations().is_empty());
    }

    #[test]
    fn forced_strategies() {
        let mut target = SimulatedTarget::new(FlashGeometry::new(0x0, 0x1000, 0x100, 0x100));
        let geometry = target.geometry().clone();
        let cost = CostModel::default();
        let mut flasher = Flasher::new(&mut target, &geometry, &cost).unwrap();

        let result = flash_block(&mut flasher, 0x0, &[0x12; 0x200], true, Some(true), None).unwrap();
        assert_eq!(result.strategy, EraseStrategy::ChipErase);
        assert_eq!(result.analyze_strategy, None);

        let result = flash_block(&mut flasher, 0x0, &[0x12; 0x200], true, Some(false), None).unwrap();
        assert_eq!(result.strategy, EraseStrategy::PageErase);
        assert_eq!(result.analyze_time, None);
    }
}
