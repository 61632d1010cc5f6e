//! # Smart flash programming for microcontrollers
//!
//! Programs images to the flash of a target connected through a debug
//! transport, erasing and writing as little as possible. The current flash
//! content is compared with the image page by page, and the whole chip is only
//! erased when that is expected to be faster than erasing the changed sectors.
//!
//! The transport is abstracted by the [`FlashTarget`] trait. The
//! [`simulated::SimulatedTarget`] implements it in memory.
//!
//! ## Programming an image
//!
//! ```
//! use smartflash::flashing::{FlashBuilder, Flasher, ProgramOptions};
//! use smartflash::simulated::SimulatedTarget;
//! use smartflash::FlashTarget;
//! use smartflash_target::Registry;
//!
//! let registry = Registry::from_builtin_targets()?;
//! let description = registry.get_target("lpc11u24")?;
//!
//! let mut target = SimulatedTarget::new(description.flash.clone());
//! let mut flasher = Flasher::new(&mut target, &description.flash, &description.cost)?;
//!
//! let mut builder = FlashBuilder::new();
//! builder.add_data(0x0, vec![0x42; 0x1000])?;
//! let result = builder.program(&mut flasher, &ProgramOptions::default(), None)?;
//! flasher.finish()?;
//!
//! let mut data = [0; 4];
//! target.read_memory(0x0, &mut data)?;
//! assert_eq!(data, [0x42; 4]);
//! println!("Programmed {} pages", result.pages_programmed);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
#![warn(missing_docs)]

mod error;
pub mod flashing;
mod queue;
pub mod simulated;
mod target;

pub use crate::error::{DeviceError, TransportError};
pub use crate::queue::{DeferredReadIndex, DeferredReadSet, ReadQueue};
pub use crate::target::FlashTarget;
