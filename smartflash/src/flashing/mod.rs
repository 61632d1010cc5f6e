//! Flash programming operations.
//!
//! Data is collected in a [`FlashBuilder`], laid out in whole sectors and
//! programmed by a [`Flasher`]. Before anything is erased, the current flash
//! content is compared with the image by a [`PageAnalyzer`], and the
//! [`EraseDecisionEngine`] picks whichever of chip erase or sector erase is
//! expected to finish first.
//!
//! ## Examples
//!
//! ### Programming a single block
//!
//! ```
//! use smartflash::flashing::{flash_block, EraseStrategy, Flasher};
//! use smartflash::simulated::SimulatedTarget;
//! use smartflash_target::{CostModel, FlashGeometry};
//!
//! let geometry = FlashGeometry::new(0x0, 0x8000, 0x400, 0x400);
//! let cost = CostModel::default();
//! let mut target = SimulatedTarget::new(geometry.clone());
//!
//! let mut flasher = Flasher::new(&mut target, &geometry, &cost)?;
//! let result = flash_block(&mut flasher, 0x1000, &[0xaa; 0x800], true, None, None)?;
//! assert_eq!(result.strategy, EraseStrategy::PageErase);
//! # Ok::<(), smartflash::flashing::FlashError>(())
//! ```
//!
//! ### Adding data manually
//!
//! ```
//! use smartflash::flashing::{FlashBuilder, Flasher, ProgramOptions};
//! use smartflash::simulated::SimulatedTarget;
//! use smartflash_target::{CostModel, FlashGeometry};
//!
//! let geometry = FlashGeometry::new(0x0, 0x8000, 0x400, 0x400);
//! let cost = CostModel::default();
//! let mut target = SimulatedTarget::new(geometry.clone());
//! let mut flasher = Flasher::new(&mut target, &geometry, &cost)?;
//!
//! let mut builder = FlashBuilder::new();
//! builder.add_data(0x0000, vec![0x1, 0x2, 0x3])?;
//! builder.add_data(0x4000, vec![0x4, 0x5, 0x6])?;
//!
//! let mut print = |progress: f32| println!("{:3.0}%", progress * 100.0);
//! builder.program(&mut flasher, &ProgramOptions::default(), Some(&mut print))?;
//! # Ok::<(), smartflash::flashing::FlashError>(())
//! ```

mod analyzer;
mod block;
mod builder;
mod decision;
mod error;
mod flasher;
mod options;
mod progress;
mod result;

pub(crate) use analyzer::CRC32;

pub use analyzer::{AnalysisMethod, ClassifiedPage, Classify, PageAnalyzer, PageClassification};
pub use block::*;
pub use builder::{FlashBuilder, FlashFill, FlashLayout, FlashPage, FlashSector};
pub use decision::*;
pub use error::*;
pub use flasher::*;
pub use options::*;
pub use progress::{FlashPhase, ProgressObserver, ProgressState};
pub use result::*;
