//! A decoder for Direct3D 12 Device Removed Extended Data (DRED).
//!
//! When a D3D12 device is removed, the runtime leaves a record of what the GPU was doing
//! behind in process memory: chains of auto-breadcrumb nodes with a ring of recently issued
//! command list operations, and a page fault record listing the allocations near the
//! faulting address. This crate reads that record through a [`MemoryProvider`] and turns it
//! into a [`DeviceRemovedExtendedData`].
//!
//! # Example
//!
//! ```no_run
//! use dred::{MemoryImage, locate_and_decode};
//!
//! # fn foo(image: MemoryImage) -> Result<(), dred::DredError> {
//! let dred = locate_and_decode(&image)?;
//! for node in dred.breadcrumb_nodes() {
//!     for op in node.outstanding_ops() {
//!         println!("{} {}", op.index, op.op_name());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod chain;
mod dred;
pub mod history;
mod locate;
pub mod names;
mod provider;
mod strings;

pub use crate::dred::*;
pub use crate::locate::*;
pub use crate::provider::*;
pub use crate::strings::*;

pub use dred_common::format;
pub use dred_common::format::{Layout, PointerWidth};
