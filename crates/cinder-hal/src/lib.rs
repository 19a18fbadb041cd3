//! # Cinder HAL
//!
//! Hardware description and access helpers for the fixed-function 2D block.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        cinder-hal                            │
//! │                                                              │
//! │  registers ──▶ window ──▶ irq (decode + dispatch)            │
//! │      │                                                       │
//! │  variant (Z160 / Z180 constants)     barrier                 │
//! │                                                              │
//! │  soft (in-memory device model implementing every backend     │
//! │        trait, used by host-side tests and bring-up)          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

pub mod barrier;
pub mod irq;
pub mod registers;
pub mod soft;
pub mod variant;
pub mod window;

// Re-exports
pub use irq::{InterruptHandler, InterruptSource, IrqDispatcher, IrqStatus};
pub use soft::SoftDevice;
pub use variant::{EdgeLayout, HardwareVariant};
pub use window::RegisterWindow;
