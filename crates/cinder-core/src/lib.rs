//! # Cinder Core
//!
//! Foundational types, errors and backend capability traits for the Cinder
//! 2D GPU command-stream driver.
//!
//! The submission engine never touches hardware directly. Everything it needs
//! from the device (register access, shared memory, the completion store) is
//! expressed as a trait here and provided by a backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      cinder-core                            │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │   Traits    │  │   Types     │  │     Error           │  │
//! │  │ (RegisterIo,│  │ (GpuAddr,   │  │   Handling          │  │
//! │  │  SharedMem) │  │  Timestamp) │  │                     │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// =============================================================================
// MODULE EXPORTS
// =============================================================================

pub mod error;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
