//! # Cinder Error Handling
//!
//! Error types for the command-stream driver.
//!
//! Error handling in Cinder follows these principles:
//! - Errors are typed and split into recoverable and device-fatal kinds
//! - No panics in submission or completion paths
//! - Wait operations report timeouts as values, not errors

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Cinder Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Cinder unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Invalid parameter provided
    InvalidParameter,
    /// Engine configuration rejected at construction
    InvalidConfig,

    // =========================================================================
    // Context Errors
    // =========================================================================
    /// Context id is not live on this device
    InvalidContext,
    /// Live-context count is at its maximum
    CapacityExceeded,
    /// More contexts destroyed than created
    ContextUnderflow,
    /// No shared ring is provisioned
    NotProvisioned,

    // =========================================================================
    // Memory Errors
    // =========================================================================
    /// Ring or edge memory could not be provisioned
    AllocationFailure,
    /// Write past the end of a command buffer
    BufferOverflow,
    /// Address does not fall inside a known allocation
    InvalidGpuAddress,

    // =========================================================================
    // Submission Errors
    // =========================================================================
    /// Slot claim exceeded its bound
    SubmissionTimeout,
    /// The hardware reported a pipeline fault; the device must be reprovisioned
    HardwareFault,
}

impl Error {
    /// Whether the caller may retry the failed operation
    pub const fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded | Self::SubmissionTimeout | Self::NotProvisioned
        )
    }

    /// Whether the error invalidates the whole device rather than one request
    pub const fn is_device_fatal(self) -> bool {
        matches!(self, Self::HardwareFault)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Generic
            Self::InvalidParameter => write!(f, "invalid parameter"),
            Self::InvalidConfig => write!(f, "invalid engine configuration"),

            // Context
            Self::InvalidContext => write!(f, "context is not live"),
            Self::CapacityExceeded => write!(f, "context capacity exceeded"),
            Self::ContextUnderflow => write!(f, "context destroyed more times than created"),
            Self::NotProvisioned => write!(f, "command ring not provisioned"),

            // Memory
            Self::AllocationFailure => write!(f, "shared memory allocation failed"),
            Self::BufferOverflow => write!(f, "command buffer overflow"),
            Self::InvalidGpuAddress => write!(f, "invalid GPU address"),

            // Submission
            Self::SubmissionTimeout => write!(f, "timed out waiting for a ring slot"),
            Self::HardwareFault => write!(f, "hardware fault, device must be reprovisioned"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
