//! # Cinder Backend Traits
//!
//! Capabilities the submission engine consumes from its device backend.
//!
//! ## Trait Hierarchy
//!
//! ```text
//! Backend
//!    │
//!    ├── RegisterIo       (direct MMIO + command-window writes)
//!    │
//!    ├── SharedMemory     (ring slots, edge buffers, indirect buffers)
//!    │
//!    └── CompletionStore  (submitted / retired stamps for other subsystems)
//! ```
//!
//! Interrupt delivery is not a backend capability: the interrupt controller
//! calls into the dispatcher in `cinder-hal`, which forwards to the engine.

use crate::error::Result;
use crate::types::*;

// =============================================================================
// REGISTER I/O
// =============================================================================

/// Command-window targets
///
/// Some register blocks are not reachable through plain MMIO and must be
/// written through the command window of the owning unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowTarget {
    /// Memory hub / MMU registers
    Mmu,
    /// 2D vector-graphics block registers
    TwoD,
}

/// Register transport
///
/// Offsets passed to `read`/`write` are in 32-bit words. Window registers use
/// the unit-local register numbers.
pub trait RegisterIo: Send + Sync {
    /// Read a 32-bit register
    fn read(&self, offset: u32) -> u32;

    /// Write a 32-bit register
    fn write(&self, offset: u32, value: u32);

    /// Write a register through a unit's command window
    fn write_window(&self, target: WindowTarget, reg: u32, value: u32);
}

// =============================================================================
// SHARED MEMORY
// =============================================================================

bitflags::bitflags! {
    /// Flags for shared memory allocation
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Physically contiguous pages
        const CONTIGUOUS = 1 << 0;
        /// Page-aligned start address
        const PAGE_ALIGNED = 1 << 1;
    }
}

impl AllocFlags {
    /// Flags used for every ring slot and edge buffer
    pub const RING: Self = Self::CONTIGUOUS.union(Self::PAGE_ALIGNED);
}

/// A shared memory allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDesc {
    /// Backend handle (for freeing)
    pub handle: MemHandle,
    /// Device-visible address
    pub gpu_addr: GpuAddr,
    /// Size in bytes
    pub size: ByteSize,
}

/// Shared host/device memory capability
pub trait SharedMemory: Send + Sync {
    /// Allocate a region
    fn alloc(&self, size: ByteSize, flags: AllocFlags) -> Result<MemoryDesc>;

    /// Release a region
    fn free(&self, desc: &MemoryDesc);

    /// Copy words into a region at a byte offset
    fn write(&self, desc: &MemoryDesc, offset: u64, words: &[u32]) -> Result<()>;

    /// Fill a whole region with a word value
    fn fill(&self, desc: &MemoryDesc, value: u32) -> Result<()>;

    /// Copy words to a device address inside any live region
    ///
    /// Used to patch the tail of a caller-owned indirect buffer.
    fn write_addr(&self, addr: GpuAddr, words: &[u32]) -> Result<()>;
}

// =============================================================================
// COMPLETION STORE
// =============================================================================

/// Byte offsets inside the shared completion store
pub mod memstore {
    /// Start-of-pipe stamp: last submitted timestamp
    pub const SOP_TIMESTAMP: u32 = 0;
    /// End-of-pipe stamp: last retired timestamp
    pub const EOP_TIMESTAMP: u32 = 8;
}

/// Host/device-visible completion storage polled by other subsystems
pub trait CompletionStore: Send + Sync {
    /// Write a 32-bit value at a byte offset
    fn store(&self, offset: u32, value: u32);

    /// Read back a 32-bit value at a byte offset
    fn load(&self, offset: u32) -> u32;
}

// =============================================================================
// BACKEND
// =============================================================================

/// Full capability set of a device backend
pub trait Backend: RegisterIo + SharedMemory + CompletionStore {}

impl<T: RegisterIo + SharedMemory + CompletionStore> Backend for T {}

// =============================================================================
// STATIC ASSERTIONS
// =============================================================================

static_assertions::assert_impl_all!(GpuAddr: Send, Sync, Copy);
static_assertions::assert_impl_all!(ByteSize: Send, Sync, Copy);
static_assertions::assert_impl_all!(MemoryDesc: Send, Sync, Copy);
static_assertions::assert_impl_all!(Timestamp: Send, Sync, Copy);
static_assertions::assert_impl_all!(ContextId: Send, Sync, Copy);
