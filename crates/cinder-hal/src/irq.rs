//! # Interrupt Handling
//!
//! Decode of the controller interrupt status and dispatch to attached
//! handlers.
//!
//! The platform interrupt controller owns the IRQ line and calls
//! [`IrqDispatcher::isr`] from its handler. Handlers attached here run in that
//! context, so the handler table is guarded by a spin lock.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use cinder_core::RegisterIo;

use crate::registers::{vgc, word};
use crate::window::RegisterWindow;

// =============================================================================
// INTERRUPT TYPES
// =============================================================================

bitflags::bitflags! {
    /// Controller interrupt status / enable bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqStatus: u32 {
        /// 2D pipeline retired one or more marks
        const G2D = 1 << 0;
        /// Command FIFO error
        const FIFO = 1 << 1;
        /// Memory hub (MMU / AXI) interrupt
        const MH = 1 << 2;
        /// Frame buffer compression done
        const FBC = 1 << 3;
    }
}

impl IrqStatus {
    /// Sources enabled at engine start
    pub const DEFAULT_ENABLE: Self = Self::G2D.union(Self::FIFO);
}

/// Interrupt sources of the 2D block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum InterruptSource {
    /// Completion (non-error)
    G2d = 0,
    /// FIFO error
    Fifo = 1,
    /// Memory hub
    Mh = 2,
    /// Frame buffer compression
    Fbc = 3,
}

impl InterruptSource {
    /// Memory hub first, then the 2D block sources
    pub const DECODE_ORDER: [Self; 4] = [Self::Mh, Self::G2d, Self::Fifo, Self::Fbc];

    /// Status bit of this source
    pub const fn mask(self) -> IrqStatus {
        match self {
            Self::G2d => IrqStatus::G2D,
            Self::Fifo => IrqStatus::FIFO,
            Self::Mh => IrqStatus::MH,
            Self::Fbc => IrqStatus::FBC,
        }
    }

    /// Whether the source reports an error condition
    pub const fn is_error(self) -> bool {
        matches!(self, Self::Fifo)
    }
}

// =============================================================================
// INTERRUPT HANDLER
// =============================================================================

/// Interrupt handler trait
pub trait InterruptHandler: Send + Sync {
    /// Handle one decoded source
    fn handle(&self, source: InterruptSource);
}

// =============================================================================
// DISPATCHER
// =============================================================================

const SOURCE_COUNT: usize = 4;

/// Decodes controller status and fans out to attached handlers
pub struct IrqDispatcher {
    handlers: spin::RwLock<[Option<Arc<dyn InterruptHandler>>; SOURCE_COUNT]>,
    enabled: AtomicU32,
}

impl IrqDispatcher {
    /// Create a dispatcher with nothing attached and everything masked
    pub fn new() -> Self {
        Self {
            handlers: spin::RwLock::new([None, None, None, None]),
            enabled: AtomicU32::new(0),
        }
    }

    /// Attach a handler to a source, replacing any previous one
    pub fn attach(&self, source: InterruptSource, handler: Arc<dyn InterruptHandler>) {
        self.handlers.write()[source as usize] = Some(handler);
    }

    /// Detach and mask a source
    pub fn detach(&self, source: InterruptSource) {
        self.disable(source);
        self.handlers.write()[source as usize] = None;
    }

    /// Unmask a source
    pub fn enable(&self, source: InterruptSource) {
        self.enabled.fetch_or(source.mask().bits(), Ordering::AcqRel);
    }

    /// Mask a source
    pub fn disable(&self, source: InterruptSource) {
        self.enabled.fetch_and(!source.mask().bits(), Ordering::AcqRel);
    }

    /// Currently unmasked sources
    pub fn enabled(&self) -> IrqStatus {
        IrqStatus::from_bits_truncate(self.enabled.load(Ordering::Acquire))
    }

    /// Service the interrupt line
    ///
    /// Returns the sources that were pending, whether or not a handler ran.
    pub fn isr<R: RegisterIo + ?Sized>(&self, regs: &RegisterWindow<'_, R>) -> IrqStatus {
        let status = IrqStatus::from_bits_truncate(regs.read(word(vgc::IRQSTATUS)));
        if status.is_empty() {
            return status;
        }

        let enabled = self.enabled();
        for source in InterruptSource::DECODE_ORDER {
            if status.contains(source.mask()) && enabled.contains(source.mask()) {
                self.dispatch(source);
            }
        }

        status
    }

    /// Run the handler attached to a source
    pub fn dispatch(&self, source: InterruptSource) {
        let handler = self.handlers.read()[source as usize].clone();
        match handler {
            Some(handler) => handler.handle(source),
            None if source.is_error() => log::warn!("irq: unhandled {:?} error", source),
            None => log::trace!("irq: no handler for {:?}", source),
        }
    }
}

impl Default for IrqDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for IrqDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IrqDispatcher")
            .field("enabled", &self.enabled())
            .finish_non_exhaustive()
    }
}
