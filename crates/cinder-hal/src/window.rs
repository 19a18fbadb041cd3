//! # Register Window
//!
//! Routes register accesses to the path the hardware requires.
//!
//! Memory-hub registers are not reachable through plain MMIO on this block:
//! writes go through the MMU command window and reads go through a dedicated
//! read-address / read-data pair. The 2D unit's own registers are only
//! reachable through the 2D command window.

use cinder_core::{RegisterIo, WindowTarget};

use crate::registers::{mh, word};
use crate::variant::HardwareVariant;

/// Routed view over a register transport
pub struct RegisterWindow<'a, R: RegisterIo + ?Sized> {
    io: &'a R,
    variant: HardwareVariant,
}

impl<'a, R: RegisterIo + ?Sized> RegisterWindow<'a, R> {
    /// Wrap a transport
    pub fn new(io: &'a R, variant: HardwareVariant) -> Self {
        Self { io, variant }
    }

    /// Read a register by word offset
    pub fn read(&self, offset: u32) -> u32 {
        if mh::contains(offset) {
            let (addr_reg, data_reg) = self.variant.mh_read_regs();
            self.io.write(word(addr_reg), offset);
            self.io.read(word(data_reg))
        } else {
            self.io.read(offset)
        }
    }

    /// Write a register by word offset
    pub fn write(&self, offset: u32, value: u32) {
        if mh::contains(offset) {
            self.io.write_window(WindowTarget::Mmu, offset, value);
        } else {
            self.io.write(offset, value);
        }
    }

    /// Write a 2D unit register through its command window
    pub fn write_2d(&self, reg: u32, value: u32) {
        log::trace!("2d window: reg 0x{:04x} <- 0x{:08x}", reg, value);
        self.io.write_window(WindowTarget::TwoD, reg, value);
    }
}

impl<R: RegisterIo + ?Sized> core::fmt::Debug for RegisterWindow<'_, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegisterWindow")
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}
