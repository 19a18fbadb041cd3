//! # Register Map
//!
//! Register numbers of the 2D block, its command processor (VGV3), the
//! controller block (VGC) and the memory hub (MH).
//!
//! VGV1/VGV3 registers are unit-local numbers written through the 2D command
//! window. VGC registers are byte offsets in the MMIO aperture; use
//! [`word`] before handing them to [`RegisterIo`](cinder_core::RegisterIo).
//! MH registers are already word offsets.

/// Convert a byte offset to the word offset used by the register transport
#[inline]
pub const fn word(byte_offset: u32) -> u32 {
    byte_offset >> 2
}

// =============================================================================
// VGV3 - COMMAND PROCESSOR
// =============================================================================

/// Command processor registers (2D window)
pub mod vgv3 {
    /// Mark counter / kick control
    pub const CONTROL: u32 = 0x0070;
    /// Fetch mode
    pub const MODE: u32 = 0x0071;
    /// Address of the next command block to fetch
    pub const NEXTADDR: u32 = 0x0075;
    /// Command and word count for the next fetch
    pub const NEXTCMD: u32 = 0x0076;
    /// Last register of the block, used as a no-op write target
    pub const LAST: u32 = 0x007F;

    /// Fetch mode programmed at ring setup (ring-buffer fetch)
    pub const MODE_RING: u32 = 4;
    /// CONTROL value that re-triggers the mark counter when work is pending
    pub const CONTROL_MARK_RESYNC: u32 = 2;
}

/// Fields of the VGV3 NEXTCMD word
pub mod nextcmd {
    /// Word count of the next fetch
    pub const COUNT_MASK: u32 = 0x0FFF;
    /// Jump to NEXTADDR after the current block
    pub const JUMP: u32 = 1 << 12;
    /// Increment the mark counter when this block retires
    pub const MARK: u32 = 1 << 15;

    /// Compose a NEXTCMD word
    #[inline]
    pub const fn encode(flags: u32, count: u32) -> u32 {
        flags | (count & COUNT_MASK)
    }
}

// =============================================================================
// VGV1 - EDGE BUFFER BASES
// =============================================================================

/// Edge buffer base registers (2D window)
pub mod vgv1 {
    /// Z160 edge buffer 0 base
    pub const CBASE1: u32 = 0x002A;
    /// Z160 edge buffer 1 base
    pub const UBASE2: u32 = 0x002D;
    /// Z180 edge buffer 0 base
    pub const CBUF: u32 = 0x0038;
    /// Z180 edge buffer 1 base
    pub const BBUF: u32 = 0x0039;
    /// Z180 edge buffer 2 base
    pub const EBUF: u32 = 0x003A;
}

// =============================================================================
// VGC - CONTROLLER
// =============================================================================

/// Controller registers (byte offsets)
pub mod vgc {
    /// Interrupt enable mask
    pub const IRQENABLE: u32 = 0x0438;
    /// Interrupt status
    pub const IRQSTATUS: u32 = 0x043C;
    /// Count of retired marks since the last read
    pub const IRQ_ACTIVE_CNT: u32 = 0x04E0;
    /// Z180 memory-hub read address (data is read back from the same register)
    pub const MH_READ_ADDR: u32 = 0x0510;
    /// Z160 MMU read address
    pub const MMU_READ_ADDR: u32 = 0x0510;
    /// Z160 MMU read data
    pub const MMU_READ_DATA: u32 = 0x0518;

    /// Extract the retired-mark count from an IRQ_ACTIVE_CNT value
    #[inline]
    pub const fn active_count(raw: u32) -> u32 {
        (raw >> 8) & 0xFF
    }
}

// =============================================================================
// MH - MEMORY HUB
// =============================================================================

/// Memory hub registers (word offsets)
pub mod mh {
    /// MMU configuration, first register of the MMU range
    pub const MMU_CONFIG: u32 = 0x0040;
    /// Last register of the MMU range
    pub const MMU_MPU_END: u32 = 0x0050;
    /// Arbiter configuration, first register of the arbiter range
    pub const ARBITER_CONFIG: u32 = 0x0A40;
    /// Last register of the arbiter range
    pub const AXI_HALT_CONTROL: u32 = 0x0A50;

    /// Whether a word offset belongs to the memory hub
    #[inline]
    pub const fn contains(offset: u32) -> bool {
        (offset >= ARBITER_CONFIG && offset <= AXI_HALT_CONTROL)
            || (offset >= MMU_CONFIG && offset <= MMU_MPU_END)
    }
}
