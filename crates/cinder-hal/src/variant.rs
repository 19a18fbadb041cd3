//! # Hardware Variants
//!
//! The 2D block ships in two revisions that differ in texture unit count,
//! vector-graphics register count and the number and size of edge buffers.

use cinder_core::ByteSize;

use crate::registers::{vgc, vgv1};

/// Tile edge used to size the Z160 edge buffers
const L1_TILE_SIZE: u64 = 64;

/// Words in the begin header of a state block
const STATE_BEGIN_WORDS: u32 = 3;
/// Words of 2D color state in a state block
const STATE_COLOR_WORDS: u32 = 2;

// =============================================================================
// EDGE BUFFERS
// =============================================================================

/// Size and base register of one edge scratch buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeLayout {
    /// Allocation size
    pub size: ByteSize,
    /// 2D-window register receiving the buffer's device address
    pub base_reg: u32,
}

const Z160_EDGES: [EdgeLayout; 2] = [
    EdgeLayout {
        size: ByteSize::from_bytes(L1_TILE_SIZE * L1_TILE_SIZE * 4 + 64),
        base_reg: vgv1::CBASE1,
    },
    EdgeLayout {
        size: ByteSize::from_bytes(L1_TILE_SIZE * L1_TILE_SIZE * 16 + 64),
        base_reg: vgv1::UBASE2,
    },
];

const Z180_EDGES: [EdgeLayout; 3] = [
    EdgeLayout {
        size: ByteSize::from_bytes(0x3E8 + 64),
        base_reg: vgv1::CBUF,
    },
    EdgeLayout {
        size: ByteSize::from_bytes(0x8000 + 64),
        base_reg: vgv1::BBUF,
    },
    EdgeLayout {
        size: ByteSize::from_bytes(0x80020 + 64),
        base_reg: vgv1::EBUF,
    },
];

// =============================================================================
// VARIANT
// =============================================================================

/// Hardware revision of the 2D block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HardwareVariant {
    /// Two texture units, two edge buffers
    #[default]
    Z160,
    /// Four texture units, three edge buffers
    Z180,
}

impl HardwareVariant {
    /// Number of texture units
    pub const fn tex_units(self) -> u32 {
        match self {
            Self::Z160 => 2,
            Self::Z180 => 4,
        }
    }

    /// Registers per texture unit
    pub const fn tex_unit_regs(self) -> u32 {
        match self {
            Self::Z160 => 24,
            Self::Z180 => 25,
        }
    }

    /// Vector-graphics register count
    pub const fn vg_regs(self) -> u32 {
        match self {
            Self::Z160 => 0x3A,
            Self::Z180 => 0x39,
        }
    }

    /// Words of a full per-unit state block (address/value pairs)
    pub const fn state_words(self) -> u32 {
        self.tex_unit_regs() * 2 * self.tex_units()
            + self.vg_regs() * 2
            + STATE_BEGIN_WORDS
            + STATE_COLOR_WORDS
    }

    /// Words of the state stream prefix, padded to 32 bytes
    ///
    /// Every indirect buffer starts with this many words of state. Incremental
    /// submissions skip them, context switches execute them.
    pub const fn state_stream_words(self) -> u32 {
        let bytes = self.state_words() * 4;
        ((bytes + 31) & !31) / 4
    }

    /// Edge buffers required while the block is active
    pub const fn edge_buffers(self) -> &'static [EdgeLayout] {
        match self {
            Self::Z160 => &Z160_EDGES,
            Self::Z180 => &Z180_EDGES,
        }
    }

    /// Byte offsets of the (address, data) pair used to read memory-hub registers
    pub const fn mh_read_regs(self) -> (u32, u32) {
        match self {
            Self::Z160 => (vgc::MMU_READ_ADDR, vgc::MMU_READ_DATA),
            Self::Z180 => (vgc::MH_READ_ADDR, vgc::MH_READ_ADDR),
        }
    }
}
