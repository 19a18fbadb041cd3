//! # Packet Encoder
//!
//! Fixed-layout command-processor packets written into ring slots.
//!
//! Every slot starts with a marker packet seeded at provisioning. A submission
//! appends a begin packet after it, pointing the command processor at the
//! caller's indirect buffer. The indirect buffer's own tail carries the jump
//! back into the next ring slot.

use cinder_core::{Error, GpuAddr, Result};
use cinder_hal::registers::{nextcmd, vgv3};
use cinder_hal::HardwareVariant;

// =============================================================================
// WORD FORMATS
// =============================================================================

const REG_WRITE_OPCODE: u32 = 0x7C00_0000;

/// Header of a write to `count` consecutive 2D registers starting at `reg`
#[inline]
pub const fn reg_write(reg: u32, count: u32) -> u32 {
    REG_WRITE_OPCODE | (count << 8) | reg
}

/// Write to the last command-processor register, used as padding
pub const NOP: u32 = vgv3::LAST << 24;

/// Words of a marker packet
pub const MARKER_WORDS: usize = 10;
/// Words of a begin packet
pub const BEGIN_WORDS: usize = 10;
/// Words a slot must hold for one submission
pub const PROLOGUE_WORDS: usize = MARKER_WORDS + BEGIN_WORDS;

/// Fetch count of an incremental submission
pub const INCREMENTAL_COUNT: u32 = 5;

/// Byte offset past the end of an indirect buffer where the chained jump goes
pub const CHAIN_OFFSET: u64 = 4;

// =============================================================================
// PACKETS
// =============================================================================

/// Marker packet seeded at the start of every slot
///
/// Arms the mark counter and leaves a jump target the previous submission's
/// chained jump lands on.
pub const fn marker_packet() -> [u32; MARKER_WORDS] {
    [
        reg_write(vgv3::NEXTCMD, 1),
        nextcmd::encode(nextcmd::MARK, 5),
        NOP,
        NOP,
        NOP,
        reg_write(vgv3::NEXTCMD, 1),
        5,
        NOP,
        NOP,
        NOP,
    ]
}

/// Begin packet fetching `count` words from `cmd`
pub const fn begin_packet(cmd: GpuAddr, count: u32) -> [u32; BEGIN_WORDS] {
    [
        reg_write(vgv3::NEXTCMD, 1),
        5,
        NOP,
        NOP,
        NOP,
        reg_write(vgv3::NEXTADDR, 2),
        cmd.lo32(),
        nextcmd::encode(nextcmd::JUMP, count),
        NOP,
        NOP,
    ]
}

/// Words chaining the end of an indirect buffer to the next ring slot
pub const fn chain_words(next_slot: GpuAddr) -> [u32; 2] {
    [
        next_slot.lo32(),
        nextcmd::encode(nextcmd::MARK | nextcmd::JUMP, 5),
    ]
}

/// Device address of the chained jump for an indirect buffer
pub const fn chain_addr(ib: GpuAddr, size_words: u32) -> GpuAddr {
    ib.offset_words(size_words as u64).offset(CHAIN_OFFSET)
}

/// How much of an indirect buffer a submission executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Same context as the last submission: skip the state prefix
    Incremental,
    /// Context switch: run the full state stream from the start
    StateStream,
}

impl PacketKind {
    /// Fetch count for the begin packet
    pub const fn count(self, variant: HardwareVariant) -> u32 {
        match self {
            Self::Incremental => INCREMENTAL_COUNT,
            Self::StateStream => variant.state_stream_words(),
        }
    }

    /// Fetch address for the begin packet
    pub const fn cmd_addr(self, ib: GpuAddr, variant: HardwareVariant) -> GpuAddr {
        match self {
            Self::Incremental => ib.offset_words(variant.state_stream_words() as u64),
            Self::StateStream => ib,
        }
    }
}

// =============================================================================
// WRITER
// =============================================================================

/// Bounded cursor over a slot's host-side words
#[derive(Debug)]
pub struct PacketWriter<'a> {
    words: &'a mut [u32],
    cursor: usize,
}

impl<'a> PacketWriter<'a> {
    /// Start writing at word `cursor`
    pub fn at(words: &'a mut [u32], cursor: usize) -> Result<Self> {
        if cursor > words.len() {
            return Err(Error::BufferOverflow);
        }
        Ok(Self { words, cursor })
    }

    /// Start writing at the beginning of the slot
    pub fn new(words: &'a mut [u32]) -> Self {
        Self { words, cursor: 0 }
    }

    /// Current write position in words
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Words left before the slot is full
    pub fn remaining(&self) -> usize {
        self.words.len() - self.cursor
    }

    /// Append raw words
    pub fn extend(&mut self, words: &[u32]) -> Result<()> {
        let end = self
            .cursor
            .checked_add(words.len())
            .filter(|&end| end <= self.words.len())
            .ok_or(Error::BufferOverflow)?;
        self.words[self.cursor..end].copy_from_slice(words);
        self.cursor = end;
        Ok(())
    }

    /// Append a marker packet
    pub fn write_marker(&mut self) -> Result<()> {
        self.extend(&marker_packet())
    }

    /// Append a begin packet for an indirect buffer
    pub fn write_begin(
        &mut self,
        ib: GpuAddr,
        kind: PacketKind,
        variant: HardwareVariant,
    ) -> Result<()> {
        self.extend(&begin_packet(kind.cmd_addr(ib, variant), kind.count(variant)))
    }
}
