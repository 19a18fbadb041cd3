//! # Command Ring
//!
//! Fixed arena of command slots cycled by the submission engine.
//!
//! Each slot has a host-side copy of its words and a device-visible
//! allocation the copy is flushed to. A slot remembers the fence of the last
//! submission that targeted it and may only be rewritten once that fence has
//! retired.

use std::time::{Duration, Instant};

use cinder_core::{
    AllocFlags, ByteSize, ContextId, Error, GpuAddr, MemoryDesc, Result, SharedMemory, Timestamp,
};
use cinder_hal::barrier;

use crate::encoder::PacketWriter;
use crate::fence::{TimestampTracker, WaitOutcome};

// =============================================================================
// RING STATE
// =============================================================================

/// Cursor over the slot arena
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingState {
    /// Slot the next submission is encoded into
    pub current: usize,
    /// Write offset inside the current slot, in words
    pub offset: usize,
    /// Context of the last published submission
    pub previous_context: Option<ContextId>,
}

impl RingState {
    /// Back to slot 0 with no previous context
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// =============================================================================
// SLOTS
// =============================================================================

/// One physical command buffer
#[derive(Debug)]
pub struct RingSlot {
    host: Vec<u32>,
    mem: MemoryDesc,
    fence: Option<Timestamp>,
}

impl RingSlot {
    /// Device address of the slot
    pub fn gpu_addr(&self) -> GpuAddr {
        self.mem.gpu_addr
    }

    /// Fence of the last submission bound to the slot
    pub fn fence(&self) -> Option<Timestamp> {
        self.fence
    }

    /// Host-side words
    pub fn words(&self) -> &[u32] {
        &self.host
    }
}

/// Bounds of the slot-claim loop
#[derive(Debug, Clone, Copy)]
pub struct ClaimPolicy {
    /// Wait per iteration
    pub wait_slice: Duration,
    /// Overall bound
    pub timeout: Duration,
}

/// What a successful claim cost
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Claim {
    /// The slot's previous fence was still outstanding on entry
    pub stalled: bool,
    /// Wait slices that elapsed before the fence retired
    pub retries: u32,
    /// Fence the slot carried before this claim
    pub previous: Option<Timestamp>,
}

// =============================================================================
// COMMAND RING
// =============================================================================

/// Arena of command slots shared by every context of a device
#[derive(Debug)]
pub struct CommandRing {
    slots: Vec<RingSlot>,
}

impl CommandRing {
    /// Allocate `num_slots` zeroed slots, each seeded with a marker packet
    ///
    /// On failure every slot allocated so far is freed again.
    pub fn provision<M: SharedMemory + ?Sized>(
        mem: &M,
        num_slots: usize,
        slot_words: usize,
    ) -> Result<Self> {
        if num_slots == 0 {
            return Err(Error::InvalidParameter);
        }

        let mut ring = Self {
            slots: Vec::with_capacity(num_slots),
        };

        for index in 0..num_slots {
            match Self::provision_slot(mem, slot_words) {
                Ok(slot) => ring.slots.push(slot),
                Err(err) => {
                    log::warn!("ring: slot {} provisioning failed: {}", index, err);
                    ring.release(mem);
                    return Err(err);
                }
            }
        }

        log::debug!("ring: {} slots of {} words", num_slots, slot_words);
        Ok(ring)
    }

    fn provision_slot<M: SharedMemory + ?Sized>(mem: &M, slot_words: usize) -> Result<RingSlot> {
        let desc = mem.alloc(ByteSize::from_words(slot_words as u64), AllocFlags::RING)?;

        let mut host = vec![0u32; slot_words];
        let marked = PacketWriter::new(&mut host).write_marker();
        if let Err(err) = marked.and_then(|()| mem.write(&desc, 0, &host)) {
            mem.free(&desc);
            return Err(err);
        }

        Ok(RingSlot {
            host,
            mem: desc,
            fence: None,
        })
    }

    /// Free every slot
    pub fn release<M: SharedMemory + ?Sized>(self, mem: &M) {
        for slot in &self.slots {
            mem.free(&slot.mem);
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the arena is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot at `index`
    pub fn slot(&self, index: usize) -> Option<&RingSlot> {
        self.slots.get(index)
    }

    /// Device address of the slot at `index`
    pub fn slot_addr(&self, index: usize) -> Result<GpuAddr> {
        self.slot(index)
            .map(RingSlot::gpu_addr)
            .ok_or(Error::InvalidParameter)
    }

    /// Slot following `current`
    pub fn next_slot(&self, current: usize) -> usize {
        (current + 1) % self.slots.len()
    }

    /// Wait until the slot's previous fence retires, then bind `fence` to it
    ///
    /// Waits in slices of `policy.wait_slice` and gives up with
    /// [`Error::SubmissionTimeout`] once `policy.timeout` has elapsed. A device
    /// fault while waiting surfaces as [`Error::HardwareFault`]. On error the
    /// slot keeps its previous fence.
    pub fn claim(
        &mut self,
        index: usize,
        fence: Timestamp,
        tracker: &TimestampTracker,
        policy: ClaimPolicy,
    ) -> Result<Claim> {
        let slot = self.slots.get_mut(index).ok_or(Error::InvalidParameter)?;
        let mut claim = Claim {
            previous: slot.fence,
            ..Claim::default()
        };

        if let Some(previous) = slot.fence {
            let deadline = Instant::now().checked_add(policy.timeout);
            claim.stalled = !tracker.is_retired(previous);

            loop {
                let remaining = match deadline {
                    Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                    None => policy.timeout,
                };
                match tracker.wait(previous, policy.wait_slice.min(remaining))? {
                    WaitOutcome::Ready => break,
                    WaitOutcome::TimedOut if remaining <= policy.wait_slice => {
                        log::warn!(
                            "ring: slot {} still busy with {} after {:?}",
                            index,
                            previous,
                            policy.timeout
                        );
                        return Err(Error::SubmissionTimeout);
                    }
                    WaitOutcome::TimedOut => {
                        claim.retries += 1;
                        log::debug!(
                            "ring: slot {} waiting on {} (retired {})",
                            index,
                            previous,
                            tracker.retired()
                        );
                    }
                }
            }
        }

        slot.fence = Some(fence);
        Ok(claim)
    }

    /// Put back the fence a slot carried before a claim that went unused
    pub fn unclaim(&mut self, index: usize, claim: &Claim) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.fence = claim.previous;
        }
    }

    /// Packet writer over the host words of a slot
    pub fn writer(&mut self, index: usize, cursor: usize) -> Result<PacketWriter<'_>> {
        let slot = self.slots.get_mut(index).ok_or(Error::InvalidParameter)?;
        PacketWriter::at(&mut slot.host, cursor)
    }

    /// Copy the first `words` host words of a slot to the device and fence them
    pub fn flush<M: SharedMemory + ?Sized>(
        &self,
        index: usize,
        words: usize,
        mem: &M,
    ) -> Result<()> {
        let slot = self.slots.get(index).ok_or(Error::InvalidParameter)?;
        let words = slot.host.get(..words).ok_or(Error::BufferOverflow)?;
        mem.write(&slot.mem, 0, words)?;
        barrier::dma_write_barrier();
        Ok(())
    }
}
