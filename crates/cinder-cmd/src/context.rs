//! # Context Manager
//!
//! Logical contexts share one hardware ring. The ring and the edge scratch
//! buffers exist exactly while at least one context is live: the first
//! create provisions them, the last destroy releases them.

use arrayvec::ArrayVec;

use cinder_core::{AllocFlags, ContextId, Error, GpuAddr, MemoryDesc, Result, SharedMemory};
use cinder_hal::registers::{nextcmd, vgv3};
use cinder_hal::HardwareVariant;

use crate::config::{EngineConfig, CONTEXT_MAX};
use crate::encoder::PacketKind;
use crate::ring::{CommandRing, RingState};

/// Most edge buffers any variant uses
pub const MAX_EDGE_BUFFERS: usize = 3;

/// 2D-window register writes that hand the shared setup to the hardware
pub type RegisterProgram = ArrayVec<(u32, u32), { 3 + MAX_EDGE_BUFFERS }>;

// =============================================================================
// EDGE BUFFERS
// =============================================================================

/// One zeroed edge scratch buffer
#[derive(Debug, Clone, Copy)]
pub struct EdgeBuffer {
    /// Backing allocation
    pub mem: MemoryDesc,
    /// Base register the address is programmed into
    pub base_reg: u32,
}

/// Edge scratch buffers of one variant
#[derive(Debug, Default)]
pub struct EdgeBuffers {
    buffers: ArrayVec<EdgeBuffer, MAX_EDGE_BUFFERS>,
}

impl EdgeBuffers {
    /// Allocate and zero every edge buffer the variant needs
    pub fn provision<M: SharedMemory + ?Sized>(mem: &M, variant: HardwareVariant) -> Result<Self> {
        let mut edges = Self::default();
        if let Err(err) = edges.allocate(mem, variant) {
            log::warn!("edge: provisioning failed: {}", err);
            edges.release(mem);
            return Err(err);
        }
        Ok(edges)
    }

    fn allocate<M: SharedMemory + ?Sized>(
        &mut self,
        mem: &M,
        variant: HardwareVariant,
    ) -> Result<()> {
        for layout in variant.edge_buffers() {
            let desc = mem.alloc(layout.size, AllocFlags::RING)?;
            let buffer = EdgeBuffer {
                mem: desc,
                base_reg: layout.base_reg,
            };
            if let Err(full) = self.buffers.try_push(buffer) {
                mem.free(&full.element().mem);
                return Err(Error::AllocationFailure);
            }
            mem.fill(&desc, 0)?;
        }
        Ok(())
    }

    /// Free every buffer
    pub fn release<M: SharedMemory + ?Sized>(self, mem: &M) {
        for buffer in &self.buffers {
            mem.free(&buffer.mem);
        }
    }

    /// Provisioned buffers
    pub fn buffers(&self) -> &[EdgeBuffer] {
        &self.buffers
    }
}

// =============================================================================
// SHARED SETUP
// =============================================================================

/// Hardware resources shared by all live contexts
#[derive(Debug)]
pub struct SharedSetup {
    /// Command slot arena
    pub ring: CommandRing,
    /// Edge scratch buffers
    pub edges: EdgeBuffers,
}

impl SharedSetup {
    /// Provision ring and edge buffers, undoing everything on failure
    pub fn provision<M: SharedMemory + ?Sized>(mem: &M, config: &EngineConfig) -> Result<Self> {
        let ring = CommandRing::provision(mem, config.num_slots, config.slot_words)?;
        let edges = match EdgeBuffers::provision(mem, config.variant) {
            Ok(edges) => edges,
            Err(err) => {
                ring.release(mem);
                return Err(err);
            }
        };

        log::info!(
            "context: provisioned {} ring slots and {} edge buffers",
            ring.len(),
            edges.buffers().len()
        );
        Ok(Self { ring, edges })
    }

    /// Free ring and edge buffers
    pub fn release<M: SharedMemory + ?Sized>(self, mem: &M) {
        self.ring.release(mem);
        self.edges.release(mem);
        log::info!("context: released shared ring and edge buffers");
    }

    /// Register writes pointing the command processor at slot 0 and the edge
    /// bases at their buffers
    pub fn register_program(&self) -> Result<RegisterProgram> {
        let slot0: GpuAddr = self.ring.slot_addr(0)?;
        let mut program = RegisterProgram::new();
        program.push((vgv3::MODE, vgv3::MODE_RING));
        program.push((vgv3::NEXTADDR, slot0.lo32()));
        program.push((vgv3::NEXTCMD, nextcmd::encode(nextcmd::JUMP, 5)));
        for edge in self.edges.buffers() {
            program.push((edge.base_reg, edge.mem.gpu_addr.lo32()));
        }
        Ok(program)
    }
}

// =============================================================================
// CONTEXT MANAGER
// =============================================================================

/// Outcome of a successful create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Created {
    /// New context id
    pub id: ContextId,
    /// This create provisioned the shared setup
    pub provisioned: bool,
}

/// Live-context bookkeeping of one device
#[derive(Debug)]
pub struct ContextManager {
    live: ArrayVec<ContextId, CONTEXT_MAX>,
    max_contexts: usize,
    next_id: u32,
    shared: Option<SharedSetup>,
}

impl ContextManager {
    /// Create an empty manager allowing up to `max_contexts` live contexts
    pub fn new(max_contexts: usize) -> Self {
        Self {
            live: ArrayVec::new(),
            max_contexts: max_contexts.min(CONTEXT_MAX),
            next_id: 0,
            shared: None,
        }
    }

    /// Register a new context, provisioning the shared setup if it is the first
    ///
    /// At the limit nothing is touched and [`Error::CapacityExceeded`] is
    /// returned. A failed provisioning leaves no allocation behind.
    pub fn create<M: SharedMemory + ?Sized>(
        &mut self,
        mem: &M,
        config: &EngineConfig,
    ) -> Result<Created> {
        if self.live.len() >= self.max_contexts {
            log::warn!("context: limit of {} live contexts reached", self.max_contexts);
            return Err(Error::CapacityExceeded);
        }

        let provisioned = self.shared.is_none();
        if provisioned {
            self.shared = Some(SharedSetup::provision(mem, config)?);
            self.next_id = 0;
        }

        self.next_id = self.next_id.wrapping_add(1);
        let id = ContextId::new(self.next_id);
        self.live
            .try_push(id)
            .map_err(|_| Error::CapacityExceeded)?;

        log::debug!("context: created {:?} ({} live)", id, self.live.len());
        Ok(Created { id, provisioned })
    }

    /// Drop a context, releasing the shared setup with the last one
    ///
    /// Returns whether the shared setup was released. Destroying with no live
    /// context is reported as [`Error::ContextUnderflow`] and changes nothing.
    pub fn destroy<M: SharedMemory + ?Sized>(&mut self, mem: &M, id: ContextId) -> Result<bool> {
        if self.live.is_empty() {
            log::error!("context: destroy of {:?} with no live context", id);
            return Err(Error::ContextUnderflow);
        }

        let index = self
            .live
            .iter()
            .position(|&live| live == id)
            .ok_or(Error::InvalidContext)?;
        self.live.remove(index);
        log::debug!("context: destroyed {:?} ({} live)", id, self.live.len());

        if self.live.is_empty() {
            self.release_shared(mem);
            return Ok(true);
        }
        Ok(false)
    }

    /// Drop every context and the shared setup
    ///
    /// Returns how many contexts were still live.
    pub fn teardown<M: SharedMemory + ?Sized>(&mut self, mem: &M) -> usize {
        let dropped = self.live.len();
        self.live.clear();
        self.release_shared(mem);
        dropped
    }

    fn release_shared<M: SharedMemory + ?Sized>(&mut self, mem: &M) {
        if let Some(shared) = self.shared.take() {
            shared.release(mem);
        }
    }

    /// Restart context ids from 1
    pub fn reset_ids(&mut self) {
        self.next_id = 0;
    }

    /// Packet kind a submission from `id` needs given the ring history
    pub fn packet_kind(&self, state: &RingState, id: ContextId) -> Result<PacketKind> {
        if !self.is_live(id) {
            return Err(Error::InvalidContext);
        }
        if state.previous_context == Some(id) {
            Ok(PacketKind::Incremental)
        } else {
            log::debug!(
                "context: switch {:?} -> {:?}, sending state stream",
                state.previous_context,
                id
            );
            Ok(PacketKind::StateStream)
        }
    }

    /// Whether `id` is live
    pub fn is_live(&self, id: ContextId) -> bool {
        self.live.contains(&id)
    }

    /// Number of live contexts
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Shared setup, if provisioned
    pub fn shared(&self) -> Option<&SharedSetup> {
        self.shared.as_ref()
    }

    /// Shared setup, if provisioned
    pub fn shared_mut(&mut self) -> Option<&mut SharedSetup> {
        self.shared.as_mut()
    }
}
