//! # Software Device
//!
//! In-memory model of the 2D block's register file, shared memory and
//! completion store. It implements every backend trait, so the submission
//! engine can be brought up and tested without hardware.
//!
//! Memory is handed out from a bump allocator starting at
//! [`SoftDevice::BASE_ADDR`]; freed ranges are not reused, which keeps stale
//! addresses detectable.

use alloc::vec;
use alloc::vec::Vec;

use hashbrown::HashMap;

use cinder_core::{
    AllocFlags, ByteSize, CompletionStore, Error, GpuAddr, MemHandle, MemoryDesc, RegisterIo,
    Result, SharedMemory, WindowTarget,
};

/// A register write that went through a command window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowWrite {
    /// Window the write targeted
    pub target: WindowTarget,
    /// Unit-local register
    pub reg: u32,
    /// Written value
    pub value: u32,
}

#[derive(Debug)]
struct Region {
    addr: GpuAddr,
    words: Vec<u32>,
}

impl Region {
    fn contains(&self, addr: GpuAddr, words: usize) -> Option<usize> {
        let start = addr.raw().checked_sub(self.addr.raw())?;
        if start % 4 != 0 {
            return None;
        }
        let index = (start / 4) as usize;
        (index + words <= self.words.len()).then_some(index)
    }
}

#[derive(Debug, Default)]
struct MemState {
    regions: HashMap<u64, Region>,
    next_handle: u64,
    next_addr: u64,
    allocs_left: Option<usize>,
    total_allocs: u64,
}

/// In-memory device backend
#[derive(Debug, Default)]
pub struct SoftDevice {
    registers: spin::Mutex<HashMap<u32, u32>>,
    windows: spin::Mutex<Vec<WindowWrite>>,
    memory: spin::Mutex<MemState>,
    store: spin::Mutex<HashMap<u32, u32>>,
}

impl SoftDevice {
    /// First device address handed out
    pub const BASE_ADDR: u64 = 0x1000_0000;

    /// Create an empty device
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Register file
    // -------------------------------------------------------------------------

    /// Preset a register, as the hardware would
    pub fn set_register(&self, offset: u32, value: u32) {
        self.registers.lock().insert(offset, value);
    }

    /// Current value of a register (zero if never written)
    pub fn register(&self, offset: u32) -> u32 {
        self.registers.lock().get(&offset).copied().unwrap_or(0)
    }

    /// Every command-window write, oldest first
    pub fn window_writes(&self) -> Vec<WindowWrite> {
        self.windows.lock().clone()
    }

    /// Last value written to a window register
    pub fn window_value(&self, target: WindowTarget, reg: u32) -> Option<u32> {
        self.windows
            .lock()
            .iter()
            .rev()
            .find(|w| w.target == target && w.reg == reg)
            .map(|w| w.value)
    }

    /// Forget recorded window writes
    pub fn clear_window_log(&self) {
        self.windows.lock().clear();
    }

    // -------------------------------------------------------------------------
    // Memory
    // -------------------------------------------------------------------------

    /// Let the next `count` allocations succeed, then fail every one after
    pub fn fail_allocations_after(&self, count: usize) {
        self.memory.lock().allocs_left = Some(count);
    }

    /// Make every allocation succeed again
    pub fn clear_allocation_failures(&self) {
        self.memory.lock().allocs_left = None;
    }

    /// Number of live allocations
    pub fn live_allocations(&self) -> usize {
        self.memory.lock().regions.len()
    }

    /// Number of allocations made over the device lifetime
    pub fn total_allocations(&self) -> u64 {
        self.memory.lock().total_allocs
    }

    /// Whether a device address falls inside a live allocation
    pub fn is_live(&self, addr: GpuAddr) -> bool {
        self.memory
            .lock()
            .regions
            .values()
            .any(|r| r.contains(addr, 1).is_some())
    }

    /// Read words back from device memory
    pub fn read_words(&self, addr: GpuAddr, count: usize) -> Option<Vec<u32>> {
        let mem = self.memory.lock();
        mem.regions.values().find_map(|r| {
            r.contains(addr, count)
                .map(|index| r.words[index..index + count].to_vec())
        })
    }
}

impl RegisterIo for SoftDevice {
    fn read(&self, offset: u32) -> u32 {
        self.register(offset)
    }

    fn write(&self, offset: u32, value: u32) {
        self.set_register(offset, value);
    }

    fn write_window(&self, target: WindowTarget, reg: u32, value: u32) {
        self.windows.lock().push(WindowWrite { target, reg, value });
    }
}

impl SharedMemory for SoftDevice {
    fn alloc(&self, size: ByteSize, flags: AllocFlags) -> Result<MemoryDesc> {
        let mut mem = self.memory.lock();

        if let Some(left) = mem.allocs_left.as_mut() {
            if *left == 0 {
                return Err(Error::AllocationFailure);
            }
            *left -= 1;
        }

        let align = if flags.contains(AllocFlags::PAGE_ALIGNED) {
            ByteSize::PAGE.as_bytes()
        } else {
            4
        };
        let base = mem.next_addr.max(Self::BASE_ADDR);
        let addr = ByteSize::from_bytes(base).align_up(align).as_bytes();
        let words = size.as_words() as usize;

        mem.next_handle += 1;
        mem.total_allocs += 1;
        mem.next_addr = addr + (words as u64) * 4;

        let handle = MemHandle::new(mem.next_handle);
        mem.regions.insert(
            handle.id(),
            Region {
                addr: GpuAddr::new(addr),
                words: vec![0xDEAD_BEEF; words],
            },
        );

        Ok(MemoryDesc {
            handle,
            gpu_addr: GpuAddr::new(addr),
            size,
        })
    }

    fn free(&self, desc: &MemoryDesc) {
        if self.memory.lock().regions.remove(&desc.handle.id()).is_none() {
            log::warn!("soft: double free of {:?}", desc.handle);
        }
    }

    fn write(&self, desc: &MemoryDesc, offset: u64, words: &[u32]) -> Result<()> {
        self.write_addr(desc.gpu_addr.offset(offset), words)
    }

    fn fill(&self, desc: &MemoryDesc, value: u32) -> Result<()> {
        let mut mem = self.memory.lock();
        let region = mem
            .regions
            .get_mut(&desc.handle.id())
            .ok_or(Error::InvalidGpuAddress)?;
        region.words.fill(value);
        Ok(())
    }

    fn write_addr(&self, addr: GpuAddr, words: &[u32]) -> Result<()> {
        let mut mem = self.memory.lock();
        let region = mem
            .regions
            .values_mut()
            .find(|r| r.contains(addr, words.len()).is_some())
            .ok_or(Error::InvalidGpuAddress)?;
        let index = region
            .contains(addr, words.len())
            .ok_or(Error::InvalidGpuAddress)?;
        region.words[index..index + words.len()].copy_from_slice(words);
        Ok(())
    }
}

impl CompletionStore for SoftDevice {
    fn store(&self, offset: u32, value: u32) {
        self.store.lock().insert(offset, value);
    }

    fn load(&self, offset: u32) -> u32 {
        self.store.lock().get(&offset).copied().unwrap_or(0)
    }
}
