//! # Submission Engine
//!
//! Top-level entry point: contexts, submissions, fence waits and idle.
//!
//! One engine drives one device. All ring and context mutation happens under
//! a single device lock. The completion path never takes that lock; it only
//! advances the fence tracker, which is what unblocks a submitter waiting for
//! a ring slot while holding it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cinder_core::{memstore, Backend, ContextId, Error, GpuAddr, Result, SharedMemory, Timestamp};
use cinder_hal::registers::{vgc, vgv3, word};
use cinder_hal::{HardwareVariant, InterruptSource, IrqDispatcher, IrqStatus, RegisterWindow};

use crate::completion::CompletionHandler;
use crate::config::EngineConfig;
use crate::context::ContextManager;
use crate::encoder::{chain_addr, chain_words, PacketKind, MARKER_WORDS};
use crate::fence::{TimestampTracker, WaitOutcome};
use crate::ring::{ClaimPolicy, CommandRing, RingState};

// =============================================================================
// PUBLIC TYPES
// =============================================================================

bitflags::bitflags! {
    /// Command-processor control bits written with the kick
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SubmitFlags: u32 {
        /// Re-trigger the mark counter
        const MARK_RESYNC = vgv3::CONTROL_MARK_RESYNC;
    }
}

/// Stage of a submission, reported in trace logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPhase {
    /// Not yet started
    Idle,
    /// Waiting for the next slot's previous fence
    AwaitingSlot,
    /// Writing packet words into the current slot
    Encoding,
    /// Slot handed to the device, fence assigned
    Published,
}

/// Static device properties
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Chip id
    pub chip_id: u32,
    /// Core revision
    pub revision: u32,
    /// Hardware variant
    pub variant: HardwareVariant,
    /// Revision 1 parts run in high-precision mode
    pub high_precision: bool,
}

/// Engine statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Published submissions
    pub submissions: u64,
    /// Submissions that carried a full state stream
    pub state_streams: u64,
    /// Claims that found their slot still busy
    pub claim_stalls: u64,
    /// Wait slices spent in slot claims
    pub claim_retries: u64,
    /// Submissions retired by the completion path
    pub completions: u64,
    /// Device faults
    pub faults: u64,
}

#[derive(Debug, Default)]
struct EngineCounters {
    submissions: AtomicU64,
    state_streams: AtomicU64,
    claim_stalls: AtomicU64,
    claim_retries: AtomicU64,
    completions: AtomicU64,
    faults: AtomicU64,
}

impl EngineCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            submissions: self.submissions.load(Ordering::Relaxed),
            state_streams: self.state_streams.load(Ordering::Relaxed),
            claim_stalls: self.claim_stalls.load(Ordering::Relaxed),
            claim_retries: self.claim_retries.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Debug)]
struct DeviceState {
    ring: RingState,
    contexts: ContextManager,
    faulted: bool,
}

struct EngineInner<B: Backend> {
    backend: Arc<B>,
    config: EngineConfig,
    tracker: TimestampTracker,
    device: Mutex<DeviceState>,
    counters: EngineCounters,
}

/// Command-stream submission engine of one device
///
/// Cheap to clone; clones drive the same device.
pub struct SubmissionEngine<B: Backend> {
    inner: Arc<EngineInner<B>>,
}

impl<B: Backend> Clone for SubmissionEngine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> SubmissionEngine<B> {
    /// Bring up an engine on a backend
    ///
    /// Validates the configuration and unmasks the completion and FIFO-error
    /// interrupts. No memory is allocated until the first context is created.
    pub fn new(backend: Arc<B>, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let engine = Self {
            inner: Arc::new(EngineInner {
                backend,
                config,
                tracker: TimestampTracker::new(config.timestamp_epsilon),
                device: Mutex::new(DeviceState {
                    ring: RingState::default(),
                    contexts: ContextManager::new(config.max_contexts),
                    faulted: false,
                }),
                counters: EngineCounters::default(),
            }),
        };

        engine
            .window()
            .write(word(vgc::IRQENABLE), IrqStatus::DEFAULT_ENABLE.bits());

        log::info!(
            "engine: {:?}, {} slots of {} words, up to {} contexts",
            config.variant,
            config.num_slots,
            config.slot_words,
            config.max_contexts
        );
        Ok(engine)
    }

    fn lock_device(&self) -> MutexGuard<'_, DeviceState> {
        self.inner
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register window of the device
    pub fn window(&self) -> RegisterWindow<'_, B> {
        RegisterWindow::new(&*self.inner.backend, self.inner.config.variant)
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn write_2d(&self, reg: u32, value: u32) {
        self.window().write_2d(reg, value);

        if self.inner.config.safe_mode {
            match self.idle(self.inner.config.idle_timeout) {
                Ok(WaitOutcome::Ready) => {}
                Ok(WaitOutcome::TimedOut) => {
                    log::warn!("engine: safe mode idle after reg 0x{:04x} timed out", reg)
                }
                Err(err) => log::warn!("engine: safe mode idle failed: {}", err),
            }
        }
    }

    fn kick(&self, flags: SubmitFlags) {
        self.write_2d(vgv3::CONTROL, flags.bits());
        self.write_2d(vgv3::CONTROL, 0);
    }

    // -------------------------------------------------------------------------
    // Contexts
    // -------------------------------------------------------------------------

    /// Create a logical context
    ///
    /// The first live context provisions the ring and edge buffers and hands
    /// them to the hardware. After a device fault this is also what brings
    /// the device back.
    pub fn create_context(&self) -> Result<ContextId> {
        let mut guard = self.lock_device();
        let dev = &mut *guard;

        let created = dev.contexts.create(&*self.inner.backend, &self.inner.config)?;
        if created.provisioned {
            if dev.faulted {
                log::info!("engine: reprovisioned after fault");
                self.inner.tracker.recover();
                dev.faulted = false;
            }
            dev.ring.reset();

            let program = dev
                .contexts
                .shared()
                .ok_or(Error::NotProvisioned)?
                .register_program()?;
            for (reg, value) in program {
                self.write_2d(reg, value);
            }
        }

        Ok(created.id)
    }

    /// Destroy a logical context
    ///
    /// Destroying the last live context releases every ring slot and edge
    /// buffer and resets the ring cursor.
    pub fn destroy_context(&self, id: ContextId) -> Result<()> {
        let mut guard = self.lock_device();
        let dev = &mut *guard;

        if dev.contexts.destroy(&*self.inner.backend, id)? {
            dev.ring.reset();
            self.abandon_outstanding();
        }
        Ok(())
    }

    /// Number of live contexts
    pub fn live_contexts(&self) -> usize {
        self.lock_device().contexts.live_count()
    }

    // -------------------------------------------------------------------------
    // Submission
    // -------------------------------------------------------------------------

    /// Submit an indirect buffer of `size_words` words at `ib` for `context`
    pub fn submit(&self, context: ContextId, ib: GpuAddr, size_words: u32) -> Result<Timestamp> {
        self.submit_with_flags(context, ib, size_words, SubmitFlags::empty())
    }

    /// Submit with explicit kick control bits
    ///
    /// Blocks while the next ring slot is still in use, up to the configured
    /// claim timeout. Returns the fence assigned to the submission.
    pub fn submit_with_flags(
        &self,
        context: ContextId,
        ib: GpuAddr,
        size_words: u32,
        flags: SubmitFlags,
    ) -> Result<Timestamp> {
        if ib.is_null() || size_words == 0 {
            return Err(Error::InvalidParameter);
        }

        let inner = &*self.inner;
        let variant = inner.config.variant;
        let mut guard = self.lock_device();
        let dev = &mut *guard;

        if dev.faulted || inner.tracker.is_faulted() {
            return Err(Error::HardwareFault);
        }

        let kind = dev.contexts.packet_kind(&dev.ring, context)?;
        let ring = &mut dev
            .contexts
            .shared_mut()
            .ok_or(Error::NotProvisioned)?
            .ring;

        let current = dev.ring.current;
        let next = ring.next_slot(current);
        let fence = inner.tracker.next_submitted();
        trace_phase(fence, SubmitPhase::Idle);

        trace_phase(fence, SubmitPhase::AwaitingSlot);
        let claim = ring.claim(next, fence, &inner.tracker, self.claim_policy())?;
        if claim.stalled {
            EngineCounters::bump(&inner.counters.claim_stalls, 1);
        }
        EngineCounters::bump(&inner.counters.claim_retries, u64::from(claim.retries));

        trace_phase(fence, SubmitPhase::Encoding);
        dev.ring.offset = MARKER_WORDS;
        let encoded = encode_submission(
            ring,
            &*inner.backend,
            variant,
            current,
            next,
            ib,
            size_words,
            kind,
        );
        match encoded {
            Ok(end) => dev.ring.offset = end,
            Err(err) => {
                log::warn!("engine: encoding {} failed: {}", fence, err);
                ring.unclaim(next, &claim);
                dev.ring.offset = 0;
                return Err(err);
            }
        }

        let was_idle = inner.tracker.is_idle();
        let submitted = match inner.tracker.advance_submitted() {
            Ok(submitted) => submitted,
            Err(err) => {
                log::warn!("engine: fault while encoding {}, not kicked", fence);
                ring.unclaim(next, &claim);
                dev.ring.offset = 0;
                return Err(err);
            }
        };
        dev.ring.current = next;
        dev.ring.offset = 0;
        dev.ring.previous_context = Some(context);

        inner
            .backend
            .store(memstore::SOP_TIMESTAMP, submitted.raw());
        if !inner.config.v3_sync || was_idle {
            self.kick(flags);
        }
        trace_phase(submitted, SubmitPhase::Published);

        EngineCounters::bump(&inner.counters.submissions, 1);
        if kind == PacketKind::StateStream {
            EngineCounters::bump(&inner.counters.state_streams, 1);
        }

        Ok(submitted)
    }

    fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy {
            wait_slice: self.inner.config.claim_wait_slice,
            timeout: self.inner.config.claim_timeout,
        }
    }

    // -------------------------------------------------------------------------
    // Waiting
    // -------------------------------------------------------------------------

    /// Block until `fence` retires or `timeout` elapses
    pub fn wait_for_fence(&self, fence: Timestamp, timeout: Duration) -> Result<WaitOutcome> {
        self.inner.tracker.wait(fence, timeout)
    }

    /// Block until everything submitted so far has retired
    ///
    /// Rechecks every `idle_poll_interval`, following submissions made while
    /// waiting.
    pub fn idle(&self, timeout: Duration) -> Result<WaitOutcome> {
        let tracker = &self.inner.tracker;
        let poll = self.inner.config.idle_poll_interval;
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            match tracker.wait(tracker.submitted(), poll.min(remaining))? {
                WaitOutcome::Ready => return Ok(WaitOutcome::Ready),
                WaitOutcome::TimedOut if remaining <= poll => {
                    log::debug!(
                        "engine: idle timed out at {} of {}",
                        tracker.retired(),
                        tracker.submitted()
                    );
                    return Ok(WaitOutcome::TimedOut);
                }
                WaitOutcome::TimedOut => {}
            }
        }
    }

    /// Last submitted fence
    pub fn last_submitted(&self) -> Timestamp {
        self.inner.tracker.submitted()
    }

    /// Last retired fence
    pub fn retired(&self) -> Timestamp {
        self.inner.tracker.retired()
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    /// Retire `count` submissions reported complete by the hardware
    ///
    /// Publishes the end-of-pipe stamp and wakes waiters. In V3 sync mode the
    /// mark counter is re-triggered while work is still outstanding.
    pub fn retire(&self, count: u32) -> Timestamp {
        let inner = &*self.inner;
        if count == 0 {
            return inner.tracker.retired();
        }

        let before = inner.tracker.retired();
        let retired = inner.tracker.retire_count(count);
        inner.backend.store(memstore::EOP_TIMESTAMP, retired.raw());
        EngineCounters::bump(
            &inner.counters.completions,
            u64::from(retired.raw().wrapping_sub(before.raw())),
        );
        log::trace!("engine: retired {} (+{})", retired, count);

        if inner.config.v3_sync && !inner.tracker.is_idle() {
            let window = self.window();
            window.write_2d(vgv3::CONTROL, vgv3::CONTROL_MARK_RESYNC);
            window.write_2d(vgv3::CONTROL, 0);
        }

        retired
    }

    /// Tear the device down after a pipeline fault
    ///
    /// Fails every pending wait, drops all contexts and frees the ring and
    /// edge buffers. Submissions fail with [`Error::HardwareFault`] until a
    /// new context is created.
    pub fn handle_fault(&self) {
        let inner = &*self.inner;
        inner.tracker.mark_faulted();

        let mut guard = self.lock_device();
        let dev = &mut *guard;
        if dev.faulted {
            return;
        }

        let dropped = dev.contexts.teardown(&*inner.backend);
        dev.ring.reset();
        dev.faulted = true;
        EngineCounters::bump(&inner.counters.faults, 1);

        log::error!(
            "engine: hardware fault at {} of {}, dropped {} contexts",
            inner.tracker.retired(),
            inner.tracker.submitted(),
            dropped
        );
    }

    /// Whether the device is waiting to be reprovisioned after a fault
    pub fn is_faulted(&self) -> bool {
        self.lock_device().faulted || self.inner.tracker.is_faulted()
    }

    /// Retire fences left behind by a released ring
    fn abandon_outstanding(&self) {
        let abandoned = self.inner.tracker.abandon_outstanding();
        if abandoned > 0 {
            log::warn!("engine: ring released with {} fences outstanding", abandoned);
        }
    }

    /// Handler to attach to the device's interrupt sources
    pub fn completion_handler(&self) -> CompletionHandler<B> {
        CompletionHandler::new(self.clone())
    }

    /// Attach the completion handler to every source and unmask completion
    /// and FIFO-error delivery
    pub fn attach_interrupts(&self, irq: &IrqDispatcher)
    where
        B: 'static,
    {
        let handler = Arc::new(self.completion_handler());
        for source in InterruptSource::DECODE_ORDER {
            irq.attach(source, handler.clone());
        }
        irq.enable(InterruptSource::G2d);
        irq.enable(InterruptSource::Fifo);
    }

    /// Service the device's interrupt line
    pub fn service_interrupt(&self, irq: &IrqDispatcher) -> IrqStatus {
        irq.isr(&self.window())
    }

    // -------------------------------------------------------------------------
    // Device
    // -------------------------------------------------------------------------

    /// Static device properties
    pub fn device_info(&self) -> DeviceInfo {
        let config = &self.inner.config;
        DeviceInfo {
            chip_id: config.chip_id,
            revision: config.revision,
            variant: config.variant,
            high_precision: config.revision == 1,
        }
    }

    /// Statistics snapshot
    pub fn stats(&self) -> EngineStats {
        self.inner.counters.snapshot()
    }

    /// Shut the device down
    ///
    /// Idles with the configured bound, then drops any remaining contexts
    /// with their shared setup and restarts context ids.
    pub fn close(&self) {
        match self.idle(self.inner.config.idle_timeout) {
            Ok(outcome) if outcome.is_ready() => {}
            Ok(_) => log::warn!("engine: closing with work outstanding"),
            Err(err) => log::warn!("engine: closing faulted device: {}", err),
        }

        let mut guard = self.lock_device();
        let dev = &mut *guard;
        let live = dev.contexts.teardown(&*self.inner.backend);
        if live > 0 {
            log::warn!("engine: closing with {} live contexts", live);
        }
        dev.contexts.reset_ids();
        dev.ring.reset();
        if !dev.faulted {
            self.abandon_outstanding();
        }
        log::info!("engine: closed at fence {}", self.inner.tracker.submitted());
    }
}

impl<B: Backend> core::fmt::Debug for SubmissionEngine<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubmissionEngine")
            .field("config", &self.inner.config)
            .field("tracker", &self.inner.tracker)
            .finish_non_exhaustive()
    }
}

fn trace_phase(fence: Timestamp, phase: SubmitPhase) {
    log::trace!("submit {}: {:?}", fence, phase);
}

/// Write the begin packet into `current`, chain the indirect buffer to
/// `next` and flush the slot. Returns the slot's new write offset.
fn encode_submission<M: SharedMemory + ?Sized>(
    ring: &mut CommandRing,
    mem: &M,
    variant: HardwareVariant,
    current: usize,
    next: usize,
    ib: GpuAddr,
    size_words: u32,
    kind: PacketKind,
) -> Result<usize> {
    let next_addr = ring.slot_addr(next)?;

    let mut writer = ring.writer(current, MARKER_WORDS)?;
    writer.write_begin(ib, kind, variant)?;
    let end = writer.cursor();

    mem.write_addr(chain_addr(ib, size_words), &chain_words(next_addr))?;
    ring.flush(current, end, mem)?;
    Ok(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::begin_packet;
    use cinder_core::{AllocFlags, ByteSize, CompletionStore, WindowTarget};
    use cinder_hal::registers::vgv1;
    use cinder_hal::SoftDevice;
    use std::thread;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            slot_words: 64,
            claim_wait_slice: Duration::from_millis(10),
            claim_timeout: Duration::from_secs(5),
            idle_poll_interval: Duration::from_millis(5),
            idle_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        }
    }

    fn setup(config: EngineConfig) -> (Arc<SoftDevice>, SubmissionEngine<SoftDevice>) {
        let dev = Arc::new(SoftDevice::new());
        let engine = SubmissionEngine::new(dev.clone(), config).unwrap();
        (dev, engine)
    }

    /// Indirect buffer with room for the chained jump after it
    fn ib(dev: &SoftDevice, size_words: u32) -> GpuAddr {
        dev.alloc(ByteSize::from_words(u64::from(size_words) + 4), AllocFlags::empty())
            .unwrap()
            .gpu_addr
    }

    fn chained_slot(dev: &SoftDevice, ib: GpuAddr, size_words: u32) -> GpuAddr {
        let words = dev.read_words(chain_addr(ib, size_words), 2).unwrap();
        assert_eq!(words[1], 0x9005);
        GpuAddr::new(u64::from(words[0]))
    }

    fn begin_words(dev: &SoftDevice, slot: GpuAddr) -> Vec<u32> {
        dev.read_words(slot, 20).unwrap()[MARKER_WORDS..].to_vec()
    }

    fn control_writes(dev: &SoftDevice) -> Vec<u32> {
        dev.window_writes()
            .into_iter()
            .filter(|w| w.target == WindowTarget::TwoD && w.reg == vgv3::CONTROL)
            .map(|w| w.value)
            .collect()
    }

    #[test]
    fn test_new_unmasks_completion_interrupts() {
        let (dev, _engine) = setup(fast_config());
        assert_eq!(dev.register(word(vgc::IRQENABLE)), 0x3);
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let dev = Arc::new(SoftDevice::new());
        let config = EngineConfig {
            num_slots: 0,
            ..fast_config()
        };
        assert_eq!(
            SubmissionEngine::new(dev, config).unwrap_err(),
            Error::InvalidConfig
        );
    }

    #[test]
    fn test_first_context_registers_ring() {
        let (dev, engine) = setup(fast_config());
        engine.create_context().unwrap();

        assert_eq!(dev.window_value(WindowTarget::TwoD, vgv3::MODE), Some(4));
        assert_eq!(dev.window_value(WindowTarget::TwoD, vgv3::NEXTCMD), Some(0x1005));
        let slot0 = dev.window_value(WindowTarget::TwoD, vgv3::NEXTADDR).unwrap();
        assert!(dev.is_live(GpuAddr::new(u64::from(slot0))));
        let edge0 = dev.window_value(WindowTarget::TwoD, vgv1::CBASE1).unwrap();
        assert!(dev.is_live(GpuAddr::new(u64::from(edge0))));
        assert!(dev.window_value(WindowTarget::TwoD, vgv1::UBASE2).is_some());
    }

    #[test]
    fn test_context_switch_scenario() {
        let (dev, engine) = setup(fast_config());
        let ctx1 = engine.create_context().unwrap();
        let ctx2 = engine.create_context().unwrap();
        let (a, b, c) = (ib(&dev, 64), ib(&dev, 32), ib(&dev, 64));
        let slot0 = GpuAddr::new(u64::from(
            dev.window_value(WindowTarget::TwoD, vgv3::NEXTADDR).unwrap(),
        ));

        assert_eq!(engine.submit(ctx1, a, 64), Ok(Timestamp::new(1)));
        assert_eq!(begin_words(&dev, slot0), begin_packet(a, 224));

        assert_eq!(engine.submit(ctx1, b, 32), Ok(Timestamp::new(2)));
        let slot1 = chained_slot(&dev, a, 64);
        assert_eq!(begin_words(&dev, slot1), begin_packet(b.offset(224 * 4), 5));

        assert_eq!(engine.submit(ctx2, c, 64), Ok(Timestamp::new(3)));
        let slot2 = chained_slot(&dev, b, 32);
        assert_eq!(begin_words(&dev, slot2), begin_packet(c, 224));

        assert_eq!(dev.load(memstore::SOP_TIMESTAMP), 3);
        let stats = engine.stats();
        assert_eq!(stats.submissions, 3);
        assert_eq!(stats.state_streams, 2);

        engine.destroy_context(ctx1).unwrap();
        assert!(dev.is_live(slot0));
        engine.destroy_context(ctx2).unwrap();
        assert!(!dev.is_live(slot0));
        assert!(!dev.is_live(slot2));
        // only the three indirect buffers remain
        assert_eq!(dev.live_allocations(), 3);
    }

    #[test]
    fn test_fences_strictly_increase_across_ring_wrap() {
        let (dev, engine) = setup(fast_config());
        let ctx = engine.create_context().unwrap();
        let buf = ib(&dev, 16);

        let mut last = Timestamp::ZERO;
        for _ in 0..12 {
            let fence = engine.submit(ctx, buf, 16).unwrap();
            assert_eq!(fence.delta(last), 1);
            engine.retire(1);
            last = fence;
        }
        assert_eq!(engine.stats().claim_stalls, 0);
    }

    #[test]
    fn test_submission_past_ring_depth_waits_for_retire() {
        let (dev, engine) = setup(fast_config());
        let ctx = engine.create_context().unwrap();
        let buf = ib(&dev, 16);

        for expected in 1..=5 {
            assert_eq!(engine.submit(ctx, buf, 16), Ok(Timestamp::new(expected)));
        }

        let retirer = {
            let engine = engine.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                engine.retire(1)
            })
        };

        let start = Instant::now();
        assert_eq!(engine.submit(ctx, buf, 16), Ok(Timestamp::new(6)));
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(retirer.join().unwrap(), Timestamp::new(1));
        assert_eq!(engine.stats().claim_stalls, 1);
    }

    #[test]
    fn test_concurrent_submitters_get_unique_fences() {
        const THREADS: u32 = 4;
        const PER_THREAD: u32 = 25;
        const TOTAL: u32 = THREADS * PER_THREAD;

        let (dev, engine) = setup(fast_config());
        let buf = ib(&dev, 16);

        let retirer = {
            let engine = engine.clone();
            thread::spawn(move || {
                while engine.retired() != Timestamp::new(TOTAL) {
                    if engine.last_submitted() == engine.retired() {
                        thread::sleep(Duration::from_millis(1));
                    } else {
                        engine.retire(1);
                    }
                }
            })
        };

        let submitters: Vec<_> = (0..THREADS)
            .map(|_| {
                let engine = engine.clone();
                thread::spawn(move || {
                    let ctx = engine.create_context().unwrap();
                    (0..PER_THREAD)
                        .map(|_| engine.submit(ctx, buf, 16).unwrap().raw())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut fences: Vec<u32> = submitters
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        retirer.join().unwrap();

        fences.sort_unstable();
        assert_eq!(fences, (1..=TOTAL).collect::<Vec<_>>());
        assert_eq!(engine.last_submitted(), Timestamp::new(TOTAL));
        assert_eq!(engine.stats().submissions, u64::from(TOTAL));
    }

    #[test]
    fn test_submission_past_ring_depth_times_out() {
        let config = EngineConfig {
            claim_timeout: Duration::from_millis(60),
            ..fast_config()
        };
        let (dev, engine) = setup(config);
        let ctx = engine.create_context().unwrap();
        let buf = ib(&dev, 16);
        for _ in 0..5 {
            engine.submit(ctx, buf, 16).unwrap();
        }

        assert_eq!(engine.submit(ctx, buf, 16), Err(Error::SubmissionTimeout));
        assert_eq!(engine.last_submitted(), Timestamp::new(5));

        engine.retire(5);
        assert_eq!(engine.submit(ctx, buf, 16), Ok(Timestamp::new(6)));
    }

    #[test]
    fn test_create_context_at_limit() {
        let config = EngineConfig {
            max_contexts: 2,
            ..fast_config()
        };
        let (dev, engine) = setup(config);
        engine.create_context().unwrap();
        engine.create_context().unwrap();
        let allocations = dev.live_allocations();

        assert_eq!(engine.create_context(), Err(Error::CapacityExceeded));
        assert_eq!(engine.live_contexts(), 2);
        assert_eq!(dev.live_allocations(), allocations);
    }

    #[test]
    fn test_allocation_failure_leaves_nothing_behind() {
        let (dev, engine) = setup(fast_config());
        dev.fail_allocations_after(2);

        assert_eq!(engine.create_context(), Err(Error::AllocationFailure));
        assert_eq!(dev.total_allocations(), 2);
        assert_eq!(dev.live_allocations(), 0);
        assert_eq!(engine.live_contexts(), 0);
    }

    #[test]
    fn test_reprovision_after_last_destroy() {
        let (dev, engine) = setup(fast_config());
        let ctx = engine.create_context().unwrap();
        let buf = ib(&dev, 16);
        engine.submit(ctx, buf, 16).unwrap();
        engine.submit(ctx, buf, 16).unwrap();
        engine.destroy_context(ctx).unwrap();
        // the released ring takes its outstanding fences with it
        assert_eq!(engine.retired(), Timestamp::new(2));
        assert_eq!(engine.idle(Duration::ZERO), Ok(WaitOutcome::Ready));

        let ctx = engine.create_context().unwrap();
        assert_eq!(ctx, ContextId::new(1));
        // cursor back at slot 0, and the new context sends its state again
        engine.submit(ctx, buf, 16).unwrap();
        let slot0 = GpuAddr::new(u64::from(
            dev.window_value(WindowTarget::TwoD, vgv3::NEXTADDR).unwrap(),
        ));
        assert_eq!(begin_words(&dev, slot0), begin_packet(buf, 224));
    }

    #[test]
    fn test_submit_rejects_bad_requests() {
        let (dev, engine) = setup(fast_config());
        let buf = ib(&dev, 16);
        assert_eq!(
            engine.submit(ContextId::new(1), buf, 16),
            Err(Error::InvalidContext)
        );

        let ctx = engine.create_context().unwrap();
        assert_eq!(engine.submit(ctx, GpuAddr::null(), 16), Err(Error::InvalidParameter));
        assert_eq!(engine.submit(ctx, buf, 0), Err(Error::InvalidParameter));
        assert_eq!(
            engine.submit(ctx, GpuAddr::new(0x10), 16),
            Err(Error::InvalidGpuAddress)
        );
        // a failed encode does not consume a fence
        assert_eq!(engine.submit(ctx, buf, 16), Ok(Timestamp::new(1)));
    }

    #[test]
    fn test_idle_ready_and_timed_out() {
        let (dev, engine) = setup(fast_config());
        assert_eq!(engine.idle(Duration::ZERO), Ok(WaitOutcome::Ready));

        let ctx = engine.create_context().unwrap();
        engine.submit(ctx, ib(&dev, 16), 16).unwrap();
        assert_eq!(
            engine.idle(Duration::from_millis(20)),
            Ok(WaitOutcome::TimedOut)
        );

        engine.retire(1);
        assert_eq!(engine.idle(Duration::from_millis(20)), Ok(WaitOutcome::Ready));
    }

    #[test]
    fn test_interrupt_retires_and_wakes_waiter() {
        let (dev, engine) = setup(fast_config());
        let irq = IrqDispatcher::new();
        engine.attach_interrupts(&irq);

        let ctx = engine.create_context().unwrap();
        let buf = ib(&dev, 16);
        engine.submit(ctx, buf, 16).unwrap();
        let fence = engine.submit(ctx, buf, 16).unwrap();

        let waiter = {
            let engine = engine.clone();
            thread::spawn(move || engine.wait_for_fence(fence, Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        dev.set_register(word(vgc::IRQSTATUS), IrqStatus::G2D.bits());
        dev.set_register(word(vgc::IRQ_ACTIVE_CNT), 2 << 8);
        engine.service_interrupt(&irq);

        assert_eq!(waiter.join().unwrap(), Ok(WaitOutcome::Ready));
        assert_eq!(engine.retired(), Timestamp::new(2));
        assert_eq!(dev.load(memstore::EOP_TIMESTAMP), 2);
        assert_eq!(engine.stats().completions, 2);
    }

    #[test]
    fn test_fifo_error_tears_down_until_recreate() {
        let (dev, engine) = setup(fast_config());
        let irq = IrqDispatcher::new();
        engine.attach_interrupts(&irq);

        let ctx = engine.create_context().unwrap();
        let buf = ib(&dev, 16);
        let fence = engine.submit(ctx, buf, 16).unwrap();

        let waiter = {
            let engine = engine.clone();
            thread::spawn(move || engine.wait_for_fence(fence, Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        dev.set_register(word(vgc::IRQSTATUS), IrqStatus::FIFO.bits());
        engine.service_interrupt(&irq);

        assert_eq!(waiter.join().unwrap(), Err(Error::HardwareFault));
        assert!(engine.is_faulted());
        assert_eq!(engine.submit(ctx, buf, 16), Err(Error::HardwareFault));
        assert_eq!(engine.live_contexts(), 0);
        assert_eq!(dev.live_allocations(), 1);
        assert_eq!(engine.stats().faults, 1);

        let ctx = engine.create_context().unwrap();
        assert!(!engine.is_faulted());
        assert_eq!(engine.retired(), Timestamp::new(1));
        assert_eq!(engine.submit(ctx, buf, 16), Ok(Timestamp::new(2)));
    }

    #[test]
    fn test_submit_refused_once_fault_is_flagged() {
        let (dev, engine) = setup(fast_config());
        let ctx = engine.create_context().unwrap();
        let buf = ib(&dev, 16);
        engine.submit(ctx, buf, 16).unwrap();
        dev.clear_window_log();

        // completion path has flagged the fault, teardown not yet run
        engine.inner.tracker.mark_faulted();
        assert!(engine.is_faulted());
        assert_eq!(engine.submit(ctx, buf, 16), Err(Error::HardwareFault));
        assert_eq!(engine.last_submitted(), Timestamp::new(1));
        assert!(control_writes(&dev).is_empty());

        engine.handle_fault();
        let ctx = engine.create_context().unwrap();
        assert_eq!(engine.submit(ctx, buf, 16), Ok(Timestamp::new(2)));
    }

    #[test]
    fn test_v3_sync_kicks_after_release_with_work_outstanding() {
        let config = EngineConfig {
            v3_sync: true,
            ..fast_config()
        };
        let (dev, engine) = setup(config);
        let buf = ib(&dev, 16);
        let ctx = engine.create_context().unwrap();
        engine.submit(ctx, buf, 16).unwrap();
        engine.submit(ctx, buf, 16).unwrap();
        engine.destroy_context(ctx).unwrap();

        let ctx = engine.create_context().unwrap();
        dev.clear_window_log();
        assert_eq!(engine.submit(ctx, buf, 16), Ok(Timestamp::new(3)));
        assert_eq!(control_writes(&dev), [0, 0]);

        engine.close();
        assert_eq!(engine.retired(), Timestamp::new(3));
    }

    #[test]
    fn test_v3_sync_kicks_only_from_idle() {
        let config = EngineConfig {
            v3_sync: true,
            ..fast_config()
        };
        let (dev, engine) = setup(config);
        let ctx = engine.create_context().unwrap();
        let buf = ib(&dev, 16);
        dev.clear_window_log();

        engine.submit(ctx, buf, 16).unwrap();
        assert_eq!(control_writes(&dev), [0, 0]);

        engine.submit(ctx, buf, 16).unwrap();
        assert_eq!(control_writes(&dev).len(), 2);

        engine.retire(1);
        assert_eq!(control_writes(&dev), [0, 0, 2, 0]);

        engine.retire(1);
        assert_eq!(control_writes(&dev).len(), 4);
    }

    #[test]
    fn test_kick_carries_flags() {
        let (dev, engine) = setup(fast_config());
        let ctx = engine.create_context().unwrap();
        dev.clear_window_log();

        engine
            .submit_with_flags(ctx, ib(&dev, 16), 16, SubmitFlags::MARK_RESYNC)
            .unwrap();
        assert_eq!(control_writes(&dev), [2, 0]);
    }

    #[test]
    fn test_safe_mode_submission_completes() {
        let config = EngineConfig {
            safe_mode: true,
            ..fast_config()
        };
        let (dev, engine) = setup(config);
        let ctx = engine.create_context().unwrap();
        assert_eq!(engine.submit(ctx, ib(&dev, 16), 16), Ok(Timestamp::new(1)));
    }

    #[test]
    fn test_device_info_precision() {
        let config = EngineConfig {
            chip_id: 0x0180,
            revision: 1,
            ..EngineConfig::for_variant(HardwareVariant::Z180)
        };
        let (_dev, engine) = setup(config);
        let info = engine.device_info();

        assert_eq!(info.chip_id, 0x0180);
        assert_eq!(info.variant, HardwareVariant::Z180);
        assert!(info.high_precision);
    }

    #[test]
    fn test_close_releases_everything() {
        let (dev, engine) = setup(fast_config());
        engine.create_context().unwrap();
        engine.create_context().unwrap();

        engine.close();
        assert_eq!(engine.live_contexts(), 0);
        assert_eq!(dev.live_allocations(), 0);
        assert_eq!(engine.create_context(), Ok(ContextId::new(1)));
    }
}
