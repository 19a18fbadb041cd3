//! # Completion Handling
//!
//! Interrupt handler feeding hardware completion and fault reports into a
//! submission engine.

use cinder_core::Backend;
use cinder_hal::registers::{vgc, word};
use cinder_hal::{InterruptHandler, InterruptSource};

use crate::engine::SubmissionEngine;

/// Routes decoded interrupt sources to an engine
pub struct CompletionHandler<B: Backend> {
    engine: SubmissionEngine<B>,
}

impl<B: Backend> CompletionHandler<B> {
    /// Handler driving `engine`
    pub fn new(engine: SubmissionEngine<B>) -> Self {
        Self { engine }
    }

    /// Retire whatever the mark counter reports
    fn on_completion(&self) {
        let raw = self.engine.window().read(word(vgc::IRQ_ACTIVE_CNT));
        let count = vgc::active_count(raw);
        if count == 0 {
            log::trace!("completion: spurious 2D interrupt");
            return;
        }
        self.engine.retire(count);
    }
}

impl<B: Backend> InterruptHandler for CompletionHandler<B> {
    fn handle(&self, source: InterruptSource) {
        match source {
            InterruptSource::G2d => self.on_completion(),
            InterruptSource::Fifo => {
                log::error!("completion: command FIFO error");
                self.engine.handle_fault();
            }
            // owned by the MMU driver
            InterruptSource::Mh => log::trace!("completion: memory hub interrupt ignored"),
            InterruptSource::Fbc => log::trace!("completion: FBC done"),
        }
    }
}

impl<B: Backend> core::fmt::Debug for CompletionHandler<B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompletionHandler")
            .field("engine", &self.engine)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use cinder_core::{AllocFlags, ByteSize, SharedMemory, Timestamp};
    use cinder_hal::SoftDevice;
    use std::sync::Arc;

    fn engine_with_work(submissions: u32) -> (Arc<SoftDevice>, SubmissionEngine<SoftDevice>) {
        let dev = Arc::new(SoftDevice::new());
        let config = EngineConfig {
            slot_words: 64,
            ..EngineConfig::default()
        };
        let engine = SubmissionEngine::new(dev.clone(), config).unwrap();
        let ctx = engine.create_context().unwrap();
        let ib = dev
            .alloc(ByteSize::from_words(32), AllocFlags::empty())
            .unwrap()
            .gpu_addr;
        for _ in 0..submissions {
            engine.submit(ctx, ib, 16).unwrap();
        }
        (dev, engine)
    }

    #[test]
    fn test_g2d_retires_active_count() {
        let (dev, engine) = engine_with_work(3);
        let handler = engine.completion_handler();

        dev.set_register(word(vgc::IRQ_ACTIVE_CNT), 0x0000_0200);
        handler.handle(InterruptSource::G2d);
        assert_eq!(engine.retired(), Timestamp::new(2));
    }

    #[test]
    fn test_spurious_g2d_is_ignored() {
        let (_dev, engine) = engine_with_work(1);
        engine.completion_handler().handle(InterruptSource::G2d);
        assert_eq!(engine.retired(), Timestamp::ZERO);
    }

    #[test]
    fn test_mh_and_fbc_do_not_touch_engine() {
        let (_dev, engine) = engine_with_work(1);
        let handler = engine.completion_handler();
        handler.handle(InterruptSource::Mh);
        handler.handle(InterruptSource::Fbc);

        assert!(!engine.is_faulted());
        assert_eq!(engine.retired(), Timestamp::ZERO);
    }

    #[test]
    fn test_fifo_faults_device() {
        let (dev, engine) = engine_with_work(1);
        engine.completion_handler().handle(InterruptSource::Fifo);

        assert!(engine.is_faulted());
        assert_eq!(engine.live_contexts(), 0);
        // the indirect buffer is the only allocation left
        assert_eq!(dev.live_allocations(), 1);
    }
}
