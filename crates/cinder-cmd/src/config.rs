//! # Engine Configuration

use core::time::Duration;

use cinder_core::{Error, Result};
use cinder_hal::HardwareVariant;

use crate::encoder::PROLOGUE_WORDS;

/// Upper bound on ring slots
pub const MAX_SLOTS: usize = 16;
/// Upper bound on live contexts per device
pub const CONTEXT_MAX: usize = 20;

/// Default ring depth
pub const DEFAULT_SLOTS: usize = 5;
/// Default words per ring slot
pub const DEFAULT_SLOT_WORDS: usize = 1024 + 13;

/// Default wrap tolerance of the timestamp comparison
///
/// A retired stamp more than this far *behind* a target is assumed to have
/// wrapped past it.
pub const TIMESTAMP_EPSILON: u32 = 20000;

/// Submission engine configuration
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Hardware revision
    pub variant: HardwareVariant,
    /// Number of ring slots
    pub num_slots: usize,
    /// Words per ring slot
    pub slot_words: usize,
    /// Maximum live contexts
    pub max_contexts: usize,
    /// Wait per iteration of the slot-claim loop
    pub claim_wait_slice: Duration,
    /// Total bound of the slot-claim loop
    pub claim_timeout: Duration,
    /// Recheck interval of the idle loop
    pub idle_poll_interval: Duration,
    /// Idle bound used by close and safe-mode register writes
    pub idle_timeout: Duration,
    /// Wrap tolerance of the timestamp comparison
    pub timestamp_epsilon: u32,
    /// Only kick the mark counter from idle and re-kick on completion
    pub v3_sync: bool,
    /// Idle the device after every register write
    pub safe_mode: bool,
    /// Chip id reported by `device_info`
    pub chip_id: u32,
    /// Core revision; revision 1 parts run in high-precision mode
    pub revision: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            variant: HardwareVariant::Z160,
            num_slots: DEFAULT_SLOTS,
            slot_words: DEFAULT_SLOT_WORDS,
            max_contexts: CONTEXT_MAX,
            claim_wait_slice: Duration::from_millis(1000),
            claim_timeout: Duration::from_secs(10),
            idle_poll_interval: Duration::from_millis(10),
            idle_timeout: Duration::from_millis(1000),
            timestamp_epsilon: TIMESTAMP_EPSILON,
            v3_sync: false,
            safe_mode: false,
            chip_id: 0,
            revision: 0,
        }
    }
}

impl EngineConfig {
    /// Default configuration for a hardware revision
    pub fn for_variant(variant: HardwareVariant) -> Self {
        Self {
            variant,
            // Z180 parts are the ones wired for V3 sync
            v3_sync: matches!(variant, HardwareVariant::Z180),
            ..Self::default()
        }
    }

    /// Check the configuration before an engine is built from it
    pub fn validate(&self) -> Result<()> {
        if !(2..=MAX_SLOTS).contains(&self.num_slots) {
            log::error!("config: {} ring slots out of range", self.num_slots);
            return Err(Error::InvalidConfig);
        }
        if self.slot_words < PROLOGUE_WORDS {
            log::error!("config: {} words per slot cannot hold a packet", self.slot_words);
            return Err(Error::InvalidConfig);
        }
        if !(1..=CONTEXT_MAX).contains(&self.max_contexts) {
            log::error!("config: context limit {} out of range", self.max_contexts);
            return Err(Error::InvalidConfig);
        }
        if self.claim_wait_slice.is_zero() || self.idle_poll_interval.is_zero() {
            return Err(Error::InvalidConfig);
        }
        if self.timestamp_epsilon == 0 || self.timestamp_epsilon > i32::MAX as u32 {
            return Err(Error::InvalidConfig);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::for_variant(HardwareVariant::Z180).validate().is_ok());
    }

    #[test]
    fn test_rejects_single_slot_ring() {
        let config = EngineConfig {
            num_slots: 1,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidConfig));
    }

    #[test]
    fn test_rejects_tiny_slots_and_context_limits() {
        let tiny = EngineConfig {
            slot_words: 8,
            ..EngineConfig::default()
        };
        assert_eq!(tiny.validate(), Err(Error::InvalidConfig));

        let crowded = EngineConfig {
            max_contexts: CONTEXT_MAX + 1,
            ..EngineConfig::default()
        };
        assert_eq!(crowded.validate(), Err(Error::InvalidConfig));
    }

    #[test]
    fn test_z180_enables_v3_sync() {
        assert!(EngineConfig::for_variant(HardwareVariant::Z180).v3_sync);
        assert!(!EngineConfig::for_variant(HardwareVariant::Z160).v3_sync);
    }
}
