//! # Cinder Command Submission
//!
//! Command ring, fence tracking and the submission engine for the
//! fixed-function 2D block.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                    Command Submission Pipeline                    │
//! │                                                                   │
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────────┐     │
//! │  │   Context    │    │    Packet    │    │   Command Ring   │     │
//! │  │   Manager    │───▶│   Encoder    │───▶│   (N slots)      │     │
//! │  │ (state/incr) │    │  (begin pkt) │    │                  │     │
//! │  └──────────────┘    └──────────────┘    └────────┬─────────┘     │
//! │                                                    │ kick          │
//! │  ┌──────────────┐                        ┌────────▼─────────┐     │
//! │  │   Fence      │◀───── retire ──────────│   Completion     │     │
//! │  │   Tracker    │                        │   (IRQ)          │     │
//! │  └──────────────┘                        └──────────────────┘     │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Submission Flow
//!
//! 1. Caller submits an indirect buffer for a context
//! 2. The next ring slot is claimed once its previous fence has retired
//! 3. A begin packet is written into the current slot, sized for a full
//!    state stream on a context switch
//! 4. The indirect buffer is chained back to the next slot
//! 5. The slot is flushed, the mark counter kicked, and a fence returned
//! 6. The completion interrupt retires fences and wakes waiters

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod completion;
pub mod config;
pub mod context;
pub mod encoder;
pub mod engine;
pub mod fence;
pub mod ring;

// Re-exports
pub use completion::CompletionHandler;
pub use config::EngineConfig;
pub use context::{ContextManager, SharedSetup};
pub use encoder::{PacketKind, PacketWriter};
pub use engine::{DeviceInfo, EngineStats, SubmissionEngine, SubmitFlags, SubmitPhase};
pub use fence::{TimestampTracker, WaitOutcome};
pub use ring::{CommandRing, RingState};
