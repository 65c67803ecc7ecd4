//! # Frame Synchronization
//!
//! Every participating thread steps through frames in lockstep:
//!
//! ```text
//!             FrameStart          FrameEnd        boundary
//! Coordinator ────┤ tick ──────────────┤ drain + swap ┤ ...
//! GameLogic   ────┤ tick ───────┤.....│              │ ...
//! Physics     ────┤ tick ──┤..........│              │ ...
//!                 ▲                   ▲
//!           all K parties        all K parties
//! ```
//!
//! ## Roles
//!
//! Workers push into the *producer* group of a [`DoubleBufferedSet`] during
//! their tick. Between FrameEnd and the next FrameStart only the coordinator
//! runs: it replays the *consumer* group and swaps the roles. The two barriers
//! are what keep producers and the consumer off the same group, so the push
//! path takes no lock.

mod barrier;
mod coordinator;
mod double_buffer;
mod frame;
mod thread;

pub use barrier::FrameBarrier;
pub use coordinator::{Coordinator, FrameOutcome};
pub use double_buffer::{DoubleBufferedSet, ProducerGuard};
pub use frame::{FrameInfo, FrameSynchronizer};
pub use thread::{FnWorker, FrameThread, FrameWorker, WorkStats};
