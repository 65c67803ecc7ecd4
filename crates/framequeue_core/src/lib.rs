//! # FRAMEQUEUE Core
//!
//! Deferred command recording with zero per-item heap allocation, replayed
//! later on another thread, with every participating thread stepping through
//! frames in lockstep.
//!
//! ## Architecture
//!
//! ```text
//! ByteArena (memory)          packed, self-describing records + OOB bytes
//!   └─ CommandQueue<C>        typed push / replay / clear
//!       └─ QueueGroup<C, D>   one queue per ordering domain D
//!           └─ DoubleBufferedSet<C, D>   producer group + consumer group
//!
//! FrameSynchronizer           FrameStart barrier → tick → FrameEnd barrier
//!   ├─ FrameThread            one per worker, drives a FrameWorker
//!   └─ Coordinator            drains the consumer group, swaps, advances
//! ```
//!
//! ## Frame protocol
//!
//! 1. **FrameStart**: all parties rendezvous.
//! 2. **Tick**: each party runs exactly one callback; workers push into the
//!    producer group.
//! 3. **FrameEnd**: all parties rendezvous.
//! 4. **Boundary** (coordinator only): drain the consumer group, swap roles,
//!    advance the frame counter.
//!
//! The barriers are the only synchronization on the queues. There are no locks
//! on the push path.
//!
//! ## Example
//!
//! ```rust
//! use framequeue_core::{CommandQueue, Invocation};
//!
//! let mut queue: CommandQueue<Vec<i32>> = CommandQueue::new();
//! for i in 1..=3 {
//!     queue.push(move |log: &mut Vec<i32>, _: &Invocation<'_>| log.push(i));
//! }
//!
//! let mut log = Vec::new();
//! queue.replay_all(&mut log);
//! queue.clear();
//! assert_eq!(log, [1, 2, 3]);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod command;
pub mod error;
pub mod memory;
pub mod sync;
pub mod timing;

pub use command::{CommandQueue, Domain, DomainScope, Invocation, QueueGroup, RecordHandle};
pub use error::{PipelineError, PipelineResult};
pub use memory::{ByteArena, Ref, ALIGN};
pub use sync::{
    Coordinator, DoubleBufferedSet, FnWorker, FrameBarrier, FrameInfo, FrameOutcome,
    FrameSynchronizer, FrameThread, FrameWorker, ProducerGuard, WorkStats,
};
pub use timing::FpsCalculator;

/// Serializes unit tests that build a [`DoubleBufferedSet`], which is a
/// process-wide singleton.
#[cfg(test)]
pub(crate) static TEST_SET_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());
