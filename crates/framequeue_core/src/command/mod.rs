//! # Deferred Commands
//!
//! Typed command recording on top of [`ByteArena`](crate::ByteArena).
//!
//! A command is any closure that is `Copy + Send + Sync + 'static`. The
//! closure is stored by value in the arena next to a function pointer that
//! knows how to call it, so heterogeneous commands share one contiguous
//! buffer and cost no allocation per push.
//!
//! ```text
//!   producer thread                        consumer thread
//!   ───────────────                        ───────────────
//!   queue.push(|ctx, call| ...)   ──►      queue.replay_all(&mut ctx)
//!   queue.push_with_text("hi", ..)         queue.clear()
//! ```
//!
//! Commands are grouped per ordering domain in a [`QueueGroup`]; domains are
//! replayed in a fixed, declared order.

mod group;
mod queue;

pub use group::{Domain, DomainScope, QueueGroup};
pub use queue::{CommandQueue, Invocation, RecordHandle};
