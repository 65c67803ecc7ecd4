//! # Memory Management
//!
//! The byte arena that backs every command queue.
//!
//! ## Design Philosophy
//!
//! One contiguous block per queue, grown by powers of two and never shrunk.
//! During a frame:
//! - No per-command heap allocations
//! - No per-command destructors
//! - `clear()` is O(1)

mod arena;

pub use arena::{ByteArena, RecordOffsets, Ref, ALIGN};
