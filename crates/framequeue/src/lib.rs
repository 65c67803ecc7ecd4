//! # FRAMEQUEUE Demo
//!
//! A headless port of the classic "one thread renders, other threads think"
//! sample, built on [`framequeue_core`].
//!
//! ## Threads
//!
//! | Thread     | Tick                                   |
//! |------------|----------------------------------------|
//! | main       | paces frames, replays last frame's draws |
//! | GameLogic  | spins cubes, records cube and HUD draws |
//! | Physics    | sleeps `physics_work_ms`               |
//!
//! ## Example
//!
//! ```rust,no_run
//! use framequeue::{run, DemoConfig};
//!
//! let config = DemoConfig { frames: 60, ..DemoConfig::default() };
//! let summary = run(&config)?;
//! println!("{} cubes drawn", summary.draws.cubes);
//! # Ok::<(), framequeue::DemoError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod app;
pub mod config;
pub mod error;
pub mod math;
pub mod render;
pub mod workers;

pub use app::{run, DemoSummary, PARTIES};
pub use config::DemoConfig;
pub use error::{ConfigError, ConfigResult, DemoError};
pub use math::{Camera3D, Color, Vec3};
pub use render::{Canvas, DrawStats, RenderGroup, RenderQueue, RenderScope, RenderSet};
pub use workers::{Cube, GameLogic, HudFeed, Physics};

/// Serializes unit tests that build a render set, which is a process-wide
/// singleton.
#[cfg(test)]
pub(crate) static TEST_SET_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());
