//! # Demo Run Loop
//!
//! ```text
//! main thread (coordinator)     GameLogic thread        Physics thread
//! ─────────────────────────     ────────────────        ──────────────
//! FrameStart ◄──────────────────────── all three ──────────────────►
//! poll frame budget             record cubes + HUD      sleep
//! FrameEnd   ◄──────────────────────── all three ──────────────────►
//! replay last frame's draws
//! swap, advance, pace
//! ```

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use framequeue_core::{
    Coordinator, DoubleBufferedSet, FrameOutcome, FrameSynchronizer, FrameThread, WorkStats,
};
use tracing::{info, warn};

use crate::config::DemoConfig;
use crate::error::DemoError;
use crate::math::Camera3D;
use crate::render::{Canvas, DrawStats, RenderQueue, RenderScope, RenderSet};
use crate::workers::{GameLogic, HudFeed, Physics};

/// Coordinator, game logic and physics.
pub const PARTIES: usize = 3;

/// What a finished run did.
#[derive(Clone, Debug, PartialEq)]
pub struct DemoSummary {
    /// Frames run by the coordinator.
    pub frames: u64,
    /// Ticks run by the game logic thread.
    pub logic_ticks: u64,
    /// Ticks run by the physics thread.
    pub physics_ticks: u64,
    /// Rolling average frame time at the end of the run, in milliseconds.
    pub avg_frame_ms: f32,
    /// Frames that took longer than the budget.
    pub over_budget_frames: u64,
    /// Draw calls replayed over the whole run.
    pub draws: DrawStats,
    /// HUD text of the last replayed frame.
    pub last_hud: Vec<String>,
}

/// Runs the demo to completion.
///
/// With `config.frames == 0` this only returns on error.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, a frame thread cannot
/// be spawned, or a worker panics.
pub fn run(config: &DemoConfig) -> Result<DemoSummary, DemoError> {
    config.validate()?;
    info!(
        frames = config.frames,
        target_fps = config.target_fps,
        cubes = config.cube_count,
        "starting frame pipeline"
    );

    let set: Arc<RenderSet> = DoubleBufferedSet::with_capacity(config.initial_queue_bytes);
    let sync = Arc::new(FrameSynchronizer::new(PARTIES));
    let render_stats = Arc::new(WorkStats::default());

    let physics = FrameThread::spawn(Arc::clone(&sync), Physics::new(config.physics_work()))?;
    let feed = HudFeed {
        physics: physics.stats_handle(),
        render: Arc::clone(&render_stats),
    };
    let logic = match FrameThread::spawn(
        Arc::clone(&sync),
        GameLogic::new(config, RenderQueue::new(Arc::clone(&set)), feed),
    ) {
        Ok(logic) => logic,
        Err(err) => {
            // Physics is parked at FrameStart waiting for a party that will
            // never come.
            sync.abort();
            if let Err(join_err) = physics.join() {
                warn!(error = %join_err, "physics thread failed during abort");
            }
            return Err(err.into());
        }
    };

    let mut coordinator = Coordinator::new(Arc::clone(&sync), Arc::clone(&set));
    let mut canvas = Canvas::new(Camera3D::default());
    let budget = config.frame_budget();
    let mut frames = 0u64;
    let mut over_budget_frames = 0u64;

    loop {
        let frame_started = Instant::now();
        let outcome = coordinator.run_frame_scoped(&mut canvas, &mut RenderScope, |frame, _| {
            if config.frames != 0 && frame.frame + 1 >= config.frames {
                sync.request_stop();
            }
        });
        frames += 1;
        render_stats.record(coordinator.avg_drain_ms(), frames);

        if outcome != FrameOutcome::Continue {
            break;
        }

        let elapsed = frame_started.elapsed();
        if elapsed < budget {
            thread::sleep(budget - elapsed);
        } else {
            over_budget_frames += 1;
            warn!(
                frame = frames,
                elapsed_ms = elapsed.as_secs_f32() * 1000.0,
                budget_ms = budget.as_secs_f32() * 1000.0,
                "frame over budget"
            );
        }
    }

    // Join both before reporting either failure.
    let logic_ticks = logic.join();
    let physics_ticks = physics.join();
    let logic_ticks = logic_ticks?;
    let physics_ticks = physics_ticks?;

    let summary = DemoSummary {
        frames,
        logic_ticks,
        physics_ticks,
        avg_frame_ms: coordinator.avg_frame_ms(),
        over_budget_frames,
        draws: *canvas.total(),
        last_hud: canvas.last_text().to_vec(),
    };
    info!(
        frames = summary.frames,
        fps = coordinator.fps(),
        avg_frame_ms = summary.avg_frame_ms,
        avg_render_ms = coordinator.avg_drain_ms(),
        over_budget = summary.over_budget_frames,
        cubes_drawn = summary.draws.cubes,
        "frame pipeline stopped"
    );
    Ok(summary)
}
