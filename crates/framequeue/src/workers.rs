//! # Demo Workers
//!
//! - [`GameLogic`]: spins a field of random cubes and draws a HUD.
//! - [`Physics`]: fakes a fixed amount of work per frame.

use std::fmt::Write as _;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use framequeue_core::{FpsCalculator, FrameInfo, FrameWorker, WorkStats};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::DemoConfig;
use crate::math::{Color, Vec3};
use crate::render::RenderQueue;

const FONT_SIZE: i32 = 20;
const HUD_LINES: i32 = 6;

/// One spinning cube.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cube {
    /// Full revolutions per second.
    pub rotation_speed: f32,
    /// Current rotation, in degrees.
    pub rotation_degrees: f32,
    /// Unit rotation axis.
    pub rotation_axis: Vec3,
    /// Center.
    pub position: Vec3,
    /// Size along X.
    pub width: f32,
    /// Size along Y.
    pub height: f32,
    /// Size along Z.
    pub length: f32,
    /// Fill color.
    pub color: Color,
    /// Outline color.
    pub wire_color: Color,
}

impl Cube {
    /// A cube with random size, placement, color and spin.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self {
            rotation_speed: rng.gen_range(0.02..=2.0),
            rotation_degrees: 0.0,
            rotation_axis: Vec3::new(
                rng.gen_range(-1.0..=1.0),
                rng.gen_range(-1.0..=1.0),
                rng.gen_range(-1.0..=1.0),
            )
            .normalize(),
            position: Vec3::new(
                rng.gen_range(-100.0..=100.0),
                rng.gen_range(-100.0..=100.0),
                rng.gen_range(-500.0..=80.0),
            ),
            width: rng.gen_range(0.05..=2.0),
            height: rng.gen_range(0.05..=2.0),
            length: rng.gen_range(0.05..=2.0),
            color: random_color(rng),
            wire_color: random_color(rng),
        }
    }

    /// Advances the rotation by `delta_seconds`.
    pub fn spin(&mut self, delta_seconds: f32) {
        self.rotation_degrees = (self.rotation_degrees + delta_seconds * 360.0 * self.rotation_speed) % 360.0;
    }
}

fn random_color<R: Rng>(rng: &mut R) -> Color {
    Color::rgba(rng.gen(), rng.gen(), rng.gen(), 255)
}

/// Timing figures shown on the HUD, published by the other threads.
#[derive(Clone, Debug, Default)]
pub struct HudFeed {
    /// Physics thread tick time.
    pub physics: Arc<WorkStats>,
    /// Coordinator replay time.
    pub render: Arc<WorkStats>,
}

/// The game logic thread: owns the cubes and records every draw.
#[derive(Debug)]
pub struct GameLogic {
    queue: RenderQueue,
    feed: HudFeed,
    rng: ChaCha8Rng,
    cubes: Vec<Cube>,
    initial_cubes: usize,
    cube_step: usize,
    step_every: u64,
    steps: u64,
    fps: FpsCalculator,
    work_time: FpsCalculator,
    line: String,
}

impl GameLogic {
    /// Creates the worker. Cubes are spawned on the worker thread in
    /// [`FrameWorker::on_start`].
    #[must_use]
    pub fn new(config: &DemoConfig, queue: RenderQueue, feed: HudFeed) -> Self {
        let seed = if config.seed == 0 { clock_seed() } else { config.seed };
        debug!(seed, "game logic rng seeded");
        Self {
            queue,
            feed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            cubes: Vec::new(),
            initial_cubes: config.cube_count,
            cube_step: config.cube_step,
            step_every: config.step_every,
            steps: 0,
            fps: FpsCalculator::new(),
            work_time: FpsCalculator::new(),
            line: String::with_capacity(64),
        }
    }

    /// Cubes currently alive.
    #[must_use]
    pub fn cubes(&self) -> &[Cube] {
        &self.cubes
    }

    /// Spawns `count` random cubes.
    pub fn add_cubes(&mut self, count: usize) {
        let rng = &mut self.rng;
        self.cubes.extend((0..count).map(|_| Cube::random(rng)));
    }

    /// Removes up to `count` cubes, newest first.
    pub fn remove_cubes(&mut self, count: usize) {
        let keep = self.cubes.len().saturating_sub(count);
        self.cubes.truncate(keep);
    }

    /// Alternates between adding and removing `cube_step` cubes every
    /// `step_every` frames.
    fn step_cube_count(&mut self, frame: u64) {
        if self.step_every == 0 || frame == 0 || frame % self.step_every != 0 {
            return;
        }
        if self.steps % 2 == 0 {
            self.add_cubes(self.cube_step);
        } else {
            self.remove_cubes(self.cube_step);
        }
        self.steps += 1;
        debug!(frame, cubes = self.cubes.len(), "cube count stepped");
    }

    fn draw_hud(&mut self) {
        let line_y = |line: i32| line * FONT_SIZE;

        self.queue.draw_rectangle(0, 0, FONT_SIZE * 30, HUD_LINES * FONT_SIZE, Color::HUD_BACKDROP);

        self.line.clear();
        let _ = write!(self.line, "FPS: {}", self.fps.fps());
        self.queue.draw_text(&self.line, 0, line_y(0), FONT_SIZE, Color::RED);

        self.line.clear();
        let _ = write!(self.line, "GameLogic frametime: {:4.2} ms", self.work_time.avg_ms());
        self.queue.draw_text(&self.line, 0, line_y(1), FONT_SIZE, Color::RED);

        self.line.clear();
        let _ = write!(self.line, "Physics frametime: {:4.2} ms", self.feed.physics.avg_work_ms());
        self.queue.draw_text(&self.line, 0, line_y(2), FONT_SIZE, Color::RED);

        self.line.clear();
        let _ = write!(self.line, "Render frametime: {:4.2} ms", self.feed.render.avg_work_ms());
        self.queue.draw_text(&self.line, 0, line_y(3), FONT_SIZE, Color::RED);

        self.line.clear();
        let _ = write!(self.line, "Number of cubes: {}", self.cubes.len());
        self.queue.draw_text(&self.line, 0, line_y(4), FONT_SIZE, Color::RED);

        self.line.clear();
        let _ = write!(
            self.line,
            "Cubes change by {} every {} frames",
            self.cube_step, self.step_every
        );
        self.queue.draw_text(&self.line, 0, line_y(5), FONT_SIZE, Color::BROWN);
    }
}

impl FrameWorker for GameLogic {
    fn name(&self) -> &str {
        "GameLogic"
    }

    fn on_start(&mut self) {
        self.add_cubes(self.initial_cubes);
        info!(cubes = self.cubes.len(), "cubes spawned");
    }

    fn tick(&mut self, frame: &FrameInfo) {
        let started = Instant::now();
        let delta = frame.delta_seconds();
        self.fps.tick(delta);

        for cube in &mut self.cubes {
            cube.spin(delta);
            self.queue.draw_cube_ex(
                cube.position,
                cube.rotation_degrees,
                cube.rotation_axis,
                cube.width,
                cube.height,
                cube.length,
                cube.color,
                cube.wire_color,
            );
        }
        self.draw_hud();
        self.step_cube_count(frame.frame);

        self.work_time.tick(started.elapsed().as_secs_f32());
    }

    fn on_end(&mut self) {
        info!(cubes = self.cubes.len(), "game logic stopped");
    }
}

/// The physics thread. There is no physics; it sleeps to occupy its slot.
#[derive(Debug)]
pub struct Physics {
    work: Duration,
}

impl Physics {
    /// Creates a worker that sleeps `work` per frame.
    #[must_use]
    pub fn new(work: Duration) -> Self {
        Self { work }
    }
}

impl FrameWorker for Physics {
    fn name(&self) -> &str {
        "Physics"
    }

    fn tick(&mut self, _frame: &FrameInfo) {
        if !self.work.is_zero() {
            thread::sleep(self.work);
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0x5EED, |elapsed| elapsed.as_nanos() as u64)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{Canvas, RenderScope, RenderSet};
    use crate::TEST_SET_LOCK;
    use framequeue_core::DoubleBufferedSet;

    fn config(cubes: usize) -> DemoConfig {
        DemoConfig {
            cube_count: cubes,
            cube_step: 10,
            step_every: 2,
            seed: 7,
            ..DemoConfig::default()
        }
    }

    #[test]
    fn test_random_cube_ranges() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..100 {
            let cube = Cube::random(&mut rng);
            assert!((0.02..=2.0).contains(&cube.rotation_speed));
            assert!((-500.0..=80.0).contains(&cube.position.z));
            assert!((0.05..=2.0).contains(&cube.width));
            assert_eq!(cube.color.a, 255);
        }
    }

    #[test]
    fn test_spin_wraps() {
        let mut cube = Cube::random(&mut ChaCha8Rng::seed_from_u64(2));
        cube.rotation_speed = 1.0;
        cube.spin(1.25);
        assert!((cube.rotation_degrees - 90.0).abs() < 1e-3);
    }

    #[test]
    fn test_same_seed_same_cubes() {
        let _lock = TEST_SET_LOCK.lock();
        let set: Arc<RenderSet> = DoubleBufferedSet::new();
        let mut a = GameLogic::new(&config(5), RenderQueue::new(Arc::clone(&set)), HudFeed::default());
        let mut b = GameLogic::new(&config(5), RenderQueue::new(Arc::clone(&set)), HudFeed::default());
        a.on_start();
        b.on_start();
        assert_eq!(a.cubes(), b.cubes());
    }

    #[test]
    fn test_tick_records_cubes_and_hud() {
        let _lock = TEST_SET_LOCK.lock();
        let set: Arc<RenderSet> = DoubleBufferedSet::new();
        let mut logic = GameLogic::new(&config(25), RenderQueue::new(Arc::clone(&set)), HudFeed::default());
        logic.on_start();
        logic.tick(&FrameInfo {
            frame: 1,
            delta: Duration::from_millis(16),
        });

        set.swap();
        let mut canvas = Canvas::default();
        set.drain_consumer_scoped(&mut canvas, &mut RenderScope);

        let frame = canvas.last_frame();
        assert_eq!(frame.cubes, 25);
        assert_eq!(frame.cube_wires, 25);
        assert_eq!(frame.rectangles, 1);
        assert_eq!(frame.texts, HUD_LINES as u64);
        assert_eq!(canvas.last_text()[4], "Number of cubes: 25");
        assert!(canvas.last_text()[1].starts_with("GameLogic frametime: "));
    }

    #[test]
    fn test_cube_count_alternates() {
        let _lock = TEST_SET_LOCK.lock();
        let set: Arc<RenderSet> = DoubleBufferedSet::new();
        let mut logic = GameLogic::new(&config(20), RenderQueue::new(set), HudFeed::default());
        logic.on_start();

        logic.step_cube_count(0);
        assert_eq!(logic.cubes().len(), 20);
        logic.step_cube_count(1);
        assert_eq!(logic.cubes().len(), 20);
        logic.step_cube_count(2);
        assert_eq!(logic.cubes().len(), 30);
        logic.step_cube_count(4);
        assert_eq!(logic.cubes().len(), 20);

        logic.remove_cubes(100);
        assert!(logic.cubes().is_empty());
    }
}
