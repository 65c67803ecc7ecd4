//! # Headless Render Queue
//!
//! Draw commands are recorded by worker threads into the producer side of a
//! [`DoubleBufferedSet`] and replayed by the coordinator against a [`Canvas`].
//!
//! ## Groups
//!
//! ```text
//! World  ─ begin_mode_3d ─ cubes ... ─ end_mode_3d
//! Ui     ─ rectangles, text
//! ```
//!
//! The canvas does not rasterize anything. It enforces the drawing-state
//! rules a real immediate-mode renderer has (no 3-D draws outside 3-D mode,
//! balanced matrix stack) and counts what it is asked to draw.

use std::sync::Arc;

use framequeue_core::{DoubleBufferedSet, Domain, DomainScope, Invocation};

use crate::math::{Camera3D, Color, Vec3};

/// Render pass a draw command belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderGroup {
    /// 3-D scene, drawn through the camera.
    World,
    /// 2-D overlay, drawn on top.
    Ui,
}

impl Domain for RenderGroup {
    const ORDER: &'static [Self] = &[RenderGroup::World, RenderGroup::Ui];

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

/// The set shared by the demo's threads.
pub type RenderSet = DoubleBufferedSet<Canvas, RenderGroup>;

/// Draw call counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    /// Completed `begin_drawing` / `end_drawing` pairs.
    pub frames: u64,
    /// Solid cubes.
    pub cubes: u64,
    /// Wireframe cubes.
    pub cube_wires: u64,
    /// Rectangles.
    pub rectangles: u64,
    /// Text draws.
    pub texts: u64,
    /// Translate and rotate calls.
    pub transforms: u64,
}

impl DrawStats {
    fn accumulate(&mut self, other: &Self) {
        self.frames += other.frames;
        self.cubes += other.cubes;
        self.cube_wires += other.cube_wires;
        self.rectangles += other.rectangles;
        self.texts += other.texts;
        self.transforms += other.transforms;
    }
}

/// Replay target for draw commands.
#[derive(Debug)]
pub struct Canvas {
    camera: Camera3D,
    background: Color,
    drawing: bool,
    in_3d: bool,
    matrix_depth: u32,
    frame: DrawStats,
    last_frame: DrawStats,
    total: DrawStats,
    text_log: Vec<String>,
    last_text: Vec<String>,
}

impl Canvas {
    /// Creates a canvas looking through `camera`.
    #[must_use]
    pub fn new(camera: Camera3D) -> Self {
        Self {
            camera,
            background: Color::WHITE,
            drawing: false,
            in_3d: false,
            matrix_depth: 0,
            frame: DrawStats::default(),
            last_frame: DrawStats::default(),
            total: DrawStats::default(),
            text_log: Vec::new(),
            last_text: Vec::new(),
        }
    }

    /// Camera used for the World group.
    #[must_use]
    pub fn camera(&self) -> &Camera3D {
        &self.camera
    }

    /// Background of the current frame.
    #[must_use]
    pub fn background(&self) -> Color {
        self.background
    }

    /// Returns true between `begin_drawing` and `end_drawing`.
    #[must_use]
    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    /// Returns true between `begin_mode_3d` and `end_mode_3d`.
    #[must_use]
    pub fn in_3d(&self) -> bool {
        self.in_3d
    }

    /// Counts of the last completed frame.
    #[must_use]
    pub fn last_frame(&self) -> &DrawStats {
        &self.last_frame
    }

    /// Counts over every completed frame.
    #[must_use]
    pub fn total(&self) -> &DrawStats {
        &self.total
    }

    /// Text drawn during the last completed frame, in draw order.
    #[must_use]
    pub fn last_text(&self) -> &[String] {
        &self.last_text
    }

    /// Starts a frame.
    ///
    /// # Panics
    ///
    /// Panics if a frame is already being drawn.
    pub fn begin_drawing(&mut self) {
        assert!(!self.drawing, "begin_drawing called inside a frame");
        self.drawing = true;
        self.frame = DrawStats::default();
        self.text_log.clear();
    }

    /// Sets the frame background.
    pub fn clear_background(&mut self, color: Color) {
        self.assert_drawing();
        self.background = color;
    }

    /// Ends a frame and publishes its counts.
    ///
    /// # Panics
    ///
    /// Panics outside a frame, inside 3-D mode, or with pushed matrices.
    pub fn end_drawing(&mut self) {
        self.assert_drawing();
        assert!(!self.in_3d, "end_drawing called inside 3-D mode");
        assert_eq!(self.matrix_depth, 0, "end_drawing called with pushed matrices");
        self.drawing = false;
        self.frame.frames = 1;
        self.total.accumulate(&self.frame);
        self.last_frame = self.frame;
        std::mem::swap(&mut self.text_log, &mut self.last_text);
    }

    /// Enters 3-D mode.
    ///
    /// # Panics
    ///
    /// Panics outside a frame or if already in 3-D mode.
    pub fn begin_mode_3d(&mut self) {
        self.assert_drawing();
        assert!(!self.in_3d, "begin_mode_3d called twice");
        self.in_3d = true;
    }

    /// Leaves 3-D mode.
    ///
    /// # Panics
    ///
    /// Panics if not in 3-D mode.
    pub fn end_mode_3d(&mut self) {
        assert!(self.in_3d, "end_mode_3d called outside 3-D mode");
        self.in_3d = false;
    }

    /// Pushes the transform stack.
    pub fn push_matrix(&mut self) {
        self.assert_3d();
        self.matrix_depth += 1;
    }

    /// Pops the transform stack.
    ///
    /// # Panics
    ///
    /// Panics if the stack is empty.
    pub fn pop_matrix(&mut self) {
        assert!(self.matrix_depth > 0, "pop_matrix without push_matrix");
        self.matrix_depth -= 1;
    }

    /// Translates the current transform.
    pub fn translate(&mut self, _offset: Vec3) {
        self.assert_3d();
        self.frame.transforms += 1;
    }

    /// Rotates the current transform.
    pub fn rotate(&mut self, _degrees: f32, _axis: Vec3) {
        self.assert_3d();
        self.frame.transforms += 1;
    }

    /// Draws a solid cube.
    pub fn draw_cube(&mut self, _position: Vec3, _width: f32, _height: f32, _length: f32, _color: Color) {
        self.assert_3d();
        self.frame.cubes += 1;
    }

    /// Draws a wireframe cube.
    pub fn draw_cube_wires(
        &mut self,
        _position: Vec3,
        _width: f32,
        _height: f32,
        _length: f32,
        _color: Color,
    ) {
        self.assert_3d();
        self.frame.cube_wires += 1;
    }

    /// Draws a filled rectangle in screen space.
    pub fn draw_rectangle(&mut self, _x: i32, _y: i32, _width: i32, _height: i32, _color: Color) {
        self.assert_2d();
        self.frame.rectangles += 1;
    }

    /// Draws text in screen space.
    pub fn draw_text(&mut self, text: &str, _x: i32, _y: i32, _font_size: i32, _color: Color) {
        self.assert_2d();
        self.frame.texts += 1;
        self.text_log.push(text.to_owned());
    }

    fn assert_drawing(&self) {
        assert!(self.drawing, "draw call outside begin_drawing / end_drawing");
    }

    fn assert_3d(&self) {
        self.assert_drawing();
        assert!(self.in_3d, "3-D draw call outside 3-D mode");
    }

    fn assert_2d(&self) {
        self.assert_drawing();
        assert!(!self.in_3d, "2-D draw call inside 3-D mode");
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new(Camera3D::default())
    }
}

/// Opens a canvas frame around each drain and 3-D mode around the World
/// group.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderScope;

impl DomainScope<Canvas, RenderGroup> for RenderScope {
    fn begin(&mut self, canvas: &mut Canvas) {
        canvas.begin_drawing();
        canvas.clear_background(Color::WHITE);
    }

    fn enter(&mut self, canvas: &mut Canvas, group: RenderGroup) {
        if group == RenderGroup::World {
            canvas.begin_mode_3d();
        }
    }

    fn leave(&mut self, canvas: &mut Canvas, group: RenderGroup) {
        if group == RenderGroup::World {
            canvas.end_mode_3d();
        }
    }

    fn end(&mut self, canvas: &mut Canvas) {
        canvas.end_drawing();
    }
}

/// Records draw commands from any worker thread.
///
/// Every call takes the producer guard of its group for the duration of the
/// push, so two threads may draw concurrently only into different groups.
#[derive(Clone, Debug)]
pub struct RenderQueue {
    set: Arc<RenderSet>,
}

impl RenderQueue {
    /// Records into `set`.
    #[must_use]
    pub fn new(set: Arc<RenderSet>) -> Self {
        Self { set }
    }

    /// The underlying set.
    #[must_use]
    pub fn set(&self) -> &Arc<RenderSet> {
        &self.set
    }

    /// Queues a text draw. The text is copied into the queue.
    pub fn draw_text(&self, text: &str, x: i32, y: i32, font_size: i32, color: Color) {
        self.set.producer(RenderGroup::Ui).push_with_text(
            text,
            move |canvas: &mut Canvas, call: &Invocation<'_>| {
                canvas.draw_text(call.text(), x, y, font_size, color);
            },
        );
    }

    /// Queues a rectangle draw.
    pub fn draw_rectangle(&self, x: i32, y: i32, width: i32, height: i32, color: Color) {
        self.set.producer(RenderGroup::Ui).push(
            move |canvas: &mut Canvas, _: &Invocation<'_>| {
                canvas.draw_rectangle(x, y, width, height, color);
            },
        );
    }

    /// Queues a solid cube draw.
    pub fn draw_cube(&self, position: Vec3, width: f32, height: f32, length: f32, color: Color) {
        self.set.producer(RenderGroup::World).push(
            move |canvas: &mut Canvas, _: &Invocation<'_>| {
                canvas.draw_cube(position, width, height, length, color);
            },
        );
    }

    /// Queues a wireframe cube draw.
    pub fn draw_cube_wires(&self, position: Vec3, width: f32, height: f32, length: f32, color: Color) {
        self.set.producer(RenderGroup::World).push(
            move |canvas: &mut Canvas, _: &Invocation<'_>| {
                canvas.draw_cube_wires(position, width, height, length, color);
            },
        );
    }

    /// Queues a rotated cube with a wireframe outline.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_cube_ex(
        &self,
        position: Vec3,
        degrees: f32,
        axis: Vec3,
        width: f32,
        height: f32,
        length: f32,
        color: Color,
        wire_color: Color,
    ) {
        self.set.producer(RenderGroup::World).push(
            move |canvas: &mut Canvas, _: &Invocation<'_>| {
                canvas.push_matrix();
                canvas.translate(position);
                canvas.rotate(degrees, axis);
                canvas.draw_cube(Vec3::ZERO, width, height, length, color);
                canvas.draw_cube_wires(Vec3::ZERO, width, height, length, wire_color);
                canvas.pop_matrix();
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TEST_SET_LOCK;

    #[test]
    fn test_canvas_frame_counts() {
        let mut canvas = Canvas::default();
        canvas.begin_drawing();
        canvas.begin_mode_3d();
        canvas.draw_cube(Vec3::ZERO, 1.0, 1.0, 1.0, Color::RED);
        canvas.end_mode_3d();
        canvas.draw_text("hello", 0, 0, 20, Color::RED);
        canvas.end_drawing();

        assert_eq!(canvas.last_frame().cubes, 1);
        assert_eq!(canvas.last_frame().texts, 1);
        assert_eq!(canvas.last_text(), ["hello"]);
        assert_eq!(canvas.total().frames, 1);
    }

    #[test]
    #[should_panic(expected = "3-D draw call outside 3-D mode")]
    fn test_cube_outside_3d_panics() {
        let mut canvas = Canvas::default();
        canvas.begin_drawing();
        canvas.draw_cube(Vec3::ZERO, 1.0, 1.0, 1.0, Color::RED);
    }

    #[test]
    #[should_panic(expected = "2-D draw call inside 3-D mode")]
    fn test_text_inside_3d_panics() {
        let mut canvas = Canvas::default();
        canvas.begin_drawing();
        canvas.begin_mode_3d();
        canvas.draw_text("oops", 0, 0, 20, Color::RED);
    }

    #[test]
    fn test_queue_replays_through_scope() {
        let _lock = TEST_SET_LOCK.lock();
        let set: Arc<RenderSet> = DoubleBufferedSet::new();
        let queue = RenderQueue::new(Arc::clone(&set));

        // UI first, World second: replay still draws World first.
        queue.draw_rectangle(0, 0, 600, 120, Color::HUD_BACKDROP);
        queue.draw_text("FPS: 60", 0, 0, 20, Color::RED);
        for i in 0..3 {
            let x = i as f32;
            queue.draw_cube_ex(Vec3::new(x, 0.0, 0.0), 45.0, Vec3::new(0.0, 1.0, 0.0), 1.0, 1.0, 1.0, Color::RED, Color::WHITE);
        }
        queue.draw_cube(Vec3::ZERO, 1.0, 1.0, 1.0, Color::BROWN);
        queue.draw_cube_wires(Vec3::ZERO, 1.0, 1.0, 1.0, Color::BROWN);
        queue.draw_text("Number of cubes: 3", 0, 20, 20, Color::RED);

        set.swap();
        let mut canvas = Canvas::default();
        set.drain_consumer_scoped(&mut canvas, &mut RenderScope);

        let frame = canvas.last_frame();
        assert_eq!(frame.cubes, 4);
        assert_eq!(frame.cube_wires, 4);
        assert_eq!(frame.transforms, 6);
        assert_eq!(frame.rectangles, 1);
        assert_eq!(canvas.last_text(), ["FPS: 60", "Number of cubes: 3"]);
        assert!(!canvas.is_drawing());
        assert!(!canvas.in_3d());
    }
}
