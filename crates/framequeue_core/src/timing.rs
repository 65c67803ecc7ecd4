//! # Frame Timing
//!
//! Rolling averages over the last `N` samples, used for both frame times and
//! per-thread work times.
//!
//! Samples are kept as whole (rounded) microseconds so the running sum never drifts.
//! The average always divides by `N`, so it ramps up from zero over the first
//! `N` ticks.

/// Rolling average of the last `N` durations.
///
/// ```rust
/// use framequeue_core::FpsCalculator;
///
/// let mut fps: FpsCalculator = FpsCalculator::new();
/// for _ in 0..30 {
///     fps.tick(1.0 / 60.0);
/// }
/// assert_eq!(fps.fps(), 60);
/// ```
#[derive(Clone, Debug)]
pub struct FpsCalculator<const N: usize = 30> {
    samples: [i64; N],
    next: usize,
    sum: i64,
    ticks: u64,
}

impl<const N: usize> FpsCalculator<N> {
    /// Creates a calculator with every sample at zero.
    #[must_use]
    pub fn new() -> Self {
        const { assert!(N > 1, "need at least two samples") };
        Self {
            samples: [0; N],
            next: 0,
            sum: 0,
            ticks: 0,
        }
    }

    /// Adds a sample, replacing the oldest one.
    #[allow(clippy::cast_possible_truncation)]
    pub fn tick(&mut self, delta_seconds: f32) {
        let micros = (f64::from(delta_seconds) * 1_000_000.0).round() as i64;
        self.sum += micros - self.samples[self.next];
        self.samples[self.next] = micros;
        self.next = (self.next + 1) % N;
        self.ticks += 1;
    }

    /// Samples added so far.
    #[inline]
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Average sample in milliseconds.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    #[must_use]
    pub fn avg_ms(&self) -> f32 {
        (self.sum as f64 / (N as f64 * 1000.0)) as f32
    }

    /// Samples per second implied by the average, rounded. Zero until the
    /// first non-zero sample.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn fps(&self) -> u32 {
        let avg = self.avg_ms();
        if avg <= 0.0 {
            return 0;
        }
        (1000.0 / avg).round() as u32
    }

    /// Sample variance of the window, in milliseconds squared.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn variance_ms(&self) -> f64 {
        let mean = self.sum as f64 / (N as f64 * 1000.0);
        let squares: f64 = self
            .samples
            .iter()
            .map(|&us| {
                let ms = us as f64 / 1000.0;
                (ms - mean).powi(2)
            })
            .sum();
        squares / (N - 1) as f64
    }
}

impl<const N: usize> Default for FpsCalculator<N> {
    fn default() -> Self {
        Self::new()
    }
}
