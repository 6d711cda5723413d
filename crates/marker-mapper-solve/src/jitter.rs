//! Injectable sources of perturbation noise.
//!
//! The local search draws every perturbation component from a
//! [`JitterSource`]. Production runs use a seeded [`RngJitter`]; tests replay
//! fixed values with [`SequenceJitter`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Produces samples uniformly distributed in `[-1, 1]`.
pub trait JitterSource {
    fn next_unit(&mut self) -> f64;
}

impl<J: JitterSource + ?Sized> JitterSource for &mut J {
    fn next_unit(&mut self) -> f64 {
        (**self).next_unit()
    }
}

/// Uniform jitter backed by any `rand` generator.
#[derive(Clone, Debug)]
pub struct RngJitter<R> {
    rng: R,
}

impl<R: Rng> RngJitter<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RngJitter<StdRng> {
    /// Reproducible jitter: the same seed yields the same search.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> JitterSource for RngJitter<R> {
    fn next_unit(&mut self) -> f64 {
        self.rng.random_range(-1.0..=1.0)
    }
}

/// Replays a fixed cycle of values, clamped to `[-1, 1]`.
///
/// An empty sequence always yields `0.0`, i.e. identity perturbations.
#[derive(Clone, Debug, Default)]
pub struct SequenceJitter {
    values: Vec<f64>,
    cursor: usize,
}

impl SequenceJitter {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values, cursor: 0 }
    }

    pub fn zeros() -> Self {
        Self::default()
    }

    /// Number of samples handed out so far.
    pub fn consumed(&self) -> usize {
        self.cursor
    }
}

impl JitterSource for SequenceJitter {
    fn next_unit(&mut self) -> f64 {
        let v = if self.values.is_empty() {
            0.0
        } else {
            self.values[self.cursor % self.values.len()].clamp(-1.0, 1.0)
        };
        self.cursor += 1;
        v
    }
}
