//! Random sources for tile draws, first-turn selection and vote tie-breaks
//!
//! The coordinator never touches a global RNG directly. Everything random goes
//! through [`RandomSource`], so tests can run games from a fixed seed or a
//! scripted sequence of rolls.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::TileType;

pub trait RandomSource {
    /// Uniform index in `0..len`. Callers never pass `len == 0`.
    fn index(&mut self, len: usize) -> usize;

    /// Uniform float in `[0, 1)`.
    fn unit(&mut self) -> f64;

    /// Weighted tile draw: silver 50%, black 20%, empty 20%, bonus 10%.
    fn tile_type(&mut self) -> TileType {
        TileType::from_roll(self.unit())
    }
}

/// Thread-local OS-seeded generator used by the server binary.
#[derive(Clone, Debug, Default)]
pub struct SystemRng;

impl RandomSource for SystemRng {
    fn index(&mut self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }

    fn unit(&mut self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Reproducible generator for tests and replays.
#[derive(Clone, Debug)]
pub struct SeededRng {
    inner: StdRng,
}

impl SeededRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRng {
    fn index(&mut self, len: usize) -> usize {
        self.inner.gen_range(0..len)
    }

    fn unit(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }
}
