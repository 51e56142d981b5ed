//! Pooled standard-normal draws.
//!
//! Drawing a single scalar at a time is the dominant per-iteration cost of
//! leaf sampling, so draws are generated in batches and handed out one by
//! one. Each sampler owns its generator, buffer and cursor; two samplers
//! built from the same seed produce the same sequence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Default number of draws per refill.
pub const DEFAULT_POOL_SIZE: usize = 50_000;

/// An infinite, seed-restartable sequence of N(0, 1) draws.
#[derive(Debug, Clone)]
pub struct NormalScalarSampler {
    rng: StdRng,
    buffer: Vec<f64>,
    cursor: usize,
    batch_size: usize,
}

impl NormalScalarSampler {
    /// Creates a sampler refilling `batch_size` draws at a time.
    pub fn new(batch_size: usize, seed: u64) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            rng: StdRng::seed_from_u64(seed),
            buffer: Vec::with_capacity(batch_size),
            cursor: 0,
            batch_size,
        }
    }

    /// Next standard-normal draw.
    pub fn sample(&mut self) -> f64 {
        if self.cursor >= self.buffer.len() {
            self.refill();
        }
        let value = self.buffer[self.cursor];
        self.cursor += 1;
        value
    }

    /// Draws left before the next refill.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.cursor
    }

    fn refill(&mut self) {
        self.buffer.clear();
        self.buffer.extend(
            (&mut self.rng)
                .sample_iter::<f64, _>(StandardNormal)
                .take(self.batch_size),
        );
        self.cursor = 0;
    }
}

impl Iterator for NormalScalarSampler {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        Some(self.sample())
    }
}
