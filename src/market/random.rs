use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::sync::{Mutex, PoisonError};

/// Source of randomness shared by all schedulers
///
/// Schedulers only ever ask for these four primitives, so a test can swap in
/// a deterministic source and pin every formula's random input.
pub trait RandomSource: Send + Sync {
    /// Uniform draw in [0, 1)
    fn uniform(&self) -> f64;

    /// Standard normal draw (mean 0, std dev 1)
    fn gaussian(&self) -> f64;

    /// Uniform index in [0, len)
    fn index(&self, len: usize) -> usize;

    /// Fair coin flip
    fn coin(&self) -> bool;

    /// Uniform draw in [low, high)
    fn uniform_range(&self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.uniform()
    }
}

/// `StdRng`-backed source, reproducible when seeded
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Create a generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }
}

impl RandomSource for SeededRandom {
    fn uniform(&self) -> f64 {
        self.with_rng(|rng| rng.gen::<f64>())
    }

    fn gaussian(&self) -> f64 {
        self.with_rng(|rng| rng.sample(StandardNormal))
    }

    fn index(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.with_rng(|rng| rng.gen_range(0..len))
    }

    fn coin(&self) -> bool {
        self.with_rng(|rng| rng.gen_bool(0.5))
    }
}
