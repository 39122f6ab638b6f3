//! Run configuration.

use crate::error::{Error, Result};

/// Default maximum children per node.
pub const DEFAULT_ORDER: usize = 10;
/// Default number of preallocated node slots.
pub const DEFAULT_CAPACITY: usize = 1_000_000;
/// Default signature density (reserved for the encoder).
pub const DEFAULT_DENSITY: f32 = 1.0 / 21.0;

/// Configuration for a clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Maximum children per node before it splits.
    pub order: usize,
    /// Total node slots preallocated in the arena. Never grows.
    pub capacity: usize,
    /// Fraction of a sequence set as signature bits. Only range-checked here;
    /// the 2-bit encoder does not use it.
    pub density: f32,
    /// Worker threads for insertion and assignment (0 = rayon default).
    pub threads: usize,
    /// Base RNG seed. Worker `t` seeds its split RNG with `seed + t`.
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order: DEFAULT_ORDER,
            capacity: DEFAULT_CAPACITY,
            density: DEFAULT_DENSITY,
            threads: 0,
            seed: 0,
        }
    }
}

impl Config {
    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check every value before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.order < 2 {
            return Err(Error::InvalidConfig(format!(
                "order must be at least 2, got {}",
                self.order
            )));
        }
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("capacity must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.density) {
            return Err(Error::InvalidConfig(format!(
                "density must be a value between 0 and 1, got {}",
                self.density
            )));
        }
        Ok(())
    }
}
