//! Deterministic random number generation.
//!
//! RULE: Nothing in the pipeline may call any platform RNG.
//! Seeded model weights are drawn from WeightRng streams derived
//! from the single seed stored in the embedder configuration.
//!
//! Each weight matrix gets its own stream, seeded from
//! (seed XOR slot_index * golden ratio). This means:
//!   - Adding a new matrix never changes existing matrices.
//!   - The same seed always yields byte-identical weights.

use rand::{RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct WeightRng {
    pub slot: WeightSlot,
    inner: Pcg64Mcg,
}

impl WeightRng {
    pub fn new(seed: u64, slot: WeightSlot) -> Self {
        let derived_seed = seed ^ (slot as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            slot,
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a zero-mean weight in [-1.0, 1.0).
    pub fn next_weight(&mut self) -> f32 {
        (self.next_f64() * 2.0 - 1.0) as f32
    }

    /// Fill a row-major `rows x cols` matrix.
    pub fn matrix(&mut self, rows: usize, cols: usize) -> Vec<Vec<f32>> {
        (0..rows)
            .map(|_| (0..cols).map(|_| self.next_weight()).collect())
            .collect()
    }
}

/// Stable weight stream assignments.
/// NEVER reorder or remove entries. Only append.
/// Reordering changes every seeded model's weights.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum WeightSlot {
    TextProjection = 0,
    ImageProjection = 1,
}
