//! Core deterministic primitives.
//!
//! Everything here is a pure function of its inputs so puzzles generated
//! from the same seed are identical on every platform.

pub mod rng;

// Re-export core types
pub use rng::{daily_seed, derive_seed, DeterministicRng, RangeError};
