//! Dynamic traffic weights for instances still inside their warm-up window.

mod warmup;

pub use warmup::{compute_weights, WarmupWeightAdjuster};
