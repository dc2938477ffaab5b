//! Log-domain quantization for activations.
//!
//! This module provides:
//! - **Range clamp**: nonzero magnitudes bounded to `[threshold_down, threshold_up]`
//! - **Tier selection**: per-element precision chosen by distance from the tensor max
//! - **Log quantization**: `2^(round(log2|x| * scale) / scale)` with the sign restored

mod clamp;
mod log_domain;
mod tier;

pub use clamp::{clamp_magnitude, clamp_range};
pub use log_domain::{lns_quantize, quantize_exponent, quantize_log_domain, quantize_value};
pub use tier::{select_tiers, PrecisionTier, TierAssignment, TierCounts};
