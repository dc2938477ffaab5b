//! Log-domain quantizer.
//!
//! A nonzero value `x` assigned a tier with resolution `scale` becomes
//!
//! ```text
//! q = sign(x) * 2^(round(log2(|x|) * scale) / scale)
//! ```
//!
//! Rounding is to nearest with ties to even.

use candle_core::Tensor;

use super::clamp::clamp_range;
use super::tier::{ensure_quantizable_rank, host_values, TierAssignment};
use crate::config::{LnsParams, TierSpec};
use crate::error::Result;

/// Round a log2 magnitude to a multiple of `1 / scale`.
#[must_use]
pub fn quantize_exponent(log_x: f64, scale: f64) -> f64 {
    (log_x * scale).round_ties_even() / scale
}

/// Quantize a single value at the given tier. Zero is returned unchanged.
#[must_use]
pub fn quantize_value(value: f64, spec: &TierSpec) -> f64 {
    if value == 0.0 {
        return value;
    }
    quantize_exponent(value.abs().log2(), spec.scale)
        .exp2()
        .copysign(value)
}

/// Quantize an already clamped rank-2 or rank-3 tensor.
///
/// Tiers are chosen against this tensor's own maximum log-magnitude, so
/// the same value can land in different tiers on different calls. A
/// tensor without nonzero elements is returned as is. The output keeps the
/// input's shape, dtype and device, and its magnitudes stay inside
/// [`LnsParams::bounds_for`] that dtype.
///
/// # Errors
///
/// Returns [`crate::LnsError::UnsupportedRank`] for any other rank, or an
/// error if tensor conversion fails.
pub fn quantize_log_domain(clamped: &Tensor, params: &LnsParams) -> Result<Tensor> {
    ensure_quantizable_rank(clamped)?;

    let values = host_values(clamped)?;
    let assignment = TierAssignment::from_values(&values, params);
    if assignment.is_all_zero() {
        return Ok(clamped.clone());
    }

    // rounding up can step past the largest power of two the dtype holds
    let (down, up) = params.bounds_for(clamped.dtype());
    let quantized: Vec<f64> = values
        .iter()
        .zip(&assignment.tiers)
        .map(|(&value, tier)| match tier {
            Some(tier) => {
                let q = quantize_value(value, params.tier(*tier));
                q.abs().clamp(down, up).copysign(q)
            }
            None => value,
        })
        .collect();

    let counts = assignment.counts();
    tracing::trace!(
        shape = ?clamped.dims(),
        max_log = assignment.max_log,
        zero = counts.zero,
        low = counts.low,
        high = counts.high,
        highest = counts.highest,
        "quantized activation"
    );

    let output = Tensor::from_vec(quantized, clamped.shape().clone(), clamped.device())?
        .to_dtype(clamped.dtype())?;
    Ok(output)
}

/// Clamp then log-quantize a tensor (forward values only, no gradient
/// routing; see [`crate::quantize_forward`] for the training path).
///
/// # Errors
///
/// Returns error if the rank is not 2 or 3 or a tensor operation fails.
pub fn lns_quantize(input: &Tensor, params: &LnsParams) -> Result<Tensor> {
    ensure_quantizable_rank(input)?;
    let clamped = clamp_range(input, params)?;
    quantize_log_domain(&clamped, params)
}
