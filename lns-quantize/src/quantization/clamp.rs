//! Range clamp applied before the log transform.

use candle_core::Tensor;

use crate::config::LnsParams;
use crate::error::Result;

/// Clamp every nonzero magnitude into `[threshold_down, threshold_up]`,
/// narrowed to what the input dtype holds (see [`LnsParams::bounds_for`]).
///
/// Signs are kept. Zeros (including `-0.0`) are returned untouched so they
/// never reach the log domain. Accepts tensors of any rank.
///
/// # Errors
///
/// Returns error if tensor operations fail.
pub fn clamp_range(input: &Tensor, params: &LnsParams) -> Result<Tensor> {
    let (down, up) = params.bounds_for(input.dtype());
    let magnitude = input.abs()?.clamp(down, up)?;
    let signed = input.lt(0.0)?.where_cond(&magnitude.neg()?, &magnitude)?;

    Ok(input.eq(0.0)?.where_cond(input, &signed)?)
}

/// Scalar form of [`clamp_range`].
#[must_use]
pub fn clamp_magnitude(value: f64, params: &LnsParams) -> f64 {
    if value == 0.0 {
        return value;
    }
    value
        .abs()
        .clamp(params.threshold_down, params.threshold_up)
        .copysign(value)
}
