//! Straight-Through Estimator (STE) for gradient estimation.
//!
//! STE allows gradients to flow through non-differentiable quantization
//! by using the identity function in the backward pass.

use candle_core::Tensor;

use crate::error::Result;

/// Route `quantized` values through the autograd graph of `input`.
///
/// Returns `quantized.detach() + (input - input.detach())`. The second
/// term is exactly zero for finite inputs, so the forward values are
/// exactly `quantized`, while backprop sees `d out / d input = I`.
/// Where `input` is zero the input itself is selected, so `-0.0` keeps
/// its sign.
///
/// # Arguments
///
/// * `input` - Tensor before quantization (may be tracked by autograd)
/// * `quantized` - Quantized values, same shape and dtype as `input`
///
/// # Errors
///
/// Returns error if tensor operations fail.
pub fn straight_through(input: &Tensor, quantized: &Tensor) -> Result<Tensor> {
    let passthrough = input.sub(&input.detach())?;
    let routed = quantized.detach().add(&passthrough)?;
    Ok(input.eq(0.0)?.where_cond(input, &routed)?)
}

/// Compute STE backward pass (identity gradient).
///
/// In the backward pass, gradients flow through unchanged.
/// With candle autograd this is handled by [`straight_through`];
/// this function is for hosts driving their own reverse pass.
///
/// # Arguments
///
/// * `grad_output` - Gradient from the next layer
///
/// # Returns
///
/// The same gradient (identity function)
#[must_use]
pub fn quantize_backward(grad_output: &Tensor) -> Tensor {
    grad_output.clone()
}
