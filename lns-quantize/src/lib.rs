//! Adaptive mixed-precision logarithmic activation quantization for candle.
//!
//! This crate emulates low-bit-width activation storage during training and
//! inference while keeping gradients exact:
//! - **Forward**: activations are clamped and rounded in the log2 domain
//! - **Backward**: Straight-Through Estimator (identity gradient)
//!
//! # Features
//!
//! - Three precision tiers per tensor, picked by each element's distance
//!   from the tensor's largest log-magnitude
//! - Module-graph traversal that hooks every eligible leaf module once
//! - `Hooked`: `candle_core::Module` wrapper applying the registered hook
//! - YAML configuration with `lns8` / `lns16` presets
//!
//! # Quick Start
//!
//! ```rust
//! use candle_core::{Device, Tensor};
//! use lns_quantize::{quantize_forward, LnsConfig, ModuleOutput};
//!
//! # fn main() -> lns_quantize::Result<()> {
//! let params = LnsConfig::default().params()?;
//!
//! let activations = Tensor::new(&[[1.0f32, 2.0, 1024.0]], &Device::Cpu)?;
//! let output = quantize_forward(ModuleOutput::Single(activations), &params)?;
//!
//! let values: Vec<f32> = output.tensors()[0].flatten_all()?.to_vec1()?;
//! assert_eq!(values, vec![1.0, 2.0, 1024.0]);
//! # Ok(())
//! # }
//! ```
//!
//! # Quantization
//!
//! With `e = 2^(mantissa_bits - 1)` and per-tier `scale = 2^frac_bits`:
//! ```text
//! |x'|   = clamp(|x|, 2^-e, 2^e)                    (x != 0)
//! log_x  = log2(|x'|),  m = max(log_x)
//! tier   = highest if log_x > m - 3, high if log_x > m - 5, else low
//! x_q    = sign(x) * 2^(round(log_x * scale_tier) / scale_tier)
//! ```
//! Zeros pass through untouched.
//!
//! # Module Selection
//!
//! A module is hooked when it is a leaf, not a list/container, not a
//! normalization or dropout layer, not a ReLU/Tanh/GELU/Sigmoid/Softmax/
//! LeakyReLU/PReLU activation, and its qualified name does not contain the
//! configured marker (`intermediate_act_fn` by default).

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::float_cmp)]
#![allow(clippy::doc_markdown)] // Many technical terms don't need backticks

mod config;
mod error;
pub mod hooks;
pub mod layer;
pub mod quantization;

pub use config::{LnsConfig, LnsParams, TierSpec};
pub use error::{LnsError, Result};
pub use hooks::{register_hooks, HookRegistry, Hooked, ModuleNode};
pub use layer::{
    quantize_activation, quantize_backward, quantize_forward, ActivationInterceptor, ModuleOutput,
};
pub use quantization::{
    clamp_range, lns_quantize, quantize_log_domain, select_tiers, PrecisionTier, TierAssignment,
    TierCounts,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{LnsConfig, LnsParams};
    pub use crate::error::{LnsError, Result};
    pub use crate::hooks::{register_hooks, HookRegistry, ModuleNode};
    pub use crate::layer::{quantize_backward, quantize_forward, ModuleOutput};
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Module, Tensor};
    use candle_nn::Linear;

    #[test]
    fn test_basic_workflow() {
        let device = Device::Cpu;
        let config = LnsConfig::default();

        let graph = ModuleNode::container("")
            .with_child(ModuleNode::linear("up"))
            .with_child(ModuleNode::linear("down"));
        let registry = register_hooks(&graph, &config).unwrap();
        assert_eq!(registry.len(), 2);

        let up = registry.attach(
            "up",
            Linear::new(Tensor::randn(0.0f32, 1.0, (64, 32), &device).unwrap(), None),
        );
        let down = registry.attach(
            "down",
            Linear::new(Tensor::randn(0.0f32, 1.0, (8, 64), &device).unwrap(), None),
        );

        let input = Tensor::randn(0.0f32, 1.0, (4, 32), &device).unwrap();
        let output = down.forward(&up.forward(&input).unwrap()).unwrap();
        assert_eq!(output.dims(), &[4, 8]);

        // every nonzero output sits on a quantization grid
        let params = config.params().unwrap();
        let values: Vec<f32> = output.flatten_all().unwrap().to_vec1().unwrap();
        for v in values.into_iter().filter(|v| *v != 0.0) {
            let log = f64::from(v.abs()).log2() * params.highest.scale;
            assert!((log - log.round()).abs() < 1e-3, "{v} is off-grid");
        }
    }

    #[test]
    fn test_quantization_workflow() {
        let device = Device::Cpu;
        let params = LnsParams::default();

        let activations = Tensor::randn(0.0f32, 1.0, (2, 16, 64), &device).unwrap();
        let clamped = clamp_range(&activations, &params).unwrap();
        let assignment = select_tiers(&clamped, &params).unwrap();

        assert_eq!(assignment.tiers.len(), 2 * 16 * 64);
        assert!(assignment.counts().highest >= 1);

        let quantized = quantize_log_domain(&clamped, &params).unwrap();
        assert_eq!(quantized.dims(), &[2, 16, 64]);
        assert_eq!(quantized.dtype(), DType::F32);
    }

    #[test]
    fn test_backward_identity() {
        let device = Device::Cpu;
        let grad = Tensor::randn(0.0f32, 1.0, (3, 7), &device).unwrap();

        let back = quantize_backward(&grad);
        let a: Vec<f32> = grad.flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = back.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_config_builder() {
        let config = LnsConfig::new()
            .with_mantissa_bits(6)
            .with_frac_bits(3, 5, 7)
            .with_outlier_distances(4.0, 2.0);

        let params = config.params().unwrap();
        assert_eq!(params.threshold_up, 2f64.powi(32));
        assert_eq!(params.low.scale, 8.0);
        assert_eq!(params.high.boundary, Some(4.0));
        assert_eq!(params.highest.scale, 128.0);
    }
}
