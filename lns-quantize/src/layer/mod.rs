//! Forward-path layers for LNS activation quantization.
//!
//! This module provides:
//! - `ActivationInterceptor`: replaces a module output with its quantized form
//! - Straight-Through Estimator for training

mod interceptor;
mod ste;

pub use interceptor::{quantize_activation, quantize_forward, ActivationInterceptor, ModuleOutput};
pub use ste::{quantize_backward, straight_through};
