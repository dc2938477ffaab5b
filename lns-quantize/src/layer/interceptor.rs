//! Activation interceptor applied to module outputs.

use std::sync::Arc;

use candle_core::Tensor;

use super::ste::straight_through;
use crate::config::LnsParams;
use crate::error::Result;
use crate::hooks::ForwardHook;
use crate::quantization::lns_quantize;

/// Forward output of a module: one tensor or an ordered tuple of tensors.
#[derive(Debug, Clone)]
pub enum ModuleOutput {
    /// A single tensor.
    Single(Tensor),
    /// An ordered sequence of tensors.
    Tuple(Vec<Tensor>),
}

impl ModuleOutput {
    /// Apply `f` to every member, keeping the structure.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn try_map<F>(self, mut f: F) -> Result<Self>
    where
        F: FnMut(&Tensor) -> Result<Tensor>,
    {
        match self {
            Self::Single(tensor) => Ok(Self::Single(f(&tensor)?)),
            Self::Tuple(tensors) => tensors
                .iter()
                .map(f)
                .collect::<Result<Vec<_>>>()
                .map(Self::Tuple),
        }
    }

    /// Number of tensors carried.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Tuple(tensors) => tensors.len(),
        }
    }

    /// True for an empty tuple.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Members in order.
    #[must_use]
    pub fn tensors(&self) -> &[Tensor] {
        match self {
            Self::Single(tensor) => std::slice::from_ref(tensor),
            Self::Tuple(tensors) => tensors,
        }
    }

    /// The tensor of a `Single` output.
    #[must_use]
    pub fn into_single(self) -> Option<Tensor> {
        match self {
            Self::Single(tensor) => Some(tensor),
            Self::Tuple(_) => None,
        }
    }
}

impl From<Tensor> for ModuleOutput {
    fn from(tensor: Tensor) -> Self {
        Self::Single(tensor)
    }
}

impl From<Vec<Tensor>> for ModuleOutput {
    fn from(tensors: Vec<Tensor>) -> Self {
        Self::Tuple(tensors)
    }
}

/// Quantize one activation with straight-through gradients.
///
/// # Errors
///
/// Returns error if the rank is not 2 or 3 or a tensor operation fails.
pub fn quantize_activation(tensor: &Tensor, params: &LnsParams) -> Result<Tensor> {
    let quantized = lns_quantize(tensor, params)?;
    straight_through(tensor, &quantized)
}

/// Quantize every tensor of a module output.
///
/// Forward values are clamped and log-quantized; gradients flow back to the
/// original tensors unchanged.
///
/// # Errors
///
/// Returns error if any member has an unsupported rank or a tensor
/// operation fails. No partial result is returned.
pub fn quantize_forward(output: ModuleOutput, params: &LnsParams) -> Result<ModuleOutput> {
    output.try_map(|tensor| quantize_activation(tensor, params))
}

/// Per-module hook that replaces a module's output with its quantized form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivationInterceptor {
    params: LnsParams,
}

impl ActivationInterceptor {
    /// Create an interceptor over fixed quantization parameters.
    #[must_use]
    pub const fn new(params: LnsParams) -> Self {
        Self { params }
    }

    /// Quantization parameters used by this interceptor.
    #[must_use]
    pub const fn params(&self) -> &LnsParams {
        &self.params
    }

    /// Quantize a module output.
    ///
    /// # Errors
    ///
    /// See [`quantize_forward`].
    pub fn intercept(&self, output: ModuleOutput) -> Result<ModuleOutput> {
        quantize_forward(output, &self.params)
    }

    /// Wrap a shared interceptor as a uniform forward hook.
    #[must_use]
    pub fn into_hook(self: Arc<Self>) -> ForwardHook {
        Arc::new(move |output: ModuleOutput| self.intercept(output))
    }
}
