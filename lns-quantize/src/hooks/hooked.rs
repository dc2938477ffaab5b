//! Module wrapper that routes forward outputs through a hook.

use std::fmt;

use candle_core::{Module, Tensor};

use super::registry::ForwardHook;
use crate::error::LnsError;
use crate::layer::ModuleOutput;

/// A module whose forward output is passed through an optional hook.
///
/// Created by [`super::HookRegistry::attach`]. Without a hook it behaves
/// exactly like the wrapped module.
///
/// # Example
///
/// ```rust
/// use candle_core::{Device, Module, Tensor};
/// use lns_quantize::hooks::{register_hooks, ModuleNode};
/// use lns_quantize::LnsConfig;
///
/// # fn main() -> lns_quantize::Result<()> {
/// let graph = ModuleNode::container("").with_child(ModuleNode::linear("proj"));
/// let registry = register_hooks(&graph, &LnsConfig::default())?;
///
/// let weight = Tensor::new(&[[3.0f32, 0.0], [0.0, 1.0]], &Device::Cpu)?;
/// let proj = registry.attach("proj", candle_nn::Linear::new(weight, None));
///
/// let x = Tensor::new(&[[1.0f32, 1e-9]], &Device::Cpu)?;
/// let y: Vec<f32> = proj.forward(&x)?.flatten_all()?.to_vec1()?;
/// assert_eq!(y[1], 1.0 / 65536.0);
/// # Ok(())
/// # }
/// ```
pub struct Hooked<M> {
    inner: M,
    path: String,
    hook: Option<ForwardHook>,
}

impl<M> Hooked<M> {
    pub(crate) fn new(inner: M, path: &str, hook: Option<ForwardHook>) -> Self {
        Self {
            inner,
            path: path.to_string(),
            hook,
        }
    }

    /// Wrapped module.
    #[must_use]
    pub const fn inner(&self) -> &M {
        &self.inner
    }

    /// Unwrap, dropping the hook.
    #[must_use]
    pub fn into_inner(self) -> M {
        self.inner
    }

    /// Qualified module name.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True if a hook is attached.
    #[must_use]
    pub const fn is_hooked(&self) -> bool {
        self.hook.is_some()
    }

    /// Pass an output produced by the wrapped module through the hook.
    ///
    /// For modules returning several tensors, call this with
    /// [`ModuleOutput::Tuple`].
    ///
    /// # Errors
    ///
    /// Returns the hook's error.
    pub fn intercept(&self, output: ModuleOutput) -> crate::Result<ModuleOutput> {
        match &self.hook {
            Some(hook) => {
                tracing::trace!(module = %self.path, tensors = output.len(), "intercepting output");
                hook(output)
            }
            None => Ok(output),
        }
    }
}

impl<M: Module> Module for Hooked<M> {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let output = self.inner.forward(xs)?;
        if self.hook.is_none() {
            return Ok(output);
        }

        match self
            .intercept(ModuleOutput::Single(output))
            .map_err(LnsError::into_candle)?
        {
            ModuleOutput::Single(tensor) => Ok(tensor),
            ModuleOutput::Tuple(_) => candle_core::bail!(
                "hook for {} turned a single output into a tuple",
                self.path
            ),
        }
    }
}

impl<M: fmt::Debug> fmt::Debug for Hooked<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooked")
            .field("inner", &self.inner)
            .field("path", &self.path)
            .field("hooked", &self.is_hooked())
            .finish()
    }
}
