//! Module graph traversal and forward-hook registration.
//!
//! This module provides:
//! - `ModuleNode`: host-described module tree with closed `ModuleKind` tags
//! - `ModuleSelector`: leaf/kind/name rules deciding which outputs are quantized
//! - `register_hooks`: one-time construction of the `HookRegistry`
//! - `Hooked`: `candle_core::Module` wrapper that applies a registered hook

mod graph;
mod hooked;
mod registry;

pub use graph::{ActivationKind, LayerKind, ModuleKind, ModuleNode, NormKind};
pub use hooked::Hooked;
pub use registry::{
    register_hooks, Exclusion, ForwardHook, HookRegistration, HookRegistry, ModuleSelector,
};
