//! Module selection and hook registration.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::graph::{ActivationKind, ModuleKind, ModuleNode, NormKind};
use super::hooked::Hooked;
use crate::config::LnsConfig;
use crate::error::{LnsError, Result};
use crate::layer::{ActivationInterceptor, ModuleOutput};

/// Uniform interface for forward-output hooks.
pub type ForwardHook = Arc<dyn Fn(ModuleOutput) -> Result<ModuleOutput> + Send + Sync>;

/// Why a module is not intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// Module has child modules.
    HasChildren,
    /// Module is a list or container.
    ContainerKind,
    /// Qualified name contains the reserved marker.
    NameMarker,
    /// Normalization layer.
    Normalization(NormKind),
    /// Dropout layer.
    Dropout,
    /// Activation kind in [`ActivationKind::EXCLUDED`].
    ExcludedActivation(ActivationKind),
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HasChildren => f.write_str("has children"),
            Self::ContainerKind => f.write_str("container"),
            Self::NameMarker => f.write_str("reserved name marker"),
            Self::Normalization(kind) => write!(f, "normalization ({kind:?})"),
            Self::Dropout => f.write_str("dropout"),
            Self::ExcludedActivation(kind) => write!(f, "excluded activation ({kind:?})"),
        }
    }
}

/// Decides which modules qualify for interception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSelector {
    excluded_name_marker: String,
}

impl ModuleSelector {
    /// Selector excluding names that contain `marker`.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            excluded_name_marker: marker.into(),
        }
    }

    /// Selector using the marker from `config`.
    #[must_use]
    pub fn from_config(config: &LnsConfig) -> Self {
        Self::new(config.excluded_name_marker.clone())
    }

    /// Reason `node` at `path` is skipped, or `None` if it qualifies.
    #[must_use]
    pub fn exclusion(&self, path: &str, node: &ModuleNode) -> Option<Exclusion> {
        if !node.is_leaf() {
            return Some(Exclusion::HasChildren);
        }
        if path.contains(self.excluded_name_marker.as_str()) {
            return Some(Exclusion::NameMarker);
        }
        match node.kind() {
            ModuleKind::List | ModuleKind::Container => Some(Exclusion::ContainerKind),
            ModuleKind::Normalization(kind) => Some(Exclusion::Normalization(kind)),
            ModuleKind::Dropout => Some(Exclusion::Dropout),
            ModuleKind::Activation(kind) if kind.is_excluded() => {
                Some(Exclusion::ExcludedActivation(kind))
            }
            ModuleKind::Activation(_) | ModuleKind::Layer(_) => None,
        }
    }

    /// True if `node` at `path` should be intercepted.
    #[must_use]
    pub fn qualifies(&self, path: &str, node: &ModuleNode) -> bool {
        self.exclusion(path, node).is_none()
    }
}

impl Default for ModuleSelector {
    fn default() -> Self {
        Self::from_config(&LnsConfig::default())
    }
}

/// One intercepted module.
#[derive(Clone)]
pub struct HookRegistration {
    path: String,
    kind: ModuleKind,
    hook: ForwardHook,
}

impl HookRegistration {
    /// Qualified module name.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Module kind.
    #[must_use]
    pub const fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Attached hook.
    #[must_use]
    pub fn hook(&self) -> &ForwardHook {
        &self.hook
    }
}

impl fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistration")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Fixed set of intercepted modules, built once per model.
///
/// Read-only after construction; clone it or share it behind an `Arc`
/// across worker threads.
#[derive(Clone, Debug, Default)]
pub struct HookRegistry {
    registrations: Vec<HookRegistration>,
    index: HashMap<String, usize>,
    known: HashSet<String>,
}

impl HookRegistry {
    /// Walk `graph` once and attach `hook` to every module `selector` accepts.
    #[must_use]
    pub fn build(graph: &ModuleNode, selector: &ModuleSelector, hook: &ForwardHook) -> Self {
        let mut registry = Self::default();

        for (path, node) in graph.named_modules() {
            registry.known.insert(path.clone());

            if let Some(reason) = selector.exclusion(&path, node) {
                tracing::debug!(module = %path, kind = %node.kind(), %reason, "skipping module");
                continue;
            }

            registry
                .index
                .insert(path.clone(), registry.registrations.len());
            registry.registrations.push(HookRegistration {
                path,
                kind: node.kind(),
                hook: Arc::clone(hook),
            });
        }

        registry
    }

    /// Number of intercepted modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// True if no module was selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// True if the module at `path` is intercepted.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Qualified names of intercepted modules, in traversal order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.registrations.iter().map(HookRegistration::path)
    }

    /// Registrations in traversal order.
    pub fn iter(&self) -> impl Iterator<Item = &HookRegistration> {
        self.registrations.iter()
    }

    /// Hook attached to `path`, if any.
    #[must_use]
    pub fn hook(&self, path: &str) -> Option<&ForwardHook> {
        self.index
            .get(path)
            .map(|&i| &self.registrations[i].hook)
    }

    /// Route `output` of the module at `path` through its hook.
    ///
    /// Outputs of modules without a hook are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns the hook's error.
    pub fn apply(&self, path: &str, output: ModuleOutput) -> Result<ModuleOutput> {
        match self.hook(path) {
            Some(hook) => hook(output),
            None => Ok(output),
        }
    }

    /// Wrap `module` so its output passes through the hook for `path`.
    ///
    /// Modules without a hook are wrapped as pass-through.
    pub fn attach<M>(&self, path: &str, module: M) -> Hooked<M> {
        Hooked::new(module, path, self.hook(path).cloned())
    }

    /// Like [`Self::attach`], but rejects paths absent from the graph.
    ///
    /// # Errors
    ///
    /// Returns [`LnsError::UnknownModule`] if the graph had no such module.
    pub fn attach_strict<M>(&self, path: &str, module: M) -> Result<Hooked<M>> {
        if !self.known.contains(path) {
            return Err(LnsError::UnknownModule(path.to_string()));
        }
        Ok(self.attach(path, module))
    }
}

/// Select qualifying modules of `graph` and attach the activation
/// interceptor to each.
///
/// Run once per model, before any forward pass. All registrations share
/// one interceptor built from `config`.
///
/// # Errors
///
/// Returns error if `config` is invalid.
pub fn register_hooks(graph: &ModuleNode, config: &LnsConfig) -> Result<HookRegistry> {
    let params = config.params()?;
    let hook = Arc::new(ActivationInterceptor::new(params)).into_hook();
    let selector = ModuleSelector::from_config(config);

    let registry = HookRegistry::build(graph, &selector, &hook);
    tracing::info!(
        hooked = registry.len(),
        modules = registry.known.len(),
        "registered activation quantization hooks"
    );
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::LayerKind;
    use candle_core::{Device, Tensor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bert_like() -> ModuleNode {
        let layer = ModuleNode::container("layer")
            .with_child(ModuleNode::linear("query"))
            .with_child(ModuleNode::linear("value"))
            .with_child(
                ModuleNode::container("intermediate")
                    .with_child(ModuleNode::linear("dense"))
                    .with_child(ModuleNode::activation(
                        "intermediate_act_fn",
                        ActivationKind::Other,
                    )),
            )
            .with_child(ModuleNode::norm("LayerNorm", NormKind::LayerNorm))
            .with_child(ModuleNode::dropout("dropout"))
            .with_child(ModuleNode::activation("act", ActivationKind::Gelu))
            .with_child(ModuleNode::activation("swish", ActivationKind::Silu));

        ModuleNode::container("")
            .with_child(ModuleNode::embedding("embeddings"))
            .with_child(ModuleNode::list("layers", vec![layer]))
            .with_child(ModuleNode::list("empty", Vec::new()))
    }

    #[test]
    fn test_registration_exclusions() {
        let registry = register_hooks(&bert_like(), &LnsConfig::default()).unwrap();
        let paths: Vec<&str> = registry.paths().collect();

        assert_eq!(
            paths,
            vec![
                "embeddings",
                "layers.0.query",
                "layers.0.value",
                "layers.0.intermediate.dense",
                "layers.0.swish",
            ]
        );
        assert!(!registry.contains("layers.0.LayerNorm"));
        assert!(!registry.contains("layers.0.dropout"));
        assert!(!registry.contains("layers.0.intermediate.intermediate_act_fn"));
        assert!(!registry.contains("layers.0.act"));
        assert!(!registry.contains("empty"));
        assert!(!registry.contains(""));
    }

    #[test]
    fn test_exclusion_reasons() {
        let selector = ModuleSelector::default();
        let graph = bert_like();
        let reason = |path: &str| selector.exclusion(path, graph.find(path).unwrap());

        assert_eq!(reason(""), Some(Exclusion::HasChildren));
        assert_eq!(reason("empty"), Some(Exclusion::ContainerKind));
        assert_eq!(
            reason("layers.0.intermediate.intermediate_act_fn"),
            Some(Exclusion::NameMarker)
        );
        assert_eq!(
            reason("layers.0.LayerNorm"),
            Some(Exclusion::Normalization(NormKind::LayerNorm))
        );
        assert_eq!(reason("layers.0.dropout"), Some(Exclusion::Dropout));
        assert_eq!(
            reason("layers.0.act"),
            Some(Exclusion::ExcludedActivation(ActivationKind::Gelu))
        );
        assert_eq!(reason("layers.0.query"), None);
    }

    #[test]
    fn test_name_marker_applies_to_any_kind() {
        let selector = ModuleSelector::new("skip_me");
        let node = ModuleNode::linear("proj");

        assert!(selector.qualifies("encoder.proj", &node));
        assert!(!selector.qualifies("encoder.skip_me.proj", &node));
    }

    #[test]
    fn test_build_with_custom_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hook: ForwardHook = Arc::new(move |output: ModuleOutput| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(output)
        });

        let registry = HookRegistry::build(&bert_like(), &ModuleSelector::default(), &hook);
        assert_eq!(registry.len(), 5);

        let tensor = Tensor::ones((1, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        registry
            .apply("layers.0.query", ModuleOutput::Single(tensor.clone()))
            .unwrap();
        registry
            .apply("layers.0.dropout", ModuleOutput::Single(tensor))
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_quantizes_registered_paths() {
        let registry = register_hooks(&bert_like(), &LnsConfig::default()).unwrap();
        let tensor = Tensor::from_vec(vec![1e-9f32, 3.0], (1, 2), &Device::Cpu).unwrap();

        let hooked = registry
            .apply("layers.0.query", ModuleOutput::Single(tensor.clone()))
            .unwrap();
        let skipped = registry
            .apply("layers.0.LayerNorm", ModuleOutput::Single(tensor))
            .unwrap();

        let hooked: Vec<f32> = hooked.tensors()[0].flatten_all().unwrap().to_vec1().unwrap();
        let skipped: Vec<f32> = skipped.tensors()[0].flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(hooked[0], 1.0 / 65536.0);
        assert_eq!(skipped, vec![1e-9, 3.0]);
    }

    #[test]
    fn test_registration_metadata() {
        let registry = register_hooks(&bert_like(), &LnsConfig::default()).unwrap();
        let first = registry.iter().next().unwrap();

        assert_eq!(first.path(), "embeddings");
        assert_eq!(first.kind(), ModuleKind::Layer(LayerKind::Embedding));
        assert!(registry.hook("embeddings").is_some());
        assert!(registry.hook("layers.0.dropout").is_none());
        assert!(format!("{first:?}").contains("embeddings"));
    }

    #[test]
    fn test_attach_strict() {
        let registry = register_hooks(&bert_like(), &LnsConfig::default()).unwrap();

        assert!(registry.attach_strict("layers.0.query", ()).unwrap().is_hooked());
        assert!(!registry.attach_strict("layers.0.dropout", ()).unwrap().is_hooked());
        assert!(matches!(
            registry.attach_strict("layers.9.query", ()),
            Err(LnsError::UnknownModule(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LnsConfig::default().with_mantissa_bits(0);
        assert!(register_hooks(&bert_like(), &config).is_err());
    }
}
