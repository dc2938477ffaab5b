//! Module graph description.
//!
//! candle models carry no runtime module tree, so the host describes its
//! model once as a tree of [`ModuleNode`]s. Qualified names follow the
//! dotted convention used by `VarBuilder` prefixes (`model.layers.0.mlp`).

use std::fmt;

/// Elementwise activation function kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationKind {
    /// Rectified linear unit.
    Relu,
    /// Hyperbolic tangent.
    Tanh,
    /// Gaussian error linear unit.
    Gelu,
    /// Logistic sigmoid.
    Sigmoid,
    /// Softmax.
    Softmax,
    /// Leaky rectified linear unit.
    LeakyRelu,
    /// Parametric rectified linear unit.
    PRelu,
    /// Sigmoid linear unit (swish).
    Silu,
    /// Any other activation.
    Other,
}

impl ActivationKind {
    /// Activation kinds whose outputs are never quantized.
    pub const EXCLUDED: [Self; 7] = [
        Self::Relu,
        Self::Tanh,
        Self::Gelu,
        Self::Sigmoid,
        Self::Softmax,
        Self::LeakyRelu,
        Self::PRelu,
    ];

    /// True if this kind is in [`Self::EXCLUDED`].
    #[must_use]
    pub fn is_excluded(self) -> bool {
        Self::EXCLUDED.contains(&self)
    }
}

/// Normalization module kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormKind {
    /// Layer normalization.
    LayerNorm,
    /// Root-mean-square normalization.
    RmsNorm,
    /// Batch normalization.
    BatchNorm,
    /// Group normalization.
    GroupNorm,
}

/// Computational layer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    /// Affine projection.
    Linear,
    /// Embedding lookup.
    Embedding,
    /// Convolution.
    Conv,
    /// Anything else that computes an output.
    Other,
}

/// What a module is, fixed when the graph is described.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// Indexed list of modules.
    List,
    /// Module composed of child modules.
    Container,
    /// Normalization layer.
    Normalization(NormKind),
    /// Dropout layer.
    Dropout,
    /// Elementwise activation function.
    Activation(ActivationKind),
    /// Computational layer.
    Layer(LayerKind),
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => f.write_str("list"),
            Self::Container => f.write_str("container"),
            Self::Normalization(kind) => write!(f, "norm({kind:?})"),
            Self::Dropout => f.write_str("dropout"),
            Self::Activation(kind) => write!(f, "activation({kind:?})"),
            Self::Layer(kind) => write!(f, "layer({kind:?})"),
        }
    }
}

/// One module in the graph.
///
/// # Example
///
/// ```rust
/// use lns_quantize::hooks::{ModuleNode, NormKind};
///
/// let block = ModuleNode::container("mlp")
///     .with_child(ModuleNode::linear("fc1"))
///     .with_child(ModuleNode::norm("ln", NormKind::LayerNorm));
/// let model = ModuleNode::container("").with_child(ModuleNode::list("layers", vec![block]));
///
/// let names: Vec<String> = model.named_modules().into_iter().map(|(n, _)| n).collect();
/// assert_eq!(names, ["", "layers", "layers.0", "layers.0.fc1", "layers.0.ln"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleNode {
    name: String,
    kind: ModuleKind,
    children: Vec<ModuleNode>,
}

impl ModuleNode {
    /// Create a node without children.
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        Self {
            name: name.into(),
            kind,
            children: Vec::new(),
        }
    }

    /// Empty container; add children with [`Self::with_child`].
    pub fn container(name: impl Into<String>) -> Self {
        Self::new(name, ModuleKind::Container)
    }

    /// List of modules, renamed `0`, `1`, ... in order.
    pub fn list(name: impl Into<String>, items: Vec<ModuleNode>) -> Self {
        let children = items
            .into_iter()
            .enumerate()
            .map(|(index, mut item)| {
                item.name = index.to_string();
                item
            })
            .collect();

        Self {
            name: name.into(),
            kind: ModuleKind::List,
            children,
        }
    }

    /// Linear layer.
    pub fn linear(name: impl Into<String>) -> Self {
        Self::new(name, ModuleKind::Layer(LayerKind::Linear))
    }

    /// Embedding layer.
    pub fn embedding(name: impl Into<String>) -> Self {
        Self::new(name, ModuleKind::Layer(LayerKind::Embedding))
    }

    /// Normalization layer.
    pub fn norm(name: impl Into<String>, kind: NormKind) -> Self {
        Self::new(name, ModuleKind::Normalization(kind))
    }

    /// Dropout layer.
    pub fn dropout(name: impl Into<String>) -> Self {
        Self::new(name, ModuleKind::Dropout)
    }

    /// Activation function.
    pub fn activation(name: impl Into<String>, kind: ActivationKind) -> Self {
        Self::new(name, ModuleKind::Activation(kind))
    }

    /// Append a child.
    #[must_use]
    pub fn with_child(mut self, child: ModuleNode) -> Self {
        self.children.push(child);
        self
    }

    /// Append a child in place.
    pub fn push_child(&mut self, child: ModuleNode) {
        self.children.push(child);
    }

    /// Local name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module kind.
    #[must_use]
    pub const fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Direct children.
    #[must_use]
    pub fn children(&self) -> &[ModuleNode] {
        &self.children
    }

    /// True if the module has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Every module with its qualified name, depth-first pre-order.
    ///
    /// The root is reported under the empty name and its children without
    /// a prefix.
    #[must_use]
    pub fn named_modules(&self) -> Vec<(String, &ModuleNode)> {
        let mut out = Vec::new();
        let mut stack: Vec<(String, &ModuleNode)> = vec![(String::new(), self)];

        while let Some((path, node)) = stack.pop() {
            for child in node.children.iter().rev() {
                stack.push((join_path(&path, &child.name), child));
            }
            out.push((path, node));
        }
        out
    }

    /// Look up a module by qualified name.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&ModuleNode> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |node, segment| {
            node.children.iter().find(|child| child.name == segment)
        })
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
