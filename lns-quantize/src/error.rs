//! Error types for lns-quantize.

use thiserror::Error;

/// Result type alias for lns-quantize operations.
pub type Result<T> = std::result::Result<T, LnsError>;

/// Errors that can occur while configuring or applying LNS quantization.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LnsError {
    /// The tier selector only handles rank-2 and rank-3 activations.
    #[error("unsupported tensor shape: rank {rank} {shape:?}, expected rank 2 or 3")]
    UnsupportedRank {
        /// Rank of the rejected tensor.
        rank: usize,
        /// Full shape of the rejected tensor.
        shape: Vec<usize>,
    },

    /// Invalid configuration parameter.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid config file.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// Module path not present in the module graph.
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// Candle tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LnsError {
    /// Convert into a candle error so it can cross a `candle_core::Module`
    /// boundary. Tensor errors are unwrapped rather than nested.
    #[must_use]
    pub fn into_candle(self) -> candle_core::Error {
        match self {
            Self::Tensor(err) => err,
            other => candle_core::Error::wrap(other),
        }
    }
}
