//! Per-element precision tier selection.

use std::fmt;

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use crate::config::LnsParams;
use crate::error::{LnsError, Result};

/// Precision tier assigned to a nonzero element, coarsest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionTier {
    /// Bulk values.
    Low,
    /// Moderate outliers.
    High,
    /// Extreme outliers, closest to the tensor maximum.
    Highest,
}

impl PrecisionTier {
    /// Pick the tier for `log_x` given the tensor's maximum log-magnitude.
    ///
    /// An element belongs to a finer tier when `log_x > max_log - boundary`;
    /// sitting exactly on a boundary keeps the coarser tier.
    #[must_use]
    pub fn select(log_x: f64, max_log: f64, params: &LnsParams) -> Self {
        let within = |boundary: Option<f64>| boundary.is_some_and(|d| log_x > max_log - d);

        if within(params.highest.boundary) {
            Self::Highest
        } else if within(params.high.boundary) {
            Self::High
        } else {
            Self::Low
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
            Self::Highest => "highest",
        }
    }
}

impl fmt::Display for PrecisionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Histogram of tier assignments for one tensor evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    /// Zero elements, left out of the log domain.
    pub zero: usize,
    /// Elements in the baseline tier.
    pub low: usize,
    /// Elements in the moderate-outlier tier.
    pub high: usize,
    /// Elements in the extreme-outlier tier.
    pub highest: usize,
}

impl TierCounts {
    /// Number of nonzero elements.
    #[must_use]
    pub const fn nonzero(&self) -> usize {
        self.low + self.high + self.highest
    }
}

/// Tier of every element of a tensor, in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct TierAssignment {
    /// `None` for zero elements.
    pub tiers: Vec<Option<PrecisionTier>>,

    /// Maximum `log2(|x|)` over the nonzero elements, `None` if there are none.
    pub max_log: Option<f64>,
}

impl TierAssignment {
    pub(crate) fn from_values(values: &[f64], params: &LnsParams) -> Self {
        let max_log = values
            .iter()
            .filter(|v| **v != 0.0)
            .map(|v| v.abs().log2())
            .reduce(f64::max);

        let tiers = match max_log {
            Some(max_log) => values
                .iter()
                .map(|&v| {
                    (v != 0.0).then(|| PrecisionTier::select(v.abs().log2(), max_log, params))
                })
                .collect(),
            None => vec![None; values.len()],
        };

        Self { tiers, max_log }
    }

    /// True when the tensor had no nonzero element.
    #[must_use]
    pub fn is_all_zero(&self) -> bool {
        self.max_log.is_none()
    }

    /// Tier histogram.
    #[must_use]
    pub fn counts(&self) -> TierCounts {
        let mut counts = TierCounts::default();
        for tier in &self.tiers {
            match tier {
                None => counts.zero += 1,
                Some(PrecisionTier::Low) => counts.low += 1,
                Some(PrecisionTier::High) => counts.high += 1,
                Some(PrecisionTier::Highest) => counts.highest += 1,
            }
        }
        counts
    }
}

/// Reject tensors the tier selector cannot handle.
pub(crate) fn ensure_quantizable_rank(tensor: &Tensor) -> Result<()> {
    match tensor.rank() {
        2 | 3 => Ok(()),
        rank => Err(LnsError::UnsupportedRank {
            rank,
            shape: tensor.dims().to_vec(),
        }),
    }
}

/// Flatten a tensor to host f64 values in row-major order.
pub(crate) fn host_values(tensor: &Tensor) -> Result<Vec<f64>> {
    Ok(tensor.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?)
}

/// Classify each element of a clamped rank-2 or rank-3 tensor.
///
/// # Errors
///
/// Returns [`LnsError::UnsupportedRank`] for any other rank, or an error if
/// reading the tensor fails.
pub fn select_tiers(clamped: &Tensor, params: &LnsParams) -> Result<TierAssignment> {
    ensure_quantizable_rank(clamped)?;
    let values = host_values(clamped)?;
    Ok(TierAssignment::from_values(&values, params))
}
