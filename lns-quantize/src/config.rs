//! Configuration for logarithmic activation quantization.

use std::path::Path;

use candle_core::DType;
use serde::{Deserialize, Serialize};

use crate::error::{LnsError, Result};
use crate::quantization::PrecisionTier;

/// Largest mantissa budget whose clamp bounds stay finite in f32.
const MAX_MANTISSA_BITS: u8 = 7;

/// Largest fractional-bit resolution accepted for any tier.
const MAX_FRAC_BITS: u8 = 20;

/// Configuration for adaptive three-tier log-domain quantization.
///
/// The clamp range is derived from `mantissa_bits`: with
/// `e = 2^(mantissa_bits - 1)`, magnitudes are bounded to `[2^-e, 2^e]`.
/// Each tier rounds `log2(|x|)` to `frac_bits` fractional bits; the
/// finer tiers are reserved for elements whose log-magnitude is within
/// the given distance of the tensor's maximum.
///
/// # Example
///
/// ```rust
/// use lns_quantize::LnsConfig;
///
/// let config = LnsConfig::default();
/// let params = config.params().unwrap();
/// assert_eq!(params.threshold_up, 65536.0);
/// assert_eq!(params.highest.scale, 64.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LnsConfig {
    /// Mantissa-bit budget that sets the representable magnitude range.
    #[serde(default = "default_mantissa_bits")]
    pub mantissa_bits: u8,

    /// Fractional bits for bulk (non-outlier) values.
    #[serde(default = "default_low_frac_bits")]
    pub low_frac_bits: u8,

    /// Fractional bits for moderate outliers.
    #[serde(default = "default_high_frac_bits")]
    pub high_frac_bits: u8,

    /// Fractional bits for extreme outliers.
    #[serde(default = "default_highest_frac_bits")]
    pub highest_frac_bits: u8,

    /// Log2 distance from the tensor maximum below which an element is a
    /// moderate outlier.
    #[serde(default = "default_high_outlier_distance")]
    pub high_outlier_distance: f64,

    /// Log2 distance from the tensor maximum below which an element is an
    /// extreme outlier.
    #[serde(default = "default_highest_outlier_distance")]
    pub highest_outlier_distance: f64,

    /// Modules whose qualified name contains this marker are never hooked.
    #[serde(default = "default_excluded_name_marker")]
    pub excluded_name_marker: String,
}

fn default_mantissa_bits() -> u8 {
    5
}

fn default_low_frac_bits() -> u8 {
    2
}

fn default_high_frac_bits() -> u8 {
    4
}

fn default_highest_frac_bits() -> u8 {
    6
}

fn default_high_outlier_distance() -> f64 {
    5.0
}

fn default_highest_outlier_distance() -> f64 {
    3.0
}

fn default_excluded_name_marker() -> String {
    "intermediate_act_fn".into()
}

impl Default for LnsConfig {
    fn default() -> Self {
        Self {
            mantissa_bits: default_mantissa_bits(),
            low_frac_bits: default_low_frac_bits(),
            high_frac_bits: default_high_frac_bits(),
            highest_frac_bits: default_highest_frac_bits(),
            high_outlier_distance: default_high_outlier_distance(),
            highest_outlier_distance: default_highest_outlier_distance(),
            excluded_name_marker: default_excluded_name_marker(),
        }
    }
}

impl LnsConfig {
    /// Create a new configuration with default values (8-bit representation).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 8-bit representation: 2/4/6 fractional bits.
    #[must_use]
    pub fn lns8() -> Self {
        Self::default()
    }

    /// 16-bit representation: 10/12/14 fractional bits.
    #[must_use]
    pub fn lns16() -> Self {
        Self {
            low_frac_bits: 10,
            high_frac_bits: 12,
            highest_frac_bits: 14,
            ..Default::default()
        }
    }

    /// Create a configuration from a named preset.
    ///
    /// Available presets: `"lns8"`, `"lns16"`.
    ///
    /// # Errors
    ///
    /// Returns error if the preset name is unknown.
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "lns8" => Ok(Self::lns8()),
            "lns16" => Ok(Self::lns16()),
            _ => Err(LnsError::InvalidConfig(format!("unknown preset: {preset}"))),
        }
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Set the mantissa-bit budget.
    #[must_use]
    pub const fn with_mantissa_bits(mut self, bits: u8) -> Self {
        self.mantissa_bits = bits;
        self
    }

    /// Set the fractional bits of the three tiers, coarsest first.
    #[must_use]
    pub const fn with_frac_bits(mut self, low: u8, high: u8, highest: u8) -> Self {
        self.low_frac_bits = low;
        self.high_frac_bits = high;
        self.highest_frac_bits = highest;
        self
    }

    /// Set the outlier distances for the high and highest tiers.
    #[must_use]
    pub const fn with_outlier_distances(mut self, high: f64, highest: f64) -> Self {
        self.high_outlier_distance = high;
        self.highest_outlier_distance = highest;
        self
    }

    /// Set the module-name marker that excludes a module from hooking.
    #[must_use]
    pub fn with_excluded_name_marker(mut self, marker: impl Into<String>) -> Self {
        self.excluded_name_marker = marker.into();
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.mantissa_bits == 0 || self.mantissa_bits > MAX_MANTISSA_BITS {
            return Err(LnsError::InvalidConfig(format!(
                "mantissa_bits must be 1-{MAX_MANTISSA_BITS}"
            )));
        }

        if !(self.low_frac_bits < self.high_frac_bits
            && self.high_frac_bits < self.highest_frac_bits)
        {
            return Err(LnsError::InvalidConfig(
                "fractional bits must increase: low < high < highest".to_string(),
            ));
        }

        if self.highest_frac_bits > MAX_FRAC_BITS {
            return Err(LnsError::InvalidConfig(format!(
                "highest_frac_bits must be <= {MAX_FRAC_BITS}"
            )));
        }

        for (name, distance) in [
            ("high_outlier_distance", self.high_outlier_distance),
            ("highest_outlier_distance", self.highest_outlier_distance),
        ] {
            if !distance.is_finite() || distance <= 0.0 {
                return Err(LnsError::InvalidConfig(format!(
                    "{name} must be finite and > 0"
                )));
            }
        }

        if self.highest_outlier_distance >= self.high_outlier_distance {
            return Err(LnsError::InvalidConfig(
                "highest_outlier_distance must be < high_outlier_distance".to_string(),
            ));
        }

        if self.excluded_name_marker.is_empty() {
            return Err(LnsError::InvalidConfig(
                "excluded_name_marker must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate and derive the immutable quantization parameters.
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid.
    pub fn params(&self) -> Result<LnsParams> {
        self.validate()?;

        let clamp_exponent = 1i32 << (self.mantissa_bits - 1);

        Ok(LnsParams {
            threshold_down: 2f64.powi(-clamp_exponent),
            threshold_up: 2f64.powi(clamp_exponent),
            low: TierSpec::new(PrecisionTier::Low, self.low_frac_bits, None),
            high: TierSpec::new(
                PrecisionTier::High,
                self.high_frac_bits,
                Some(self.high_outlier_distance),
            ),
            highest: TierSpec::new(
                PrecisionTier::Highest,
                self.highest_frac_bits,
                Some(self.highest_outlier_distance),
            ),
        })
    }
}

/// Resolution and selection boundary of one precision tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierSpec {
    /// Which tier this is.
    pub tier: PrecisionTier,

    /// Number of fractional bits kept in the log domain.
    pub frac_bits: u8,

    /// `2^frac_bits`; log2 values are rounded to multiples of `1 / scale`.
    pub scale: f64,

    /// Elements with `log_x > max_log - boundary` qualify for this tier.
    /// `None` for the baseline tier.
    pub boundary: Option<f64>,
}

impl TierSpec {
    fn new(tier: PrecisionTier, frac_bits: u8, boundary: Option<f64>) -> Self {
        Self {
            tier,
            frac_bits,
            scale: f64::from(1u32 << frac_bits),
            boundary,
        }
    }
}

/// Quantization parameters derived once from an [`LnsConfig`].
///
/// Read-only after construction; share it by reference or behind an `Arc`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LnsParams {
    /// Smallest representable nonzero magnitude.
    pub threshold_down: f64,

    /// Largest representable magnitude.
    pub threshold_up: f64,

    /// Baseline tier.
    pub low: TierSpec,

    /// Moderate-outlier tier.
    pub high: TierSpec,

    /// Extreme-outlier tier.
    pub highest: TierSpec,
}

impl LnsParams {
    /// Parameters of the given tier.
    #[must_use]
    pub const fn tier(&self, tier: PrecisionTier) -> &TierSpec {
        match tier {
            PrecisionTier::Low => &self.low,
            PrecisionTier::High => &self.high,
            PrecisionTier::Highest => &self.highest,
        }
    }

    /// All tiers, coarsest first.
    #[must_use]
    pub const fn tiers(&self) -> [TierSpec; 3] {
        [self.low, self.high, self.highest]
    }

    /// Clamp range narrowed to the powers of two `dtype` holds as finite,
    /// nonzero values.
    ///
    /// F16 tops out at 65504, so the default `2^16` bound becomes `2^15`.
    #[must_use]
    pub fn bounds_for(&self, dtype: DType) -> (f64, f64) {
        let (min_exp, max_exp) = match dtype {
            DType::F16 => (-24, 15),
            DType::BF16 => (-133, 127),
            DType::F32 => (-149, 127),
            _ => return (self.threshold_down, self.threshold_up),
        };
        (
            self.threshold_down.max(f64::from(min_exp).exp2()),
            self.threshold_up.min(f64::from(max_exp).exp2()),
        )
    }
}

impl Default for LnsParams {
    fn default() -> Self {
        LnsConfig::default()
            .params()
            .unwrap_or_else(|_| unreachable!("default config is valid"))
    }
}
