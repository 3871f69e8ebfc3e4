//! Tunable parameters for the amplitude engine and detection post-processing.

use std::path::Path;
use serde::{ Deserialize, Serialize };
use crate::error::{ SimError, SimResult };

/// Largest usable value of [`SimConfig::max_decomposition_pairs`]; every
/// subset of the uncertain pairs is indexed by the bits of a `u64`.
pub const MAX_DECOMPOSITION_PAIRS: usize = 63;

/// Strategy used to evaluate matrix permanents.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermanentMethod {
    /// Recursive expansion over row/column choices. Exponential in photon
    /// number with a large constant; use as a baseline for small inputs.
    Direct,
    /// Ryser inclusion-exclusion over column subsets, visited in Gray-code
    /// order.
    #[default]
    Ryser,
    /// Glynn's formula over sign vectors, visited in Gray-code order.
    Glynn,
}

/// Engine configuration.
///
/// Every field has a default, so a TOML file only needs to name the values it
/// overrides:
/// ```toml
/// method = "glynn"
/// max_decomposition_pairs = 12
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Permanent evaluation strategy.
    pub method: PermanentMethod,
    /// Output amplitudes with magnitude below this value are dropped.
    pub amplitude_cutoff: f64,
    /// Largest acceptable estimated absolute error on a normalized amplitude
    /// before a [`NumericalWarning`][crate::NumericalWarning] is raised.
    pub cancellation_tol: f64,
    /// Photon number from which Ryser enumeration is split across the rayon
    /// pool.
    pub parallel_threshold: usize,
    /// Maximum number of partially overlapping photon pairs the
    /// distinguishability decomposition may branch on, at most
    /// [`MAX_DECOMPOSITION_PAIRS`].
    pub max_decomposition_pairs: usize,
    /// Largest number of dark clicks per channel tracked exactly; the Poisson
    /// tail beyond it is folded into this count.
    pub dark_count_cutoff: usize,
    /// Tolerance used when checking density matrices for Hermiticity.
    pub hermitian_tol: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            method: PermanentMethod::default(),
            amplitude_cutoff: 1e-10,
            cancellation_tol: 1e-8,
            parallel_threshold: 12,
            max_decomposition_pairs: 20,
            dark_count_cutoff: 4,
            hermitian_tol: 1e-9,
        }
    }
}

impl SimConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self { Self::default() }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(s: &str) -> SimResult<Self> {
        let config: Self = toml::from_str(s)?;
        if config.max_decomposition_pairs > MAX_DECOMPOSITION_PAIRS {
            return Err(SimError::config(format!(
                "max_decomposition_pairs must be at most {}; got {}",
                MAX_DECOMPOSITION_PAIRS, config.max_decomposition_pairs,
            )));
        }
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Set the permanent evaluation strategy.
    pub fn with_method(mut self, method: PermanentMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the amplitude cutoff.
    pub fn with_amplitude_cutoff(mut self, cutoff: f64) -> Self {
        self.amplitude_cutoff = cutoff;
        self
    }

    /// Set the cancellation tolerance.
    pub fn with_cancellation_tol(mut self, tol: f64) -> Self {
        self.cancellation_tol = tol;
        self
    }

    /// Set the photon number from which permanent enumeration runs in
    /// parallel.
    pub fn with_parallel_threshold(mut self, n: usize) -> Self {
        self.parallel_threshold = n;
        self
    }

    /// Set the decomposition limit, capped at [`MAX_DECOMPOSITION_PAIRS`].
    pub fn with_max_decomposition_pairs(mut self, max: usize) -> Self {
        self.max_decomposition_pairs = max.min(MAX_DECOMPOSITION_PAIRS);
        self
    }

    /// Set the dark-count cutoff.
    pub fn with_dark_count_cutoff(mut self, cutoff: usize) -> Self {
        self.dark_count_cutoff = cutoff;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SimConfig::from_toml_str(
            "method = \"glynn\"\nmax_decomposition_pairs = 6\n"
        ).unwrap();
        assert_eq!(config.method, PermanentMethod::Glynn);
        assert_eq!(config.max_decomposition_pairs, 6);
        assert_eq!(config.dark_count_cutoff, SimConfig::default().dark_count_cutoff);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(SimConfig::from_toml_str("method = \"fast\"").is_err());
        assert!(matches!(
            SimConfig::from_toml_str("max_decomposition_pairs = 64"),
            Err(SimError::Configuration(_))
        ));
    }

    #[test]
    fn decomposition_limit_is_capped() {
        let config = SimConfig::default().with_max_decomposition_pairs(64);
        assert_eq!(config.max_decomposition_pairs, MAX_DECOMPOSITION_PAIRS);
        let config
            = SimConfig::from_toml_str("max_decomposition_pairs = 63").unwrap();
        assert_eq!(config.max_decomposition_pairs, 63);
    }
}
