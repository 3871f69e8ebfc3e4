//! Error and warning types shared across the crate.

use thiserror::Error;
use crate::fock::Occupation;

/// Everything that can go wrong while building circuits or running
/// simulations.
#[derive(Debug, Error)]
pub enum SimError {
    /// Incompatible mode spaces, malformed element parameters, or a failed
    /// unitary embedding of a lossy element.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A mode, channel, polarization, slot, or packet reference is out of
    /// range.
    #[error("invalid {what} index {index} (have {len})")]
    InvalidIndex { what: &'static str, index: usize, len: usize },

    /// Input and requested output kets carry different photon numbers.
    #[error("photon number mismatch: input has {input}, output has {output}")]
    PhotonNumberMismatch { input: usize, output: usize },

    /// Post-selection or conditioning left nothing behind.
    #[error("no admissible outcomes remain after conditioning")]
    EmptyEnsemble,

    /// Attempted to normalize a state with zero norm.
    #[error("cannot normalize a zero-norm state")]
    ZeroNorm,

    /// The distinguishability decomposition would need to branch on more
    /// photon pairs than allowed.
    #[error(
        "distinguishability decomposition needs {pairs} uncertain photon \
        pairs (limit is {max})"
    )]
    DecompositionLimit { pairs: usize, max: usize },

    /// Hermiticity or normalization was violated by the core itself.
    #[error("internal consistency error: {0}")]
    InternalConsistency(String),

    #[error("linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn index(what: &'static str, index: usize, len: usize) -> Self {
        Self::InvalidIndex { what, index, len }
    }
}

/// Reported when a permanent evaluation loses more precision to cancellation
/// than allowed by [`SimConfig::cancellation_tol`][crate::SimConfig].
///
/// The associated amplitude is still returned.
#[derive(Clone, Debug, PartialEq)]
pub struct NumericalWarning {
    /// Input ket of the transition.
    pub input: Occupation,
    /// Output ket of the transition.
    pub output: Occupation,
    /// Estimated absolute rounding error on the normalized amplitude.
    pub error_estimate: f64,
    /// Sum of magnitudes of all terms that went into the permanent.
    pub magnitude: f64,
}
