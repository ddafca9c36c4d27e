//! Error types for the pendulum-cv library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.
//!
//! Every failure is terminal for the call that raised it: no partially computed
//! trajectory, projection or frame is ever returned alongside an error. The only
//! best-effort path is a non-converged fit, which is reported through
//! [`crate::calibration::FitResult::converged`] rather than through this type.

use thiserror::Error;

/// Main result type used throughout the pendulum-cv library
pub type PendulumCvResult<T> = Result<T, PendulumCvError>;

/// Main error type for the pendulum-cv library
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PendulumCvError {
    /// Projection or back-projection of a physically impossible point
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Not enough information to invert the camera model
    #[error("Underconstrained: {0}")]
    Underconstrained(String),

    /// Fewer correspondences than free parameters
    #[error(
        "Underdetermined fit: {correspondences} correspondences for {free_parameters} free parameters"
    )]
    UnderdeterminedFit {
        correspondences: usize,
        free_parameters: usize,
    },

    /// Numerical instability inside the dynamics integrator
    #[error("Integration diverged at t = {time:.6} s (step {step:.3e} s): {reason}")]
    IntegrationDiverged {
        time: f64,
        step: f64,
        reason: String,
    },

    /// Resampling requested outside the known trajectory bounds
    #[error("Requested time {requested:.6} s is outside the trajectory range [{start:.6}, {end:.6}] s")]
    OutOfRange { requested: f64, start: f64, end: f64 },

    /// Invalid or inconsistent parameters supplied at construction
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// File system errors from the persistence helpers
    #[error("IO error: {0}")]
    Io(String),

    /// Encoding or decoding of persisted documents
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PendulumCvError {
    /// Shorthand for a [`PendulumCvError::Configuration`] error.
    pub fn config(msg: impl Into<String>) -> Self {
        PendulumCvError::Configuration(msg.into())
    }

    /// Shorthand for a [`PendulumCvError::InvalidGeometry`] error.
    pub fn geometry(msg: impl Into<String>) -> Self {
        PendulumCvError::InvalidGeometry(msg.into())
    }
}

// Conversions from standard library and dependency errors

impl From<std::io::Error> for PendulumCvError {
    fn from(err: std::io::Error) -> Self {
        PendulumCvError::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for PendulumCvError {
    fn from(err: serde_yaml::Error) -> Self {
        PendulumCvError::Serialization(err.to_string())
    }
}

/// Fails with [`PendulumCvError::Configuration`] unless `value` is finite.
pub(crate) fn ensure_finite(name: &str, value: f64) -> PendulumCvResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PendulumCvError::config(format!("{name} must be finite, got {value}")))
    }
}

/// Fails with [`PendulumCvError::Configuration`] unless `value` is finite and > 0.
pub(crate) fn ensure_positive(name: &str, value: f64) -> PendulumCvResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PendulumCvError::config(format!("{name} must be positive, got {value}")))
    }
}

/// Fails with [`PendulumCvError::Configuration`] unless `value` is finite and >= 0.
pub(crate) fn ensure_non_negative(name: &str, value: f64) -> PendulumCvResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(PendulumCvError::config(format!(
            "{name} must be non-negative, got {value}"
        )))
    }
}
