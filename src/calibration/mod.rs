//! Calibration Estimator
//!
//! Nonlinear least-squares fits on top of the pluggable solvers in [`crate::optimizer`]:
//!
//! - Camera intrinsics and poses from world/pixel correspondences, single or multi-view
//! - Parameter masks to hold any subset of the packed vector fixed
//! - Caller-side parallel multi-start
//! - Synthetic calibration targets
//! - Pendulum parameters (g) from tracked bob positions

pub mod correspondence;
pub mod estimator;
pub mod multi_start;
pub mod parameters;
pub mod pendulum_fit;
pub mod target;

pub use correspondence::{Correspondence, View};
pub use estimator::{CalibrationEstimator, FitResult, Residual};
pub use multi_start::fit_best_of;
pub use parameters::{CameraParameter, FixedParameters};
pub use pendulum_fit::{PendulumEstimator, PendulumFitResult, PendulumParameter, TimedPoint};
pub use target::TargetGrid;
