//! Simulation and calibration core for estimating gravitational acceleration from
//! video of a swinging pendulum.
//!
//! The pipeline is a chain of pure stages:
//!
//! - [`physics`]: nonlinear pendulum with drag, buoyancy, string elasticity and thermal drift
//! - [`camera`]: pinhole projection with Brown–Conrady distortion, and its inverse
//! - [`synthesis`]: lazy synthetic observations with blur and sensor noise
//! - [`calibration`]: camera and pendulum parameter estimation on pluggable solvers
//! - [`validation`]: reprojection and trajectory metrics
//!
//! Each stage takes an explicit, validated parameter record and returns a new value.

pub mod calibration;
pub mod camera;
pub mod config;
pub mod core;
pub mod error;
pub mod io;
pub mod logger;
pub mod optimizer;
pub mod physics;
pub mod synthesis;
pub mod validation;

pub use config::PipelineConfig;
pub use error::{PendulumCvError, PendulumCvResult};
pub use logger::{init_logger, init_logger_with_level};
