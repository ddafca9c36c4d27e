//! Validation metrics
//!
//! Stateless functions that compare fitted or synthesized data against ground truth.
//! All pixel metrics are in pixels; an empty input is a configuration error rather
//! than a NaN summary.

use crate::calibration::{Correspondence, FitResult};
use crate::camera::{CameraIntrinsics, Extrinsics, project};
use crate::error::{PendulumCvError, PendulumCvResult};
use crate::physics::{PendulumSimulator, Trajectory};
use crate::synthesis::Observation;
use nalgebra::{DMatrix, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-point residual norms with their mean, RMS and maximum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualSummary {
    pub per_point: Vec<f64>,
    pub mean: f64,
    pub rms: f64,
    pub max: f64,
}

impl ResidualSummary {
    pub fn from_norms(per_point: Vec<f64>) -> PendulumCvResult<Self> {
        if per_point.is_empty() {
            return Err(PendulumCvError::config("cannot summarise an empty residual set"));
        }
        let n = per_point.len() as f64;
        let mean = per_point.iter().sum::<f64>() / n;
        let rms = (per_point.iter().map(|r| r * r).sum::<f64>() / n).sqrt();
        let max = per_point.iter().copied().fold(0.0, f64::max);
        Ok(Self {
            per_point,
            mean,
            rms,
            max,
        })
    }

    pub fn len(&self) -> usize {
        self.per_point.len()
    }

    pub fn is_empty(&self) -> bool {
        self.per_point.is_empty()
    }
}

impl fmt::Display for ResidualSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} points: mean {:.4}, rms {:.4}, max {:.4}",
            self.per_point.len(),
            self.mean,
            self.rms,
            self.max
        )
    }
}

/// A pixel extracted by a tracker at time `t`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedPixel {
    pub t: f64,
    pub pixel: Vector2<f64>,
}

impl From<&Observation> for TimedPixel {
    fn from(observation: &Observation) -> Self {
        Self {
            t: observation.timestamp,
            pixel: observation.pixel,
        }
    }
}

/// Reprojection error of each correspondence under the given camera.
pub fn reprojection_errors(
    correspondences: &[Correspondence],
    intrinsics: &CameraIntrinsics,
    extrinsics: &Extrinsics,
) -> PendulumCvResult<ResidualSummary> {
    let norms = correspondences
        .iter()
        .map(|c| Ok((project(&c.world, extrinsics, intrinsics)? - c.pixel).norm()))
        .collect::<PendulumCvResult<Vec<_>>>()?;
    ResidualSummary::from_norms(norms)
}

/// Summary of the residuals stored in a calibration result.
pub fn fit_reprojection(fit: &FitResult) -> PendulumCvResult<ResidualSummary> {
    ResidualSummary::from_norms(fit.residual_norms())
}

/// Distance between each observed and ideal (noise-free) pixel.
pub fn observation_residuals(observations: &[Observation]) -> PendulumCvResult<ResidualSummary> {
    ResidualSummary::from_norms(observations.iter().map(Observation::error).collect())
}

/// Distance between the projected trajectory and tracker output.
///
/// The trajectory is resampled at every pixel's timestamp; samples outside the
/// trajectory fail with [`PendulumCvError::OutOfRange`].
pub fn trajectory_residuals(
    trajectory: &Trajectory,
    intrinsics: &CameraIntrinsics,
    extrinsics: &Extrinsics,
    extracted: &[TimedPixel],
) -> PendulumCvResult<ResidualSummary> {
    let norms = extracted
        .iter()
        .map(|sample| {
            let state = trajectory.interpolate(sample.t)?;
            let predicted = project(&state.world_point(), extrinsics, intrinsics)?;
            Ok((predicted - sample.pixel).norm())
        })
        .collect::<PendulumCvResult<Vec<_>>>()?;
    ResidualSummary::from_norms(norms)
}

/// Largest relative deviation of mechanical energy from the first sample.
///
/// Falls back to the absolute deviation when the initial energy is zero.
pub fn energy_drift(trajectory: &Trajectory, simulator: &PendulumSimulator) -> f64 {
    let initial = simulator.energy(trajectory.first());
    let scale = if initial.abs() > 0.0 { initial.abs() } else { 1.0 };
    trajectory
        .iter()
        .map(|state| (simulator.energy(state) - initial).abs() / scale)
        .fold(0.0, f64::max)
}

/// Mean squared pixel difference of two equally sized images.
pub fn frame_mse(a: &DMatrix<f64>, b: &DMatrix<f64>) -> PendulumCvResult<f64> {
    if a.shape() != b.shape() {
        return Err(PendulumCvError::config(format!(
            "frame shapes differ: {:?} vs {:?}",
            a.shape(),
            b.shape()
        )));
    }
    if a.is_empty() {
        return Err(PendulumCvError::config("frames are empty"));
    }
    Ok((a - b).norm_squared() / a.len() as f64)
}
