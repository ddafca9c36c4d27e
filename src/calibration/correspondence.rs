//! Observed world/pixel pairs fed to the estimator.

use crate::camera::Extrinsics;
use crate::error::{PendulumCvError, PendulumCvResult};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// A known world point and the pixel centroid it was detected at.
///
/// `weight` is the detector's confidence; the residual of the pair is scaled by
/// `sqrt(weight)`, so a weight of 1 is plain least squares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub world: Vector3<f64>,
    pub pixel: Vector2<f64>,
    #[serde(default = "unit_weight")]
    pub weight: f64,
}

fn unit_weight() -> f64 {
    1.0
}

impl Correspondence {
    pub fn new(world: Vector3<f64>, pixel: Vector2<f64>) -> Self {
        Self {
            world,
            pixel,
            weight: 1.0,
        }
    }

    pub fn weighted(world: Vector3<f64>, pixel: Vector2<f64>, weight: f64) -> PendulumCvResult<Self> {
        let correspondence = Self {
            world,
            pixel,
            weight,
        };
        correspondence.validate()?;
        Ok(correspondence)
    }

    pub fn validate(&self) -> PendulumCvResult<()> {
        if !self.world.iter().chain(self.pixel.iter()).all(|v| v.is_finite()) {
            return Err(PendulumCvError::config(
                "correspondence contains non-finite coordinates",
            ));
        }
        if !(self.weight.is_finite() && self.weight > 0.0) {
            return Err(PendulumCvError::config(format!(
                "correspondence weight must be finite and > 0, got {}",
                self.weight
            )));
        }
        Ok(())
    }
}

/// All correspondences seen from one camera pose, plus the initial guess of that pose.
///
/// Views of a multi-view calibration share one set of intrinsics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub extrinsics: Extrinsics,
    pub correspondences: Vec<Correspondence>,
}

impl View {
    pub fn new(extrinsics: Extrinsics, correspondences: Vec<Correspondence>) -> Self {
        Self {
            extrinsics,
            correspondences,
        }
    }

    pub fn len(&self) -> usize {
        self.correspondences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.correspondences.is_empty()
    }
}
