//! Synthetic calibration targets.

use crate::calibration::Correspondence;
use crate::camera::{CameraIntrinsics, Extrinsics, project};
use crate::error::{PendulumCvError, PendulumCvResult, ensure_finite, ensure_non_negative, ensure_positive};
use nalgebra::{Vector2, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// A chessboard-style grid of known world points, optionally repeated on several
/// parallel layers (`z = layer`) to give a non-planar target.
///
/// Corner `(0, 0)` of every layer sits at the world origin; columns run along `x`
/// and rows along `y`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetGrid {
    pub cols: usize,
    pub rows: usize,
    /// Distance between neighbouring corners (m).
    pub spacing: f64,
    /// World `z` of each layer (m).
    pub layers: Vec<f64>,
}

impl Default for TargetGrid {
    fn default() -> Self {
        Self::planar(9, 6, 0.025)
    }
}

impl TargetGrid {
    pub fn planar(cols: usize, rows: usize, spacing: f64) -> Self {
        Self::layered(cols, rows, spacing, vec![0.0])
    }

    pub fn layered(cols: usize, rows: usize, spacing: f64, layers: Vec<f64>) -> Self {
        Self {
            cols,
            rows,
            spacing,
            layers,
        }
    }

    pub fn validate(&self) -> PendulumCvResult<()> {
        if self.cols < 2 || self.rows < 2 {
            return Err(PendulumCvError::config(format!(
                "target grid needs at least 2x2 corners, got {}x{}",
                self.cols, self.rows
            )));
        }
        ensure_positive("target spacing", self.spacing)?;
        if self.layers.is_empty() {
            return Err(PendulumCvError::config("target grid has no layers"));
        }
        for &z in &self.layers {
            ensure_finite("target layer", z)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cols * self.rows * self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// World points, layer by layer, row-major within a layer.
    pub fn points(&self) -> Vec<Vector3<f64>> {
        let mut points = Vec::with_capacity(self.len());
        for &z in &self.layers {
            for row in 0..self.rows {
                for col in 0..self.cols {
                    points.push(Vector3::new(
                        col as f64 * self.spacing,
                        row as f64 * self.spacing,
                        z,
                    ));
                }
            }
        }
        points
    }

    /// Mean of all target points, handy as a `look_at` aim point.
    pub fn center(&self) -> Vector3<f64> {
        let n = self.layers.len().max(1) as f64;
        let mean_z = self.layers.iter().sum::<f64>() / n;
        Vector3::new(
            (self.cols.saturating_sub(1)) as f64 * self.spacing / 2.0,
            (self.rows.saturating_sub(1)) as f64 * self.spacing / 2.0,
            mean_z,
        )
    }

    /// Projects every target point and perturbs the pixel with `N(0, sigma_px)` per axis.
    ///
    /// The noise stream is seeded, so the same arguments always give the same detections.
    pub fn observe(
        &self,
        intrinsics: &CameraIntrinsics,
        extrinsics: &Extrinsics,
        sigma_px: f64,
        seed: u64,
    ) -> PendulumCvResult<Vec<Correspondence>> {
        self.validate()?;
        ensure_non_negative("target noise sigma", sigma_px)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let noise = Normal::new(0.0, sigma_px)
            .map_err(|e| PendulumCvError::config(format!("target noise: {e}")))?;

        self.points()
            .into_iter()
            .map(|world| {
                let mut pixel = project(&world, extrinsics, intrinsics)?;
                if sigma_px > 0.0 {
                    pixel += Vector2::new(noise.sample(&mut rng), noise.sample(&mut rng));
                }
                Ok(Correspondence::new(world, pixel))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> PendulumCvResult<(CameraIntrinsics, Extrinsics)> {
        let grid = TargetGrid::default();
        let intrinsics = CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0)?;
        let extrinsics = Extrinsics::look_at(
            grid.center() + Vector3::new(0.0, 0.0, 0.5),
            -Vector3::z(),
            -Vector3::y(),
        )?;
        Ok((intrinsics, extrinsics))
    }

    #[test]
    fn test_points_layout() {
        let grid = TargetGrid::layered(3, 2, 0.1, vec![0.0, 0.05]);
        let points = grid.points();
        assert_eq!(points.len(), 12);
        assert_eq!(points[1], Vector3::new(0.1, 0.0, 0.0));
        assert_eq!(points[3], Vector3::new(0.0, 0.1, 0.0));
        assert_eq!(points[6].z, 0.05);
        assert!((grid.center() - Vector3::new(0.1, 0.05, 0.025)).norm() < 1e-15);
    }

    #[test]
    fn test_noiseless_observation_is_exact_projection() -> PendulumCvResult<()> {
        let (intrinsics, extrinsics) = camera()?;
        let grid = TargetGrid::default();
        let observed = grid.observe(&intrinsics, &extrinsics, 0.0, 1)?;
        for c in &observed {
            assert_eq!(c.pixel, project(&c.world, &extrinsics, &intrinsics)?);
        }
        Ok(())
    }

    #[test]
    fn test_noise_is_seeded() -> PendulumCvResult<()> {
        let (intrinsics, extrinsics) = camera()?;
        let grid = TargetGrid::default();
        let a = grid.observe(&intrinsics, &extrinsics, 0.5, 9)?;
        let b = grid.observe(&intrinsics, &extrinsics, 0.5, 9)?;
        let c = grid.observe(&intrinsics, &extrinsics, 0.5, 10)?;
        assert_eq!(a, b);
        assert_ne!(a, c);
        Ok(())
    }

    #[test]
    fn test_invalid_grid() {
        assert!(TargetGrid::planar(1, 5, 0.01).validate().is_err());
        assert!(TargetGrid::planar(3, 3, 0.0).validate().is_err());
        assert!(TargetGrid::layered(3, 3, 0.01, vec![]).validate().is_err());
    }
}
