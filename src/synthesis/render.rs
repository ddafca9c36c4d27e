//! Photon-level rendering of the bob as a Gaussian spot in a local image patch.
//!
//! Used by [`super::CentroidRendering::FullFrame`] and exposed so the rendering
//! path can be checked on its own against the analytic centroid.

use crate::error::{PendulumCvError, PendulumCvResult, ensure_non_negative};
use crate::synthesis::noise::ShotNoise;
use nalgebra::{DMatrix, Vector2};
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use std::f64::consts::PI;

/// Patch half-width in units of the spot sigma.
const PATCH_HALF_WIDTH_SIGMAS: f64 = 5.0;

/// A small image patch around a rendered spot.
///
/// Entry `(row, col)` is the photon count of the pixel whose centre is at
/// `(origin.x + col, origin.y + row)` in image coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotPatch {
    origin: Vector2<i64>,
    pixels: DMatrix<f64>,
}

impl SpotPatch {
    pub fn origin(&self) -> Vector2<i64> {
        self.origin
    }

    pub fn pixels(&self) -> &DMatrix<f64> {
        &self.pixels
    }

    pub fn total(&self) -> f64 {
        self.pixels.sum()
    }

    /// Replaces every expected count with a Poisson draw of that mean.
    pub fn sample_poisson<R: Rng + ?Sized>(&self, rng: &mut R) -> PendulumCvResult<SpotPatch> {
        let mut pixels = self.pixels.clone();
        for value in pixels.iter_mut() {
            if *value > 0.0 {
                let poisson = Poisson::new(*value).map_err(|e| {
                    PendulumCvError::config(format!("invalid Poisson mean {value}: {e}"))
                })?;
                *value = poisson.sample(rng);
            }
        }
        Ok(SpotPatch {
            origin: self.origin,
            pixels,
        })
    }

    /// Intensity-weighted centroid after subtracting a uniform `background`.
    pub fn centroid(&self, background: f64) -> PendulumCvResult<Vector2<f64>> {
        let mut total = 0.0;
        let mut moment = Vector2::zeros();
        for col in 0..self.pixels.ncols() {
            for row in 0..self.pixels.nrows() {
                let weight = self.pixels[(row, col)] - background;
                total += weight;
                moment += Vector2::new(
                    (self.origin.x + col as i64) as f64,
                    (self.origin.y + row as i64) as f64,
                ) * weight;
            }
        }
        if !(total > 0.0) {
            return Err(PendulumCvError::geometry(format!(
                "spot near ({}, {}) has no signal above the background",
                self.origin.x, self.origin.y
            )));
        }
        Ok(moment / total)
    }
}

/// Renders the expected photon counts of a Gaussian spot centred at `center`.
pub fn render_spot(
    center: &Vector2<f64>,
    shot: &ShotNoise,
    background: f64,
) -> PendulumCvResult<SpotPatch> {
    shot.validate()?;
    ensure_non_negative("background", background)?;
    if !center.iter().all(|v| v.is_finite()) {
        return Err(PendulumCvError::geometry("cannot render a spot at a non-finite pixel"));
    }

    let sigma = shot.spot_sigma_px;
    let half = (PATCH_HALF_WIDTH_SIGMAS * sigma).ceil() as i64;
    let size = (2 * half + 1) as usize;
    let origin = Vector2::new(center.x.round() as i64 - half, center.y.round() as i64 - half);
    let norm = shot.photon_count / (2.0 * PI * sigma * sigma);

    let pixels = DMatrix::from_fn(size, size, |row, col| {
        let dx = (origin.x + col as i64) as f64 - center.x;
        let dy = (origin.y + row as i64) as f64 - center.y;
        background + norm * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
    });
    Ok(SpotPatch { origin, pixels })
}
