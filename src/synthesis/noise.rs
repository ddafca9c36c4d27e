//! Noise configuration for synthetic observations.

use crate::error::{PendulumCvError, PendulumCvResult, ensure_non_negative, ensure_positive};
use serde::{Deserialize, Serialize};

/// Photon-limited centroid precision of the imaged bob.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShotNoise {
    /// Expected number of photons collected from the spot per frame.
    pub photon_count: f64,
    /// Standard deviation of the Gaussian spot profile (px).
    pub spot_sigma_px: f64,
}

impl ShotNoise {
    pub fn validate(&self) -> PendulumCvResult<()> {
        ensure_positive("shot noise photon_count", self.photon_count)?;
        ensure_positive("shot noise spot_sigma_px", self.spot_sigma_px)
    }

    /// Centroid standard deviation of `photon_count` photons spread over the spot.
    pub fn centroid_sigma(&self) -> f64 {
        self.spot_sigma_px / self.photon_count.sqrt()
    }
}

/// Finite-exposure smearing along the instantaneous velocity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionBlur {
    /// Shutter open time (s).
    pub exposure_time: f64,
    /// Number of sub-exposure projections averaged into the centroid.
    pub samples: usize,
}

impl MotionBlur {
    pub fn validate(&self) -> PendulumCvResult<()> {
        ensure_positive("motion blur exposure_time", self.exposure_time)?;
        if self.samples < 2 {
            return Err(PendulumCvError::config(format!(
                "motion blur needs at least 2 samples, got {}",
                self.samples
            )));
        }
        Ok(())
    }
}

/// How shot noise is turned into a centroid perturbation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentroidRendering {
    /// Centroid jitter and uncertainty inflation; no pixels are rendered.
    #[default]
    Approximate,
    /// Render the spot into a local patch, draw Poisson counts per pixel and
    /// measure the background-subtracted centroid.
    FullFrame {
        /// Expected background photons per pixel.
        background: f64,
    },
}

/// Noise sources applied to each projected point, in the order
/// motion blur, Gaussian sensor noise, shot noise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseModel {
    /// Per-axis additive Gaussian noise (px).
    pub gaussian_sigma_px: f64,
    #[serde(default)]
    pub shot_noise: Option<ShotNoise>,
    #[serde(default)]
    pub motion_blur: Option<MotionBlur>,
    #[serde(default)]
    pub rendering: CentroidRendering,
    /// Seed of the deterministic noise stream.
    #[serde(default)]
    pub seed: u64,
}

impl Default for NoiseModel {
    fn default() -> Self {
        Self::none()
    }
}

impl NoiseModel {
    /// No noise at all: observations equal the ideal projections.
    pub fn none() -> Self {
        Self {
            gaussian_sigma_px: 0.0,
            shot_noise: None,
            motion_blur: None,
            rendering: CentroidRendering::Approximate,
            seed: 0,
        }
    }

    pub fn gaussian(sigma_px: f64) -> Self {
        Self::none().with_gaussian(sigma_px)
    }

    pub fn with_gaussian(mut self, sigma_px: f64) -> Self {
        self.gaussian_sigma_px = sigma_px;
        self
    }

    pub fn with_shot_noise(mut self, photon_count: f64, spot_sigma_px: f64) -> Self {
        self.shot_noise = Some(ShotNoise {
            photon_count,
            spot_sigma_px,
        });
        self
    }

    pub fn with_motion_blur(mut self, exposure_time: f64, samples: usize) -> Self {
        self.motion_blur = Some(MotionBlur {
            exposure_time,
            samples,
        });
        self
    }

    pub fn with_full_frame(mut self, background: f64) -> Self {
        self.rendering = CentroidRendering::FullFrame { background };
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> PendulumCvResult<()> {
        ensure_non_negative("gaussian_sigma_px", self.gaussian_sigma_px)?;
        if let Some(shot) = &self.shot_noise {
            shot.validate()?;
        }
        if let Some(blur) = &self.motion_blur {
            blur.validate()?;
        }
        if let CentroidRendering::FullFrame { background } = self.rendering {
            ensure_non_negative("full-frame background", background)?;
            if self.shot_noise.is_none() {
                return Err(PendulumCvError::config(
                    "full-frame rendering needs a shot noise model for the spot",
                ));
            }
        }
        Ok(())
    }

    /// Whether the model leaves ideal projections untouched.
    pub fn is_noiseless(&self) -> bool {
        self.gaussian_sigma_px == 0.0 && self.shot_noise.is_none() && self.motion_blur.is_none()
    }

    /// Combined 1-σ position uncertainty for a given blur length (px).
    pub fn uncertainty(&self, blur_length_px: f64) -> f64 {
        let shot = self.shot_noise.map_or(0.0, |s| s.centroid_sigma());
        let blur = blur_length_px / 12.0_f64.sqrt();
        (self.gaussian_sigma_px.powi(2) + shot * shot + blur * blur).sqrt()
    }
}
