//! Lazy, restartable synthesis of per-frame pixel observations.

use crate::camera::{CameraIntrinsics, Extrinsics, project};
use crate::error::{PendulumCvError, PendulumCvResult, ensure_positive};
use crate::physics::Trajectory;
use crate::synthesis::noise::{CentroidRendering, NoiseModel};
use crate::synthesis::render::render_spot;
use nalgebra::{Vector2, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;
use tracing::debug;

/// Absorbs rounding when the window length is a whole number of frames.
const FRAME_COUNT_EPSILON: f64 = 1e-9;

/// One synthetic frame: where the bob should be and where it was "seen".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Frame index inside the synthesis window.
    pub index: usize,
    /// Frame time (s).
    pub timestamp: f64,
    /// Noise-free projection of the bob centre (px).
    pub ideal: Vector2<f64>,
    /// Observed centroid after blur and noise (px).
    pub pixel: Vector2<f64>,
    /// Pixel distance travelled by the bob while the shutter was open.
    pub blur_length: f64,
    /// Expected 1-σ position uncertainty of `pixel` (px).
    pub uncertainty: f64,
}

impl Observation {
    /// `(timestamp, u, v)` of the observed centroid.
    pub fn as_tuple(&self) -> (f64, f64, f64) {
        (self.timestamp, self.pixel.x, self.pixel.y)
    }

    /// Distance between the observed and the ideal pixel.
    pub fn error(&self) -> f64 {
        (self.pixel - self.ideal).norm()
    }
}

/// Renders a trajectory through a camera at a fixed frame rate.
///
/// Created by [`synthesize`]. Holds only configuration and a borrowed trajectory;
/// frames are computed on demand by [`Synthesizer::frames`].
#[derive(Debug, Clone)]
pub struct Synthesizer<'a> {
    trajectory: &'a Trajectory,
    intrinsics: CameraIntrinsics,
    extrinsics: Extrinsics,
    noise: NoiseModel,
    frame_rate: f64,
    start: f64,
    end: f64,
}

/// Prepares the synthesis of `trajectory` seen through the given camera.
///
/// Fails with [`PendulumCvError::Configuration`] for an invalid noise model or
/// frame rate. Nothing is projected until frames are requested.
pub fn synthesize<'a>(
    trajectory: &'a Trajectory,
    intrinsics: CameraIntrinsics,
    extrinsics: Extrinsics,
    noise: NoiseModel,
    frame_rate: f64,
) -> PendulumCvResult<Synthesizer<'a>> {
    ensure_positive("frame_rate", frame_rate)?;
    noise.validate()?;
    let synthesizer = Synthesizer {
        trajectory,
        intrinsics,
        extrinsics,
        noise,
        frame_rate,
        start: trajectory.start_time(),
        end: trajectory.end_time(),
    };
    debug!(
        "synthesizer ready: {} frames at {} Hz over [{:.4}, {:.4}] s",
        synthesizer.frame_count(),
        frame_rate,
        synthesizer.start,
        synthesizer.end
    );
    Ok(synthesizer)
}

impl<'a> Synthesizer<'a> {
    /// Restricts synthesis to `[start, end]`.
    ///
    /// Fails with [`PendulumCvError::OutOfRange`] when either bound lies outside
    /// the trajectory; the trajectory is never extrapolated.
    pub fn with_window(mut self, start: f64, end: f64) -> PendulumCvResult<Self> {
        let (t0, t1) = (self.trajectory.start_time(), self.trajectory.end_time());
        for requested in [start, end] {
            if !(requested >= t0 && requested <= t1) {
                return Err(PendulumCvError::OutOfRange {
                    requested,
                    start: t0,
                    end: t1,
                });
            }
        }
        if end < start {
            return Err(PendulumCvError::config(format!(
                "synthesis window end {end} precedes start {start}"
            )));
        }
        self.start = start;
        self.end = end;
        Ok(self)
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn noise(&self) -> &NoiseModel {
        &self.noise
    }

    pub fn frame_count(&self) -> usize {
        ((self.end - self.start) * self.frame_rate + FRAME_COUNT_EPSILON).floor() as usize + 1
    }

    /// Time of frame `index`; frames past the window are out of range.
    pub fn timestamp(&self, index: usize) -> PendulumCvResult<f64> {
        let t = self.start + index as f64 / self.frame_rate;
        if index >= self.frame_count() {
            return Err(PendulumCvError::OutOfRange {
                requested: t,
                start: self.start,
                end: self.end,
            });
        }
        Ok(t.min(self.end))
    }

    /// A fresh frame sequence starting at frame 0 with the configured seed.
    pub fn frames(&self) -> Frames<'_> {
        Frames {
            synthesizer: self,
            next: 0,
            count: self.frame_count(),
            rng: ChaCha8Rng::seed_from_u64(self.noise.seed),
            done: false,
        }
    }

    fn observe(&self, index: usize, rng: &mut ChaCha8Rng) -> PendulumCvResult<Observation> {
        let timestamp = self.timestamp(index)?;
        let state = self.trajectory.interpolate(timestamp)?;
        let world = state.world_point();
        let ideal = project(&world, &self.extrinsics, &self.intrinsics)?;

        // Motion blur: centroid of the smear along the instantaneous velocity.
        let (mut pixel, blur_length) = match &self.noise.motion_blur {
            Some(blur) => {
                let velocity = state.world_velocity();
                let mut sum = Vector2::zeros();
                for j in 0..blur.samples {
                    let s = blur.exposure_time * j as f64 / (blur.samples - 1) as f64;
                    sum += self.project_offset(&world, &velocity, s)?;
                }
                let end = self.project_offset(&world, &velocity, blur.exposure_time)?;
                (sum / blur.samples as f64, (end - ideal).norm())
            }
            None => (ideal, 0.0),
        };

        if self.noise.gaussian_sigma_px > 0.0 {
            pixel += gaussian_offset(rng, self.noise.gaussian_sigma_px)?;
        }

        if let Some(shot) = &self.noise.shot_noise {
            pixel = match self.noise.rendering {
                CentroidRendering::Approximate => pixel + gaussian_offset(rng, shot.centroid_sigma())?,
                CentroidRendering::FullFrame { background } => {
                    render_spot(&pixel, shot, background)?
                        .sample_poisson(rng)?
                        .centroid(background)?
                }
            };
        }

        Ok(Observation {
            index,
            timestamp,
            ideal,
            pixel,
            blur_length,
            uncertainty: self.noise.uncertainty(blur_length),
        })
    }

    fn project_offset(
        &self,
        world: &Vector3<f64>,
        velocity: &Vector3<f64>,
        dt: f64,
    ) -> PendulumCvResult<Vector2<f64>> {
        project(&(world + velocity * dt), &self.extrinsics, &self.intrinsics)
    }
}

fn gaussian_offset(rng: &mut ChaCha8Rng, sigma: f64) -> PendulumCvResult<Vector2<f64>> {
    let normal = Normal::new(0.0, sigma)
        .map_err(|e| PendulumCvError::config(format!("invalid noise sigma {sigma}: {e}")))?;
    Ok(Vector2::new(normal.sample(rng), normal.sample(rng)))
}

/// Streaming iterator over synthetic frames.
///
/// Yields exactly [`Synthesizer::frame_count`] observations unless a frame fails,
/// after which it yields nothing further. [`Frames::restart`] rewinds to frame 0
/// and replays the identical noise stream.
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    synthesizer: &'a Synthesizer<'a>,
    next: usize,
    count: usize,
    rng: ChaCha8Rng,
    done: bool,
}

impl Frames<'_> {
    pub fn restart(&mut self) {
        self.next = 0;
        self.rng = ChaCha8Rng::seed_from_u64(self.synthesizer.noise.seed);
        self.done = false;
    }

    /// Index of the next frame to be produced.
    pub fn position(&self) -> usize {
        self.next
    }

    fn remaining(&self) -> usize {
        if self.done { 0 } else { self.count - self.next }
    }
}

impl Iterator for Frames<'_> {
    type Item = PendulumCvResult<Observation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next >= self.count {
            return None;
        }
        let result = self.synthesizer.observe(self.next, &mut self.rng);
        self.next += 1;
        if result.is_err() || self.next >= self.count {
            self.done = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Frames<'_> {}

impl FusedIterator for Frames<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{InitialConditions, PendulumParams, PendulumSimulator, SimulationConfig};

    fn setup() -> PendulumCvResult<(Trajectory, CameraIntrinsics, Extrinsics)> {
        let simulator = PendulumSimulator::new(PendulumParams::default())?;
        let trajectory = simulator.simulate(
            &InitialConditions::from_degrees(20.0),
            &SimulationConfig::new(1.0, 200.0),
        )?;
        let intrinsics = CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0)?;
        let extrinsics = Extrinsics::look_at(
            Vector3::new(0.0, -0.1, 0.6),
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(0.0, -1.0, 0.0),
        )?;
        Ok((trajectory, intrinsics, extrinsics))
    }

    #[test]
    fn test_noiseless_frames_equal_ideal_projection() -> PendulumCvResult<()> {
        let (trajectory, intrinsics, extrinsics) = setup()?;
        let synthesizer = synthesize(&trajectory, intrinsics, extrinsics, NoiseModel::none(), 30.0)?;
        assert_eq!(synthesizer.frame_count(), 31);
        let frames = synthesizer.frames();
        assert_eq!(frames.len(), 31);
        for observation in frames {
            let observation = observation?;
            assert_eq!(observation.pixel, observation.ideal);
            assert_eq!(observation.uncertainty, 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_restart_replays_identical_noise() -> PendulumCvResult<()> {
        let (trajectory, intrinsics, extrinsics) = setup()?;
        let noise = NoiseModel::gaussian(0.5).with_shot_noise(2_000.0, 1.5).with_seed(11);
        let synthesizer = synthesize(&trajectory, intrinsics, extrinsics, noise, 60.0)?;
        let mut frames = synthesizer.frames();
        let first: Vec<_> = frames.by_ref().take(10).collect::<PendulumCvResult<_>>()?;
        assert_eq!(frames.position(), 10);
        frames.restart();
        let again: Vec<_> = frames.take(10).collect::<PendulumCvResult<_>>()?;
        assert_eq!(first, again);
        Ok(())
    }

    #[test]
    fn test_motion_blur_length_tracks_speed() -> PendulumCvResult<()> {
        let (trajectory, intrinsics, extrinsics) = setup()?;
        let noise = NoiseModel::none().with_motion_blur(1.0 / 120.0, 8);
        let synthesizer = synthesize(&trajectory, intrinsics, extrinsics, noise, 50.0)?;
        let observations: Vec<_> = synthesizer.frames().collect::<PendulumCvResult<_>>()?;
        // Released from rest: no blur in the first frame, plenty later on.
        assert!(observations[0].blur_length < 1e-9);
        let longest = observations.iter().map(|o| o.blur_length).fold(0.0, f64::max);
        assert!(longest > 1.0);
        for o in &observations {
            assert!((o.uncertainty - o.blur_length / 12.0_f64.sqrt()).abs() < 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_window_outside_trajectory_is_out_of_range() -> PendulumCvResult<()> {
        let (trajectory, intrinsics, extrinsics) = setup()?;
        let synthesizer = synthesize(&trajectory, intrinsics, extrinsics, NoiseModel::none(), 30.0)?;
        assert!(matches!(
            synthesizer.clone().with_window(0.5, 1.5),
            Err(PendulumCvError::OutOfRange { .. })
        ));
        let windowed = synthesizer.with_window(0.2, 0.4)?;
        assert_eq!(windowed.frame_count(), 7);
        assert!(windowed.timestamp(7).is_err());
        Ok(())
    }

    #[test]
    fn test_full_frame_rendering_stays_near_ideal() -> PendulumCvResult<()> {
        let (trajectory, intrinsics, extrinsics) = setup()?;
        let noise = NoiseModel::none()
            .with_shot_noise(20_000.0, 1.5)
            .with_full_frame(4.0)
            .with_seed(3);
        let synthesizer = synthesize(&trajectory, intrinsics, extrinsics, noise, 10.0)?;
        for observation in synthesizer.frames() {
            let observation = observation?;
            assert!(observation.error() < 0.1);
        }
        Ok(())
    }
}
