//! Pipeline configuration bundle.
//!
//! One immutable record holds every physical, camera, noise and solver setting of an
//! end-to-end run. Components never read global state; they receive the pieces of
//! this bundle they need at construction.

use crate::calibration::TargetGrid;
use crate::camera::{CameraIntrinsics, Extrinsics};
use crate::error::{PendulumCvResult, ensure_positive};
use crate::optimizer::OptimizerConfig;
use crate::physics::{InitialConditions, PendulumParams, SimulationConfig};
use crate::synthesis::NoiseModel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything needed to simulate, film and fit a pendulum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pendulum: PendulumParams,
    pub initial: InitialConditions,
    pub simulation: SimulationConfig,
    pub intrinsics: CameraIntrinsics,
    pub extrinsics: Extrinsics,
    pub noise: NoiseModel,
    /// Camera frame rate (Hz).
    pub frame_rate: f64,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default = "default_target")]
    pub target: TargetGrid,
}

/// Two-layer chessboard so a single view pins down every intrinsic.
fn default_target() -> TargetGrid {
    TargetGrid::layered(9, 6, 0.025, vec![0.0, 0.04])
}

impl Default for PipelineConfig {
    /// Bench-top setup: 12.7 cm string, 13 mm steel bob released from 10°, filmed at
    /// 60 Hz by an 800 px camera 0.6 m in front of the swing plane.
    fn default() -> Self {
        Self {
            pendulum: PendulumParams::default(),
            initial: InitialConditions::from_degrees(10.0),
            simulation: SimulationConfig::default(),
            intrinsics: CameraIntrinsics::default(),
            extrinsics: Extrinsics::facing_swing_plane(-0.1, 0.6),
            noise: NoiseModel::none(),
            frame_rate: 60.0,
            optimizer: OptimizerConfig::default(),
            target: default_target(),
        }
    }
}

impl PipelineConfig {
    pub fn with_pendulum(mut self, pendulum: PendulumParams) -> Self {
        self.pendulum = pendulum;
        self
    }

    pub fn with_initial(mut self, initial: InitialConditions) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_simulation(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = simulation;
        self
    }

    pub fn with_camera(mut self, intrinsics: CameraIntrinsics, extrinsics: Extrinsics) -> Self {
        self.intrinsics = intrinsics;
        self.extrinsics = extrinsics;
        self
    }

    pub fn with_noise(mut self, noise: NoiseModel) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Checks every component; the first invalid one is reported.
    pub fn validate(&self) -> PendulumCvResult<()> {
        self.pendulum.validate()?;
        self.initial.validate()?;
        self.simulation.validate()?;
        self.noise.validate()?;
        self.optimizer.validate()?;
        self.target.validate()?;
        ensure_positive("frame_rate", self.frame_rate)
    }
}

impl fmt::Display for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline configuration:")?;
        writeln!(
            f,
            "  pendulum: L = {} m, r = {} m, m = {:.4} kg, g = {} m/s²",
            self.pendulum.string_length,
            self.pendulum.bob_radius,
            self.pendulum.bob_mass,
            self.pendulum.gravity
        )?;
        writeln!(
            f,
            "  release: {:.3} deg, {:.3} rad/s",
            self.initial.angle.to_degrees(),
            self.initial.angular_velocity
        )?;
        writeln!(
            f,
            "  simulation: {} s at {} Hz",
            self.simulation.duration, self.simulation.output_rate
        )?;
        writeln!(
            f,
            "  camera: fx = {}, fy = {}, cx = {}, cy = {} at {} Hz",
            self.intrinsics.fx(),
            self.intrinsics.fy(),
            self.intrinsics.cx(),
            self.intrinsics.cy(),
            self.frame_rate
        )?;
        write!(
            f,
            "  noise: sigma = {} px, seed = {}",
            self.noise.gaussian_sigma_px, self.noise.seed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PendulumCvError;

    #[test]
    fn test_default_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_component_is_reported() {
        let config = PipelineConfig::default().with_frame_rate(-5.0);
        assert!(matches!(config.validate(), Err(PendulumCvError::Configuration(_))));

        let mut pendulum = PendulumParams::default();
        pendulum.bob_mass = -1.0;
        assert!(PipelineConfig::default().with_pendulum(pendulum).validate().is_err());
    }
}
