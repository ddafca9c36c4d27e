//! Synthetic observations of the simulated bob.
//!
//! A [`Trajectory`](crate::physics::Trajectory) is resampled at the camera frame
//! rate, projected through the camera model and perturbed by a [`NoiseModel`].
//! The resulting [`Frames`] iterator is lazy, deterministic for a given seed and
//! restartable.

pub mod noise;
pub mod render;
pub mod synthesizer;

pub use noise::{CentroidRendering, MotionBlur, NoiseModel, ShotNoise};
pub use render::{SpotPatch, render_spot};
pub use synthesizer::{Frames, Observation, Synthesizer, synthesize};
