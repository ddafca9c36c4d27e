//! Estimation of pendulum parameters (most importantly g) from tracked positions.
//!
//! Observed pixels are lifted onto the swing plane with the calibrated camera, then
//! the simulator is fitted to the resulting world positions. The simulation starts
//! at the first observation, so the fitted initial conditions describe the bob at
//! that instant.

use crate::camera::{CameraIntrinsics, Extrinsics, UnprojectConstraint, unproject};
use crate::core::LeastSquaresProblem;
use crate::error::{PendulumCvError, PendulumCvResult, ensure_positive};
use crate::optimizer::{AnySolver, OptimizationStatus, OptimizerConfig, Solver};
use crate::physics::{InitialConditions, PendulumParams, PendulumSimulator, SimulationConfig, StepPolicy};
use crate::synthesis::Observation;
use nalgebra::{DVector, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Bob position in the swing plane at time `t`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedPoint {
    pub t: f64,
    /// World `(x, y)` on the plane `z = 0` (m).
    pub position: Vector2<f64>,
    pub weight: f64,
}

impl TimedPoint {
    pub fn new(t: f64, position: Vector2<f64>) -> Self {
        Self {
            t,
            position,
            weight: 1.0,
        }
    }

    /// Unprojects each observed centroid onto the swing plane.
    ///
    /// Observations that carry an uncertainty are weighted by `1 / uncertainty²`.
    pub fn from_observations(
        observations: &[Observation],
        intrinsics: &CameraIntrinsics,
        extrinsics: &Extrinsics,
    ) -> PendulumCvResult<Vec<TimedPoint>> {
        let plane = UnprojectConstraint::world_plane_z0();
        observations
            .iter()
            .map(|obs| {
                let world = unproject(&obs.pixel, Some(&plane), extrinsics, intrinsics)?;
                let weight = if obs.uncertainty > 0.0 {
                    obs.uncertainty.powi(-2)
                } else {
                    1.0
                };
                Ok(TimedPoint {
                    t: obs.timestamp,
                    position: Vector2::new(world.x, world.y),
                    weight,
                })
            })
            .collect()
    }
}

/// Quantities the pendulum fit may adjust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendulumParameter {
    Gravity,
    InitialAngle,
    InitialAngularVelocity,
    StringLength,
}

/// Outcome of a pendulum fit; best effort when `converged` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendulumFitResult {
    pub params: PendulumParams,
    pub initial: InitialConditions,
    /// Simulated minus observed position for every point (m).
    pub residuals: Vec<Vector2<f64>>,
    pub converged: bool,
    pub status: OptimizationStatus,
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
}

impl PendulumFitResult {
    /// Root-mean-square position residual (m).
    pub fn rms_residual(&self) -> f64 {
        if self.residuals.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.residuals.iter().map(|r| r.norm_squared()).sum();
        (sum / self.residuals.len() as f64).sqrt()
    }
}

/// Fits simulated motion to observed positions.
#[derive(Debug, Clone)]
pub struct PendulumEstimator {
    solver: AnySolver,
    dt: f64,
    free: BTreeSet<PendulumParameter>,
}

impl PendulumEstimator {
    /// `dt` is the fixed integration step used for every residual evaluation.
    pub fn new(config: OptimizerConfig, dt: f64) -> PendulumCvResult<Self> {
        ensure_positive("pendulum fit step", dt)?;
        config.validate()?;
        Ok(Self {
            solver: AnySolver::new(config),
            dt,
            free: BTreeSet::from([
                PendulumParameter::Gravity,
                PendulumParameter::InitialAngle,
                PendulumParameter::InitialAngularVelocity,
            ]),
        })
    }

    pub fn with_free_parameters(
        mut self,
        parameters: impl IntoIterator<Item = PendulumParameter>,
    ) -> Self {
        self.free = parameters.into_iter().collect();
        self
    }

    pub fn free_parameters(&self) -> impl Iterator<Item = PendulumParameter> + '_ {
        self.free.iter().copied()
    }

    pub fn fit(
        &self,
        points: &[TimedPoint],
        params: &PendulumParams,
        initial: &InitialConditions,
    ) -> PendulumCvResult<PendulumFitResult> {
        params.validate()?;
        initial.validate()?;
        if points.len() < self.free.len() {
            return Err(PendulumCvError::UnderdeterminedFit {
                correspondences: points.len(),
                free_parameters: self.free.len(),
            });
        }
        let Some(first) = points.first() else {
            return Err(PendulumCvError::config("pendulum fit needs at least one point"));
        };
        for p in points {
            if !(p.weight.is_finite() && p.weight > 0.0) {
                return Err(PendulumCvError::config(format!(
                    "point weight must be finite and > 0, got {}",
                    p.weight
                )));
            }
        }

        let problem = PendulumProblem {
            points,
            times: points.iter().map(|p| p.t - first.t).collect(),
            free: self.free.iter().copied().collect(),
            params: *params,
            initial: *initial,
            config: SimulationConfig::default().with_step_policy(StepPolicy::Fixed { dt: self.dt }),
        };
        let start = problem.initial_values();

        let (values, status, iterations, initial_cost, final_cost) = if problem.free.is_empty() {
            let cost = problem.cost(&start)?;
            (start, OptimizationStatus::Converged, 0, cost, cost)
        } else {
            let result = self.solver.minimize(&problem, start)?;
            (
                result.parameters,
                result.status,
                result.iterations,
                result.initial_cost,
                result.final_cost,
            )
        };

        let (params, initial) = problem.apply(&values);
        let residuals = problem.position_errors(&params, &initial)?;
        let converged = status.is_converged();
        if converged {
            info!(
                "Pendulum fit: g = {:.6} m/s², L = {:.6} m, theta0 = {:.4} deg after {iterations} iterations",
                params.gravity,
                params.string_length,
                initial.angle.to_degrees()
            );
        } else {
            warn!("Pendulum fit did not converge ({status}); g = {:.6} m/s²", params.gravity);
        }

        Ok(PendulumFitResult {
            params,
            initial,
            residuals,
            converged,
            status,
            iterations,
            initial_cost,
            final_cost,
        })
    }
}

struct PendulumProblem<'a> {
    points: &'a [TimedPoint],
    times: Vec<f64>,
    free: Vec<PendulumParameter>,
    params: PendulumParams,
    initial: InitialConditions,
    config: SimulationConfig,
}

impl PendulumProblem<'_> {
    fn initial_values(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.free.len(),
            self.free.iter().map(|p| match p {
                PendulumParameter::Gravity => self.params.gravity,
                PendulumParameter::InitialAngle => self.initial.angle,
                PendulumParameter::InitialAngularVelocity => self.initial.angular_velocity,
                PendulumParameter::StringLength => self.params.string_length,
            }),
        )
    }

    fn apply(&self, values: &DVector<f64>) -> (PendulumParams, InitialConditions) {
        let mut params = self.params;
        let mut initial = self.initial;
        for (parameter, &value) in self.free.iter().zip(values.iter()) {
            match parameter {
                PendulumParameter::Gravity => params.gravity = value,
                PendulumParameter::InitialAngle => initial.angle = value,
                PendulumParameter::InitialAngularVelocity => initial.angular_velocity = value,
                PendulumParameter::StringLength => params.string_length = value,
            }
        }
        (params, initial)
    }

    fn position_errors(
        &self,
        params: &PendulumParams,
        initial: &InitialConditions,
    ) -> PendulumCvResult<Vec<Vector2<f64>>> {
        let simulator = PendulumSimulator::new(*params)?;
        let trajectory = simulator.simulate_at(initial, &self.times, &self.config)?;
        Ok(trajectory
            .iter()
            .zip(self.points)
            .map(|(state, point)| state.position - point.position)
            .collect())
    }
}

impl LeastSquaresProblem for PendulumProblem<'_> {
    fn parameter_count(&self) -> usize {
        self.free.len()
    }

    fn residual_count(&self) -> usize {
        2 * self.points.len()
    }

    fn residuals(&self, parameters: &DVector<f64>) -> PendulumCvResult<DVector<f64>> {
        let (params, initial) = self.apply(parameters);
        let errors = self.position_errors(&params, &initial)?;
        let mut residuals = DVector::zeros(self.residual_count());
        for (i, (error, point)) in errors.iter().zip(self.points).enumerate() {
            let scale = point.weight.sqrt();
            residuals[2 * i] = error.x * scale;
            residuals[2 * i + 1] = error.y * scale;
        }
        Ok(residuals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::Trajectory;

    fn observed(truth: &PendulumParams, initial: &InitialConditions) -> PendulumCvResult<Trajectory> {
        PendulumSimulator::new(*truth)?.simulate(initial, &SimulationConfig::new(2.0, 60.0))
    }

    fn points(trajectory: &Trajectory) -> Vec<TimedPoint> {
        trajectory
            .iter()
            .map(|s| TimedPoint::new(s.t, s.position))
            .collect()
    }

    #[test]
    fn test_gravity_recovered_from_clean_positions() -> PendulumCvResult<()> {
        let truth = PendulumParams::default();
        let initial = InitialConditions::from_degrees(10.0);
        let pts = points(&observed(&truth, &initial)?);

        let guess_params = truth.with_gravity(9.5);
        let guess_initial = InitialConditions::new(9.0_f64.to_radians(), 0.05);
        let result = PendulumEstimator::new(OptimizerConfig::default(), 1e-3)?.fit(
            &pts,
            &guess_params,
            &guess_initial,
        )?;

        assert!(result.converged, "{}", result.status);
        assert!((result.params.gravity - 9.81).abs() < 1e-4, "g = {}", result.params.gravity);
        assert!((result.initial.angle - initial.angle).abs() < 1e-5);
        assert!(result.rms_residual() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_start_time_offset_is_removed() -> PendulumCvResult<()> {
        let truth = PendulumParams::ideal(0.5, 9.81);
        let initial = InitialConditions::from_degrees(5.0);
        let shifted: Vec<TimedPoint> = points(&observed(&truth, &initial)?)
            .into_iter()
            .map(|mut p| {
                p.t += 100.0;
                p
            })
            .collect();

        let result = PendulumEstimator::new(OptimizerConfig::default(), 1e-3)?
            .with_free_parameters([])
            .fit(&shifted, &truth, &initial)?;
        assert_eq!(result.iterations, 0);
        assert!(result.rms_residual() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_too_few_points() -> PendulumCvResult<()> {
        let estimator = PendulumEstimator::new(OptimizerConfig::default(), 1e-3)?;
        let pts = [
            TimedPoint::new(0.0, Vector2::new(0.0, -1.0)),
            TimedPoint::new(0.1, Vector2::new(0.0, -1.0)),
        ];
        let result = estimator.fit(&pts, &PendulumParams::default(), &InitialConditions::default());
        assert_eq!(
            result,
            Err(PendulumCvError::UnderdeterminedFit {
                correspondences: 2,
                free_parameters: 3
            })
        );
        Ok(())
    }

    #[test]
    fn test_invalid_step() {
        assert!(PendulumEstimator::new(OptimizerConfig::default(), 0.0).is_err());
    }
}
