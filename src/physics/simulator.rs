//! Pendulum equations of motion and the simulation driver.
//!
//! The bob swings in the world plane `z = 0` with the pivot at the origin. The
//! state is `(θ, θ̇)` with `θ` measured from the downward vertical:
//!
//! ```text
//! θ̈ = −(g_eff / L) sinθ − (b / m) θ̇ − (c / m) L |θ̇| θ̇
//! ```
//!
//! where `g_eff` is the buoyancy-reduced gravity, `b` and `c` the linear and
//! quadratic drag constants, and `L` the effective length. For an elastic string
//! `L` follows the instantaneous tension quasi-statically:
//!
//! ```text
//! L = L_th + T / k,   T = m g_eff cosθ + m L θ̇²
//!   ⇒ L = (L_th + m g_eff cosθ / k) / (1 − m θ̇² / k)
//! ```

use crate::error::{PendulumCvError, PendulumCvResult, ensure_positive};
use crate::physics::integrator::{Integrator, OdeSystem, StateVector, StepPolicy};
use crate::physics::params::{InitialConditions, PendulumParams};
use crate::physics::state::{PhysicalState, Trajectory};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

/// Absorbs the rounding of `duration * output_rate` when it lands on an integer.
const SAMPLE_COUNT_EPSILON: f64 = 1e-9;

/// Output sampling and numerical policy of one simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Simulated time span starting at `t = 0` (s).
    pub duration: f64,
    /// Output samples per second, independent of the internal step (Hz).
    pub output_rate: f64,
    /// Internal step selection.
    pub step_policy: StepPolicy,
    /// Allowed relative mechanical-energy drift for a rigid string.
    pub energy_tolerance: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration: 10.0,
            output_rate: 240.0,
            step_policy: StepPolicy::default(),
            energy_tolerance: 1e-4,
        }
    }
}

impl SimulationConfig {
    pub fn new(duration: f64, output_rate: f64) -> Self {
        Self {
            duration,
            output_rate,
            ..Self::default()
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_output_rate(mut self, output_rate: f64) -> Self {
        self.output_rate = output_rate;
        self
    }

    pub fn with_step_policy(mut self, step_policy: StepPolicy) -> Self {
        self.step_policy = step_policy;
        self
    }

    pub fn with_energy_tolerance(mut self, energy_tolerance: f64) -> Self {
        self.energy_tolerance = energy_tolerance;
        self
    }

    pub fn validate(&self) -> PendulumCvResult<()> {
        ensure_positive("simulation duration", self.duration)?;
        ensure_positive("output_rate", self.output_rate)?;
        ensure_positive("energy_tolerance", self.energy_tolerance)?;
        self.step_policy.validate()
    }

    /// Output timestamps `k / output_rate` for `k = 0..=floor(duration · rate)`.
    pub fn output_times(&self) -> Vec<f64> {
        let last = (self.duration * self.output_rate + SAMPLE_COUNT_EPSILON).floor() as usize;
        (0..=last).map(|k| k as f64 / self.output_rate).collect()
    }
}

/// Right-hand side of the pendulum ODE with all derived constants precomputed.
#[derive(Debug, Clone, Copy)]
struct PendulumDynamics {
    thermal_length: f64,
    effective_gravity: f64,
    mass: f64,
    linear_drag: f64,
    quadratic_drag: f64,
    stiffness: Option<f64>,
}

impl PendulumDynamics {
    fn new(params: &PendulumParams) -> Self {
        Self {
            thermal_length: params.thermal_length(),
            effective_gravity: params.effective_gravity(),
            mass: params.bob_mass,
            linear_drag: params.linear_drag(),
            quadratic_drag: params.quadratic_drag(),
            stiffness: params.string_stiffness,
        }
    }

    fn effective_length(&self, t: f64, angle: f64, angular_velocity: f64) -> PendulumCvResult<f64> {
        let Some(k) = self.stiffness else {
            return Ok(self.thermal_length);
        };
        let numerator = self.thermal_length + self.mass * self.effective_gravity * angle.cos() / k;
        let denominator = 1.0 - self.mass * angular_velocity * angular_velocity / k;
        let length = numerator / denominator;
        if denominator <= 0.0 || !(length.is_finite() && length > 0.0) {
            return Err(PendulumCvError::IntegrationDiverged {
                time: t,
                step: 0.0,
                reason: format!(
                    "string elasticity runs away (θ = {angle:.6} rad, θ̇ = {angular_velocity:.6} rad/s, k = {k} N/m)"
                ),
            });
        }
        Ok(length)
    }

    /// Mechanical energy per unit mass.
    fn energy(&self, angle: f64, angular_velocity: f64, length: f64) -> f64 {
        let speed = length * angular_velocity;
        0.5 * speed * speed + self.effective_gravity * length * (1.0 - angle.cos())
    }

    fn state(&self, t: f64, y: &StateVector) -> PendulumCvResult<PhysicalState> {
        let (angle, angular_velocity) = (y.x, y.y);
        let length = self.effective_length(t, angle, angular_velocity)?;
        let (sin, cos) = angle.sin_cos();
        Ok(PhysicalState {
            t,
            position: Vector2::new(length * sin, -length * cos),
            velocity: Vector2::new(length * angular_velocity * cos, length * angular_velocity * sin),
            angle,
            angular_velocity,
            effective_length: length,
        })
    }
}

impl OdeSystem for PendulumDynamics {
    fn derivative(&self, t: f64, y: &StateVector) -> PendulumCvResult<StateVector> {
        let (angle, angular_velocity) = (y.x, y.y);
        let length = self.effective_length(t, angle, angular_velocity)?;
        let acceleration = -(self.effective_gravity / length) * angle.sin()
            - (self.linear_drag / self.mass) * angular_velocity
            - (self.quadratic_drag / self.mass) * length * angular_velocity.abs() * angular_velocity;
        Ok(StateVector::new(angular_velocity, acceleration))
    }
}

/// Tracks energy against the value at release.
struct EnergyGuard {
    initial: f64,
    tolerance: f64,
    dissipative: bool,
    max_drift: f64,
}

impl EnergyGuard {
    fn check(&mut self, t: f64, dt: f64, energy: f64) -> PendulumCvResult<()> {
        let change = energy - self.initial;
        let drift = if self.dissipative { change } else { change.abs() };
        self.max_drift = self.max_drift.max(drift);
        if drift > self.tolerance * self.initial {
            return Err(PendulumCvError::IntegrationDiverged {
                time: t,
                step: dt,
                reason: format!(
                    "mechanical energy drifted from {:.9e} to {energy:.9e} J/kg (tolerance {:.1e} relative)",
                    self.initial, self.tolerance
                ),
            });
        }
        Ok(())
    }
}

/// Deterministic pendulum simulator.
///
/// Holds validated physical parameters; each call to [`PendulumSimulator::simulate`]
/// produces a fresh [`Trajectory`]. Identical inputs give bit-identical output.
#[derive(Debug, Clone)]
pub struct PendulumSimulator {
    params: PendulumParams,
    dynamics: PendulumDynamics,
}

impl PendulumSimulator {
    pub fn new(params: PendulumParams) -> PendulumCvResult<Self> {
        params.validate()?;
        Ok(Self {
            params,
            dynamics: PendulumDynamics::new(&params),
        })
    }

    pub fn params(&self) -> &PendulumParams {
        &self.params
    }

    pub fn small_angle_period(&self) -> f64 {
        self.params.small_angle_period()
    }

    /// Mechanical energy per unit mass of a recorded state (J/kg).
    pub fn energy(&self, state: &PhysicalState) -> f64 {
        self.dynamics
            .energy(state.angle, state.angular_velocity, state.effective_length)
    }

    /// Integrates from `t = 0` and samples at the configured output rate.
    pub fn simulate(
        &self,
        initial: &InitialConditions,
        config: &SimulationConfig,
    ) -> PendulumCvResult<Trajectory> {
        config.validate()?;
        let start = Instant::now();
        let times = config.output_times();
        let trajectory = self.integrate(initial, &times, config)?;
        info!(
            "simulated {:.3} s: {} samples at {} Hz in {:?}",
            config.duration,
            trajectory.len(),
            config.output_rate,
            start.elapsed()
        );
        Ok(trajectory)
    }

    /// Integrates from `t = 0` and samples at arbitrary times.
    ///
    /// `times` must be non-empty, finite, non-negative and strictly increasing;
    /// `config.duration` and `config.output_rate` are ignored.
    pub fn simulate_at(
        &self,
        initial: &InitialConditions,
        times: &[f64],
        config: &SimulationConfig,
    ) -> PendulumCvResult<Trajectory> {
        config.step_policy.validate()?;
        ensure_positive("energy_tolerance", config.energy_tolerance)?;
        if times.is_empty() {
            return Err(PendulumCvError::config("simulate_at needs at least one sample time"));
        }
        if let Some(bad) = times.iter().find(|t| !(t.is_finite() && **t >= 0.0)) {
            return Err(PendulumCvError::config(format!(
                "sample times must be finite and non-negative, got {bad}"
            )));
        }
        if times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(PendulumCvError::config("sample times must be strictly increasing"));
        }
        self.integrate(initial, times, config)
    }

    fn integrate(
        &self,
        initial: &InitialConditions,
        times: &[f64],
        config: &SimulationConfig,
    ) -> PendulumCvResult<Trajectory> {
        initial.validate()?;
        let dynamics = &self.dynamics;
        let mut integrator = Integrator::new(config.step_policy)?;

        let mut t = 0.0;
        let mut y = StateVector::new(initial.angle, initial.angular_velocity);
        let mut dy = dynamics.derivative(t, &y)?;
        let initial_length = dynamics.effective_length(t, y.x, y.y)?;
        let mut guard = EnergyGuard {
            initial: dynamics.energy(y.x, y.y, initial_length),
            tolerance: config.energy_tolerance,
            dissipative: self.params.is_dissipative(),
            max_drift: 0.0,
        };

        let end = times[times.len() - 1];
        let mut samples = Vec::with_capacity(times.len());
        let mut next = 0;
        let mut steps = 0usize;

        while next < times.len() && times[next] <= t {
            samples.push(dynamics.state(t, &y)?);
            next += 1;
        }

        while next < times.len() {
            let remaining = end - t;
            let step = integrator.advance(dynamics, t, &y, remaining)?;
            let t_next = if step.dt >= remaining { end } else { step.t };
            let dy_next = dynamics.derivative(t_next, &step.y)?;
            steps += 1;

            if self.params.is_rigid() {
                let length = dynamics.effective_length(t_next, step.y.x, step.y.y)?;
                guard.check(t_next, step.dt, dynamics.energy(step.y.x, step.y.y, length))?;
            }

            let h = t_next - t;
            while next < times.len() && times[next] <= t_next {
                let sample_t = times[next];
                let sample = if sample_t == t_next {
                    step.y
                } else {
                    hermite(&y, &dy, &step.y, &dy_next, h, (sample_t - t) / h)
                };
                samples.push(dynamics.state(sample_t, &sample)?);
                next += 1;
            }

            t = t_next;
            y = step.y;
            dy = dy_next;
        }

        debug!(
            "integrated to t = {:.6} s in {} internal steps (max energy drift {:.3e} J/kg)",
            t, steps, guard.max_drift
        );
        Trajectory::from_states(samples)
    }
}

/// Cubic Hermite interpolation of `(θ, θ̇)` inside one internal step, using
/// `(θ̇, θ̈)` at both ends as tangents.
fn hermite(
    y0: &StateVector,
    d0: &StateVector,
    y1: &StateVector,
    d1: &StateVector,
    h: f64,
    s: f64,
) -> StateVector {
    let s2 = s * s;
    let s3 = s2 * s;
    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;
    y0 * h00 + d0 * (h10 * h) + y1 * h01 + d1 * (h11 * h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn ideal() -> PendulumCvResult<PendulumSimulator> {
        PendulumSimulator::new(PendulumParams::ideal(1.0, 9.81))
    }

    #[test]
    fn test_output_times_cover_duration() {
        let config = SimulationConfig::new(2.0, 100.0);
        let times = config.output_times();
        assert_eq!(times.len(), 201);
        assert_eq!(times[0], 0.0);
        assert_eq!(times[200], 2.0);
    }

    #[test]
    fn test_small_amplitude_matches_harmonic_solution() -> PendulumCvResult<()> {
        let simulator = ideal()?;
        let amplitude = 0.01;
        let trajectory = simulator.simulate(
            &InitialConditions::new(amplitude, 0.0),
            &SimulationConfig::new(1.0, 50.0),
        )?;
        let omega = (9.81_f64).sqrt();
        for state in trajectory.iter() {
            let expected = amplitude * (omega * state.t).cos();
            // Nonlinear correction is O(amplitude³).
            assert!((state.angle - expected).abs() < 1e-5, "t = {}", state.t);
        }
        Ok(())
    }

    #[test]
    fn test_simulation_is_bit_reproducible() -> PendulumCvResult<()> {
        let simulator = PendulumSimulator::new(PendulumParams::default())?;
        let config = SimulationConfig::new(1.5, 120.0);
        let initial = InitialConditions::from_degrees(15.0);
        let a = simulator.simulate(&initial, &config)?;
        let b = simulator.simulate(&initial, &config)?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_drag_removes_energy() -> PendulumCvResult<()> {
        let params = PendulumParams::ideal(0.5, 9.81).with_air(1.2, 1.8e-5);
        let params = PendulumParams {
            bob_radius: 0.02,
            drag_coefficient: 0.47,
            bob_mass: 0.01,
            ..params
        };
        let simulator = PendulumSimulator::new(params)?;
        let trajectory = simulator.simulate(
            &InitialConditions::from_degrees(30.0),
            &SimulationConfig::new(10.0, 20.0),
        )?;
        let first = simulator.energy(trajectory.first());
        let last = simulator.energy(trajectory.last());
        assert!(last < 0.9 * first, "{last} vs {first}");
        Ok(())
    }

    #[test]
    fn test_elastic_string_stretches_at_bottom() -> PendulumCvResult<()> {
        let params = PendulumParams::ideal(1.0, 9.81).with_string_stiffness(Some(500.0));
        let simulator = PendulumSimulator::new(params)?;
        let trajectory = simulator.simulate(
            &InitialConditions::from_degrees(40.0),
            &SimulationConfig::new(1.0, 200.0),
        )?;
        let stretch_at_release = trajectory.first().effective_length - 1.0;
        let max_length = trajectory
            .iter()
            .map(|s| s.effective_length)
            .fold(f64::MIN, f64::max);
        assert!(stretch_at_release > 0.0);
        // Tension peaks at the bottom of the swing where θ̇ is largest.
        assert!(max_length > 1.0 + stretch_at_release);
        Ok(())
    }

    #[test]
    fn test_elastic_runaway_diverges() -> PendulumCvResult<()> {
        // m θ̇² / k > 1 at release.
        let params = PendulumParams::ideal(1.0, 9.81).with_string_stiffness(Some(0.5));
        let simulator = PendulumSimulator::new(params)?;
        let result = simulator.simulate(
            &InitialConditions::new(0.0, 1.0),
            &SimulationConfig::new(1.0, 10.0),
        );
        assert!(matches!(
            result,
            Err(PendulumCvError::IntegrationDiverged { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_coarse_fixed_step_trips_energy_guard() -> PendulumCvResult<()> {
        let simulator = ideal()?;
        let config = SimulationConfig::new(20.0, 10.0)
            .with_step_policy(StepPolicy::Fixed { dt: 0.25 })
            .with_energy_tolerance(1e-6);
        let result = simulator.simulate(&InitialConditions::from_degrees(60.0), &config);
        assert!(matches!(
            result,
            Err(PendulumCvError::IntegrationDiverged { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_simulate_at_matches_simulate() -> PendulumCvResult<()> {
        let simulator = ideal()?;
        let config = SimulationConfig::new(1.0, 10.0);
        let initial = InitialConditions::from_degrees(20.0);
        let regular = simulator.simulate(&initial, &config)?;
        let sampled = simulator.simulate_at(&initial, &[0.25, 0.5, 1.0], &config)?;
        assert_eq!(sampled.len(), 3);
        assert_eq!(sampled.start_time(), 0.25);
        let at_half = regular.states()[5];
        assert!((sampled.states()[1].angle - at_half.angle).abs() < 1e-9);

        assert!(simulator.simulate_at(&initial, &[0.5, 0.5], &config).is_err());
        assert!(simulator.simulate_at(&initial, &[-0.1], &config).is_err());
        assert!(simulator.simulate_at(&initial, &[], &config).is_err());
        Ok(())
    }

    #[test]
    fn test_rigid_string_keeps_bob_on_circle() -> PendulumCvResult<()> {
        let simulator = ideal()?;
        let trajectory = simulator.simulate(
            &InitialConditions::new(PI / 2.0, 0.0),
            &SimulationConfig::new(0.5, 100.0),
        )?;
        for state in trajectory.iter() {
            assert!((state.position.norm() - 1.0).abs() < 1e-12);
        }
        Ok(())
    }
}
