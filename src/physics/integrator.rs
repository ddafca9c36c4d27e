//! Explicit fourth-order Runge–Kutta integration with fixed or adaptive steps.
//!
//! The state is a plain `(θ, θ̇)` vector. The right-hand side is supplied through
//! [`OdeSystem`], which may fail (for example when the string tension runs away),
//! and every failure propagates out of the step instead of being clamped.

use crate::error::{PendulumCvError, PendulumCvResult, ensure_positive};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// `(angle, angular velocity)`.
pub type StateVector = Vector2<f64>;

/// Local error of step doubling is `(y_half - y_full) / (2^4 - 1)` for RK4.
const RICHARDSON_DIVISOR: f64 = 15.0;
const SAFETY_FACTOR: f64 = 0.9;
const MIN_GROWTH: f64 = 0.2;
const MAX_GROWTH: f64 = 5.0;

/// A first-order ODE system `ẏ = f(t, y)`.
pub trait OdeSystem {
    fn derivative(&self, t: f64, y: &StateVector) -> PendulumCvResult<StateVector>;
}

/// How the internal integration step is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPolicy {
    /// Constant step `dt` (s).
    Fixed { dt: f64 },
    /// Step-doubling error control.
    ///
    /// The step shrinks until the local error estimate is below `tolerance`;
    /// falling under `min_dt` aborts the integration.
    Adaptive {
        initial_dt: f64,
        min_dt: f64,
        max_dt: f64,
        tolerance: f64,
    },
}

impl Default for StepPolicy {
    fn default() -> Self {
        StepPolicy::Adaptive {
            initial_dt: 1e-3,
            min_dt: 1e-9,
            max_dt: 1e-2,
            tolerance: 1e-10,
        }
    }
}

impl StepPolicy {
    pub fn validate(&self) -> PendulumCvResult<()> {
        match *self {
            StepPolicy::Fixed { dt } => ensure_positive("fixed step dt", dt),
            StepPolicy::Adaptive {
                initial_dt,
                min_dt,
                max_dt,
                tolerance,
            } => {
                ensure_positive("adaptive initial_dt", initial_dt)?;
                ensure_positive("adaptive min_dt", min_dt)?;
                ensure_positive("adaptive max_dt", max_dt)?;
                ensure_positive("adaptive tolerance", tolerance)?;
                if !(min_dt <= initial_dt && initial_dt <= max_dt) {
                    return Err(PendulumCvError::config(format!(
                        "adaptive steps must satisfy min_dt <= initial_dt <= max_dt, got {min_dt} / {initial_dt} / {max_dt}"
                    )));
                }
                Ok(())
            }
        }
    }

    fn initial_step(&self) -> f64 {
        match *self {
            StepPolicy::Fixed { dt } => dt,
            StepPolicy::Adaptive { initial_dt, .. } => initial_dt,
        }
    }
}

/// One classic RK4 step of size `dt` from `(t, y)`.
pub fn rk4_step<S: OdeSystem + ?Sized>(
    system: &S,
    t: f64,
    y: &StateVector,
    dt: f64,
) -> PendulumCvResult<StateVector> {
    let half = 0.5 * dt;
    let k1 = system.derivative(t, y)?;
    let k2 = system.derivative(t + half, &(y + k1 * half))?;
    let k3 = system.derivative(t + half, &(y + k2 * half))?;
    let k4 = system.derivative(t + dt, &(y + k3 * dt))?;
    Ok(y + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0))
}

/// Result of one accepted internal step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub t: f64,
    pub dt: f64,
    pub y: StateVector,
}

/// Stateful stepper that remembers the current step size between calls.
#[derive(Debug, Clone)]
pub struct Integrator {
    policy: StepPolicy,
    dt: f64,
}

impl Integrator {
    pub fn new(policy: StepPolicy) -> PendulumCvResult<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            dt: policy.initial_step(),
        })
    }

    pub fn policy(&self) -> &StepPolicy {
        &self.policy
    }

    /// Step size the next call will attempt.
    pub fn current_step(&self) -> f64 {
        self.dt
    }

    /// Advances from `(t, y)` by at most `limit` seconds.
    ///
    /// The step never overshoots `t + limit`, so callers can land exactly on the
    /// end of the simulated interval.
    pub fn advance<S: OdeSystem + ?Sized>(
        &mut self,
        system: &S,
        t: f64,
        y: &StateVector,
        limit: f64,
    ) -> PendulumCvResult<Step> {
        match self.policy {
            StepPolicy::Fixed { dt } => {
                let h = dt.min(limit);
                let next = rk4_step(system, t, y, h)?;
                ensure_finite_state(t + h, h, &next)?;
                Ok(Step {
                    t: t + h,
                    dt: h,
                    y: next,
                })
            }
            StepPolicy::Adaptive {
                min_dt,
                max_dt,
                tolerance,
                ..
            } => {
                let mut h = self.dt.min(limit);
                loop {
                    // The final partial step to reach `limit` may legitimately be tiny.
                    if h < min_dt && h < limit {
                        return Err(PendulumCvError::IntegrationDiverged {
                            time: t,
                            step: h,
                            reason: format!(
                                "adaptive step fell below the floor {min_dt:.3e} s without meeting tolerance {tolerance:.3e}"
                            ),
                        });
                    }

                    let full = rk4_step(system, t, y, h)?;
                    let mid = rk4_step(system, t, y, 0.5 * h)?;
                    let half = rk4_step(system, t + 0.5 * h, &mid, 0.5 * h)?;
                    let error = (half - full).amax() / RICHARDSON_DIVISOR;

                    if !error.is_finite() {
                        h *= MIN_GROWTH;
                        continue;
                    }

                    let growth = if error == 0.0 {
                        MAX_GROWTH
                    } else {
                        (SAFETY_FACTOR * (tolerance / error).powf(0.2)).clamp(MIN_GROWTH, MAX_GROWTH)
                    };

                    if error <= tolerance {
                        // Richardson extrapolation of the two estimates.
                        let accepted = half + (half - full) / RICHARDSON_DIVISOR;
                        ensure_finite_state(t + h, h, &accepted)?;
                        let next_dt = (h * growth).min(max_dt);
                        if next_dt != self.dt {
                            debug!("adaptive step {:.3e} s -> {:.3e} s at t = {:.6}", self.dt, next_dt, t + h);
                        }
                        // Keep the planned step when this one was truncated by `limit`.
                        self.dt = if h < self.dt { self.dt.max(next_dt) } else { next_dt };
                        return Ok(Step {
                            t: t + h,
                            dt: h,
                            y: accepted,
                        });
                    }
                    h *= growth;
                }
            }
        }
    }
}

fn ensure_finite_state(t: f64, dt: f64, y: &StateVector) -> PendulumCvResult<()> {
    if y.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(PendulumCvError::IntegrationDiverged {
            time: t,
            step: dt,
            reason: format!("state became non-finite (θ = {}, θ̇ = {})", y.x, y.y),
        })
    }
}
