//! Recorded pendulum states and the trajectory that owns them.

use crate::error::{PendulumCvError, PendulumCvResult};
use nalgebra::{Vector2, Vector3};
use serde::Serialize;

/// One sample of the pendulum motion in the swing plane.
///
/// The plane is the world plane `z = 0`, with the pivot at the origin, `x`
/// horizontal and `y` pointing up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhysicalState {
    /// Time (s).
    pub t: f64,
    /// Bob centre position (m).
    pub position: Vector2<f64>,
    /// Bob centre velocity (m/s).
    pub velocity: Vector2<f64>,
    /// Angle from the downward vertical (rad).
    pub angle: f64,
    /// Angular velocity (rad/s).
    pub angular_velocity: f64,
    /// Pivot-to-centre length including thermal and elastic changes (m).
    pub effective_length: f64,
}

impl PhysicalState {
    /// Lifts the in-plane position to a world point on `z = 0`.
    pub fn world_point(&self) -> Vector3<f64> {
        Vector3::new(self.position.x, self.position.y, 0.0)
    }

    pub fn world_velocity(&self) -> Vector3<f64> {
        Vector3::new(self.velocity.x, self.velocity.y, 0.0)
    }
}

/// Time-ordered sequence of [`PhysicalState`] produced by the simulator.
///
/// Timestamps are strictly increasing; downstream stages only read it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    states: Vec<PhysicalState>,
}

impl Trajectory {
    /// Wraps simulator output, re-checking the time ordering.
    pub(crate) fn from_states(states: Vec<PhysicalState>) -> PendulumCvResult<Self> {
        if states.is_empty() {
            return Err(PendulumCvError::config("a trajectory needs at least one state"));
        }
        if let Some(pair) = states.windows(2).find(|w| w[1].t <= w[0].t) {
            return Err(PendulumCvError::config(format!(
                "trajectory timestamps must be strictly increasing ({} followed by {})",
                pair[0].t, pair[1].t
            )));
        }
        Ok(Self { states })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[PhysicalState] {
        &self.states
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PhysicalState> {
        self.states.iter()
    }

    pub fn first(&self) -> &PhysicalState {
        &self.states[0]
    }

    pub fn last(&self) -> &PhysicalState {
        &self.states[self.states.len() - 1]
    }

    pub fn start_time(&self) -> f64 {
        self.first().t
    }

    pub fn end_time(&self) -> f64 {
        self.last().t
    }

    pub fn duration(&self) -> f64 {
        self.end_time() - self.start_time()
    }

    /// Plain `(t, x, y, vx, vy, effective_length)` tuples for plotting and export.
    pub fn as_tuples(&self) -> Vec<(f64, f64, f64, f64, f64, f64)> {
        self.states
            .iter()
            .map(|s| {
                (
                    s.t,
                    s.position.x,
                    s.position.y,
                    s.velocity.x,
                    s.velocity.y,
                    s.effective_length,
                )
            })
            .collect()
    }

    /// Resamples the trajectory at `t`.
    ///
    /// Position uses cubic Hermite interpolation with the recorded velocities as
    /// tangents; velocity, angle and length are interpolated linearly. Requests
    /// outside `[start_time, end_time]` fail with [`PendulumCvError::OutOfRange`];
    /// the trajectory is never extrapolated.
    pub fn interpolate(&self, t: f64) -> PendulumCvResult<PhysicalState> {
        let (start, end) = (self.start_time(), self.end_time());
        if !(t >= start && t <= end) {
            return Err(PendulumCvError::OutOfRange {
                requested: t,
                start,
                end,
            });
        }

        if self.states.len() == 1 {
            return Ok(self.states[0]);
        }
        // First index with states[i].t > t; clamp so that [i-1, i] brackets t.
        let upper = self
            .states
            .partition_point(|s| s.t <= t)
            .clamp(1, self.states.len() - 1);
        let a = &self.states[upper - 1];
        let b = &self.states[upper];
        if t == a.t {
            return Ok(*a);
        }
        if t == b.t {
            return Ok(*b);
        }

        let h = b.t - a.t;
        let s = (t - a.t) / h;
        let s2 = s * s;
        let s3 = s2 * s;
        let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
        let h10 = s3 - 2.0 * s2 + s;
        let h01 = -2.0 * s3 + 3.0 * s2;
        let h11 = s3 - s2;
        let lerp = |x: f64, y: f64| x + (y - x) * s;

        Ok(PhysicalState {
            t,
            position: a.position * h00 + a.velocity * (h10 * h) + b.position * h01 + b.velocity * (h11 * h),
            velocity: a.velocity + (b.velocity - a.velocity) * s,
            angle: lerp(a.angle, b.angle),
            angular_velocity: lerp(a.angular_velocity, b.angular_velocity),
            effective_length: lerp(a.effective_length, b.effective_length),
        })
    }
}

impl<'a> IntoIterator for &'a Trajectory {
    type Item = &'a PhysicalState;
    type IntoIter = std::slice::Iter<'a, PhysicalState>;

    fn into_iter(self) -> Self::IntoIter {
        self.states.iter()
    }
}
