//! Physical parameters of the pendulum and its surroundings.
//!
//! All quantities are SI (metres, kilograms, seconds, kelvin/celsius deltas, radians).

use crate::error::{
    PendulumCvError, PendulumCvResult, ensure_finite, ensure_non_negative, ensure_positive,
};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Density of steel (kg/m³), used to size the default bob.
pub const STEEL_DENSITY: f64 = 7850.0;

/// Physical constants of the pendulum and the air around it.
///
/// Every field is explicit and independently overridable; [`PendulumParams::validate`]
/// is called by every consumer before integration starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PendulumParams {
    /// Pivot-to-bob-surface string length at the reference temperature (m).
    pub string_length: f64,
    /// Radius of the spherical bob (m).
    pub bob_radius: f64,
    /// Mass of the bob (kg).
    pub bob_mass: f64,
    /// Gravitational acceleration (m/s²).
    pub gravity: f64,
    /// Density of the surrounding air (kg/m³). Drives buoyancy and quadratic drag.
    pub air_density: f64,
    /// Dynamic viscosity of the surrounding air (Pa·s). Drives linear drag.
    pub air_viscosity: f64,
    /// Quadratic drag coefficient of the bob (dimensionless, ~0.47 for a sphere).
    pub drag_coefficient: f64,
    /// Axial stiffness of the string (N/m); `None` for an inextensible string.
    pub string_stiffness: Option<f64>,
    /// Linear thermal expansion coefficient of the string (1/K).
    pub thermal_expansion_coefficient: f64,
    /// Ambient temperature during the experiment (°C).
    pub ambient_temperature: f64,
    /// Temperature at which `string_length` was measured (°C).
    pub reference_temperature: f64,
}

impl Default for PendulumParams {
    fn default() -> Self {
        let bob_radius = 0.013;
        Self {
            string_length: 0.127,
            bob_radius,
            bob_mass: STEEL_DENSITY * sphere_volume(bob_radius),
            gravity: 9.81,
            air_density: 1.204,
            air_viscosity: 1.81e-5,
            drag_coefficient: 0.47,
            string_stiffness: None,
            thermal_expansion_coefficient: 1.2e-5,
            ambient_temperature: 20.0,
            reference_temperature: 20.0,
        }
    }
}

impl PendulumParams {
    /// A frictionless, rigid, buoyancy-free pendulum whose pivot-to-centre length is
    /// exactly `length`. Useful as a reference configuration.
    pub fn ideal(length: f64, gravity: f64) -> Self {
        Self {
            string_length: length,
            bob_radius: 0.0,
            bob_mass: 1.0,
            gravity,
            air_density: 0.0,
            air_viscosity: 0.0,
            drag_coefficient: 0.0,
            string_stiffness: None,
            thermal_expansion_coefficient: 0.0,
            ambient_temperature: 20.0,
            reference_temperature: 20.0,
        }
    }

    pub fn with_gravity(mut self, gravity: f64) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_string_length(mut self, string_length: f64) -> Self {
        self.string_length = string_length;
        self
    }

    pub fn with_string_stiffness(mut self, stiffness: Option<f64>) -> Self {
        self.string_stiffness = stiffness;
        self
    }

    pub fn with_air(mut self, density: f64, viscosity: f64) -> Self {
        self.air_density = density;
        self.air_viscosity = viscosity;
        self
    }

    pub fn with_temperature(mut self, ambient: f64) -> Self {
        self.ambient_temperature = ambient;
        self
    }

    pub fn validate(&self) -> PendulumCvResult<()> {
        ensure_positive("string_length", self.string_length)?;
        ensure_non_negative("bob_radius", self.bob_radius)?;
        ensure_positive("bob_mass", self.bob_mass)?;
        ensure_positive("gravity", self.gravity)?;
        ensure_non_negative("air_density", self.air_density)?;
        ensure_non_negative("air_viscosity", self.air_viscosity)?;
        ensure_non_negative("drag_coefficient", self.drag_coefficient)?;
        if let Some(k) = self.string_stiffness {
            ensure_positive("string_stiffness", k)?;
        }
        ensure_finite(
            "thermal_expansion_coefficient",
            self.thermal_expansion_coefficient,
        )?;
        ensure_finite("ambient_temperature", self.ambient_temperature)?;
        ensure_finite("reference_temperature", self.reference_temperature)?;

        let displaced = self.air_density * self.bob_volume();
        if displaced >= self.bob_mass {
            return Err(PendulumCvError::config(format!(
                "buoyancy ({displaced:.6} kg of displaced air) cancels the bob weight ({:.6} kg)",
                self.bob_mass
            )));
        }
        if self.thermal_length() <= 0.0 {
            return Err(PendulumCvError::config(format!(
                "thermal expansion yields a non-positive length ({:.6} m)",
                self.thermal_length()
            )));
        }
        Ok(())
    }

    pub fn bob_volume(&self) -> f64 {
        sphere_volume(self.bob_radius)
    }

    pub fn cross_section(&self) -> f64 {
        PI * self.bob_radius * self.bob_radius
    }

    /// Pivot-to-bob-centre length after thermal expansion of the string, before
    /// elastic stretch.
    pub fn thermal_length(&self) -> f64 {
        let delta_t = self.ambient_temperature - self.reference_temperature;
        self.string_length * (1.0 + self.thermal_expansion_coefficient * delta_t) + self.bob_radius
    }

    /// Gravity reduced by the buoyancy of the displaced air.
    pub fn effective_gravity(&self) -> f64 {
        self.gravity * (1.0 - self.air_density * self.bob_volume() / self.bob_mass)
    }

    /// Stokes drag constant `b` in `F = b·v` (kg/s).
    pub fn linear_drag(&self) -> f64 {
        6.0 * PI * self.air_viscosity * self.bob_radius
    }

    /// Quadratic drag constant `c` in `F = c·|v|·v` (kg/m).
    pub fn quadratic_drag(&self) -> f64 {
        0.5 * self.air_density * self.drag_coefficient * self.cross_section()
    }

    /// Whether the air removes energy from the swing.
    pub fn is_dissipative(&self) -> bool {
        self.linear_drag() > 0.0 || self.quadratic_drag() > 0.0
    }

    pub fn is_rigid(&self) -> bool {
        self.string_stiffness.is_none()
    }

    /// Small-angle period `2π·sqrt(L/g_eff)` of the thermal length.
    pub fn small_angle_period(&self) -> f64 {
        2.0 * PI * (self.thermal_length() / self.effective_gravity()).sqrt()
    }
}

/// Initial angle from the downward vertical and angular velocity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InitialConditions {
    /// Angle from the downward vertical (rad).
    pub angle: f64,
    /// Angular velocity (rad/s).
    pub angular_velocity: f64,
}

impl InitialConditions {
    pub fn new(angle: f64, angular_velocity: f64) -> Self {
        Self {
            angle,
            angular_velocity,
        }
    }

    /// Released from rest at `degrees` from the vertical.
    pub fn from_degrees(degrees: f64) -> Self {
        Self::new(degrees.to_radians(), 0.0)
    }

    pub fn validate(&self) -> PendulumCvResult<()> {
        ensure_finite("initial angle", self.angle)?;
        ensure_finite("initial angular velocity", self.angular_velocity)
    }
}

fn sphere_volume(radius: f64) -> f64 {
    4.0 / 3.0 * PI * radius.powi(3)
}
