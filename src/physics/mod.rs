//! Pendulum dynamics: parameters, RK4 integration and the resulting trajectory.

pub mod integrator;
pub mod params;
pub mod simulator;
pub mod state;

pub use integrator::{Integrator, OdeSystem, StateVector, StepPolicy, rk4_step};
pub use params::{InitialConditions, PendulumParams, STEEL_DENSITY};
pub use simulator::{PendulumSimulator, SimulationConfig};
pub use state::{PhysicalState, Trajectory};
