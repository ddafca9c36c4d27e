//! Solvers for dense nonlinear least-squares problems.
//!
//! Every solver implements [`Solver`] over a [`LeastSquaresProblem`], so the damping
//! and step policy can be swapped, or tested on closed-form problems, independently
//! of any camera or pendulum cost function:
//! - Levenberg-Marquardt (adaptive damping, the default)
//! - Gauss-Newton (backtracking line search)

use crate::core::LeastSquaresProblem;
use crate::error::{PendulumCvError, PendulumCvResult};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod gauss_newton;
pub mod levenberg_marquardt;

pub use gauss_newton::GaussNewton;
pub use levenberg_marquardt::LevenbergMarquardt;

/// Type of optimization solver algorithm to use
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerType {
    /// Levenberg-Marquardt algorithm (robust, adaptive damping)
    #[default]
    LevenbergMarquardt,
    /// Gauss-Newton algorithm (fast convergence near the minimum, may stall far from it)
    GaussNewton,
}

impl fmt::Display for OptimizerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerType::LevenbergMarquardt => write!(f, "Levenberg-Marquardt"),
            OptimizerType::GaussNewton => write!(f, "Gauss-Newton"),
        }
    }
}

/// Termination criteria shared by all solvers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Type of optimizer algorithm to use
    pub optimizer_type: OptimizerType,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Relative cost decrease `(f_old − f_new) / f_old` below which an accepted step converges
    pub cost_tolerance: f64,
    /// Relative step `||dx|| / (||x|| + tol)` below which an accepted step converges
    pub parameter_tolerance: f64,
    /// Infinity norm of the gradient `Jᵀr` below which the solver converges
    pub gradient_tolerance: f64,
    /// Initial Levenberg-Marquardt damping
    pub initial_damping: f64,
    /// Timeout duration
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            optimizer_type: OptimizerType::default(),
            max_iterations: 100,
            cost_tolerance: 1e-12,
            parameter_tolerance: 1e-12,
            gradient_tolerance: 1e-12,
            initial_damping: 1e-3,
            timeout: None,
        }
    }
}

impl OptimizerConfig {
    /// Create a new solver configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the optimizer algorithm type
    pub fn with_optimizer_type(mut self, optimizer_type: OptimizerType) -> Self {
        self.optimizer_type = optimizer_type;
        self
    }

    /// Set the maximum number of iterations
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the cost tolerance
    pub fn with_cost_tolerance(mut self, cost_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self
    }

    /// Set the parameter tolerance
    pub fn with_parameter_tolerance(mut self, parameter_tolerance: f64) -> Self {
        self.parameter_tolerance = parameter_tolerance;
        self
    }

    /// Set the gradient tolerance
    pub fn with_gradient_tolerance(mut self, gradient_tolerance: f64) -> Self {
        self.gradient_tolerance = gradient_tolerance;
        self
    }

    /// Set the initial damping
    pub fn with_initial_damping(mut self, initial_damping: f64) -> Self {
        self.initial_damping = initial_damping;
        self
    }

    /// Set the timeout duration
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> PendulumCvResult<()> {
        if self.max_iterations == 0 {
            return Err(PendulumCvError::config("max_iterations must be at least 1"));
        }
        for (name, value) in [
            ("cost_tolerance", self.cost_tolerance),
            ("parameter_tolerance", self.parameter_tolerance),
            ("gradient_tolerance", self.gradient_tolerance),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(PendulumCvError::config(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if !(self.initial_damping.is_finite() && self.initial_damping > 0.0) {
            return Err(PendulumCvError::config(format!(
                "initial_damping must be positive, got {}",
                self.initial_damping
            )));
        }
        Ok(())
    }
}

impl fmt::Display for OptimizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OptimizerConfig {{ optimizer_type: {}, max_iterations: {}, cost_tolerance: {:e}, parameter_tolerance: {:e}, gradient_tolerance: {:e}, timeout: {:?} }}",
            self.optimizer_type,
            self.max_iterations,
            self.cost_tolerance,
            self.parameter_tolerance,
            self.gradient_tolerance,
            self.timeout
        )
    }
}

/// Detailed convergence information.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConvergenceInfo {
    /// Final gradient infinity norm
    pub final_gradient_norm: f64,
    /// Final parameter update norm
    pub final_parameter_update_norm: f64,
    /// Cost function evaluation count
    pub cost_evaluations: usize,
    /// Jacobian evaluation count
    pub jacobian_evaluations: usize,
    /// Steps that lowered the cost
    pub successful_steps: usize,
    /// Steps that were rejected
    pub unsuccessful_steps: usize,
}

impl fmt::Display for ConvergenceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Final gradient norm: {:.2e}, Final parameter update norm: {:.2e}, Cost evaluations: {}, Jacobian evaluations: {}",
            self.final_gradient_norm,
            self.final_parameter_update_norm,
            self.cost_evaluations,
            self.jacobian_evaluations
        )
    }
}

/// Status of an optimization process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    /// Optimization converged successfully (e.g. nothing left to optimize)
    Converged,
    /// Maximum number of iterations reached
    MaxIterationsReached,
    /// Cost function tolerance reached
    CostToleranceReached,
    /// Parameter tolerance reached
    ParameterToleranceReached,
    /// Gradient tolerance reached
    GradientToleranceReached,
    /// Optimization failed due to numerical issues
    NumericalFailure,
    /// Timeout reached
    Timeout,
    /// Other failure
    Failed(String),
}

impl OptimizationStatus {
    /// Whether the solver stopped because a convergence criterion was met.
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            OptimizationStatus::Converged
                | OptimizationStatus::CostToleranceReached
                | OptimizationStatus::ParameterToleranceReached
                | OptimizationStatus::GradientToleranceReached
        )
    }
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged => write!(f, "Converged"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::CostToleranceReached => write!(f, "Cost tolerance reached"),
            OptimizationStatus::ParameterToleranceReached => {
                write!(f, "Parameter tolerance reached")
            }
            OptimizationStatus::GradientToleranceReached => write!(f, "Gradient tolerance reached"),
            OptimizationStatus::NumericalFailure => write!(f, "Numerical failure"),
            OptimizationStatus::Timeout => write!(f, "Timeout"),
            OptimizationStatus::Failed(msg) => write!(f, "Failed: {msg}"),
        }
    }
}

/// Result of a solver execution.
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// Best parameters found
    pub parameters: DVector<f64>,
    /// Final optimization status
    pub status: OptimizationStatus,
    /// Initial cost value
    pub initial_cost: f64,
    /// Final cost value
    pub final_cost: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Total time elapsed
    pub elapsed_time: Duration,
    /// Convergence statistics
    pub convergence_info: ConvergenceInfo,
}

/// Core trait for optimization solvers.
///
/// A non-converged run is not an error: the best parameters are returned with a
/// non-converged [`OptimizationStatus`]. Errors are reserved for problems that
/// cannot be evaluated at the initial guess.
pub trait Solver: Send + Sync {
    fn name(&self) -> &'static str;

    fn minimize(
        &self,
        problem: &dyn LeastSquaresProblem,
        initial: DVector<f64>,
    ) -> PendulumCvResult<SolverResult>;
}

/// Enum dispatch over the built-in solvers, selected by [`OptimizerType`].
#[derive(Debug, Clone)]
pub enum AnySolver {
    LevenbergMarquardt(LevenbergMarquardt),
    GaussNewton(GaussNewton),
}

impl AnySolver {
    pub fn new(config: OptimizerConfig) -> Self {
        match config.optimizer_type {
            OptimizerType::LevenbergMarquardt => {
                AnySolver::LevenbergMarquardt(LevenbergMarquardt::with_config(config))
            }
            OptimizerType::GaussNewton => AnySolver::GaussNewton(GaussNewton::with_config(config)),
        }
    }
}

impl Solver for AnySolver {
    fn name(&self) -> &'static str {
        match self {
            AnySolver::LevenbergMarquardt(solver) => solver.name(),
            AnySolver::GaussNewton(solver) => solver.name(),
        }
    }

    fn minimize(
        &self,
        problem: &dyn LeastSquaresProblem,
        initial: DVector<f64>,
    ) -> PendulumCvResult<SolverResult> {
        match self {
            AnySolver::LevenbergMarquardt(solver) => solver.minimize(problem, initial),
            AnySolver::GaussNewton(solver) => solver.minimize(problem, initial),
        }
    }
}

/// Shared by both solvers: `Converged` if an accepted step satisfied the cost or
/// parameter tolerance.
pub(crate) fn check_step_convergence(
    config: &OptimizerConfig,
    old_cost: f64,
    new_cost: f64,
    step_norm: f64,
    parameter_norm: f64,
) -> Option<OptimizationStatus> {
    let relative_decrease = (old_cost - new_cost) / old_cost.max(f64::MIN_POSITIVE);
    if relative_decrease.abs() < config.cost_tolerance || new_cost == 0.0 {
        return Some(OptimizationStatus::CostToleranceReached);
    }
    if step_norm <= config.parameter_tolerance * (parameter_norm + config.parameter_tolerance) {
        return Some(OptimizationStatus::ParameterToleranceReached);
    }
    None
}


#[cfg(test)]
mod tests {
    use super::test_problems::*;
    use super::*;

    #[test]
    fn test_status_convergence_flags() {
        assert!(OptimizationStatus::CostToleranceReached.is_converged());
        assert!(OptimizationStatus::Converged.is_converged());
        assert!(!OptimizationStatus::MaxIterationsReached.is_converged());
        assert!(!OptimizationStatus::Failed("x".into()).is_converged());
    }

    #[test]
    fn test_any_solver_dispatch() -> PendulumCvResult<()> {
        let problem = LinearProblem::example();
        for optimizer_type in [OptimizerType::LevenbergMarquardt, OptimizerType::GaussNewton] {
            let solver = AnySolver::new(OptimizerConfig::new().with_optimizer_type(optimizer_type));
            let result = solver.minimize(&problem, DVector::zeros(2))?;
            assert!(result.status.is_converged(), "{}: {}", solver.name(), result.status);
            assert!((result.parameters - problem.solution()).amax() < 1e-8);
        }
        Ok(())
    }

    #[test]
    fn test_config_validation() {
        assert!(OptimizerConfig::default().validate().is_ok());
        assert!(OptimizerConfig::new().with_max_iterations(0).validate().is_err());
        assert!(OptimizerConfig::new().with_initial_damping(0.0).validate().is_err());
    }
}
