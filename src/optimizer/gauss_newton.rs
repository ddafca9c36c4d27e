//! Gauss-Newton optimization algorithm implementation
//!
//! The Gauss-Newton algorithm approximates the Hessian by `JᵀJ` and takes the full
//! normal-equation step. A backtracking line search halves the step until the cost
//! decreases, which keeps it usable from moderately poor starting points.

use crate::core::LeastSquaresProblem;
use crate::error::PendulumCvResult;
use crate::optimizer::{
    ConvergenceInfo, OptimizationStatus, OptimizerConfig, Solver, SolverResult,
    check_step_convergence,
};
use nalgebra::DVector;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Gauss-Newton solver for nonlinear least squares optimization.
#[derive(Debug, Clone)]
pub struct GaussNewton {
    config: OptimizerConfig,
    max_backtracking_steps: usize,
}

impl GaussNewton {
    /// Create a new Gauss-Newton solver with default configuration.
    pub fn new() -> Self {
        Self::with_config(OptimizerConfig::default())
    }

    /// Create a new Gauss-Newton solver with the given configuration.
    pub fn with_config(config: OptimizerConfig) -> Self {
        Self {
            config,
            max_backtracking_steps: 30,
        }
    }

    /// Set how many times a step may be halved before the iteration gives up.
    pub fn with_max_backtracking_steps(mut self, steps: usize) -> Self {
        self.max_backtracking_steps = steps;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}

impl Default for GaussNewton {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for GaussNewton {
    fn name(&self) -> &'static str {
        "Gauss-Newton"
    }

    fn minimize(
        &self,
        problem: &dyn LeastSquaresProblem,
        initial: DVector<f64>,
    ) -> PendulumCvResult<SolverResult> {
        self.config.validate()?;
        let start_time = Instant::now();
        let mut params = initial;
        let mut info = ConvergenceInfo::default();

        let mut residuals = problem.residuals(&params)?;
        info.cost_evaluations += 1;
        let initial_cost = 0.5 * residuals.norm_squared();
        let mut current_cost = initial_cost;

        let mut iteration = 0;
        let status = 'outer: loop {
            if let Some(timeout) = self.config.timeout
                && start_time.elapsed() >= timeout
            {
                break OptimizationStatus::Timeout;
            }
            if iteration >= self.config.max_iterations {
                break OptimizationStatus::MaxIterationsReached;
            }

            let jacobian = match problem.jacobian(&params) {
                Ok(jacobian) => jacobian,
                Err(err) if iteration > 0 => break OptimizationStatus::Failed(err.to_string()),
                Err(err) => return Err(err),
            };
            info.jacobian_evaluations += 1;
            let gradient = jacobian.transpose() * &residuals;
            info.final_gradient_norm = gradient.amax();
            if info.final_gradient_norm <= self.config.gradient_tolerance {
                break OptimizationStatus::GradientToleranceReached;
            }

            let hessian = jacobian.transpose() * &jacobian;
            let Some(full_step) = hessian.cholesky().map(|c| c.solve(&(-&gradient))) else {
                break OptimizationStatus::NumericalFailure;
            };
            iteration += 1;

            let mut alpha = 1.0;
            for _ in 0..=self.max_backtracking_steps {
                let step = &full_step * alpha;
                let step_norm = step.norm();
                info.final_parameter_update_norm = step_norm;
                let candidate = &params + &step;
                info.cost_evaluations += 1;

                if let Ok(r) = problem.residuals(&candidate) {
                    let new_cost = 0.5 * r.norm_squared();
                    if new_cost < current_cost {
                        info.successful_steps += 1;
                        debug!(
                            "Iteration {}: cost = {:.6e}, alpha = {:.3e}, step_norm = {:.3e}",
                            iteration, new_cost, alpha, step_norm
                        );
                        let converged = check_step_convergence(
                            &self.config,
                            current_cost,
                            new_cost,
                            step_norm,
                            params.norm(),
                        );
                        params = candidate;
                        residuals = r;
                        current_cost = new_cost;
                        if let Some(status) = converged {
                            break 'outer status;
                        }
                        continue 'outer;
                    }
                }
                info.unsuccessful_steps += 1;
                if step_norm <= self.config.parameter_tolerance * (params.norm() + self.config.parameter_tolerance) {
                    break 'outer OptimizationStatus::ParameterToleranceReached;
                }
                alpha *= 0.5;
            }
            break OptimizationStatus::NumericalFailure;
        };

        if !status.is_converged() {
            warn!("Gauss-Newton stopped without converging: {status}");
        }
        info!(
            "Gauss-Newton finished: {} ({} iterations, cost {:.6e} -> {:.6e})",
            status, iteration, initial_cost, current_cost
        );

        Ok(SolverResult {
            parameters: params,
            status,
            initial_cost,
            final_cost: current_cost,
            iterations: iteration,
            elapsed_time: start_time.elapsed(),
            convergence_info: info,
        })
    }
}
