//! Levenberg-Marquardt algorithm implementation.
//!
//! The Levenberg-Marquardt algorithm interpolates between Gauss-Newton and
//! gradient descent by damping the normal equations:
//!
//! ```text
//! (JᵀJ + λ · diag(JᵀJ)) dx = −Jᵀr
//! ```
//!
//! This implementation includes:
//! - Marquardt diagonal scaling, so the damping is invariant to parameter units
//! - Damping increased on a rejected step (cost went up or the trial point could
//!   not be evaluated) and decreased on an accepted one
//! - Damping escalation when the damped system is not positive definite
//! - Best-effort results: non-convergence is reported through the status, never
//!   as an error

use crate::core::LeastSquaresProblem;
use crate::error::PendulumCvResult;
use crate::optimizer::{
    ConvergenceInfo, OptimizationStatus, OptimizerConfig, Solver, SolverResult,
    check_step_convergence,
};
use nalgebra::{DMatrix, DVector};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Floor on diagonal entries of JᵀJ used for scaling, so parameters with a zero
/// column still get damped.
const MIN_DIAGONAL: f64 = 1e-12;

/// Summary statistics for the Levenberg-Marquardt optimization process.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtSummary {
    /// Initial cost value
    pub initial_cost: f64,
    /// Final cost value
    pub final_cost: f64,
    /// Total number of iterations performed
    pub iterations: usize,
    /// Number of successful steps (cost decreased)
    pub successful_steps: usize,
    /// Number of unsuccessful steps (cost increased, damping increased)
    pub unsuccessful_steps: usize,
    /// Final damping parameter value
    pub final_damping: f64,
    /// Total time elapsed
    pub total_time: std::time::Duration,
}

impl fmt::Display for LevenbergMarquardtSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cost {:.6e} -> {:.6e} in {} iterations ({} accepted, {} rejected), final damping {:.3e}, {:?}",
            self.initial_cost,
            self.final_cost,
            self.iterations,
            self.successful_steps,
            self.unsuccessful_steps,
            self.final_damping,
            self.total_time
        )
    }
}

/// Levenberg-Marquardt solver for nonlinear least squares optimization.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    config: OptimizerConfig,
    damping: f64,
    damping_min: f64,
    damping_max: f64,
    damping_increase_factor: f64,
    damping_decrease_factor: f64,
}

impl LevenbergMarquardt {
    /// Create a new Levenberg-Marquardt solver with default configuration.
    pub fn new() -> Self {
        Self::with_config(OptimizerConfig::default())
    }

    /// Create a new Levenberg-Marquardt solver with the given configuration.
    pub fn with_config(config: OptimizerConfig) -> Self {
        Self {
            damping: config.initial_damping,
            config,
            damping_min: 1e-12,
            damping_max: 1e12,
            damping_increase_factor: 10.0,
            damping_decrease_factor: 0.3,
        }
    }

    /// Set the initial damping parameter.
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.damping = damping;
        self
    }

    /// Set the damping parameter bounds.
    pub fn with_damping_bounds(mut self, min: f64, max: f64) -> Self {
        self.damping_min = min;
        self.damping_max = max;
        self
    }

    /// Set the damping adjustment factors.
    pub fn with_damping_factors(mut self, increase: f64, decrease: f64) -> Self {
        self.damping_increase_factor = increase;
        self.damping_decrease_factor = decrease;
        self
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    fn increase(&self, damping: f64) -> f64 {
        (damping * self.damping_increase_factor).min(self.damping_max)
    }

    fn decrease(&self, damping: f64) -> f64 {
        (damping * self.damping_decrease_factor).max(self.damping_min)
    }

    /// Solves `(JᵀJ + λ D) dx = −g`, escalating λ until the system factorizes.
    fn solve_damped(
        &self,
        hessian: &DMatrix<f64>,
        gradient: &DVector<f64>,
        damping: &mut f64,
    ) -> Option<DVector<f64>> {
        loop {
            let mut augmented = hessian.clone();
            for i in 0..augmented.nrows() {
                augmented[(i, i)] += *damping * hessian[(i, i)].max(MIN_DIAGONAL);
            }
            if let Some(cholesky) = augmented.cholesky() {
                let step = cholesky.solve(&(-gradient));
                if step.iter().all(|v| v.is_finite()) {
                    return Some(step);
                }
            }
            if *damping >= self.damping_max {
                return None;
            }
            *damping = self.increase(*damping);
        }
    }
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver for LevenbergMarquardt {
    fn name(&self) -> &'static str {
        "Levenberg-Marquardt"
    }

    fn minimize(
        &self,
        problem: &dyn LeastSquaresProblem,
        initial: DVector<f64>,
    ) -> PendulumCvResult<SolverResult> {
        self.config.validate()?;
        let start_time = Instant::now();
        let mut params = initial;
        let mut damping = self.damping;
        let mut info = ConvergenceInfo::default();

        let mut residuals = problem.residuals(&params)?;
        info.cost_evaluations += 1;
        let initial_cost = 0.5 * residuals.norm_squared();
        let mut current_cost = initial_cost;

        debug!(
            "Starting Levenberg-Marquardt: {} parameters, {} residuals, initial cost {:.6e}, damping {:.3e}",
            params.len(),
            residuals.len(),
            current_cost,
            damping
        );

        let mut iteration = 0;
        let status = loop {
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
            let gradient_norm = gradient.amax();
            info.final_gradient_norm = gradient_norm;
            if gradient_norm <= self.config.gradient_tolerance {
                break OptimizationStatus::GradientToleranceReached;
            }
            let hessian = jacobian.transpose() * &jacobian;

            // Inner loop: raise damping until a step lowers the cost.
            let outcome = loop {
                let Some(step) = self.solve_damped(&hessian, &gradient, &mut damping) else {
                    break None;
                };
                let step_norm = step.norm();
                info.final_parameter_update_norm = step_norm;
                let candidate = &params + &step;
                info.cost_evaluations += 1;

                let trial = problem
                    .residuals(&candidate)
                    .ok()
                    .map(|r| (0.5 * r.norm_squared(), r))
                    .filter(|(cost, _)| cost.is_finite());

                match trial {
                    Some((new_cost, new_residuals)) if new_cost < current_cost => {
                        info.successful_steps += 1;
                        debug!(
                            "Iteration {}: cost = {:.6e}, reduction = {:.6e}, damping = {:.3e}, step_norm = {:.3e} [ACCEPTED]",
                            iteration + 1,
                            new_cost,
                            current_cost - new_cost,
                            damping,
                            step_norm
                        );
                        let converged = check_step_convergence(
                            &self.config,
                            current_cost,
                            new_cost,
                            step_norm,
                            params.norm(),
                        );
                        damping = self.decrease(damping);
                        break Some((candidate, new_cost, new_residuals, converged));
                    }
                    _ => {
                        info.unsuccessful_steps += 1;
                        debug!(
                            "Iteration {}: cost = {:.6e}, damping = {:.3e}, step_norm = {:.3e} [REJECTED]",
                            iteration + 1,
                            current_cost,
                            damping,
                            step_norm
                        );
                        if step_norm
                            <= self.config.parameter_tolerance
                                * (params.norm() + self.config.parameter_tolerance)
                        {
                            break Some((
                                params.clone(),
                                current_cost,
                                residuals.clone(),
                                Some(OptimizationStatus::ParameterToleranceReached),
                            ));
                        }
                        if damping >= self.damping_max {
                            break None;
                        }
                        damping = self.increase(damping);
                    }
                }
            };

            iteration += 1;
            match outcome {
                Some((new_params, new_cost, new_residuals, converged)) => {
                    params = new_params;
                    current_cost = new_cost;
                    residuals = new_residuals;
                    if let Some(status) = converged {
                        break status;
                    }
                }
                None => break OptimizationStatus::NumericalFailure,
            }
        };

        let elapsed = start_time.elapsed();
        let summary = LevenbergMarquardtSummary {
            initial_cost,
            final_cost: current_cost,
            iterations: iteration,
            successful_steps: info.successful_steps,
            unsuccessful_steps: info.unsuccessful_steps,
            final_damping: damping,
            total_time: elapsed,
        };
        if status.is_converged() {
            debug!("Levenberg-Marquardt {status}: {summary}");
        } else {
            warn!("Levenberg-Marquardt stopped without converging ({status}): {summary}");
        }
        info!(
            "Levenberg-Marquardt finished: {} ({} iterations, final cost {:.6e})",
            status, iteration, current_cost
        );

        Ok(SolverResult {
            parameters: params,
            status,
            initial_cost,
            final_cost: current_cost,
            iterations: iteration,
            elapsed_time: elapsed,
            convergence_info: info,
        })
    }
}
