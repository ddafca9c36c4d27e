//! Camera calibration by nonlinear least squares on reprojection error.
//!
//! The estimator packs intrinsics and per-view poses into one dense vector
//! (see [`crate::calibration::parameters`]), removes the fixed entries, and hands the
//! remaining problem to a pluggable [`Solver`]. Poses are parameterised by an
//! axis-angle rotation vector plus translation.

use crate::calibration::parameters::{FixedParameters, INTRINSIC_COUNT, POSE_COUNT};
use crate::calibration::{Correspondence, View};
use crate::camera::{CameraIntrinsics, Extrinsics, project, project_with_jacobians};
use crate::core::{Corrector, LeastSquaresProblem, Loss, RobustLoss};
use crate::error::{PendulumCvError, PendulumCvResult};
use crate::optimizer::{AnySolver, OptimizationStatus, OptimizerConfig, Solver};
use nalgebra::{DMatrix, DVector, Matrix2xX, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Reprojection residual of one correspondence, `projected − observed` (px).
///
/// Unweighted and without robust rescaling, so outliers stand out as-is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Residual {
    pub view: usize,
    pub index: usize,
    pub du: f64,
    pub dv: f64,
}

impl Residual {
    pub fn norm(&self) -> f64 {
        self.du.hypot(self.dv)
    }
}

/// Outcome of a calibration.
///
/// Returned even when the solver did not converge; check [`FitResult::converged`]
/// before trusting the parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub intrinsics: CameraIntrinsics,
    /// One pose per view, in input order.
    pub extrinsics: Vec<Extrinsics>,
    pub residuals: Vec<Residual>,
    pub converged: bool,
    pub status: OptimizationStatus,
    pub iterations: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
}

impl FitResult {
    /// Pose of the first view; the only pose of a single-view fit.
    pub fn pose(&self) -> Option<&Extrinsics> {
        self.extrinsics.first()
    }

    /// Pixel distance of every residual.
    pub fn residual_norms(&self) -> Vec<f64> {
        self.residuals.iter().map(Residual::norm).collect()
    }
}

/// Fits camera intrinsics and/or poses to point correspondences.
///
/// Single-threaded; run several guesses in parallel with
/// [`crate::calibration::multi_start::fit_best_of`].
pub struct CalibrationEstimator {
    solver: Box<dyn Solver>,
    robust_loss: RobustLoss,
}

impl fmt::Debug for CalibrationEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalibrationEstimator")
            .field("solver", &self.solver.name())
            .field("robust_loss", &self.robust_loss)
            .finish()
    }
}

impl Default for CalibrationEstimator {
    fn default() -> Self {
        Self::new(OptimizerConfig::default())
    }
}

impl CalibrationEstimator {
    /// Estimator using the built-in solver selected by `config.optimizer_type`.
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            solver: Box::new(AnySolver::new(config)),
            robust_loss: RobustLoss::None,
        }
    }

    pub fn with_robust_loss(mut self, robust_loss: RobustLoss) -> Self {
        self.robust_loss = robust_loss;
        self
    }

    /// Replaces the solver strategy.
    pub fn with_solver(mut self, solver: impl Solver + 'static) -> Self {
        self.solver = Box::new(solver);
        self
    }

    pub fn robust_loss(&self) -> RobustLoss {
        self.robust_loss
    }

    pub fn solver_name(&self) -> &'static str {
        self.solver.name()
    }

    /// Single-view calibration.
    ///
    /// # Errors
    ///
    /// - [`PendulumCvError::UnderdeterminedFit`] with fewer correspondences than free parameters
    /// - [`PendulumCvError::Configuration`] for invalid correspondences or loss settings
    /// - any projection error at the initial guess
    pub fn fit(
        &self,
        correspondences: &[Correspondence],
        initial: (&CameraIntrinsics, &Extrinsics),
        fixed: &FixedParameters,
    ) -> PendulumCvResult<FitResult> {
        let (intrinsics, extrinsics) = initial;
        let view = View::new(*extrinsics, correspondences.to_vec());
        self.fit_views(std::slice::from_ref(&view), intrinsics, fixed)
    }

    /// Multi-view calibration with intrinsics shared across views.
    pub fn fit_views(
        &self,
        views: &[View],
        intrinsics: &CameraIntrinsics,
        fixed: &FixedParameters,
    ) -> PendulumCvResult<FitResult> {
        if views.is_empty() {
            return Err(PendulumCvError::config("calibration needs at least one view"));
        }
        for view in views {
            view.correspondences
                .iter()
                .try_for_each(Correspondence::validate)?;
        }

        let correspondence_count: usize = views.iter().map(View::len).sum();
        let slots: Vec<usize> = fixed
            .free_slots(views.len())
            .into_iter()
            .map(|(index, _)| index)
            .collect();
        if correspondence_count < slots.len() {
            return Err(PendulumCvError::UnderdeterminedFit {
                correspondences: correspondence_count,
                free_parameters: slots.len(),
            });
        }

        let problem = CameraCalibrationProblem {
            views,
            base: pack(intrinsics, views),
            slots,
            loss: self.robust_loss.build()?,
            residual_count: 2 * correspondence_count,
        };
        info!(
            "Calibrating {} views, {} correspondences, {} free parameters with {}",
            views.len(),
            correspondence_count,
            problem.slots.len(),
            self.solver.name()
        );

        let initial = problem.free_values(&problem.base);
        let (free, status, iterations, initial_cost, final_cost) = if problem.slots.is_empty() {
            let cost = problem.cost(&initial)?;
            (initial, OptimizationStatus::Converged, 0, cost, cost)
        } else {
            let result = self.solver.minimize(&problem, initial)?;
            debug!("Calibration solver summary: {}", result.convergence_info);
            (
                result.parameters,
                result.status,
                result.iterations,
                result.initial_cost,
                result.final_cost,
            )
        };

        let (intrinsics, extrinsics) = decode(&problem.expand(&free), views.len())?;
        let residuals = reprojection_residuals(views, &intrinsics, &extrinsics)?;
        let converged = status.is_converged();
        if !converged {
            warn!("Calibration did not converge ({status}); returning best parameters found");
        }
        info!(
            "Calibration finished after {iterations} iterations: cost {initial_cost:.6e} -> {final_cost:.6e}"
        );

        Ok(FitResult {
            intrinsics,
            extrinsics,
            residuals,
            converged,
            status,
            iterations,
            initial_cost,
            final_cost,
        })
    }
}

/// Reprojection cost over the free entries of the packed vector.
///
/// Residual blocks are `sqrt(w) · (projected − observed)`, robustified by a
/// [`Corrector`] when a loss is set. The Jacobian is analytic: the intrinsic and
/// pose blocks of [`project_with_jacobians`] and [`Extrinsics::packed_jacobian`],
/// scattered into the free columns.
struct CameraCalibrationProblem<'a> {
    views: &'a [View],
    base: DVector<f64>,
    slots: Vec<usize>,
    loss: Option<Box<dyn Loss>>,
    residual_count: usize,
}

impl CameraCalibrationProblem<'_> {
    fn free_values(&self, full: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(self.slots.len(), self.slots.iter().map(|&i| full[i]))
    }

    fn expand(&self, free: &DVector<f64>) -> DVector<f64> {
        let mut full = self.base.clone();
        for (&index, value) in self.slots.iter().zip(free.iter()) {
            full[index] = *value;
        }
        full
    }
}

impl LeastSquaresProblem for CameraCalibrationProblem<'_> {
    fn parameter_count(&self) -> usize {
        self.slots.len()
    }

    fn residual_count(&self) -> usize {
        self.residual_count
    }

    fn residuals(&self, parameters: &DVector<f64>) -> PendulumCvResult<DVector<f64>> {
        let (intrinsics, poses) = decode(&self.expand(parameters), self.views.len())?;
        let mut residuals = DVector::zeros(self.residual_count);
        let mut row = 0;
        for (view, pose) in self.views.iter().zip(&poses) {
            for c in &view.correspondences {
                let predicted = project(&c.world, pose, &intrinsics)?;
                let mut block: Vector2<f64> = (predicted - c.pixel) * c.weight.sqrt();
                if let Some(loss) = &self.loss {
                    Corrector::new(loss.as_ref(), block.norm_squared())
                        .correct_residuals(&mut block);
                }
                residuals.fixed_rows_mut::<2>(row).copy_from(&block);
                row += 2;
            }
        }
        Ok(residuals)
    }

    fn jacobian(&self, parameters: &DVector<f64>) -> PendulumCvResult<DMatrix<f64>> {
        let full = self.expand(parameters);
        let (intrinsics, poses) = decode(&full, self.views.len())?;
        let columns = self.slots.len();
        let mut jacobian = DMatrix::zeros(self.residual_count, columns);
        let mut row = 0;
        for (view_index, (view, pose)) in self.views.iter().zip(&poses).enumerate() {
            let offset = INTRINSIC_COUNT + POSE_COUNT * view_index;
            let mut packed = [0.0; POSE_COUNT];
            packed.copy_from_slice(&full.as_slice()[offset..offset + POSE_COUNT]);

            for c in &view.correspondences {
                let projection = project_with_jacobians(&c.world, pose, &intrinsics)?;
                let d_pose = projection.camera_point * Extrinsics::packed_jacobian(&packed, &c.world);
                let scale = c.weight.sqrt();

                let mut block = Matrix2xX::<f64>::zeros(columns);
                for (column, &index) in self.slots.iter().enumerate() {
                    if index < INTRINSIC_COUNT {
                        block.set_column(column, &(projection.intrinsics.column(index) * scale));
                    } else if (offset..offset + POSE_COUNT).contains(&index) {
                        block.set_column(column, &(d_pose.column(index - offset) * scale));
                    }
                }
                if let Some(loss) = &self.loss {
                    let residual: Vector2<f64> = (projection.pixel - c.pixel) * scale;
                    Corrector::new(loss.as_ref(), residual.norm_squared())
                        .correct_jacobian(&residual, &mut block);
                }
                jacobian.view_mut((row, 0), (2, columns)).copy_from(&block);
                row += 2;
            }
        }
        Ok(jacobian)
    }
}

fn pack(intrinsics: &CameraIntrinsics, views: &[View]) -> DVector<f64> {
    let mut values = Vec::with_capacity(INTRINSIC_COUNT + POSE_COUNT * views.len());
    values.extend_from_slice(&intrinsics.to_array());
    for view in views {
        values.extend_from_slice(&view.extrinsics.to_array());
    }
    DVector::from_vec(values)
}

fn decode(
    full: &DVector<f64>,
    view_count: usize,
) -> PendulumCvResult<(CameraIntrinsics, Vec<Extrinsics>)> {
    let values = full.as_slice();
    let mut intrinsic = [0.0; INTRINSIC_COUNT];
    intrinsic.copy_from_slice(&values[..INTRINSIC_COUNT]);
    let intrinsics = CameraIntrinsics::from_array(&intrinsic)?;

    let poses = (0..view_count)
        .map(|view| {
            let start = INTRINSIC_COUNT + POSE_COUNT * view;
            let mut pose = [0.0; POSE_COUNT];
            pose.copy_from_slice(&values[start..start + POSE_COUNT]);
            Extrinsics::from_array(&pose)
        })
        .collect::<PendulumCvResult<Vec<_>>>()?;
    Ok((intrinsics, poses))
}

fn reprojection_residuals(
    views: &[View],
    intrinsics: &CameraIntrinsics,
    poses: &[Extrinsics],
) -> PendulumCvResult<Vec<Residual>> {
    let mut residuals = Vec::new();
    for (view_index, (view, pose)) in views.iter().zip(poses).enumerate() {
        for (index, c) in view.correspondences.iter().enumerate() {
            let predicted = project(&c.world, pose, intrinsics)?;
            residuals.push(Residual {
                view: view_index,
                index,
                du: predicted.x - c.pixel.x,
                dv: predicted.y - c.pixel.y,
            });
        }
    }
    Ok(residuals)
}
