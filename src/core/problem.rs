//! Dense nonlinear least-squares problem abstraction.

use crate::error::{PendulumCvError, PendulumCvResult};
use nalgebra::{DMatrix, DVector};

/// Relative central-difference step for the numerical Jacobian.
pub const JACOBIAN_RELATIVE_STEP: f64 = 1e-6;

/// A problem `min ½ ||r(x)||²` over a dense parameter vector.
///
/// Implementors supply the residual function; the default Jacobian uses central
/// differences with step `1e-6 · max(1, |x_j|)` per parameter. The trait is object
/// safe so solvers can be written against `&dyn LeastSquaresProblem`.
pub trait LeastSquaresProblem {
    fn parameter_count(&self) -> usize;

    fn residual_count(&self) -> usize;

    /// Residual vector at `parameters`. Returning an error marks the point as
    /// infeasible (for example a point projected behind the camera).
    fn residuals(&self, parameters: &DVector<f64>) -> PendulumCvResult<DVector<f64>>;

    fn jacobian(&self, parameters: &DVector<f64>) -> PendulumCvResult<DMatrix<f64>> {
        numerical_jacobian(self, parameters)
    }

    fn cost(&self, parameters: &DVector<f64>) -> PendulumCvResult<f64> {
        Ok(0.5 * self.residuals(parameters)?.norm_squared())
    }
}

/// Central-difference Jacobian of `problem` at `parameters`.
pub fn numerical_jacobian<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    parameters: &DVector<f64>,
) -> PendulumCvResult<DMatrix<f64>> {
    let n = problem.parameter_count();
    if parameters.len() != n {
        return Err(PendulumCvError::config(format!(
            "parameter vector has {} entries, problem expects {n}",
            parameters.len()
        )));
    }
    let m = problem.residual_count();
    let mut jacobian = DMatrix::zeros(m, n);
    let mut shifted = parameters.clone();

    for j in 0..n {
        let x = parameters[j];
        let h = JACOBIAN_RELATIVE_STEP * x.abs().max(1.0);
        shifted[j] = x + h;
        let plus = problem.residuals(&shifted)?;
        shifted[j] = x - h;
        let minus = problem.residuals(&shifted)?;
        shifted[j] = x;
        jacobian.set_column(j, &((plus - minus) / (2.0 * h)));
    }
    Ok(jacobian)
}
