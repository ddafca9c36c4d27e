//! Robust loss functions for down-weighting outlier correspondences.
//!
//! In plain least squares every residual block contributes `s = ||r||²` to the
//! cost. With a robust loss `ρ` the contribution becomes `ρ(s)`. The estimators in
//! this crate never apply a loss implicitly: it must be requested through
//! [`RobustLoss`].
//!
//! # Mathematical Formulation
//!
//! Each loss implements [`Loss`], which evaluates `[ρ(s), ρ'(s)]`. All losses
//! satisfy `ρ(0) = 0` and `ρ'(0) = 1`, so they behave like least squares near zero.
//!
//! A [`Corrector`] rescales each residual block by `f = sqrt(ρ(s) / s)`, which
//! makes the squared norm of the corrected block equal to `ρ(s)`, and applies the
//! matching Jacobian correction:
//!
//! ```text
//! r̃ = f · r
//! J̃ = f · J + c · r · (rᵀ J),   c = (ρ'(s)·s − ρ(s)) / (s² · f)
//! ```
//!
//! `J̃` is the exact derivative of `r̃`, so the solvers see an ordinary
//! least-squares problem whose cost is `Σ ρ(sᵢ)`.

use crate::error::{PendulumCvError, PendulumCvResult};
use nalgebra::{Matrix2xX, Vector2};
use serde::{Deserialize, Serialize};

/// A robust loss `ρ(s)` over the squared residual norm `s`.
pub trait Loss: Send + Sync {
    /// Returns `[ρ(s), ρ'(s)]` for `s >= 0`.
    fn evaluate(&self, s: f64) -> [f64; 2];
}

/// Huber loss: quadratic for inliers, linear for outliers.
///
/// ```text
/// ρ(s) = s              if s ≤ δ²
///        2δ√s − δ²      if s > δ²
/// ```
///
/// `δ = 1.345` gives about 95% efficiency on Gaussian noise.
#[derive(Debug, Clone)]
pub struct HuberLoss {
    scale: f64,
    scale2: f64,
}

impl HuberLoss {
    pub fn new(scale: f64) -> PendulumCvResult<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(PendulumCvError::config(format!(
                "Huber scale must be positive, got {scale}"
            )));
        }
        Ok(HuberLoss {
            scale,
            scale2: scale * scale,
        })
    }
}

impl Loss for HuberLoss {
    fn evaluate(&self, s: f64) -> [f64; 2] {
        if s > self.scale2 {
            let r = s.sqrt();
            [2.0 * self.scale * r - self.scale2, self.scale / r]
        } else {
            [s, 1.0]
        }
    }
}

/// Cauchy (Lorentzian) loss: logarithmic growth, strong outlier suppression.
///
/// ```text
/// ρ(s) = δ² · ln(1 + s/δ²)
/// ```
///
/// Non-convex; start from a reasonable guess.
#[derive(Debug, Clone)]
pub struct CauchyLoss {
    scale2: f64,
    c: f64,
}

impl CauchyLoss {
    pub fn new(scale: f64) -> PendulumCvResult<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(PendulumCvError::config(format!(
                "Cauchy scale must be positive, got {scale}"
            )));
        }
        let scale2 = scale * scale;
        Ok(CauchyLoss {
            scale2,
            c: 1.0 / scale2,
        })
    }
}

impl Loss for CauchyLoss {
    fn evaluate(&self, s: f64) -> [f64; 2] {
        let sum = 1.0 + s * self.c;
        [self.scale2 * sum.ln(), 1.0 / sum]
    }
}

/// Serializable choice of robust loss. `None` is plain least squares.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobustLoss {
    #[default]
    None,
    Huber {
        scale: f64,
    },
    Cauchy {
        scale: f64,
    },
}

impl RobustLoss {
    pub fn validate(&self) -> PendulumCvResult<()> {
        self.build().map(|_| ())
    }

    /// Instantiates the loss; `None` for plain least squares.
    pub fn build(&self) -> PendulumCvResult<Option<Box<dyn Loss>>> {
        Ok(match *self {
            RobustLoss::None => None,
            RobustLoss::Huber { scale } => Some(Box::new(HuberLoss::new(scale)?)),
            RobustLoss::Cauchy { scale } => Some(Box::new(CauchyLoss::new(scale)?)),
        })
    }
}

/// Applies a robust loss to one 2-row residual block and its Jacobian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corrector {
    residual_scaling: f64,
    jacobian_coupling: f64,
}

impl Corrector {
    /// Builds the correction for a block whose squared norm is `squared_norm`.
    pub fn new(loss: &dyn Loss, squared_norm: f64) -> Self {
        if squared_norm <= 0.0 {
            return Corrector {
                residual_scaling: 1.0,
                jacobian_coupling: 0.0,
            };
        }
        let [rho, rho1] = loss.evaluate(squared_norm);
        let residual_scaling = (rho / squared_norm).sqrt();
        let jacobian_coupling = (rho1 * squared_norm - rho)
            / (squared_norm * squared_norm * residual_scaling);
        Corrector {
            residual_scaling,
            jacobian_coupling,
        }
    }

    /// Corrects the Jacobian in place. `residual` must be the uncorrected block.
    pub fn correct_jacobian(&self, residual: &Vector2<f64>, jacobian: &mut Matrix2xX<f64>) {
        let projected = residual.transpose() * &*jacobian;
        *jacobian *= self.residual_scaling;
        if self.jacobian_coupling != 0.0 {
            *jacobian += residual * projected * self.jacobian_coupling;
        }
    }

    pub fn correct_residuals(&self, residual: &mut Vector2<f64>) {
        *residual *= self.residual_scaling;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_huber_regions() -> PendulumCvResult<()> {
        let huber = HuberLoss::new(1.345)?;
        assert_eq!(huber.evaluate(0.5), [0.5, 1.0]);
        let [rho, rho1] = huber.evaluate(10.0);
        assert!(rho < 10.0);
        assert!((rho1 - 1.345 / 10.0_f64.sqrt()).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_cauchy_matches_least_squares_near_zero() -> PendulumCvResult<()> {
        let cauchy = CauchyLoss::new(2.0)?;
        let [rho, rho1] = cauchy.evaluate(1e-8);
        assert!((rho - 1e-8).abs() < 1e-15);
        assert!((rho1 - 1.0).abs() < 1e-8);
        let [big, _] = cauchy.evaluate(100.0);
        assert!(big < 20.0);
        Ok(())
    }

    #[test]
    fn test_corrected_block_norm_equals_rho() -> PendulumCvResult<()> {
        let loss = HuberLoss::new(1.0)?;
        let mut block = Vector2::new(3.0, 4.0);
        Corrector::new(&loss, block.norm_squared()).correct_residuals(&mut block);
        // ρ(25) = 2·1·5 − 1 = 9
        assert!((block.norm_squared() - 9.0).abs() < 1e-12);
        // Direction is preserved.
        assert!((block.x / block.y - 0.75).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_inlier_and_zero_blocks_are_untouched() -> PendulumCvResult<()> {
        let loss = HuberLoss::new(2.0)?;
        let identity = Corrector {
            residual_scaling: 1.0,
            jacobian_coupling: 0.0,
        };
        assert_eq!(Corrector::new(&loss, 1.5), identity);
        assert_eq!(Corrector::new(&loss, 0.0), identity);
        Ok(())
    }

    #[test]
    fn test_corrected_jacobian_matches_finite_differences() -> PendulumCvResult<()> {
        // Linear residual r(p) = A·p + b, far enough out to hit both robust regions.
        let design = Matrix2xX::from_row_slice(&[1.0, -2.0, 0.5, 0.3, 1.5, -1.0]);
        let b = Vector2::new(2.0, -3.0);
        let p = nalgebra::DVector::from_vec(vec![0.4, -0.7, 1.1]);
        let eps = 1e-6;

        let losses: [Box<dyn Loss>; 2] = [
            Box::new(HuberLoss::new(1.345)?),
            Box::new(CauchyLoss::new(1.0)?),
        ];
        for loss in &losses {
            let corrected = |params: &nalgebra::DVector<f64>| {
                let mut r: Vector2<f64> = &design * params + b;
                Corrector::new(loss.as_ref(), r.norm_squared()).correct_residuals(&mut r);
                r
            };

            let residual: Vector2<f64> = &design * &p + b;
            let mut analytic = design.clone();
            Corrector::new(loss.as_ref(), residual.norm_squared())
                .correct_jacobian(&residual, &mut analytic);

            for col in 0..3 {
                let mut plus = p.clone();
                let mut minus = p.clone();
                plus[col] += eps;
                minus[col] -= eps;
                let numeric = (corrected(&plus) - corrected(&minus)) / (2.0 * eps);
                for row in 0..2 {
                    let n = numeric[row];
                    let a = analytic[(row, col)];
                    assert!(
                        (a - n).abs() / (1.0 + n.abs()) < 1e-7,
                        "parameter {col}, row {row}: analytical={a}, numerical={n}"
                    );
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_invalid_scale() {
        assert!(RobustLoss::Huber { scale: 0.0 }.validate().is_err());
        assert!(RobustLoss::Cauchy { scale: -1.0 }.validate().is_err());
        assert!(RobustLoss::None.validate().is_ok());
    }
}
