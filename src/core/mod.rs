//! Core least-squares building blocks
//!
//! - Problem formulation over a dense parameter vector, with a numerical Jacobian
//! - Robust loss functions for optional outlier down-weighting

pub mod loss_functions;
pub mod problem;

pub use loss_functions::{CauchyLoss, Corrector, HuberLoss, Loss, RobustLoss};
pub use problem::{LeastSquaresProblem, numerical_jacobian};
