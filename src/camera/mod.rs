//! Camera projection model for the pendulum rig.
//!
//! The model maps world coordinates to pixels in four fixed stages:
//!
//! ```text
//! X_cam = R · X_world + t              (extrinsics)
//! (x, y) = (X_cam.x / z, X_cam.y / z)  (pinhole division, z > 0)
//! (xd, yd) = brown_conrady(x, y)       (lens distortion on normalized coordinates)
//! u = fx·xd + skew·yd + cx
//! v = fy·yd + cy                       (intrinsics)
//! ```
//!
//! Synthesis and estimation both go through [`project`], so the distortion is always
//! applied to the normalized coordinates before the intrinsic scaling.
//!
//! # Key Components
//!
//! - [`CameraIntrinsics`] / [`BrownConrady`]: validated pinhole + distortion parameters
//! - [`Extrinsics`]: rigid world-to-camera transform
//! - [`project`] / [`unproject`]: forward and constrained inverse mapping
//! - [`project_with_jacobians`]: analytic derivatives for calibration

pub mod extrinsics;
pub mod intrinsics;
pub mod projection;

pub use extrinsics::{Extrinsics, left_jacobian};
pub use intrinsics::{BrownConrady, CameraIntrinsics};
pub use projection::{
    ProjectionJacobians, UnprojectConstraint, project, project_many, project_with_jacobians,
    unproject,
};

/// Tolerance used to decide whether a rotation matrix is orthonormal.
pub const ORTHONORMALITY_TOLERANCE: f64 = 1e-9;

/// Convergence threshold (normalized units) for iterative undistortion.
pub const UNDISTORT_TOLERANCE: f64 = 1e-14;

/// Maximum Newton iterations spent inverting the distortion model.
pub const UNDISTORT_MAX_ITERATIONS: usize = 50;

/// Tolerance for projection/unprojection test assertions.
pub const PROJECTION_TEST_TOLERANCE: f64 = 1e-9;

/// Relative tolerance for analytic-vs-numerical Jacobian test assertions.
pub const JACOBIAN_TEST_TOLERANCE: f64 = 1e-5;
