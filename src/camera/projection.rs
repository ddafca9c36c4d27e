//! Forward projection and constrained back-projection.
//!
//! `project` is a pure function of the world point and the two parameter records.
//! `unproject` needs an extra constraint because a single pixel only fixes a ray.

use crate::camera::{CameraIntrinsics, Extrinsics};
use crate::error::{PendulumCvError, PendulumCvResult};
use nalgebra::{Matrix2, SMatrix, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Extra information that pins down the point along a back-projected ray.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnprojectConstraint {
    /// Known depth (camera-frame `z`, metres).
    Depth(f64),
    /// Known world plane `normal · X = offset`.
    Plane { normal: Vector3<f64>, offset: f64 },
}

impl UnprojectConstraint {
    /// The pendulum swing plane `z = 0` in world coordinates.
    pub fn world_plane_z0() -> Self {
        UnprojectConstraint::Plane {
            normal: Vector3::z(),
            offset: 0.0,
        }
    }
}

/// Projects a world point to pixel coordinates.
///
/// Fails with [`PendulumCvError::InvalidGeometry`] for points at or behind the
/// camera (`z <= 0`) and for non-finite inputs. Depth is never clamped.
pub fn project(
    world: &Vector3<f64>,
    extrinsics: &Extrinsics,
    intrinsics: &CameraIntrinsics,
) -> PendulumCvResult<Vector2<f64>> {
    let p_cam = camera_point(world, extrinsics)?;
    let normalized = Vector2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
    let distorted = intrinsics.distortion().distort(&normalized);
    finite_pixel(intrinsics.to_pixel(&distorted))
}

/// Pixel of a world point together with its first derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionJacobians {
    pub pixel: Vector2<f64>,
    /// ∂pixel/∂X_cam.
    pub camera_point: SMatrix<f64, 2, 3>,
    /// ∂pixel/∂[fx, fy, cx, cy, skew, k1, k2, k3, p1, p2], the order of
    /// [`CameraIntrinsics::to_array`].
    pub intrinsics: SMatrix<f64, 2, 10>,
}

/// [`project`] plus the analytic Jacobians of the pixel.
///
/// # Chain Rule
///
/// ```text
/// ∂pixel/∂X_cam = K₂ · ∂(xd, yd)/∂(x, y) · ∂(x, y)/∂X_cam
///
/// K₂ = | fx  skew |      ∂(x, y)/∂X_cam = | 1/z   0   −x/z² |
///      |  0   fy  |                       |  0   1/z  −y/z² |
/// ```
///
/// The intrinsic block is `(xd, 0)`, `(0, yd)`, `(1, 0)`, `(0, 1)`, `(yd, 0)` for
/// `fx, fy, cx, cy, skew`, followed by `K₂ · ∂(xd, yd)/∂(k1, k2, k3, p1, p2)`.
pub fn project_with_jacobians(
    world: &Vector3<f64>,
    extrinsics: &Extrinsics,
    intrinsics: &CameraIntrinsics,
) -> PendulumCvResult<ProjectionJacobians> {
    let p_cam = camera_point(world, extrinsics)?;
    let inv_z = 1.0 / p_cam.z;
    let normalized = Vector2::new(p_cam.x * inv_z, p_cam.y * inv_z);
    let distortion = intrinsics.distortion();
    let distorted = distortion.distort(&normalized);
    let pixel = finite_pixel(intrinsics.to_pixel(&distorted))?;

    let scale = Matrix2::new(intrinsics.fx(), intrinsics.skew(), 0.0, intrinsics.fy());
    let d_normalized = SMatrix::<f64, 2, 3>::new(
        inv_z, 0.0, -normalized.x * inv_z, //
        0.0, inv_z, -normalized.y * inv_z,
    );
    let camera_point = scale * distortion.jacobian(&normalized) * d_normalized;

    let mut d_intrinsics = SMatrix::<f64, 2, 10>::zeros();
    d_intrinsics[(0, 0)] = distorted.x;
    d_intrinsics[(1, 1)] = distorted.y;
    d_intrinsics[(0, 2)] = 1.0;
    d_intrinsics[(1, 3)] = 1.0;
    d_intrinsics[(0, 4)] = distorted.y;
    d_intrinsics
        .fixed_view_mut::<2, 5>(0, 5)
        .copy_from(&(scale * distortion.parameter_jacobian(&normalized)));

    Ok(ProjectionJacobians {
        pixel,
        camera_point,
        intrinsics: d_intrinsics,
    })
}

/// Camera-frame point, rejected when non-finite or at or behind the camera.
fn camera_point(world: &Vector3<f64>, extrinsics: &Extrinsics) -> PendulumCvResult<Vector3<f64>> {
    let p_cam = extrinsics.world_to_camera(world);
    if !p_cam.iter().all(|v| v.is_finite()) {
        return Err(PendulumCvError::geometry(format!(
            "non-finite camera-frame point for world point ({}, {}, {})",
            world.x, world.y, world.z
        )));
    }
    if p_cam.z <= 0.0 {
        return Err(PendulumCvError::geometry(format!(
            "point ({:.6}, {:.6}, {:.6}) has camera depth z = {:.6} <= 0",
            world.x, world.y, world.z, p_cam.z
        )));
    }
    Ok(p_cam)
}

fn finite_pixel(pixel: Vector2<f64>) -> PendulumCvResult<Vector2<f64>> {
    if !pixel.iter().all(|v| v.is_finite()) {
        return Err(PendulumCvError::geometry(
            "projection produced a non-finite pixel",
        ));
    }
    Ok(pixel)
}

/// Projects several world points, failing on the first invalid one.
pub fn project_many(
    world: &[Vector3<f64>],
    extrinsics: &Extrinsics,
    intrinsics: &CameraIntrinsics,
) -> PendulumCvResult<Vec<Vector2<f64>>> {
    world
        .iter()
        .map(|p| project(p, extrinsics, intrinsics))
        .collect()
}

/// Back-projects a pixel to a world point using a depth or plane constraint.
///
/// # Errors
///
/// - [`PendulumCvError::Underconstrained`] when `constraint` is `None`
/// - [`PendulumCvError::InvalidGeometry`] for a non-positive depth, a ray parallel to
///   the plane, an intersection behind the camera, or a pixel that cannot be undistorted
pub fn unproject(
    pixel: &Vector2<f64>,
    constraint: Option<&UnprojectConstraint>,
    extrinsics: &Extrinsics,
    intrinsics: &CameraIntrinsics,
) -> PendulumCvResult<Vector3<f64>> {
    let Some(constraint) = constraint else {
        return Err(PendulumCvError::Underconstrained(format!(
            "pixel ({:.3}, {:.3}) needs a depth or plane constraint to be unprojected",
            pixel.x, pixel.y
        )));
    };

    let distorted = intrinsics.from_pixel(pixel);
    let normalized = intrinsics.distortion().undistort(&distorted)?;
    let ray_cam = Vector3::new(normalized.x, normalized.y, 1.0);

    match *constraint {
        UnprojectConstraint::Depth(depth) => {
            if !(depth.is_finite() && depth > 0.0) {
                return Err(PendulumCvError::geometry(format!(
                    "unproject depth must be positive, got {depth}"
                )));
            }
            Ok(extrinsics.camera_to_world(&(ray_cam * depth)))
        }
        UnprojectConstraint::Plane { normal, offset } => {
            let center = extrinsics.camera_center();
            let ray_world = extrinsics.rotation().inverse() * ray_cam;
            let denom = normal.dot(&ray_world);
            if denom.abs() < f64::EPSILON * normal.norm() * ray_world.norm() {
                return Err(PendulumCvError::geometry(
                    "viewing ray is parallel to the constraint plane",
                ));
            }
            let s = (offset - normal.dot(&center)) / denom;
            if s <= 0.0 {
                return Err(PendulumCvError::geometry(format!(
                    "constraint plane intersects the viewing ray behind the camera (s = {s:.6})"
                )));
            }
            Ok(center + ray_world * s)
        }
    }
}
