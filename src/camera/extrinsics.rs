//! Rigid world-to-camera transform.

use crate::camera::ORTHONORMALITY_TOLERANCE;
use crate::error::{PendulumCvError, PendulumCvResult};
use nalgebra::{Matrix3, Rotation3, SMatrix, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Squared rotation angle below which [`left_jacobian`] uses its Taylor expansion.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-10;

/// Left Jacobian of the SO(3) exponential map: `exp(ω + δ) ≈ exp(J_l(ω)·δ) · exp(ω)`.
///
/// ```text
/// J_l(ω) = I + (1 − cos θ)/θ² · [ω]× + (θ − sin θ)/θ³ · [ω]×²,   θ = |ω|
/// ```
pub fn left_jacobian(rotation_vector: &Vector3<f64>) -> Matrix3<f64> {
    let theta2 = rotation_vector.norm_squared();
    let omega = rotation_vector.cross_matrix();
    let omega2 = omega * omega;
    if theta2 < SMALL_ANGLE_THRESHOLD {
        return Matrix3::identity() + omega * 0.5 + omega2 / 6.0;
    }
    let theta = theta2.sqrt();
    Matrix3::identity()
        + omega * ((1.0 - theta.cos()) / theta2)
        + omega2 * ((theta - theta.sin()) / (theta2 * theta))
}

/// Maps world coordinates into the camera frame: `X_cam = R · X_world + t`.
///
/// The rotation is always a proper rotation (orthonormal, det = +1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ExtrinsicsRecord", into = "ExtrinsicsRecord")]
pub struct Extrinsics {
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
}

impl Extrinsics {
    pub fn identity() -> Self {
        Self {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> PendulumCvResult<Self> {
        Self::from_matrix(rotation.into_inner(), translation)
    }

    /// Builds extrinsics from a raw 3×3 matrix, rejecting anything that is not a
    /// proper rotation.
    pub fn from_matrix(matrix: Matrix3<f64>, translation: Vector3<f64>) -> PendulumCvResult<Self> {
        if !matrix.iter().chain(translation.iter()).all(|v| v.is_finite()) {
            return Err(PendulumCvError::config("extrinsics contain non-finite values"));
        }
        let gram_error = (matrix.transpose() * matrix - Matrix3::identity()).amax();
        if gram_error > ORTHONORMALITY_TOLERANCE {
            return Err(PendulumCvError::config(format!(
                "rotation is not orthonormal (max |RᵀR − I| = {gram_error:.3e})"
            )));
        }
        let det = matrix.determinant();
        if (det - 1.0).abs() > ORTHONORMALITY_TOLERANCE.sqrt() {
            return Err(PendulumCvError::config(format!(
                "rotation must have det = +1, got {det:.6}"
            )));
        }
        Ok(Self {
            rotation: Rotation3::from_matrix_unchecked(matrix),
            translation,
        })
    }

    /// Builds extrinsics from an axis-angle rotation vector (Rodrigues form).
    pub fn from_rotation_vector(
        rotation_vector: Vector3<f64>,
        translation: Vector3<f64>,
    ) -> PendulumCvResult<Self> {
        if !rotation_vector.iter().chain(translation.iter()).all(|v| v.is_finite()) {
            return Err(PendulumCvError::config("extrinsics contain non-finite values"));
        }
        Ok(Self {
            rotation: Rotation3::new(rotation_vector),
            translation,
        })
    }

    /// A camera at `center` (world coordinates) whose optical axis points along
    /// `forward`, with image `y` pointing as close to `down` as possible.
    pub fn look_at(
        center: Vector3<f64>,
        forward: Vector3<f64>,
        down: Vector3<f64>,
    ) -> PendulumCvResult<Self> {
        let z = forward
            .try_normalize(f64::EPSILON)
            .ok_or_else(|| PendulumCvError::config("look_at: forward direction is zero"))?;
        let x = down
            .cross(&z)
            .try_normalize(f64::EPSILON)
            .ok_or_else(|| PendulumCvError::config("look_at: down is parallel to forward"))?;
        let y = z.cross(&x);
        // Rows of R are the camera axes expressed in world coordinates.
        let rotation = Matrix3::from_rows(&[x.transpose(), y.transpose(), z.transpose()]);
        let translation = -(rotation * center);
        Self::from_matrix(rotation, translation)
    }

    /// A camera on the `z` axis side of the swing plane, centred at world
    /// `(0, height, distance)` and looking straight at the plane `z = 0` with image
    /// `y` pointing down.
    pub fn facing_swing_plane(height: f64, distance: f64) -> Self {
        Self {
            rotation: Rotation3::from_axis_angle(&Vector3::x_axis(), PI),
            translation: Vector3::new(0.0, height, distance),
        }
    }

    pub fn rotation(&self) -> &Rotation3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    pub fn rotation_vector(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }

    /// Camera optical centre in world coordinates: `C = −Rᵀ t`.
    pub fn camera_center(&self) -> Vector3<f64> {
        -(self.rotation.inverse() * self.translation)
    }

    pub fn world_to_camera(&self, world: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * world + self.translation
    }

    pub fn camera_to_world(&self, camera: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.inverse() * (camera - self.translation)
    }

    /// Packs the pose as `[rx, ry, rz, tx, ty, tz]`.
    pub fn to_array(&self) -> [f64; 6] {
        let r = self.rotation_vector();
        let t = self.translation;
        [r.x, r.y, r.z, t.x, t.y, t.z]
    }

    pub fn from_array(values: &[f64; 6]) -> PendulumCvResult<Self> {
        let [rx, ry, rz, tx, ty, tz] = *values;
        Self::from_rotation_vector(Vector3::new(rx, ry, rz), Vector3::new(tx, ty, tz))
    }

    /// Jacobian of `R(ω)·X + t` w.r.t. the packed pose `[rx, ry, rz, tx, ty, tz]`.
    ///
    /// Evaluated at the packed rotation vector itself, which can differ from
    /// [`Self::rotation_vector`] by a full turn once an optimizer steps past |ω| = π.
    ///
    /// ```text
    /// ∂X_cam/∂ω = −[R·X]× · J_l(ω)
    /// ∂X_cam/∂t = I
    /// ```
    pub fn packed_jacobian(values: &[f64; 6], world: &Vector3<f64>) -> SMatrix<f64, 3, 6> {
        let omega = Vector3::new(values[0], values[1], values[2]);
        let rotated = Rotation3::new(omega) * world;
        let mut jacobian = SMatrix::<f64, 3, 6>::zeros();
        jacobian
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(-rotated.cross_matrix() * left_jacobian(&omega)));
        jacobian
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&Matrix3::identity());
        jacobian
    }
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self::identity()
    }
}

/// Serialized form of [`Extrinsics`]: row-major rotation and translation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExtrinsicsRecord {
    rotation: [[f64; 3]; 3],
    translation: [f64; 3],
}

impl TryFrom<ExtrinsicsRecord> for Extrinsics {
    type Error = PendulumCvError;

    fn try_from(record: ExtrinsicsRecord) -> Result<Self, Self::Error> {
        let r = record.rotation;
        let matrix = Matrix3::new(
            r[0][0], r[0][1], r[0][2], //
            r[1][0], r[1][1], r[1][2], //
            r[2][0], r[2][1], r[2][2],
        );
        let [tx, ty, tz] = record.translation;
        Self::from_matrix(matrix, Vector3::new(tx, ty, tz))
    }
}

impl From<Extrinsics> for ExtrinsicsRecord {
    fn from(extrinsics: Extrinsics) -> Self {
        let m = extrinsics.rotation.matrix();
        let t = extrinsics.translation;
        Self {
            rotation: [
                [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
                [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
                [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
            ],
            translation: [t.x, t.y, t.z],
        }
    }
}
