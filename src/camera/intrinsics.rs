//! Pinhole intrinsics with Brown–Conrady lens distortion.
//!
//! # Mathematical Model
//!
//! ```text
//! r² = x² + y²
//! radial = 1 + k₁·r² + k₂·r⁴ + k₃·r⁶
//! xd = radial·x + 2·p₁·x·y + p₂·(r² + 2·x²)
//! yd = radial·y + p₁·(r² + 2·y²) + 2·p₂·x·y
//! ```
//!
//! The inverse has no closed form and is solved with Newton iterations on the
//! analytic 2×2 Jacobian of the distortion map.

use crate::camera::{UNDISTORT_MAX_ITERATIONS, UNDISTORT_TOLERANCE};
use crate::error::{PendulumCvError, PendulumCvResult, ensure_finite, ensure_positive};
use nalgebra::{Matrix2, Matrix3, SMatrix, Vector2};
use serde::{Deserialize, Serialize};

/// Brown–Conrady distortion coefficients (OpenCV order: k1, k2, p1, p2, k3).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BrownConrady {
    pub k1: f64,
    pub k2: f64,
    pub k3: f64,
    pub p1: f64,
    pub p2: f64,
}

impl BrownConrady {
    /// Distortion-free lens.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(k1: f64, k2: f64, k3: f64, p1: f64, p2: f64) -> PendulumCvResult<Self> {
        let distortion = Self { k1, k2, k3, p1, p2 };
        distortion.validate()?;
        Ok(distortion)
    }

    pub fn validate(&self) -> PendulumCvResult<()> {
        ensure_finite("k1", self.k1)?;
        ensure_finite("k2", self.k2)?;
        ensure_finite("k3", self.k3)?;
        ensure_finite("p1", self.p1)?;
        ensure_finite("p2", self.p2)
    }

    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.k3 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0
    }

    /// Applies the distortion to normalized image coordinates.
    pub fn distort(&self, normalized: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (normalized.x, normalized.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xy = x * y;
        Vector2::new(
            radial * x + 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x),
            radial * y + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy,
        )
    }

    /// Jacobian of [`BrownConrady::distort`] w.r.t. the normalized coordinates.
    pub fn jacobian(&self, normalized: &Vector2<f64>) -> Matrix2<f64> {
        let (x, y) = (normalized.x, normalized.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let dradial_dr2 = self.k1 + 2.0 * self.k2 * r2 + 3.0 * self.k3 * r2 * r2;

        let dxd_dx = radial + 2.0 * x * x * dradial_dr2 + 2.0 * self.p1 * y + 6.0 * self.p2 * x;
        let dxd_dy = 2.0 * x * y * dradial_dr2 + 2.0 * self.p1 * x + 2.0 * self.p2 * y;
        let dyd_dx = 2.0 * x * y * dradial_dr2 + 2.0 * self.p1 * x + 2.0 * self.p2 * y;
        let dyd_dy = radial + 2.0 * y * y * dradial_dr2 + 6.0 * self.p1 * y + 2.0 * self.p2 * x;

        Matrix2::new(dxd_dx, dxd_dy, dyd_dx, dyd_dy)
    }

    /// Jacobian of [`BrownConrady::distort`] w.r.t. the coefficients, columns in
    /// packing order `k1, k2, k3, p1, p2`.
    pub fn parameter_jacobian(&self, normalized: &Vector2<f64>) -> SMatrix<f64, 2, 5> {
        let (x, y) = (normalized.x, normalized.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let xy = x * y;
        SMatrix::<f64, 2, 5>::new(
            x * r2, x * r4, x * r6, 2.0 * xy, r2 + 2.0 * x * x, //
            y * r2, y * r4, y * r6, r2 + 2.0 * y * y, 2.0 * xy,
        )
    }

    /// Inverts the distortion with Newton iterations.
    ///
    /// Fails with [`PendulumCvError::InvalidGeometry`] when the Jacobian becomes
    /// singular or the iteration does not reach [`UNDISTORT_TOLERANCE`], which happens
    /// for pixels outside the region where the polynomial is invertible.
    pub fn undistort(&self, distorted: &Vector2<f64>) -> PendulumCvResult<Vector2<f64>> {
        if self.is_zero() {
            return Ok(*distorted);
        }

        let mut point = *distorted;
        for _ in 0..UNDISTORT_MAX_ITERATIONS {
            let residual = self.distort(&point) - distorted;
            if residual.amax() < UNDISTORT_TOLERANCE {
                return Ok(point);
            }
            let jacobian = self.jacobian(&point);
            let Some(inverse) = jacobian.try_inverse() else {
                return Err(PendulumCvError::geometry(format!(
                    "singular distortion Jacobian while undistorting ({:.6}, {:.6})",
                    distorted.x, distorted.y
                )));
            };
            point -= inverse * residual;
            if !point.iter().all(|v| v.is_finite()) {
                break;
            }
        }

        Err(PendulumCvError::geometry(format!(
            "undistortion of ({:.6}, {:.6}) did not converge in {} iterations",
            distorted.x, distorted.y, UNDISTORT_MAX_ITERATIONS
        )))
    }
}

/// Camera intrinsics: focal lengths, principal point, skew and lens distortion.
///
/// Immutable once created; a calibration produces a new instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "IntrinsicsRecord", into = "IntrinsicsRecord")]
pub struct CameraIntrinsics {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    skew: f64,
    distortion: BrownConrady,
}

impl CameraIntrinsics {
    /// Creates distortion-free intrinsics with zero skew.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> PendulumCvResult<Self> {
        Self::with_all(fx, fy, cx, cy, 0.0, BrownConrady::none())
    }

    pub fn with_all(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        skew: f64,
        distortion: BrownConrady,
    ) -> PendulumCvResult<Self> {
        ensure_positive("fx", fx)?;
        ensure_positive("fy", fy)?;
        ensure_finite("cx", cx)?;
        ensure_finite("cy", cy)?;
        ensure_finite("skew", skew)?;
        distortion.validate()?;
        Ok(Self {
            fx,
            fy,
            cx,
            cy,
            skew,
            distortion,
        })
    }

    /// Returns a copy with different distortion coefficients.
    pub fn with_distortion(&self, distortion: BrownConrady) -> PendulumCvResult<Self> {
        Self::with_all(self.fx, self.fy, self.cx, self.cy, self.skew, distortion)
    }

    /// Returns a copy with a different skew term.
    pub fn with_skew(&self, skew: f64) -> PendulumCvResult<Self> {
        Self::with_all(self.fx, self.fy, self.cx, self.cy, skew, self.distortion)
    }

    pub fn fx(&self) -> f64 {
        self.fx
    }

    pub fn fy(&self) -> f64 {
        self.fy
    }

    pub fn cx(&self) -> f64 {
        self.cx
    }

    pub fn cy(&self) -> f64 {
        self.cy
    }

    pub fn skew(&self) -> f64 {
        self.skew
    }

    pub fn distortion(&self) -> &BrownConrady {
        &self.distortion
    }

    /// The 3×3 camera matrix K.
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Maps distorted normalized coordinates to pixels.
    pub fn to_pixel(&self, distorted: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            self.fx * distorted.x + self.skew * distorted.y + self.cx,
            self.fy * distorted.y + self.cy,
        )
    }

    /// Maps pixels back to distorted normalized coordinates (inverse of [`Self::to_pixel`]).
    pub fn from_pixel(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        let yd = (pixel.y - self.cy) / self.fy;
        let xd = (pixel.x - self.cx - self.skew * yd) / self.fx;
        Vector2::new(xd, yd)
    }

    /// Packs the parameters as `[fx, fy, cx, cy, skew, k1, k2, k3, p1, p2]`.
    pub fn to_array(&self) -> [f64; 10] {
        let d = &self.distortion;
        [
            self.fx, self.fy, self.cx, self.cy, self.skew, d.k1, d.k2, d.k3, d.p1, d.p2,
        ]
    }

    /// Inverse of [`Self::to_array`], with full validation.
    pub fn from_array(values: &[f64; 10]) -> PendulumCvResult<Self> {
        let [fx, fy, cx, cy, skew, k1, k2, k3, p1, p2] = *values;
        Self::with_all(fx, fy, cx, cy, skew, BrownConrady { k1, k2, k3, p1, p2 })
    }
}

/// 800 px focal length on a 640×480 sensor, no skew or distortion.
impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            fx: 800.0,
            fy: 800.0,
            cx: 320.0,
            cy: 240.0,
            skew: 0.0,
            distortion: BrownConrady::none(),
        }
    }
}

/// Serialized form of [`CameraIntrinsics`]; validated on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IntrinsicsRecord {
    fx: f64,
    fy: f64,
    cx: f64,
    cy: f64,
    #[serde(default)]
    skew: f64,
    #[serde(default)]
    distortion: BrownConrady,
}

impl TryFrom<IntrinsicsRecord> for CameraIntrinsics {
    type Error = PendulumCvError;

    fn try_from(record: IntrinsicsRecord) -> Result<Self, Self::Error> {
        Self::with_all(
            record.fx,
            record.fy,
            record.cx,
            record.cy,
            record.skew,
            record.distortion,
        )
    }
}

impl From<CameraIntrinsics> for IntrinsicsRecord {
    fn from(intrinsics: CameraIntrinsics) -> Self {
        Self {
            fx: intrinsics.fx,
            fy: intrinsics.fy,
            cx: intrinsics.cx,
            cy: intrinsics.cy,
            skew: intrinsics.skew,
            distortion: intrinsics.distortion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lens() -> BrownConrady {
        BrownConrady {
            k1: -0.12,
            k2: 0.03,
            k3: -0.004,
            p1: 0.0008,
            p2: -0.0005,
        }
    }

    #[test]
    fn test_focal_length_must_be_positive() {
        assert!(CameraIntrinsics::new(0.0, 800.0, 320.0, 240.0).is_err());
        assert!(CameraIntrinsics::new(800.0, -1.0, 320.0, 240.0).is_err());
        assert!(CameraIntrinsics::new(800.0, 800.0, f64::NAN, 240.0).is_err());
        assert!(CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0).is_ok());
    }

    #[test]
    fn test_distort_undistort_roundtrip() -> PendulumCvResult<()> {
        let distortion = lens();
        for &(x, y) in &[(0.0, 0.0), (0.1, -0.2), (-0.3, 0.25), (0.4, 0.3)] {
            let p = Vector2::new(x, y);
            let back = distortion.undistort(&distortion.distort(&p))?;
            assert!((back - p).norm() < 1e-12, "roundtrip failed for {p:?}");
        }
        Ok(())
    }

    #[test]
    fn test_distortion_jacobian_matches_finite_differences() {
        let distortion = lens();
        let p = Vector2::new(0.21, -0.17);
        let analytic = distortion.jacobian(&p);
        let h = 1e-7;
        for col in 0..2 {
            let mut plus = p;
            let mut minus = p;
            plus[col] += h;
            minus[col] -= h;
            let numeric = (distortion.distort(&plus) - distortion.distort(&minus)) / (2.0 * h);
            for row in 0..2 {
                assert!((analytic[(row, col)] - numeric[row]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_coefficient_jacobian_matches_finite_differences() -> PendulumCvResult<()> {
        let distortion = lens();
        let p = Vector2::new(-0.26, 0.19);
        let analytic = distortion.parameter_jacobian(&p);
        let coefficients = [
            distortion.k1,
            distortion.k2,
            distortion.k3,
            distortion.p1,
            distortion.p2,
        ];
        let h = 1e-7;
        for col in 0..5 {
            let mut plus = coefficients;
            let mut minus = coefficients;
            plus[col] += h;
            minus[col] -= h;
            let [k1, k2, k3, p1, p2] = plus;
            let upper = BrownConrady::new(k1, k2, k3, p1, p2)?.distort(&p);
            let [k1, k2, k3, p1, p2] = minus;
            let lower = BrownConrady::new(k1, k2, k3, p1, p2)?.distort(&p);
            let numeric = (upper - lower) / (2.0 * h);
            for row in 0..2 {
                assert!(
                    (analytic[(row, col)] - numeric[row]).abs() < 1e-8,
                    "coefficient {col}, row {row}: analytical={}, numerical={}",
                    analytic[(row, col)],
                    numeric[row]
                );
            }
        }
        Ok(())
    }

    #[test]
    fn test_pixel_mapping_with_skew() -> PendulumCvResult<()> {
        let intrinsics = CameraIntrinsics::new(800.0, 790.0, 320.0, 240.0)?.with_skew(1.5)?;
        let distorted = Vector2::new(0.12, -0.08);
        let pixel = intrinsics.to_pixel(&distorted);
        let back = intrinsics.from_pixel(&pixel);
        assert!((back - distorted).norm() < 1e-15);

        let homogeneous = intrinsics.camera_matrix() * distorted.push(1.0);
        assert!((homogeneous.x - pixel.x).abs() < 1e-12);
        assert!((homogeneous.y - pixel.y).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_array_roundtrip_validates() -> PendulumCvResult<()> {
        let intrinsics = CameraIntrinsics::with_all(810.0, 805.0, 322.0, 241.0, 0.2, lens())?;
        let values = intrinsics.to_array();
        assert_eq!(CameraIntrinsics::from_array(&values)?, intrinsics);

        let mut broken = values;
        broken[0] = -5.0;
        assert!(CameraIntrinsics::from_array(&broken).is_err());
        Ok(())
    }

    #[test]
    fn test_yaml_rejects_invalid_focal_length() {
        let yaml = "fx: -1.0\nfy: 800.0\ncx: 320.0\ncy: 240.0\n";
        let parsed: Result<CameraIntrinsics, _> = serde_yaml::from_str(yaml);
        assert!(parsed.is_err());

        let yaml = "fx: 800.0\nfy: 800.0\ncx: 320.0\ncy: 240.0\n";
        let parsed: CameraIntrinsics = serde_yaml::from_str(yaml).expect("valid intrinsics");
        assert!(parsed.distortion().is_zero());
    }
}
