//! Naming and masking of the calibration parameter vector.
//!
//! The packed layout is 10 intrinsic entries followed by 6 entries per view:
//!
//! ```text
//! [fx, fy, cx, cy, skew, k1, k2, k3, p1, p2 | rx, ry, rz, tx, ty, tz | ...]
//! ```
//!
//! Fixing a pose entry fixes it in every view.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Number of packed intrinsic entries.
pub const INTRINSIC_COUNT: usize = 10;

/// Number of packed entries per view pose.
pub const POSE_COUNT: usize = 6;

/// One named entry of the packed calibration vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraParameter {
    Fx,
    Fy,
    Cx,
    Cy,
    Skew,
    K1,
    K2,
    K3,
    P1,
    P2,
    Rx,
    Ry,
    Rz,
    Tx,
    Ty,
    Tz,
}

impl CameraParameter {
    pub const INTRINSICS: [CameraParameter; INTRINSIC_COUNT] = [
        CameraParameter::Fx,
        CameraParameter::Fy,
        CameraParameter::Cx,
        CameraParameter::Cy,
        CameraParameter::Skew,
        CameraParameter::K1,
        CameraParameter::K2,
        CameraParameter::K3,
        CameraParameter::P1,
        CameraParameter::P2,
    ];

    pub const POSE: [CameraParameter; POSE_COUNT] = [
        CameraParameter::Rx,
        CameraParameter::Ry,
        CameraParameter::Rz,
        CameraParameter::Tx,
        CameraParameter::Ty,
        CameraParameter::Tz,
    ];

    pub const DISTORTION: [CameraParameter; 5] = [
        CameraParameter::K1,
        CameraParameter::K2,
        CameraParameter::K3,
        CameraParameter::P1,
        CameraParameter::P2,
    ];

    pub fn is_intrinsic(self) -> bool {
        (self as usize) < INTRINSIC_COUNT
    }

    /// Offset inside the intrinsic block or inside a pose block.
    pub fn block_offset(self) -> usize {
        let index = self as usize;
        if index < INTRINSIC_COUNT {
            index
        } else {
            index - INTRINSIC_COUNT
        }
    }
}

impl fmt::Display for CameraParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CameraParameter::Fx => "fx",
            CameraParameter::Fy => "fy",
            CameraParameter::Cx => "cx",
            CameraParameter::Cy => "cy",
            CameraParameter::Skew => "skew",
            CameraParameter::K1 => "k1",
            CameraParameter::K2 => "k2",
            CameraParameter::K3 => "k3",
            CameraParameter::P1 => "p1",
            CameraParameter::P2 => "p2",
            CameraParameter::Rx => "rx",
            CameraParameter::Ry => "ry",
            CameraParameter::Rz => "rz",
            CameraParameter::Tx => "tx",
            CameraParameter::Ty => "ty",
            CameraParameter::Tz => "tz",
        };
        f.write_str(name)
    }
}

/// Set of parameters held at their initial value during a fit.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedParameters {
    fixed: BTreeSet<CameraParameter>,
}

impl FixedParameters {
    /// Everything free.
    pub fn none() -> Self {
        Self::default()
    }

    /// Intrinsics known; only the pose is estimated.
    pub fn intrinsics() -> Self {
        Self::none().fix_all(CameraParameter::INTRINSICS)
    }

    /// Pose known; only the intrinsics are estimated.
    pub fn extrinsics() -> Self {
        Self::none().fix_all(CameraParameter::POSE)
    }

    /// Lens assumed distortion-free at its initial coefficients.
    pub fn distortion() -> Self {
        Self::none().fix_all(CameraParameter::DISTORTION)
    }

    pub fn fix(mut self, parameter: CameraParameter) -> Self {
        self.fixed.insert(parameter);
        self
    }

    pub fn free(mut self, parameter: CameraParameter) -> Self {
        self.fixed.remove(&parameter);
        self
    }

    pub fn fix_all(mut self, parameters: impl IntoIterator<Item = CameraParameter>) -> Self {
        self.fixed.extend(parameters);
        self
    }

    pub fn is_fixed(&self, parameter: CameraParameter) -> bool {
        self.fixed.contains(&parameter)
    }

    pub fn iter(&self) -> impl Iterator<Item = CameraParameter> + '_ {
        self.fixed.iter().copied()
    }

    /// Free entries of the packed vector for `views` poses, as `(packed index, parameter)`.
    pub fn free_slots(&self, views: usize) -> Vec<(usize, CameraParameter)> {
        let intrinsic = CameraParameter::INTRINSICS
            .into_iter()
            .enumerate()
            .filter(|(_, p)| !self.is_fixed(*p));
        let pose = (0..views).flat_map(|view| {
            CameraParameter::POSE
                .into_iter()
                .enumerate()
                .filter(|(_, p)| !self.is_fixed(*p))
                .map(move |(i, p)| (INTRINSIC_COUNT + POSE_COUNT * view + i, p))
        });
        intrinsic.chain(pose).collect()
    }

    /// Number of free entries for `views` poses.
    pub fn free_count(&self, views: usize) -> usize {
        let intrinsic = CameraParameter::INTRINSICS
            .iter()
            .filter(|p| !self.is_fixed(**p))
            .count();
        let pose = CameraParameter::POSE
            .iter()
            .filter(|p| !self.is_fixed(**p))
            .count();
        intrinsic + pose * views
    }
}
