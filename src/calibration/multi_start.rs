//! Caller-side multi-start over several initial guesses.
//!
//! Every guess is an independent [`CalibrationEstimator::fit`] call; the guesses run
//! on the rayon thread pool and the lowest final cost wins.

use crate::calibration::{CalibrationEstimator, Correspondence, FitResult, FixedParameters};
use crate::camera::{CameraIntrinsics, Extrinsics};
use crate::error::{PendulumCvError, PendulumCvResult};
use rayon::prelude::*;
use tracing::{debug, info};

/// Fits from every guess in parallel and keeps the result with the lowest final cost.
///
/// Guesses whose fit fails outright (for example a pose that puts target points behind
/// the camera) are skipped. If every guess fails, the first error is returned.
pub fn fit_best_of(
    estimator: &CalibrationEstimator,
    correspondences: &[Correspondence],
    guesses: &[(CameraIntrinsics, Extrinsics)],
    fixed: &FixedParameters,
) -> PendulumCvResult<FitResult> {
    if guesses.is_empty() {
        return Err(PendulumCvError::config("multi-start needs at least one initial guess"));
    }

    let outcomes: Vec<PendulumCvResult<FitResult>> = guesses
        .par_iter()
        .map(|(intrinsics, extrinsics)| estimator.fit(correspondences, (intrinsics, extrinsics), fixed))
        .collect();

    let mut best: Option<(usize, FitResult)> = None;
    let mut first_error = None;
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(result) => {
                debug!("Start {index}: final cost {:.6e}, {}", result.final_cost, result.status);
                if best
                    .as_ref()
                    .is_none_or(|(_, b)| result.final_cost < b.final_cost)
                {
                    best = Some((index, result));
                }
            }
            Err(err) => {
                debug!("Start {index} failed: {err}");
                first_error.get_or_insert(err);
            }
        }
    }

    match (best, first_error) {
        (Some((index, result)), _) => {
            info!(
                "Multi-start picked guess {index} of {} (final cost {:.6e})",
                guesses.len(),
                result.final_cost
            );
            Ok(result)
        }
        (None, Some(err)) => Err(err),
        (None, None) => Err(PendulumCvError::config("multi-start produced no result")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::target::TargetGrid;
    use nalgebra::Vector3;

    #[test]
    fn test_best_guess_wins_and_bad_guesses_are_skipped() -> PendulumCvResult<()> {
        let grid = TargetGrid::layered(6, 5, 0.03, vec![0.0, 0.05]);
        let intrinsics = CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0)?;
        let truth = Extrinsics::look_at(
            grid.center() + Vector3::new(0.0, 0.0, 0.5),
            -Vector3::z(),
            -Vector3::y(),
        )?;
        let observed = grid.observe(&intrinsics, &truth, 0.0, 3)?;

        // camera behind the target: every point has negative depth
        let behind = Extrinsics::look_at(
            grid.center() + Vector3::new(0.0, 0.0, 0.5),
            Vector3::z(),
            -Vector3::y(),
        )?;
        let [rx, ry, rz, tx, ty, tz] = truth.to_array();
        let near = Extrinsics::from_array(&[rx + 0.01, ry, rz, tx, ty + 0.01, tz])?;
        let far = Extrinsics::from_array(&[rx + 0.1, ry - 0.1, rz, tx + 0.05, ty, tz + 0.1])?;
        let guesses = [(intrinsics, behind), (intrinsics, far), (intrinsics, near)];

        let result = fit_best_of(
            &CalibrationEstimator::default(),
            &observed,
            &guesses,
            &FixedParameters::intrinsics(),
        )?;
        assert!(result.converged);
        assert!(result.final_cost < 1e-12);
        Ok(())
    }

    #[test]
    fn test_all_guesses_failing_returns_error() -> PendulumCvResult<()> {
        let grid = TargetGrid::planar(4, 4, 0.03);
        let intrinsics = CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0)?;
        let truth = Extrinsics::from_array(&[0.0, 0.0, 0.0, -0.05, -0.05, 0.5])?;
        let observed = grid.observe(&intrinsics, &truth, 0.0, 0)?;
        let behind = Extrinsics::from_array(&[0.0, 0.0, 0.0, 0.0, 0.0, -0.5])?;

        let result = fit_best_of(
            &CalibrationEstimator::default(),
            &observed,
            &[(intrinsics, behind)],
            &FixedParameters::intrinsics(),
        );
        assert!(matches!(result, Err(PendulumCvError::InvalidGeometry(_))));
        assert!(fit_best_of(&CalibrationEstimator::default(), &observed, &[], &FixedParameters::none()).is_err());
        Ok(())
    }
}
