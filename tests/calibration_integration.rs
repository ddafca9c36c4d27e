//! Camera calibration integration tests
//!
//! Synthetic target observations are fitted back to the camera that produced them:
//! - Zero-noise recovery of every intrinsic including distortion, across three views
//! - Multi-start selection on a single layered view
//! - Reprojection residuals growing with the detection noise
//! - Rejection of underdetermined problems
//! - YAML persistence of a fit result

#![allow(clippy::expect_used)]


use approx::assert_relative_eq;
use pendulum_cv::PendulumCvError;
use pendulum_cv::calibration::{
    CalibrationEstimator, CameraParameter, Correspondence, FitResult, FixedParameters, View,
    fit_best_of,
};
use pendulum_cv::camera::{BrownConrady, CameraIntrinsics};
use pendulum_cv::io::{from_yaml, load_calibration, save_calibration, to_yaml};
use pendulum_cv::optimizer::OptimizerConfig;
use pendulum_cv::validation::fit_reprojection;
use pipeline_test_utils::*;

// ============================================================================
// Recovery
// ============================================================================

#[test]
fn test_zero_noise_multi_view_recovers_intrinsics() -> TestResult {
    let target = layered_target();
    let truth = distorted_camera()?;
    let (views, true_poses) = three_views(&target, &truth)?;

    // 1. Start from a distortion-free guess a few percent off
    let guess = CameraIntrinsics::new(780.0, 780.0, 315.0, 245.0)?;
    let fixed = FixedParameters::none().fix(CameraParameter::K3);

    // 2. Fit
    let estimator = CalibrationEstimator::new(OptimizerConfig::default().with_max_iterations(200));
    let fit = estimator.fit_views(&views, &guess, &fixed)?;

    // 3. Verify
    assert!(fit.converged, "calibration stopped with {}", fit.status);
    assert_relative_eq!(fit.intrinsics.fx(), truth.fx(), epsilon = 1e-4);
    assert_relative_eq!(fit.intrinsics.fy(), truth.fy(), epsilon = 1e-4);
    assert_relative_eq!(fit.intrinsics.cx(), truth.cx(), epsilon = 1e-4);
    assert_relative_eq!(fit.intrinsics.cy(), truth.cy(), epsilon = 1e-4);
    assert_relative_eq!(fit.intrinsics.skew(), 0.0, epsilon = 1e-6);

    let d = fit.intrinsics.distortion();
    let expected = truth.distortion();
    assert_relative_eq!(d.k1, expected.k1, epsilon = 1e-6);
    assert_relative_eq!(d.k2, expected.k2, epsilon = 1e-5);
    assert_relative_eq!(d.p1, expected.p1, epsilon = 1e-7);
    assert_relative_eq!(d.p2, expected.p2, epsilon = 1e-7);
    assert_eq!(d.k3, 0.0);

    assert_eq!(fit.extrinsics.len(), true_poses.len());
    for (fitted, expected) in fit.extrinsics.iter().zip(&true_poses) {
        let rotation_error = (fitted.rotation().matrix() - expected.rotation().matrix()).amax();
        let translation_error = (fitted.translation() - expected.translation()).amax();
        assert!(rotation_error < 1e-7, "rotation error {rotation_error:e}");
        assert!(translation_error < 1e-7, "translation error {translation_error:e}");
    }

    let summary = fit_reprojection(&fit)?;
    assert!(summary.max < 1e-6, "max reprojection residual {}", summary.max);
    Ok(())
}

#[test]
fn test_fixed_parameters_are_left_untouched() -> TestResult {
    let target = layered_target();
    let truth = distorted_camera()?;
    let (views, _) = three_views(&target, &truth)?;

    // Principal point fixed slightly wrong: the fit absorbs it elsewhere but never moves it.
    let guess = CameraIntrinsics::with_all(790.0, 790.0, 320.0, 240.0, 0.0, BrownConrady::none())?;
    let fixed = FixedParameters::none()
        .fix(CameraParameter::Cx)
        .fix(CameraParameter::Cy)
        .fix(CameraParameter::K3);
    let fit = CalibrationEstimator::default().fit_views(&views, &guess, &fixed)?;

    assert_eq!(fit.intrinsics.cx(), 320.0);
    assert_eq!(fit.intrinsics.cy(), 240.0);
    assert_eq!(fit.intrinsics.distortion().k3, 0.0);
    assert!(fit.final_cost < fit.initial_cost);
    Ok(())
}

#[test]
fn test_multi_start_keeps_the_best_guess() -> TestResult {
    let target = layered_target();
    let truth = CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0)?;
    let pose = viewing_pose(&target, 0.03, -0.02, 0.5)?;
    let detections = target.observe(&truth, &pose, 0.0, 3)?;

    let near = (
        CameraIntrinsics::new(790.0, 810.0, 318.0, 243.0)?,
        perturb_pose(&pose, [0.01, 0.0, -0.01, 0.0, 0.005, 0.01])?,
    );
    // Rotated half a turn: the target lands behind the camera.
    let hopeless = (
        CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0)?,
        perturb_pose(&pose, [std::f64::consts::PI, 0.0, 0.0, 0.0, 0.0, 0.0])?,
    );
    let fixed = FixedParameters::distortion().fix(CameraParameter::Skew);

    let fit = fit_best_of(&CalibrationEstimator::default(), &detections, &[hopeless, near], &fixed)?;
    assert!(fit.converged);
    assert_relative_eq!(fit.intrinsics.fx(), 800.0, epsilon = 1e-5);
    assert_relative_eq!(fit.intrinsics.cy(), 240.0, epsilon = 1e-5);
    Ok(())
}

// ============================================================================
// Noise sensitivity
// ============================================================================

#[test]
fn test_reprojection_residual_grows_with_detection_noise() -> TestResult {
    let target = layered_target();
    let truth = CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0)?;
    let pose = viewing_pose(&target, 0.05, 0.02, 0.5)?;
    let fixed = FixedParameters::distortion().fix(CameraParameter::Skew);
    let estimator = CalibrationEstimator::default();

    let mut previous = 0.0;
    for sigma in [0.1, 0.3, 0.9, 2.7] {
        let mut means = Vec::new();
        for seed in 0..8 {
            let detections = target.observe(&truth, &pose, sigma, seed)?;
            let fit = estimator.fit(&detections, (&truth, &pose), &fixed)?;
            means.push(fit_reprojection(&fit)?.mean);
        }
        let averaged = mean(&means);
        assert!(
            averaged > previous,
            "mean residual {averaged} at σ = {sigma} did not exceed {previous}"
        );
        previous = averaged;
    }
    Ok(())
}

// ============================================================================
// Failure modes
// ============================================================================

#[test]
fn test_underdetermined_fit_is_rejected() -> TestResult {
    let target = layered_target();
    let truth = CameraIntrinsics::new(800.0, 800.0, 320.0, 240.0)?;
    let pose = viewing_pose(&target, 0.0, 0.0, 0.5)?;
    let few: Vec<Correspondence> = target.observe(&truth, &pose, 0.0, 0)?[..7].to_vec();

    // 10 intrinsics + 6 pose parameters against 7 points.
    let result = CalibrationEstimator::default().fit(&few, (&truth, &pose), &FixedParameters::none());
    match result {
        Err(PendulumCvError::UnderdeterminedFit {
            correspondences,
            free_parameters,
        }) => {
            assert_eq!(correspondences, 7);
            assert_eq!(free_parameters, 16);
        }
        other => panic!("expected UnderdeterminedFit, got {other:?}"),
    }

    // Pose only: 6 free parameters, 7 points is enough.
    let fit = CalibrationEstimator::default().fit(&few, (&truth, &pose), &FixedParameters::intrinsics())?;
    assert!(fit.converged);
    Ok(())
}

#[test]
fn test_empty_view_list_is_rejected() -> TestResult {
    let guess = CameraIntrinsics::default();
    let result = CalibrationEstimator::default().fit_views(&[] as &[View], &guess, &FixedParameters::none());
    assert!(matches!(result, Err(PendulumCvError::Configuration(_))));
    Ok(())
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_fit_result_survives_yaml() -> TestResult {
    let target = layered_target();
    let truth = distorted_camera()?;
    let pose = viewing_pose(&target, 0.02, 0.01, 0.45)?;
    let detections = target.observe(&truth, &pose, 0.25, 11)?;
    let fit = CalibrationEstimator::default().fit(
        &detections,
        (&truth, &pose),
        &FixedParameters::none().fix(CameraParameter::K3).fix(CameraParameter::Skew),
    )?;

    let text = to_yaml(&fit)?;
    let parsed: FitResult = from_yaml(&text)?;
    assert_eq!(parsed, fit);

    let path = std::env::temp_dir()
        .join(format!("pendulum_cv_calibration_{}", std::process::id()))
        .join("fit.yaml");
    save_calibration(&path, &fit)?;
    let loaded = load_calibration(&path)?;
    assert_eq!(loaded, fit);
    let _ = std::fs::remove_file(&path);
    Ok(())
}
