//! End-to-end pipeline integration tests
//!
//! Runs the whole chain the `pendulum_pipeline` binary runs: simulate, calibrate the
//! camera from the target, film the swing, lift the frames back onto the swing plane
//! with the fitted camera and estimate g.

#![allow(clippy::expect_used)]


use pendulum_cv::PipelineConfig;
use pendulum_cv::calibration::{
    CalibrationEstimator, CameraParameter, FitResult, FixedParameters, PendulumEstimator,
    PendulumFitResult, PendulumParameter, TimedPoint,
};
use pendulum_cv::camera::CameraIntrinsics;
use pendulum_cv::io::{load_config, save_config};
use pendulum_cv::physics::{InitialConditions, PendulumSimulator};
use pendulum_cv::synthesis::{NoiseModel, synthesize};
use pipeline_test_utils::*;

/// Integration step of the g fit (s).
const FIT_STEP: f64 = 1e-3;

fn calibrate(config: &PipelineConfig) -> Result<FitResult, Box<dyn std::error::Error>> {
    let detections = config.target.observe(
        &config.intrinsics,
        &config.extrinsics,
        config.noise.gaussian_sigma_px,
        config.noise.seed,
    )?;
    let guess = CameraIntrinsics::new(
        config.intrinsics.fx() * 0.96,
        config.intrinsics.fy() * 0.96,
        config.intrinsics.cx() + 5.0,
        config.intrinsics.cy() - 5.0,
    )?;
    let pose = perturb_pose(&config.extrinsics, [0.02, -0.02, 0.01, 0.01, 0.0, -0.02])?;
    let fixed = FixedParameters::none()
        .fix(CameraParameter::Skew)
        .fix(CameraParameter::K3);
    Ok(CalibrationEstimator::new(config.optimizer.clone()).fit(&detections, (&guess, &pose), &fixed)?)
}

fn estimate_gravity(
    config: &PipelineConfig,
) -> Result<PendulumFitResult, Box<dyn std::error::Error>> {
    // 1. Simulate
    let trajectory =
        PendulumSimulator::new(config.pendulum)?.simulate(&config.initial, &config.simulation)?;

    // 2. Calibrate
    let calibration = calibrate(config)?;
    assert!(calibration.converged, "calibration stopped with {}", calibration.status);
    let pose = calibration.pose().copied().ok_or("no pose")?;

    // 3. Film
    let observations = synthesize(
        &trajectory,
        config.intrinsics,
        config.extrinsics,
        config.noise,
        config.frame_rate,
    )?
    .frames()
    .collect::<Result<Vec<_>, _>>()?;

    // 4. Fit g from a 3% wrong start
    let points = TimedPoint::from_observations(&observations, &calibration.intrinsics, &pose)?;
    let guess = config.pendulum.with_gravity(config.pendulum.gravity * 0.97);
    let start = InitialConditions::new(config.initial.angle * 0.9, 0.0);
    Ok(PendulumEstimator::new(config.optimizer.clone(), FIT_STEP)?.fit(&points, &guess, &start)?)
}

#[test]
fn test_gravity_from_noise_free_video() -> TestResult {
    let config = PipelineConfig::default().with_simulation(
        PipelineConfig::default().simulation.with_duration(4.0),
    );
    let fit = estimate_gravity(&config)?;

    assert!(fit.converged, "pendulum fit stopped with {}", fit.status);
    let error = (fit.params.gravity - config.pendulum.gravity).abs();
    assert!(error < 1e-3, "g error {error:e}");
    assert!((fit.initial.angle - config.initial.angle).abs() < 1e-5);
    assert!(fit.rms_residual() < 1e-5);
    Ok(())
}

#[test]
fn test_gravity_from_noisy_video() -> TestResult {
    let config = PipelineConfig::default()
        .with_simulation(PipelineConfig::default().simulation.with_duration(5.0))
        .with_noise(NoiseModel::gaussian(0.3).with_seed(21));
    let fit = estimate_gravity(&config)?;

    let relative = (fit.params.gravity - config.pendulum.gravity).abs() / config.pendulum.gravity;
    assert!(relative < 5e-3, "relative g error {relative:e}");
    assert!(fit.final_cost < fit.initial_cost);
    Ok(())
}

#[test]
fn test_fitting_length_instead_of_gravity() -> TestResult {
    // With g known, the period pins down the effective length.
    let config = PipelineConfig::default().with_simulation(
        PipelineConfig::default().simulation.with_duration(3.0),
    );
    let trajectory =
        PendulumSimulator::new(config.pendulum)?.simulate(&config.initial, &config.simulation)?;
    let observations = synthesize(
        &trajectory,
        config.intrinsics,
        config.extrinsics,
        NoiseModel::none(),
        config.frame_rate,
    )?
    .frames()
    .collect::<Result<Vec<_>, _>>()?;
    let points = TimedPoint::from_observations(&observations, &config.intrinsics, &config.extrinsics)?;

    let estimator = PendulumEstimator::new(config.optimizer.clone(), FIT_STEP)?.with_free_parameters([
        PendulumParameter::StringLength,
        PendulumParameter::InitialAngle,
    ]);
    let guess = config
        .pendulum
        .with_string_length(config.pendulum.string_length * 1.05);
    let fit = estimator.fit(&points, &guess, &config.initial)?;

    assert!(fit.converged);
    assert!((fit.params.string_length - config.pendulum.string_length).abs() < 1e-5);
    assert_eq!(fit.params.gravity, config.pendulum.gravity);
    Ok(())
}

#[test]
fn test_config_file_drives_identical_run() -> TestResult {
    let config = PipelineConfig::default()
        .with_frame_rate(120.0)
        .with_noise(NoiseModel::gaussian(0.4).with_seed(5));
    let path = std::env::temp_dir()
        .join(format!("pendulum_cv_pipeline_{}", std::process::id()))
        .join("config.yaml");
    save_config(&path, &config)?;
    let loaded = load_config(&path)?;
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded, config);

    let trajectory = PendulumSimulator::new(config.pendulum)?
        .simulate(&config.initial, &config.simulation.with_duration(0.5))?;
    let original = synthesize(&trajectory, config.intrinsics, config.extrinsics, config.noise, 120.0)?
        .frames()
        .collect::<Result<Vec<_>, _>>()?;
    let replayed = synthesize(&trajectory, loaded.intrinsics, loaded.extrinsics, loaded.noise, 120.0)?
        .frames()
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(original, replayed);
    Ok(())
}
