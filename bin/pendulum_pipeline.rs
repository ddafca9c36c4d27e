//! End-to-end pendulum pipeline
//!
//! Simulates a pendulum, calibrates the camera from a synthetic layered target,
//! renders noisy observations of the swing, lifts them back onto the swing plane
//! with the fitted camera and estimates g.
//!
//! # Usage
//! ```bash
//! cargo run --release --bin pendulum_pipeline
//!
//! # Noisier camera, Gauss-Newton, save the calibration:
//! cargo run --release --bin pendulum_pipeline -- --noise-sigma 0.5 --optimizer gn \
//!     --save-calibration output/calibration.yaml
//! ```

use clap::Parser;
use pendulum_cv::PipelineConfig;
use pendulum_cv::calibration::{
    CalibrationEstimator, CameraParameter, FixedParameters, PendulumEstimator, TimedPoint,
    fit_best_of,
};
use pendulum_cv::camera::{CameraIntrinsics, Extrinsics};
use pendulum_cv::io::{load_config, save_calibration, save_config};
use pendulum_cv::optimizer::OptimizerType;
use pendulum_cv::physics::PendulumSimulator;
use pendulum_cv::synthesis::{Observation, synthesize};
use pendulum_cv::validation::{
    TimedPixel, fit_reprojection, observation_residuals, trajectory_residuals,
};
use pendulum_cv::{init_logger, init_logger_with_level};
use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{Level, info, warn};

/// Integration step of the g fit (s).
const FIT_STEP: f64 = 1e-3;

#[derive(Parser)]
#[command(name = "pendulum_pipeline")]
#[command(about = "Simulate, film and fit a pendulum to estimate g")]
struct Args {
    /// YAML pipeline configuration; built-in bench-top defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated duration (s)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Camera frame rate (Hz)
    #[arg(short, long)]
    frame_rate: Option<f64>,

    /// Gaussian pixel noise (px), applied to the target and the pendulum frames
    #[arg(short, long)]
    noise_sigma: Option<f64>,

    /// Seed of the noise streams
    #[arg(short, long)]
    seed: Option<u64>,

    /// Optimizer type: "lm" (Levenberg-Marquardt) or "gn" (Gauss-Newton)
    #[arg(short, long)]
    optimizer: Option<String>,

    /// Write the effective configuration to this path
    #[arg(long)]
    save_config: Option<PathBuf>,

    /// Write the camera calibration result to this path
    #[arg(long)]
    save_calibration: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_optimizer(name: &str) -> Result<OptimizerType, Box<dyn Error>> {
    match name.to_lowercase().as_str() {
        "lm" => Ok(OptimizerType::LevenbergMarquardt),
        "gn" => Ok(OptimizerType::GaussNewton),
        other => Err(format!("unknown optimizer '{other}', expected 'lm' or 'gn'").into()),
    }
}

fn build_config(args: &Args) -> Result<PipelineConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(duration) = args.duration {
        config.simulation.duration = duration;
    }
    if let Some(frame_rate) = args.frame_rate {
        config.frame_rate = frame_rate;
    }
    if let Some(sigma) = args.noise_sigma {
        config.noise.gaussian_sigma_px = sigma;
    }
    if let Some(seed) = args.seed {
        config.noise.seed = seed;
    }
    if let Some(name) = &args.optimizer {
        config.optimizer.optimizer_type = parse_optimizer(name)?;
    }
    config.validate()?;
    Ok(config)
}

/// A few deliberately wrong starting points for the camera fit.
fn camera_guesses(
    intrinsics: &CameraIntrinsics,
    extrinsics: &Extrinsics,
) -> Result<Vec<(CameraIntrinsics, Extrinsics)>, Box<dyn Error>> {
    let [rx, ry, rz, tx, ty, tz] = extrinsics.to_array();
    let mut guesses = Vec::new();
    for (scale, shift, tilt) in [(0.95, 4.0, 0.02), (1.05, -6.0, -0.03), (0.9, 0.0, 0.05)] {
        let guess = CameraIntrinsics::new(
            intrinsics.fx() * scale,
            intrinsics.fy() * scale,
            intrinsics.cx() + shift,
            intrinsics.cy() - shift,
        )?;
        let pose = Extrinsics::from_array(&[rx + tilt, ry - tilt, rz, tx + 0.01, ty, tz * scale])?;
        guesses.push((guess, pose));
    }
    Ok(guesses)
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    if args.verbose {
        init_logger_with_level(Level::DEBUG);
    } else {
        init_logger();
    }

    let config = build_config(&args)?;
    info!("{config}");
    if let Some(path) = &args.save_config {
        save_config(path, &config)?;
    }
    let start = Instant::now();

    // 1. Simulate the swing
    let simulator = PendulumSimulator::new(config.pendulum)?;
    let trajectory = simulator.simulate(&config.initial, &config.simulation)?;
    info!(
        "Small-angle period {:.6} s, {} trajectory samples",
        simulator.small_angle_period(),
        trajectory.len()
    );

    // 2. Calibrate the camera from the layered target
    let detections = config.target.observe(
        &config.intrinsics,
        &config.extrinsics,
        config.noise.gaussian_sigma_px,
        config.noise.seed,
    )?;
    let estimator = CalibrationEstimator::new(config.optimizer.clone());
    let fixed = FixedParameters::none().fix(CameraParameter::Skew);
    let calibration = fit_best_of(
        &estimator,
        &detections,
        &camera_guesses(&config.intrinsics, &config.extrinsics)?,
        &fixed,
    )?;
    if !calibration.converged {
        warn!("Camera calibration did not converge: {}", calibration.status);
    }
    info!(
        "Calibrated fx = {:.3}, fy = {:.3}, cx = {:.3}, cy = {:.3}; reprojection {}",
        calibration.intrinsics.fx(),
        calibration.intrinsics.fy(),
        calibration.intrinsics.cx(),
        calibration.intrinsics.cy(),
        fit_reprojection(&calibration)?
    );
    if let Some(path) = &args.save_calibration {
        save_calibration(path, &calibration)?;
    }
    let pose = calibration
        .pose()
        .copied()
        .ok_or("calibration returned no pose")?;

    // 3. Film the pendulum
    let synthesizer = synthesize(
        &trajectory,
        config.intrinsics,
        config.extrinsics,
        config.noise,
        config.frame_rate,
    )?;
    let observations = synthesizer
        .frames()
        .collect::<Result<Vec<Observation>, _>>()?;
    info!(
        "Synthesized {} frames; observation noise {}",
        observations.len(),
        observation_residuals(&observations)?
    );
    let tracked: Vec<TimedPixel> = observations.iter().map(Into::into).collect();
    info!(
        "Tracked pixels vs true trajectory: {}",
        trajectory_residuals(&trajectory, &config.intrinsics, &config.extrinsics, &tracked)?
    );

    // 4. Lift onto the swing plane with the fitted camera and fit g
    let points = TimedPoint::from_observations(&observations, &calibration.intrinsics, &pose)?;
    let guess = config.pendulum.with_gravity(config.pendulum.gravity * 0.97);
    let fit = PendulumEstimator::new(config.optimizer.clone(), FIT_STEP)?.fit(
        &points,
        &guess,
        &config.initial,
    )?;

    let error = fit.params.gravity - config.pendulum.gravity;
    info!(
        "Estimated g = {:.6} m/s² (true {:.6}, error {:+.3e}), rms position residual {:.3e} m",
        fit.params.gravity,
        config.pendulum.gravity,
        error,
        fit.rms_residual()
    );
    if !fit.converged {
        warn!("Pendulum fit did not converge: {}", fit.status);
    }
    info!("Pipeline finished in {:?}", start.elapsed());
    Ok(())
}
