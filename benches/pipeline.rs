//! Pipeline stage benchmarks
//!
//! Times the three hot paths of a run on the default bench-top configuration:
//! integrating the swing, streaming synthetic frames, and fitting the camera.
//!
//! ```bash
//! cargo bench --bench pipeline
//! ```

use criterion::{Criterion, criterion_group, criterion_main};
use pendulum_cv::PipelineConfig;
use pendulum_cv::calibration::{CalibrationEstimator, CameraParameter, FixedParameters};
use pendulum_cv::camera::{CameraIntrinsics, Extrinsics};
use pendulum_cv::physics::{PendulumSimulator, SimulationConfig, StepPolicy};
use pendulum_cv::synthesis::{NoiseModel, synthesize};
use std::hint::black_box;

fn bench_simulation(c: &mut Criterion) {
    let config = PipelineConfig::default();
    let simulator = PendulumSimulator::new(config.pendulum).expect("default pendulum is valid");
    let adaptive = SimulationConfig::new(10.0, 240.0);
    let fixed = adaptive.with_step_policy(StepPolicy::Fixed { dt: 1e-3 });

    c.bench_function("simulate_10s_adaptive", |b| {
        b.iter(|| simulator.simulate(black_box(&config.initial), black_box(&adaptive)))
    });
    c.bench_function("simulate_10s_fixed_1ms", |b| {
        b.iter(|| simulator.simulate(black_box(&config.initial), black_box(&fixed)))
    });
}

fn bench_synthesis(c: &mut Criterion) {
    let config = PipelineConfig::default();
    let trajectory = PendulumSimulator::new(config.pendulum)
        .and_then(|s| s.simulate(&config.initial, &SimulationConfig::new(10.0, 240.0)))
        .expect("default simulation succeeds");
    let noisy = NoiseModel::gaussian(0.3)
        .with_shot_noise(5000.0, 2.0)
        .with_motion_blur(1.0 / 240.0, 8)
        .with_seed(1);
    let full_frame = noisy.with_full_frame(10.0);

    for (name, noise) in [
        ("synthesize_600_frames_approx", noisy),
        ("synthesize_600_frames_full_frame", full_frame),
    ] {
        let synthesizer = synthesize(
            &trajectory,
            config.intrinsics,
            config.extrinsics,
            noise,
            config.frame_rate,
        )
        .expect("default camera sees the pendulum");
        c.bench_function(name, |b| {
            b.iter(|| synthesizer.frames().filter_map(Result::ok).count())
        });
    }
}

fn bench_calibration(c: &mut Criterion) {
    let config = PipelineConfig::default();
    let detections = config
        .target
        .observe(&config.intrinsics, &config.extrinsics, 0.2, 7)
        .expect("target is in front of the camera");
    let guess = CameraIntrinsics::new(760.0, 760.0, 325.0, 235.0).expect("valid guess");
    let [rx, ry, rz, tx, ty, tz] = config.extrinsics.to_array();
    let pose = Extrinsics::from_array(&[rx + 0.02, ry - 0.02, rz, tx + 0.01, ty, tz * 0.95])
        .expect("valid pose");
    let fixed = FixedParameters::none().fix(CameraParameter::Skew);
    let estimator = CalibrationEstimator::new(config.optimizer.clone());

    let mut group = c.benchmark_group("calibration");
    group.sample_size(20);
    group.bench_function("fit_single_view_layered_target", |b| {
        b.iter(|| estimator.fit(black_box(&detections), (&guess, &pose), &fixed))
    });
    group.finish();
}

criterion_group!(benches, bench_simulation, bench_synthesis, bench_calibration);
criterion_main!(benches);
