//! 运动层性质测试
//!
//! - 角度归一化范围
//! - 对焦几何对称性
//! - 缓入缓出轨迹的标准场景
//! - 卡尔曼滤波在噪声测量下的收敛

use camrig_motion::{
    CameraGeometry, KalmanEstimator, KalmanState, MotionPredictor, PredictorInput, Waypoint,
    normalize_angle, smooth, step_count_for,
};
use camrig_protocol::AxisName;
use camrig_tools::{FocusPoint, KalmanSettings, RigConfig};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

proptest! {
    #[test]
    fn prop_normalized_angle_in_range(angle in -1.0e6f64..1.0e6) {
        let normalized = normalize_angle(angle);
        prop_assert!(normalized > -180.0 && normalized <= 180.0);
    }

    #[test]
    fn prop_normalization_preserves_direction(angle in -720.0f64..720.0) {
        let normalized = normalize_angle(angle);
        let diff = (angle - normalized).rem_euclid(360.0);
        prop_assert!(diff < 1e-6 || (360.0 - diff) < 1e-6);
    }

    #[test]
    fn prop_pan_tilt_always_normalized(
        slider in -1000.0f64..3000.0,
        fx in -2000.0f64..2000.0,
        fy in -2000.0f64..4000.0,
        fz in -2000.0f64..2000.0,
    ) {
        let (pan, tilt) = CameraGeometry::default().pan_tilt_for(slider, [fx, fy, fz]);
        prop_assert!(pan > -180.0 && pan <= 180.0);
        prop_assert!(tilt >= -90.0 && tilt <= 90.0);
    }

    /// 相机与目标同 y 时，tilt 只取决于高度差与水平距离
    #[test]
    fn prop_tilt_level_with_target(
        slider in -1000.0f64..3000.0,
        fx in -2000.0f64..2000.0,
        fz in -2000.0f64..2000.0,
    ) {
        let geometry = CameraGeometry::default();
        let (_, tilt) = geometry.pan_tilt_for(slider, [fx, slider, fz]);
        let expected = (fz - geometry.camera_z)
            .atan2((fx - geometry.camera_x).abs())
            .to_degrees();
        prop_assert!((tilt - normalize_angle(expected)).abs() < 1e-9);
    }

    /// 目标关于相机 x 镜像时 pan 取反
    #[test]
    fn prop_pan_mirror_symmetry(
        slider in 0.0f64..1000.0,
        offset in 1.0f64..1000.0,
        fy in 1100.0f64..3000.0,
        fz in -500.0f64..500.0,
    ) {
        let geometry = CameraGeometry::default();
        let (left, tilt_left) = geometry.pan_tilt_for(slider, [geometry.camera_x - offset, fy, fz]);
        let (right, tilt_right) = geometry.pan_tilt_for(slider, [geometry.camera_x + offset, fy, fz]);
        prop_assert!((left + right).abs() < 1e-9);
        prop_assert!((tilt_left - tilt_right).abs() < 1e-9);
    }

    #[test]
    fn prop_kalman_seeds_from_first_measurement(position in -1.0e5f64..1.0e5) {
        let mut kf = KalmanEstimator::default();
        let state = kf.update(position).unwrap();
        prop_assert_eq!(state, KalmanState { position, velocity: 0.0, acceleration: 0.0 });
    }
}

#[test]
fn test_ease_in_out_scenario() {
    let waypoints = [
        Waypoint::new().with(AxisName::Slider, 0.0),
        Waypoint::new().with(AxisName::Slider, 100.0),
    ];
    let samples = smooth(&waypoints, Duration::from_secs(2), 4).unwrap();

    let positions: Vec<f64> = samples
        .iter()
        .map(|s| s.positions[&AxisName::Slider])
        .collect();
    for (actual, expected) in positions.iter().zip([0.0, 25.0, 75.0, 100.0]) {
        assert!((actual - expected).abs() < 1e-9, "{positions:?}");
    }

    // tick = 2/3 s
    let velocities: Vec<f64> = samples
        .iter()
        .map(|s| s.velocities[&AxisName::Slider])
        .collect();
    assert_eq!(velocities[0], 0.0);
    assert!((velocities[1] - 37.5).abs() < 1e-9);
    assert!((velocities[2] - 75.0).abs() < 1e-9);
    assert!((velocities[3] - 37.5).abs() < 1e-9);

    assert_eq!(samples[0].waypoint_index, Some(0));
    assert_eq!(samples[3].waypoint_index, Some(1));
}

#[test]
fn test_trajectory_monotonic_between_monotonic_waypoints() {
    let waypoints = [
        Waypoint::new().with(AxisName::Slider, 0.0),
        Waypoint::new().with(AxisName::Slider, 300.0),
    ];
    let duration = Duration::from_secs(3);
    let samples = smooth(&waypoints, duration, step_count_for(duration, 100.0)).unwrap();
    assert_eq!(samples.len(), 300);
    for pair in samples.windows(2) {
        assert!(pair[1].positions[&AxisName::Slider] >= pair[0].positions[&AxisName::Slider]);
    }
}

#[test]
fn test_kalman_converges_under_noise() {
    let settings = KalmanSettings::default();
    let mut kf = KalmanEstimator::new(&settings);
    let mut rng = StdRng::seed_from_u64(7);

    // 匀速 50 mm/s，测量噪声 ±0.5 mm
    let dt = 0.01;
    kf.set_time_step(dt);
    let mut estimates = Vec::with_capacity(500);
    for i in 0..500 {
        let truth = 50.0 * dt * i as f64;
        let measured = truth + rng.gen_range(-0.5..0.5);
        kf.predict().unwrap();
        estimates.push(kf.update(measured).unwrap());
    }
    let last = estimates[499];
    let truth = 50.0 * dt * 499.0;
    assert!((last.position - truth).abs() < 1.5, "{last:?}");
    assert!((last.velocity - 50.0).abs() < 15.0, "{last:?}");
    assert!(kf.position_variance() < settings.initial_covariance);
}

#[test]
fn test_tracking_follows_moving_slider() {
    let config = RigConfig::default();
    let mut predictor = MotionPredictor::from_config(&config);
    let point = FocusPoint::at(-400.0, 600.0, -300.0);
    predictor.set_focus_point(Some(point.clone()));
    predictor.enable_focus_tracking(true);

    let geometry = CameraGeometry::from(&config.geometry);
    let mut previous_pan: Option<f64> = None;
    for i in 0..100 {
        let slider = i as f64 * 5.0;
        let (pan_now, tilt_now) = geometry.pan_tilt_for(slider, point.position());
        let out = predictor.update(&PredictorInput {
            slider: Some(slider),
            pan: Some(pan_now),
            tilt: Some(tilt_now),
            slider_velocity: Some(500.0),
            ..Default::default()
        });
        assert!(out.pan_angle > -180.0 && out.pan_angle <= 180.0);
        assert!(out.look_ahead_time >= config.prediction.min_time);
        assert!(out.look_ahead_time <= config.prediction.max_time);
        assert!(out.focus_steps.is_some());
        if let Some(previous) = previous_pan {
            // 滑轨匀速前进时 pan 连续变化，不跳变
            assert!((out.pan_angle - previous).abs() < 20.0);
        }
        previous_pan = Some(out.pan_angle);
    }
}
