//! Motion Predictor - 主从轴前瞻预测
//!
//! 滑轨为主轴，pan/tilt 为从轴。每个控制周期：
//!
//! 1. 计算前瞻时间：有固定时长的轨迹时取时长的一小部分，否则随主轴速度增长
//! 2. 以前瞻时间为步长，用测量值（和速度提示）更新主轴与启用预测的从轴
//! 3. 主轴外推一步得到前瞻位置
//! 4. 对焦跟踪时，在前瞻位置处由几何求出 pan/tilt 目标，作为观测回灌后外推
//! 5. 未跟踪时，外推值加上测量残差的一部分
//!
//! 角度输出归一化到 (-180°, 180°]，速度按轴限幅。
//! 估计器数值失稳时，该轴本周期退回原始测量值（或几何目标）。

use crate::geometry::{CameraGeometry, FocusRange, normalize_angle};
use crate::kalman::{KalmanEstimator, KalmanState};
use camrig_protocol::AxisName;
use camrig_tools::{FocusPoint, KalmanSettings, PredictionSettings, RigConfig};
use tracing::{debug, warn};

/// 单个周期的测量输入（物理单位），缺失的轴为 `None`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PredictorInput {
    /// 滑轨位置（mm）
    pub slider: Option<f64>,
    /// pan 角（度）
    pub pan: Option<f64>,
    /// tilt 角（度）
    pub tilt: Option<f64>,
    pub slider_velocity: Option<f64>,
    pub pan_velocity: Option<f64>,
    pub tilt_velocity: Option<f64>,
    /// 正在执行的轨迹总时长（秒）
    pub profile_duration: Option<f64>,
}

/// 预测输出
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PredictorOutput {
    /// 前瞻后的滑轨位置，仅供参考
    pub slider_position: f64,
    pub pan_angle: f64,
    pub tilt_angle: f64,
    /// 本周期使用的前瞻时间（秒）
    pub look_ahead_time: f64,
    pub pan_velocity: f64,
    pub tilt_velocity: f64,
    /// 对焦跟踪时的对焦轴目标
    pub focus_steps: Option<i32>,
}

/// 从轴：估计器 + 预测开关 + 上一次命令
#[derive(Debug, Clone)]
struct SlaveAxis {
    estimator: KalmanEstimator,
    enabled: bool,
    max_velocity: f64,
    last_command: Option<f64>,
}

impl SlaveAxis {
    fn new(kalman: &KalmanSettings, enabled: bool, max_velocity: f64) -> Self {
        Self {
            estimator: KalmanEstimator::new(kalman),
            enabled,
            max_velocity,
            last_command: None,
        }
    }

    /// 第 2 步：用测量值更新，返回是否仍然可用
    fn ingest(&mut self, dt: f64, measured: Option<f64>, hint: Option<f64>, extra_predict: bool) -> bool {
        if !self.enabled {
            return true;
        }
        self.estimator.set_time_step(dt);
        let Some(measured) = measured else {
            return true;
        };
        let mut healthy = self.estimator.update_with_velocity(measured, hint).is_ok();
        if healthy && extra_predict {
            healthy = self.estimator.predict().is_ok();
        }
        healthy
    }

    /// 第 4 步：几何目标作为观测，外推得到命令
    fn track(&mut self, target: f64, hint: Option<f64>) -> (f64, f64) {
        if !self.enabled {
            return (target, 0.0);
        }
        let tracked = self
            .estimator
            .update_with_velocity(target, hint)
            .and_then(|_| self.estimator.predict());
        match tracked {
            Ok(state) => (state.position, self.clamp_velocity(state.velocity)),
            Err(_) => (target, 0.0),
        }
    }

    /// 第 5 步：外推值 + 增益 × (测量 - 滤波)
    fn blend(&mut self, measured: Option<f64>, feedback_gain: f64, healthy: bool) -> (f64, f64) {
        let fallback = measured.or(self.last_command).unwrap_or(0.0);
        if !self.enabled || !healthy || !self.estimator.is_initialized() {
            return (fallback, 0.0);
        }
        let filtered = self.estimator.state().position;
        match self.estimator.predict() {
            Ok(state) => {
                let correction = measured.map_or(0.0, |m| feedback_gain * (m - filtered));
                (state.position + correction, self.clamp_velocity(state.velocity))
            },
            Err(_) => (fallback, 0.0),
        }
    }

    fn clamp_velocity(&self, velocity: f64) -> f64 {
        velocity.clamp(-self.max_velocity, self.max_velocity)
    }
}

#[derive(Debug, Clone)]
pub struct MotionPredictor {
    settings: PredictionSettings,
    geometry: CameraGeometry,
    focus_range: Option<FocusRange>,
    master: KalmanEstimator,
    pan: SlaveAxis,
    tilt: SlaveAxis,
    focus_point: Option<FocusPoint>,
    focus_tracking: bool,
}

impl MotionPredictor {
    pub fn new(
        kalman: &KalmanSettings,
        settings: PredictionSettings,
        geometry: CameraGeometry,
        focus_range: Option<FocusRange>,
    ) -> Self {
        Self {
            master: KalmanEstimator::new(kalman),
            pan: SlaveAxis::new(kalman, settings.pan_enabled, settings.pan_max_velocity),
            tilt: SlaveAxis::new(kalman, settings.tilt_enabled, settings.tilt_max_velocity),
            settings,
            geometry,
            focus_range,
            focus_point: None,
            focus_tracking: false,
        }
    }

    /// 由配置构造；对焦轴存在时启用对焦距离映射
    pub fn from_config(config: &RigConfig) -> Self {
        let focus_range = config
            .axes
            .get(&AxisName::Focus)
            .map(|axis| FocusRange::new(&config.focus, axis.min_steps, axis.max_steps));
        Self::new(
            &config.kalman,
            config.prediction.clone(),
            CameraGeometry::from(&config.geometry),
            focus_range,
        )
    }

    pub fn geometry(&self) -> &CameraGeometry {
        &self.geometry
    }

    pub fn set_focus_point(&mut self, point: Option<FocusPoint>) {
        self.focus_point = point;
    }

    pub fn focus_point(&self) -> Option<&FocusPoint> {
        self.focus_point.as_ref()
    }

    /// 关闭对焦跟踪时重置所有估计器
    pub fn enable_focus_tracking(&mut self, enable: bool) {
        self.focus_tracking = enable;
        if !enable {
            self.reset();
        }
    }

    /// 跟踪开关打开且已设置对焦点
    pub fn is_focus_tracking(&self) -> bool {
        self.focus_tracking && self.focus_point.is_some()
    }

    pub fn reset(&mut self) {
        self.master.reset();
        self.pan.estimator.reset();
        self.tilt.estimator.reset();
        self.pan.last_command = None;
        self.tilt.last_command = None;
    }

    /// 已初始化的估计值；非主从轴返回 `None`
    pub fn estimate(&self, axis: AxisName) -> Option<KalmanState> {
        let estimator = match axis {
            AxisName::Slider => &self.master,
            AxisName::Pan => &self.pan.estimator,
            AxisName::Tilt => &self.tilt.estimator,
            _ => return None,
        };
        estimator.is_initialized().then(|| estimator.state())
    }

    /// 位置方差，用于诊断
    pub fn position_variance(&self, axis: AxisName) -> Option<f64> {
        match axis {
            AxisName::Slider => Some(self.master.position_variance()),
            AxisName::Pan => Some(self.pan.estimator.position_variance()),
            AxisName::Tilt => Some(self.tilt.estimator.position_variance()),
            _ => None,
        }
    }

    /// 自适应前瞻时间（秒），夹在 `[min_time, max_time]`
    pub fn look_ahead_time(&self, master_velocity: f64, profile_duration: Option<f64>) -> f64 {
        let s = &self.settings;
        let base = match profile_duration {
            Some(duration) if duration > 0.0 => duration * s.profile_fraction,
            _ => {
                let normalized = master_velocity.abs() / s.slider_max_velocity;
                s.time * (1.0 + normalized * s.velocity_scale)
            },
        };
        if base.is_finite() {
            base.clamp(s.min_time, s.max_time)
        } else {
            s.max_time
        }
    }

    pub fn update(&mut self, input: &PredictorInput) -> PredictorOutput {
        let profile_active = input.profile_duration.is_some_and(|d| d > 0.0);
        let master_velocity = input
            .slider_velocity
            .unwrap_or_else(|| self.master.state().velocity)
            .clamp(-self.settings.slider_max_velocity, self.settings.slider_max_velocity);
        let look_ahead = self.look_ahead_time(master_velocity, input.profile_duration);

        // 主轴
        self.master.set_time_step(look_ahead);
        let mut master_healthy = true;
        if let Some(measured) = input.slider {
            master_healthy = self
                .master
                .update_with_velocity(measured, input.slider_velocity)
                .is_ok();
            if master_healthy && profile_active {
                master_healthy = self.master.predict().is_ok();
            }
        }
        let slider_position = match (master_healthy, self.master.is_initialized()) {
            (true, true) => match self.master.predict() {
                Ok(state) => state.position,
                Err(_) => input.slider.unwrap_or(0.0),
            },
            _ => input.slider.unwrap_or(0.0),
        };
        if !master_healthy {
            warn!("Master estimator unstable, using raw slider position");
        }

        // 从轴
        let pan_healthy = self
            .pan
            .ingest(look_ahead, input.pan, input.pan_velocity, profile_active);
        let tilt_healthy = self
            .tilt
            .ingest(look_ahead, input.tilt, input.tilt_velocity, profile_active);

        let target = match (&self.focus_point, self.focus_tracking) {
            (Some(point), true) => Some(point.position()),
            _ => None,
        };
        let (pan, tilt, focus_steps) = match target {
            Some(position) => {
                let (pan_target, tilt_target) = self.geometry.pan_tilt_for(slider_position, position);
                let focus_steps = self.focus_range.map(|range| {
                    range.steps_for_distance(self.geometry.camera_distance(slider_position, position))
                });
                (
                    self.pan.track(pan_target, input.pan_velocity),
                    self.tilt.track(tilt_target, input.tilt_velocity),
                    focus_steps,
                )
            },
            None => {
                let gain = self.settings.feedback_gain;
                (
                    self.pan.blend(input.pan, gain, pan_healthy),
                    self.tilt.blend(input.tilt, gain, tilt_healthy),
                    None,
                )
            },
        };

        let pan_angle = normalize_angle(pan.0);
        let tilt_angle = normalize_angle(tilt.0);
        self.pan.last_command = Some(pan_angle);
        self.tilt.last_command = Some(tilt_angle);

        debug!(
            "Prediction: slider={:.2} pan={:.2} tilt={:.2} look_ahead={:.4}",
            slider_position, pan_angle, tilt_angle, look_ahead
        );

        PredictorOutput {
            slider_position,
            pan_angle,
            tilt_angle,
            look_ahead_time: look_ahead,
            pan_velocity: pan.1,
            tilt_velocity: tilt.1,
            focus_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn predictor() -> MotionPredictor {
        MotionPredictor::from_config(&RigConfig::default())
    }

    #[test]
    fn test_look_ahead_with_profile() {
        let p = predictor();
        // 0.5 s × 0.1 = 0.05
        assert!((p.look_ahead_time(0.0, Some(0.5)) - 0.05).abs() < 1e-12);
        // 10 s × 0.1 = 1.0 → max 0.08
        assert_eq!(p.look_ahead_time(0.0, Some(10.0)), 0.08);
        // 0.01 s × 0.1 = 0.001 → min 0.002
        assert_eq!(p.look_ahead_time(0.0, Some(0.01)), 0.002);
    }

    #[test]
    fn test_look_ahead_scales_with_velocity() {
        let p = predictor();
        let at_rest = p.look_ahead_time(0.0, None);
        let moving = p.look_ahead_time(500.0, None);
        assert!((at_rest - 0.01).abs() < 1e-12);
        assert!((moving - 0.01 * (1.0 + 0.0005)).abs() < 1e-12);
        assert_eq!(p.look_ahead_time(-500.0, None), moving);
    }

    #[test]
    fn test_first_cycle_passes_measurements_through() {
        let mut p = predictor();
        let out = p.update(&PredictorInput {
            slider: Some(100.0),
            pan: Some(10.0),
            tilt: Some(-5.0),
            ..Default::default()
        });
        // 刚播种的估计器速度为 0，外推不改变位置，残差为 0
        assert!((out.slider_position - 100.0).abs() < 1e-9);
        assert!((out.pan_angle - 10.0).abs() < 1e-9);
        assert!((out.tilt_angle + 5.0).abs() < 1e-9);
        assert_eq!(out.focus_steps, None);
    }

    #[test]
    fn test_focus_tracking_aims_at_point() {
        let mut p = predictor();
        let point = FocusPoint::at(-260.0, 600.0, -295.0);
        p.set_focus_point(Some(point));
        p.enable_focus_tracking(true);
        assert!(p.is_focus_tracking());

        let out = p.update(&PredictorInput {
            slider: Some(100.0),
            pan: Some(0.0),
            tilt: Some(0.0),
            ..Default::default()
        });
        // 目标在正前方：pan/tilt 目标都是 0
        assert!(out.pan_angle.abs() < 1e-6);
        assert!(out.tilt_angle.abs() < 1e-6);
        // 距离 500 mm
        let expected = FocusRange::new(&RigConfig::default().focus, 0, 4096).steps_for_distance(500.0);
        assert_eq!(out.focus_steps, Some(expected));
    }

    #[test]
    fn test_tracking_requires_point() {
        let mut p = predictor();
        p.enable_focus_tracking(true);
        assert!(!p.is_focus_tracking());
        let out = p.update(&PredictorInput {
            slider: Some(0.0),
            pan: Some(20.0),
            tilt: Some(0.0),
            ..Default::default()
        });
        assert!((out.pan_angle - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_disabling_tracking_resets_estimators() {
        let mut p = predictor();
        p.update(&PredictorInput {
            slider: Some(50.0),
            pan: Some(1.0),
            tilt: Some(2.0),
            ..Default::default()
        });
        assert!(p.estimate(AxisName::Slider).is_some());

        p.enable_focus_tracking(false);
        assert!(p.estimate(AxisName::Slider).is_none());
        assert!(p.estimate(AxisName::Pan).is_none());
        assert!(p.estimate(AxisName::Tilt).is_none());
        assert_eq!(p.estimate(AxisName::Zoom), None);
    }

    #[test]
    fn test_absent_slave_keeps_estimate() {
        let mut p = predictor();
        p.update(&PredictorInput {
            slider: Some(0.0),
            pan: Some(30.0),
            tilt: Some(10.0),
            ..Default::default()
        });
        let out = p.update(&PredictorInput {
            slider: Some(0.0),
            pan: None,
            tilt: Some(10.0),
            ..Default::default()
        });
        assert!((out.pan_angle - 30.0).abs() < 1.0);
        assert!(p.estimate(AxisName::Pan).is_some());
    }

    #[test]
    fn test_unstable_slave_falls_back_to_measurement() {
        let mut p = predictor();
        p.update(&PredictorInput {
            slider: Some(0.0),
            pan: Some(30.0),
            tilt: Some(10.0),
            ..Default::default()
        });
        let out = p.update(&PredictorInput {
            slider: Some(0.0),
            pan: Some(31.0),
            tilt: Some(10.0),
            pan_velocity: Some(f64::NAN),
            ..Default::default()
        });
        assert_eq!(out.pan_angle, 31.0);
        assert_eq!(out.pan_velocity, 0.0);
        assert!(p.estimate(AxisName::Pan).is_none());
    }

    #[test]
    fn test_outputs_are_normalized_and_clamped() {
        let mut p = predictor();
        for i in 0..50 {
            let pan = 170.0 + i as f64 * 4.0;
            let out = p.update(&PredictorInput {
                slider: Some(0.0),
                pan: Some(pan),
                tilt: Some(0.0),
                pan_velocity: Some(5_000.0),
                ..Default::default()
            });
            assert!(out.pan_angle > -180.0 && out.pan_angle <= 180.0);
            assert!(out.pan_velocity.abs() <= 180.0);
        }
    }
}
