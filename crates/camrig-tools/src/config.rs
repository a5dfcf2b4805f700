//! # 云台配置
//!
//! 轴地址、行程限制、相机几何、滤波与预测参数，启动时从 TOML 加载一次。
//!
//! ```toml
//! [bus]
//! port = "/dev/ttyUSB0"
//! baud_rate = 2000000
//!
//! [axes.slider]
//! id = 2
//! min_steps = 0
//! max_steps = 89600
//! max_velocity_steps = 2000
//! unit_per_step = 0.015625
//! ```
//!
//! 未在文件中出现的段落使用默认值。

use crate::ConfigError;
use camrig_protocol::{AxisId, AxisName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// 舵机一圈的步数
pub const STEPS_PER_REVOLUTION: f64 = 4096.0;

/// 角度轴每步对应的角度
pub const DEGREES_PER_STEP: f64 = 360.0 / STEPS_PER_REVOLUTION;

/// 滑轨每步对应的毫米数
pub const SLIDER_MM_PER_STEP: f64 = 64.0 / STEPS_PER_REVOLUTION;

/// 未标定时 pan/tilt 使用的临时偏移（度）
pub const PROVISIONAL_ANGULAR_OFFSET: f64 = 180.0;

/// 未标定时使用的电流换算系数（mA/单位）
pub const PROVISIONAL_CURRENT_MA_PER_UNIT: f64 = 2.69;

/// 默认的建议电流上限（mA）
pub const DEFAULT_CURRENT_LIMIT_MA: f64 = 400.0;

/// 云台完整配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub bus: BusSettings,
    pub axes: BTreeMap<AxisName, AxisSettings>,
    pub geometry: GeometrySettings,
    pub focus: FocusSettings,
    pub kalman: KalmanSettings,
    pub prediction: PredictionSettings,
    pub motion_loop: LoopSettings,
    pub calibration: CalibrationSettings,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            bus: BusSettings::default(),
            axes: AxisName::ALL
                .into_iter()
                .map(|axis| (axis, AxisSettings::default_for(axis)))
                .collect(),
            geometry: GeometrySettings::default(),
            focus: FocusSettings::default(),
            kalman: KalmanSettings::default(),
            prediction: PredictionSettings::default(),
            motion_loop: LoopSettings::default(),
            calibration: CalibrationSettings::default(),
        }
    }
}

impl RigConfig {
    /// 从文件加载并校验配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// 从 TOML 文本解析并校验配置
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RigConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn axis(&self, axis: AxisName) -> Result<&AxisSettings, ConfigError> {
        self.axes.get(&axis).ok_or(ConfigError::MissingAxis(axis))
    }

    /// 轴的零点偏移（物理单位），pan/tilt 未标定时取临时值
    pub fn resolved_offset(&self, axis: AxisName) -> f64 {
        match self.axes.get(&axis).and_then(|a| a.offset) {
            Some(offset) => offset,
            None if matches!(axis, AxisName::Pan | AxisName::Tilt) => PROVISIONAL_ANGULAR_OFFSET,
            None => 0.0,
        }
    }

    pub fn current_ma_per_unit(&self) -> f64 {
        self.calibration
            .current_ma_per_unit
            .unwrap_or(PROVISIONAL_CURRENT_MA_PER_UNIT)
    }

    /// 仍在使用临时值、需要上机标定的字段
    pub fn uncalibrated(&self) -> Vec<String> {
        let mut fields = Vec::new();
        for axis in [AxisName::Pan, AxisName::Tilt] {
            if let Some(settings) = self.axes.get(&axis)
                && settings.offset.is_none()
            {
                fields.push(format!("axes.{axis}.offset"));
            }
        }
        if self.calibration.current_ma_per_unit.is_none() {
            fields.push("calibration.current_ma_per_unit".to_string());
        }
        fields
    }

    /// 语义校验：地址唯一、行程合法、参数为正
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.axes.is_empty() {
            return Err(ConfigError::invalid("axes", "at least one axis is required"));
        }

        let mut seen: BTreeMap<u8, AxisName> = BTreeMap::new();
        for (&axis, settings) in &self.axes {
            AxisId::new(settings.id)
                .map_err(|e| ConfigError::invalid(format!("axes.{axis}.id"), e.to_string()))?;
            if let Some(&first) = seen.get(&settings.id) {
                return Err(ConfigError::DuplicateAxisId {
                    id: settings.id,
                    first,
                    second: axis,
                });
            }
            seen.insert(settings.id, axis);
            settings.validate(axis)?;
        }

        if self.bus.baud_rate == 0 {
            return Err(ConfigError::invalid("bus.baud_rate", "must be positive"));
        }

        require_positive("focus.min_distance_mm", self.focus.min_distance_mm)?;
        if self.focus.max_distance_mm <= self.focus.min_distance_mm {
            return Err(ConfigError::invalid(
                "focus.max_distance_mm",
                "must be greater than min_distance_mm",
            ));
        }

        self.kalman.validate()?;
        self.prediction.validate()?;
        self.motion_loop.validate()?;

        if let Some(scale) = self.calibration.current_ma_per_unit {
            require_positive("calibration.current_ma_per_unit", scale)?;
        }
        Ok(())
    }
}

fn require_positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be positive, got {value}")))
    }
}

fn require_non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be non-negative, got {value}")))
    }
}

/// 串口设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub port: String,
    pub baud_rate: u32,
    /// 单次事务等待应答的时间（毫秒）
    pub receive_timeout_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 2_000_000,
            receive_timeout_ms: 20,
        }
    }
}

/// 单轴设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSettings {
    /// 总线地址
    pub id: u8,
    pub min_steps: i32,
    pub max_steps: i32,
    /// 最大 profile velocity（舵机单位）
    pub max_velocity_steps: i32,
    /// 每步对应的物理单位（度或毫米）
    pub unit_per_step: f64,
    /// 零点偏移（物理单位）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    /// 建议电流上限（mA），仅用于告警
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_limit_ma: Option<f64>,
    /// 路点加速度提示的上限（物理单位/秒²），未设置则不检查
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_acceleration: Option<f64>,
}

impl AxisSettings {
    /// 出厂默认值
    pub fn default_for(axis: AxisName) -> Self {
        let (min_steps, max_steps) = match axis {
            AxisName::Slider => (0, 89_600),
            AxisName::Pan => (760, 3_900),
            AxisName::Tilt => (1_360, 2_800),
            AxisName::Turntable | AxisName::Zoom | AxisName::Focus => (0, 4_096),
        };
        let max_velocity_steps = match axis {
            AxisName::Slider => 2_000,
            _ => 1_800,
        };
        let unit_per_step = match axis {
            AxisName::Slider => SLIDER_MM_PER_STEP,
            _ => DEGREES_PER_STEP,
        };
        let max_acceleration = match axis {
            AxisName::Pan | AxisName::Tilt => 2_000.0,
            _ => 1_800.0,
        };
        Self {
            id: axis.default_id().raw(),
            min_steps,
            max_steps,
            max_velocity_steps,
            unit_per_step,
            offset: None,
            current_limit_ma: Some(DEFAULT_CURRENT_LIMIT_MA),
            max_acceleration: Some(max_acceleration),
        }
    }

    fn validate(&self, axis: AxisName) -> Result<(), ConfigError> {
        if self.min_steps > self.max_steps {
            return Err(ConfigError::invalid(
                format!("axes.{axis}.min_steps"),
                format!("{} exceeds max_steps {}", self.min_steps, self.max_steps),
            ));
        }
        if self.max_velocity_steps <= 0 {
            return Err(ConfigError::invalid(
                format!("axes.{axis}.max_velocity_steps"),
                "must be positive",
            ));
        }
        require_positive(&format!("axes.{axis}.unit_per_step"), self.unit_per_step)?;
        if let Some(offset) = self.offset
            && !offset.is_finite()
        {
            return Err(ConfigError::invalid(format!("axes.{axis}.offset"), "must be finite"));
        }
        if let Some(limit) = self.current_limit_ma {
            require_positive(&format!("axes.{axis}.current_limit_ma"), limit)?;
        }
        if let Some(limit) = self.max_acceleration {
            require_positive(&format!("axes.{axis}.max_acceleration"), limit)?;
        }
        Ok(())
    }
}

/// 相机几何：转台（相机）中心的固定坐标，滑轨沿 y 轴
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometrySettings {
    pub camera_x_mm: f64,
    pub camera_z_mm: f64,
}

impl Default for GeometrySettings {
    fn default() -> Self {
        Self {
            camera_x_mm: -260.0,
            camera_z_mm: -295.0,
        }
    }
}

/// 对焦距离范围（毫米），线性映射到对焦轴行程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusSettings {
    pub min_distance_mm: f64,
    pub max_distance_mm: f64,
}

impl Default for FocusSettings {
    fn default() -> Self {
        Self {
            min_distance_mm: 100.0,
            max_distance_mm: 2000.0,
        }
    }
}

/// 卡尔曼滤波参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanSettings {
    /// 默认时间步长（秒）
    pub update_rate: f64,
    pub process_noise_position: f64,
    pub process_noise_velocity: f64,
    pub process_noise_acceleration: f64,
    pub measurement_noise: f64,
    pub initial_covariance: f64,
    /// 速度观测噪声 = 位置观测噪声 × 该系数
    pub velocity_noise_factor: f64,
}

impl Default for KalmanSettings {
    fn default() -> Self {
        Self {
            update_rate: 0.01,
            process_noise_position: 0.005,
            process_noise_velocity: 0.08,
            process_noise_acceleration: 0.05,
            measurement_noise: 0.7,
            initial_covariance: 80.0,
            velocity_noise_factor: 10.0,
        }
    }
}

impl KalmanSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("kalman.update_rate", self.update_rate)?;
        require_non_negative("kalman.process_noise_position", self.process_noise_position)?;
        require_non_negative("kalman.process_noise_velocity", self.process_noise_velocity)?;
        require_non_negative(
            "kalman.process_noise_acceleration",
            self.process_noise_acceleration,
        )?;
        require_positive("kalman.measurement_noise", self.measurement_noise)?;
        require_positive("kalman.initial_covariance", self.initial_covariance)?;
        require_positive("kalman.velocity_noise_factor", self.velocity_noise_factor)
    }
}

/// 运动预测参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionSettings {
    /// 基础前瞻时间（秒）
    pub time: f64,
    pub min_time: f64,
    pub max_time: f64,
    /// 前瞻时间随主轴速度增长的比例
    pub velocity_scale: f64,
    /// 有固定时长轨迹时，前瞻时间 = 时长 × 该比例
    pub profile_fraction: f64,
    /// 未跟踪时，测量残差回灌到预测值的比例
    pub feedback_gain: f64,
    /// 滑轨速度上限（mm/s）
    pub slider_max_velocity: f64,
    /// pan 角速度上限（°/s）
    pub pan_max_velocity: f64,
    /// tilt 角速度上限（°/s）
    pub tilt_max_velocity: f64,
    pub pan_enabled: bool,
    pub tilt_enabled: bool,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            time: 0.01,
            min_time: 0.002,
            max_time: 0.08,
            velocity_scale: 0.0005,
            profile_fraction: 0.1,
            feedback_gain: 0.5,
            slider_max_velocity: 500.0,
            pan_max_velocity: 180.0,
            tilt_max_velocity: 180.0,
            pan_enabled: true,
            tilt_enabled: true,
        }
    }
}

impl PredictionSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("prediction.time", self.time)?;
        require_positive("prediction.min_time", self.min_time)?;
        if self.max_time < self.min_time {
            return Err(ConfigError::invalid(
                "prediction.max_time",
                "must not be less than min_time",
            ));
        }
        require_non_negative("prediction.velocity_scale", self.velocity_scale)?;
        require_positive("prediction.profile_fraction", self.profile_fraction)?;
        if !(0.0..=1.0).contains(&self.feedback_gain) {
            return Err(ConfigError::invalid(
                "prediction.feedback_gain",
                "must be within [0, 1]",
            ));
        }
        require_positive("prediction.slider_max_velocity", self.slider_max_velocity)?;
        require_positive("prediction.pan_max_velocity", self.pan_max_velocity)?;
        require_positive("prediction.tilt_max_velocity", self.tilt_max_velocity)
    }
}

/// 控制循环参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    pub frequency_hz: f64,
    /// 连续通信失败多少个周期后终止会话
    pub max_consecutive_failures: u32,
    /// 是否提升控制线程优先级（需要 `realtime` feature）
    pub realtime_priority: bool,
    /// 单个会话的最长时长（秒）
    pub max_session_secs: f64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            frequency_hz: 100.0,
            max_consecutive_failures: 3,
            realtime_priority: false,
            max_session_secs: 3600.0,
        }
    }
}

impl LoopSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.frequency_hz.is_finite() && self.frequency_hz > 0.0 && self.frequency_hz <= 1000.0)
        {
            return Err(ConfigError::invalid(
                "motion_loop.frequency_hz",
                format!("must be within (0, 1000], got {}", self.frequency_hz),
            ));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::invalid(
                "motion_loop.max_consecutive_failures",
                "must be at least 1",
            ));
        }
        require_positive("motion_loop.max_session_secs", self.max_session_secs)?;
        Ok(())
    }
}

/// 需要上机标定的常数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// 电流寄存器换算系数（mA/单位）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_ma_per_unit: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = RigConfig::default();
        config.validate().unwrap();
        assert_eq!(config.axes.len(), 6);
        assert_eq!(config.axis(AxisName::Slider).unwrap().max_steps, 89_600);
        assert_eq!(config.axis(AxisName::Slider).unwrap().max_velocity_steps, 2_000);
        assert_eq!(config.axis(AxisName::Pan).unwrap().min_steps, 760);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = RigConfig::from_toml_str(
            r#"
            [bus]
            port = "/dev/ttyACM0"

            [axes.slider]
            id = 2
            min_steps = 0
            max_steps = 1000
            max_velocity_steps = 500
            unit_per_step = 0.5

            [axes.pan]
            id = 3
            min_steps = 0
            max_steps = 4095
            max_velocity_steps = 1800
            unit_per_step = 0.087890625
            offset = 0.0
            "#,
        )
        .unwrap();

        assert_eq!(config.bus.port, "/dev/ttyACM0");
        assert_eq!(config.bus.baud_rate, 2_000_000);
        assert_eq!(config.axes.len(), 2);
        assert_eq!(config.kalman, KalmanSettings::default());
        assert_eq!(config.resolved_offset(AxisName::Pan), 0.0);
        assert_eq!(
            config.uncalibrated(),
            vec!["calibration.current_ma_per_unit".to_string()]
        );
    }

    #[test]
    fn test_uncalibrated_defaults_are_reported() {
        let config = RigConfig::default();
        assert_eq!(config.resolved_offset(AxisName::Tilt), PROVISIONAL_ANGULAR_OFFSET);
        assert_eq!(config.resolved_offset(AxisName::Slider), 0.0);
        assert_eq!(config.current_ma_per_unit(), PROVISIONAL_CURRENT_MA_PER_UNIT);
        assert_eq!(config.uncalibrated().len(), 3);
    }

    #[test]
    fn test_duplicate_axis_id_rejected() {
        let mut config = RigConfig::default();
        config.axes.get_mut(&AxisName::Zoom).unwrap().id = 3;
        match config.validate() {
            Err(ConfigError::DuplicateAxisId { id, first, second }) => {
                assert_eq!(id, 3);
                assert_eq!(first, AxisName::Pan);
                assert_eq!(second, AxisName::Zoom);
            },
            other => panic!("Expected DuplicateAxisId, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let mut config = RigConfig::default();
        config.axes.get_mut(&AxisName::Tilt).unwrap().min_steps = 5000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = RigConfig::default();
        config.axes.get_mut(&AxisName::Slider).unwrap().unit_per_step = 0.0;
        assert!(config.validate().is_err());

        let mut config = RigConfig::default();
        config.prediction.max_time = 0.001;
        assert!(config.validate().is_err());

        let mut config = RigConfig::default();
        config.motion_loop.max_consecutive_failures = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_axis_name_rejected() {
        let result = RigConfig::from_toml_str(
            r#"
            [axes.gimbal]
            id = 9
            min_steps = 0
            max_steps = 10
            max_velocity_steps = 10
            unit_per_step = 1.0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let mut config = RigConfig::default();
        config.calibration.current_ma_per_unit = Some(2.69);
        config.axes.get_mut(&AxisName::Pan).unwrap().offset = Some(180.0);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes())
            .unwrap();

        let loaded = RigConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
