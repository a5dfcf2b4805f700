//! 会话请求、句柄与结果

use crate::ControlError;
use camrig_driver::AxisDirectory;
use camrig_motion::Waypoint;
use camrig_protocol::AxisName;
use camrig_tools::{FocusPoint, FocusPointStore, Profile, RigConfig};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// 启动会话的请求
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub waypoints: Vec<Waypoint>,
    pub duration: Duration,
    /// 设置后会话开始时复制该点并打开对焦跟踪
    pub focus_point: Option<FocusPoint>,
}

impl SessionRequest {
    pub fn new(waypoints: Vec<Waypoint>, duration: Duration) -> Self {
        Self {
            waypoints,
            duration,
            focus_point: None,
        }
    }

    pub fn with_focus_point(mut self, point: FocusPoint) -> Self {
        self.focus_point = Some(point);
        self
    }

    /// 从存储中复制对焦点
    pub fn with_stored_focus(
        mut self,
        store: &dyn FocusPointStore,
        id: u32,
    ) -> Result<Self, ControlError> {
        let point = store.get_point(id).ok_or(ControlError::UnknownFocusPoint(id))?;
        self.focus_point = Some(point);
        Ok(self)
    }

    /// 轨迹文件 → 请求
    ///
    /// 时长为各段时长之和；路点引用的第一个对焦点从 `store` 中复制。
    pub fn from_profile(
        profile: &Profile,
        store: Option<&dyn FocusPointStore>,
    ) -> Result<Self, ControlError> {
        let waypoints = profile.points.iter().map(Waypoint::from).collect();
        let duration = profile
            .total_duration()
            .ok_or_else(|| ControlError::invalid("profile duration overflows"))?;
        let request = Self::new(waypoints, duration);
        match (profile.first_focus_point_id(), store) {
            (Some(id), Some(store)) => request.with_stored_focus(store, id),
            (Some(id), None) => Err(ControlError::UnknownFocusPoint(id)),
            (None, _) => Ok(request),
        }
    }
}

/// 会话句柄，只用于停止或等待对应的会话
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub(crate) id: u64,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// 会话周期统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// 成功完成的周期数
    pub ticks: u64,
    /// 总线通信失败的周期数
    pub failed_ticks: u64,
    /// 部分轴无应答的周期数
    pub partial_ticks: u64,
    /// 超出周期预算的次数
    pub overruns: u64,
}

/// 会话结束方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed(SessionStats),
    Stopped(SessionStats),
    /// 连续通信失败达到上限；力矩保持原状
    Failed { reason: String, stats: SessionStats },
}

impl SessionOutcome {
    pub fn stats(&self) -> &SessionStats {
        match self {
            SessionOutcome::Completed(stats) | SessionOutcome::Stopped(stats) => stats,
            SessionOutcome::Failed { stats, .. } => stats,
        }
    }

    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Completed(_) => SessionState::Completed,
            SessionOutcome::Stopped(_) => SessionState::Stopped,
            SessionOutcome::Failed { .. } => SessionState::Failed,
        }
    }
}

/// 控制器的会话状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

/// 轨迹到达路点时发给相机侧的通知
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureEvent {
    pub session: u64,
    pub waypoint_index: usize,
    pub sample_index: usize,
    pub time_offset: Duration,
    /// 该采样的计划位置（物理单位）
    pub positions: BTreeMap<AxisName, f64>,
}

/// 校验请求，返回可执行的路点
///
/// 速度或加速度提示超出轴限制的路点被跳过；位置超出行程的由控制循环限幅。
pub(crate) fn validate_request(
    request: &SessionRequest,
    directory: &AxisDirectory,
    config: &RigConfig,
) -> Result<Vec<Waypoint>, ControlError> {
    if request.waypoints.is_empty() {
        return Err(ControlError::invalid("no waypoints"));
    }
    if request.duration.is_zero() {
        return Err(ControlError::invalid("duration must be positive"));
    }
    let max_secs = config.motion_loop.max_session_secs;
    if request.duration.as_secs_f64() > max_secs {
        return Err(ControlError::invalid(format!(
            "duration {:?} exceeds the {max_secs} s session limit",
            request.duration
        )));
    }
    if let Some(point) = &request.focus_point
        && !point.is_finite()
    {
        return Err(ControlError::invalid("focus point has non-finite coordinates"));
    }

    let mut accepted = Vec::with_capacity(request.waypoints.len());
    for (index, waypoint) in request.waypoints.iter().enumerate() {
        if waypoint.targets.is_empty() {
            return Err(ControlError::invalid(format!("waypoint {index} has no targets")));
        }
        for (&axis, &target) in &waypoint.targets {
            if !directory.contains(axis) {
                return Err(ControlError::invalid(format!(
                    "waypoint {index} targets unconfigured axis {axis}"
                )));
            }
            if !target.is_finite() {
                return Err(ControlError::invalid(format!(
                    "waypoint {index} has non-finite target for {axis}"
                )));
            }
        }

        match hint_violation(waypoint, directory, config) {
            Some(reason) => warn!("Skipping waypoint {}: {}", index, reason),
            None => accepted.push(waypoint.clone()),
        }
    }

    if accepted.is_empty() {
        return Err(ControlError::invalid("all waypoints exceed axis limits"));
    }
    Ok(accepted)
}

fn hint_violation(waypoint: &Waypoint, directory: &AxisDirectory, config: &RigConfig) -> Option<String> {
    for &axis in waypoint.targets.keys() {
        if let (Some(velocity), Some(limits)) = (waypoint.velocity_hint, directory.limits(axis)) {
            let steps = limits.velocity_to_steps(velocity).abs();
            if !steps.is_finite() || steps > limits.max_velocity_steps as f64 {
                return Some(format!(
                    "velocity hint {velocity} exceeds {axis} limit of {} steps/s",
                    limits.max_velocity_steps
                ));
            }
        }
        if let Some(acceleration) = waypoint.acceleration_hint {
            let limit = config.axes.get(&axis).and_then(|a| a.max_acceleration);
            if !acceleration.is_finite() || limit.is_some_and(|max| acceleration.abs() > max) {
                return Some(format!("acceleration hint {acceleration} exceeds {axis} limit"));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use camrig_tools::{InMemoryFocusPointStore, ProfilePoint};

    fn directory(config: &RigConfig) -> AxisDirectory {
        AxisDirectory::from_config(config).unwrap()
    }

    fn slider(value: f64) -> Waypoint {
        Waypoint::new().with(AxisName::Slider, value)
    }

    #[test]
    fn test_rejects_empty_and_zero_duration() {
        let config = RigConfig::default();
        let dir = directory(&config);

        let empty = SessionRequest::new(vec![], Duration::from_secs(1));
        assert!(matches!(
            validate_request(&empty, &dir, &config),
            Err(ControlError::InvalidRequest(_))
        ));

        let zero = SessionRequest::new(vec![slider(0.0)], Duration::ZERO);
        assert!(validate_request(&zero, &dir, &config).is_err());
    }

    #[test]
    fn test_rejects_non_finite_focus_point() {
        let config = RigConfig::default();
        let request = SessionRequest::new(vec![slider(0.0)], Duration::from_secs(1))
            .with_focus_point(FocusPoint::at(0.0, f64::NAN, 0.0));
        assert!(validate_request(&request, &directory(&config), &config).is_err());
    }

    #[test]
    fn test_rejects_unconfigured_axis() {
        let mut config = RigConfig::default();
        config.axes.remove(&AxisName::Zoom);
        let request = SessionRequest::new(
            vec![Waypoint::new().with(AxisName::Zoom, 10.0)],
            Duration::from_secs(1),
        );
        let err = validate_request(&request, &directory(&config), &config).unwrap_err();
        assert!(err.to_string().contains("zoom"));
    }

    #[test]
    fn test_skips_waypoints_over_limits() {
        let config = RigConfig::default();
        // 滑轨 2000 步/秒 × 0.015625 mm/步 = 31.25 mm/s
        let request = SessionRequest::new(
            vec![
                slider(0.0),
                slider(50.0).velocity_hint(100.0),
                slider(80.0).acceleration_hint(5_000.0),
                slider(100.0).velocity_hint(20.0),
            ],
            Duration::from_secs(4),
        );
        let accepted = validate_request(&request, &directory(&config), &config).unwrap();
        assert_eq!(accepted, vec![slider(0.0), slider(100.0).velocity_hint(20.0)]);
    }

    #[test]
    fn test_rejects_duration_over_session_limit() {
        let mut config = RigConfig::default();
        config.motion_loop.max_session_secs = 60.0;
        let dir = directory(&config);

        let request = SessionRequest::new(vec![slider(0.0), slider(10.0)], Duration::from_secs(61));
        assert!(matches!(
            validate_request(&request, &dir, &config),
            Err(ControlError::InvalidRequest(reason)) if reason.contains("session limit")
        ));

        let request = SessionRequest::new(vec![slider(0.0), slider(10.0)], Duration::MAX);
        assert!(validate_request(&request, &dir, &config).is_err());

        let request = SessionRequest::new(vec![slider(0.0), slider(10.0)], Duration::from_secs(60));
        assert!(validate_request(&request, &dir, &config).is_ok());
    }

    #[test]
    fn test_from_profile_rejects_overflowing_duration() {
        let point = |value: f64| ProfilePoint {
            positions: BTreeMap::from([(AxisName::Slider, value)]),
            velocity: None,
            acceleration: None,
            duration_ms: Some(u64::MAX),
            focus_point_id: None,
        };
        let profile = Profile {
            name: "forever".to_string(),
            description: None,
            points: vec![point(0.0), point(1.0), point(2.0)],
        };
        assert!(matches!(
            SessionRequest::from_profile(&profile, None),
            Err(ControlError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_all_waypoints_over_limits() {
        let config = RigConfig::default();
        let request = SessionRequest::new(
            vec![slider(0.0).velocity_hint(1_000.0)],
            Duration::from_secs(1),
        );
        assert!(matches!(
            validate_request(&request, &directory(&config), &config),
            Err(ControlError::InvalidRequest(reason)) if reason.contains("all waypoints")
        ));
    }

    #[test]
    fn test_from_profile_copies_focus_point() {
        let profile = Profile::from_json_str(
            r#"{
                "name": "orbit",
                "points": [
                    {"positions": {"slider": 0.0}, "focus_point_id": 1},
                    {"positions": {"slider": 300.0}, "duration_ms": 1500}
                ]
            }"#,
        )
        .unwrap();
        let store: InMemoryFocusPointStore = [FocusPoint {
            id: Some(1),
            ..FocusPoint::at(-400.0, 600.0, -300.0)
        }]
        .into_iter()
        .collect();

        let request = SessionRequest::from_profile(&profile, Some(&store)).unwrap();
        assert_eq!(request.waypoints.len(), 2);
        assert_eq!(request.duration, Duration::from_millis(1500));
        assert_eq!(request.focus_point.as_ref().map(|p| p.x), Some(-400.0));

        // 会话持有的是副本
        store.remove(1);
        assert!(request.focus_point.is_some());

        assert!(matches!(
            SessionRequest::from_profile(&profile, Some(&store)),
            Err(ControlError::UnknownFocusPoint(1))
        ));
    }
}
