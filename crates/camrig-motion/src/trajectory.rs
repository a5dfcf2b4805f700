//! Trajectory Smoother - 路点轨迹平滑
//!
//! 把一串路点变成按固定周期采样的密集轨迹。
//!
//! # 算法
//!
//! 每个轴独立构造自然三次样条，节点均匀分布在 `u_i = i / (n - 1)`。
//! 采样时刻 `t` 在 `[0, T]` 上均匀分布（含两端），经缓入缓出映射到样条参数：
//!
//! ```text
//! s(t) = (1 - cos(π·t/T)) / 2
//! ```
//!
//! 速度为相邻采样的后向差分 `(p_k - p_{k-1}) / tick`，首个采样速度为 0。
//!
//! # 缺失的轴
//!
//! 某个路点没有给出某轴目标时沿用上一个值；
//! 从中途才出现的轴，之前的路点用它的第一个值回填。

use crate::TrajectoryError;
use camrig_protocol::AxisName;
use camrig_tools::ProfilePoint;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::time::Duration;

/// 判断采样是否到达节点时的容差
const KNOT_EPSILON: f64 = 1e-9;

/// 路点：部分轴的目标值（度或毫米），入队后不再修改
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Waypoint {
    pub targets: BTreeMap<AxisName, f64>,
    /// 速度提示（物理单位/秒）
    pub velocity_hint: Option<f64>,
    /// 加速度提示（物理单位/秒²）
    pub acceleration_hint: Option<f64>,
}

impl Waypoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式设置单轴目标
    pub fn with(mut self, axis: AxisName, target: f64) -> Self {
        self.targets.insert(axis, target);
        self
    }

    pub fn velocity_hint(mut self, velocity: f64) -> Self {
        self.velocity_hint = Some(velocity);
        self
    }

    pub fn acceleration_hint(mut self, acceleration: f64) -> Self {
        self.acceleration_hint = Some(acceleration);
        self
    }
}

impl From<&ProfilePoint> for Waypoint {
    fn from(point: &ProfilePoint) -> Self {
        Self {
            targets: point.positions.clone(),
            velocity_hint: point.velocity,
            acceleration_hint: point.acceleration,
        }
    }
}

/// 轨迹采样点
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectorySample {
    pub index: usize,
    /// 距轨迹起点的时间
    pub time_offset: Duration,
    pub positions: BTreeMap<AxisName, f64>,
    /// 后向差分速度（物理单位/秒）
    pub velocities: BTreeMap<AxisName, f64>,
    /// 第一个到达该路点节点的采样带有路点序号
    ///
    /// 采样过稀导致多个节点落在同一采样时，记录最后一个。
    pub waypoint_index: Option<usize>,
}

/// 给定时长与控制频率所需的采样数，至少 2 个
pub fn step_count_for(duration: Duration, tick_hz: f64) -> usize {
    let steps = (duration.as_secs_f64() * tick_hz).ceil();
    if steps.is_finite() && steps > 2.0 {
        steps as usize
    } else {
        2
    }
}

/// 缓入缓出进度，`t ∈ [0, total]` 映射到 `[0, 1]`
fn ease_in_out(t: f64, total: f64) -> f64 {
    (1.0 - (PI * t / total).cos()) / 2.0
}

/// 均匀节点上的自然三次样条（端点二阶导为 0）
#[derive(Debug, Clone)]
struct NaturalSpline {
    values: Vec<f64>,
    /// 各节点处的二阶导数
    second: Vec<f64>,
    h: f64,
}

impl NaturalSpline {
    fn new(values: Vec<f64>) -> Self {
        let n = values.len();
        if n < 3 {
            let h = if n == 2 { 1.0 } else { 0.0 };
            return Self {
                second: vec![0.0; n],
                values,
                h,
            };
        }

        let h = 1.0 / (n - 1) as f64;
        let m = n - 2;

        // 内部节点的三对角方程组：M[i-1] + 4·M[i] + M[i+1] = 6/h²·(y[i+1] - 2y[i] + y[i-1])
        // Thomas 算法，下/上对角线均为 1
        let mut c_prime = vec![0.0; m];
        let mut d_prime = vec![0.0; m];
        for i in 0..m {
            let k = i + 1;
            let d = 6.0 / (h * h) * (values[k + 1] - 2.0 * values[k] + values[k - 1]);
            if i == 0 {
                c_prime[i] = 1.0 / 4.0;
                d_prime[i] = d / 4.0;
            } else {
                let denom = 4.0 - c_prime[i - 1];
                c_prime[i] = 1.0 / denom;
                d_prime[i] = (d - d_prime[i - 1]) / denom;
            }
        }

        let mut second = vec![0.0; n];
        for i in (0..m).rev() {
            second[i + 1] = d_prime[i] - c_prime[i] * second[i + 2];
        }

        Self { values, second, h }
    }

    /// 在 `u ∈ [0, 1]` 处求值
    fn position(&self, u: f64) -> f64 {
        let n = self.values.len();
        match n {
            0 => 0.0,
            1 => self.values[0],
            _ => {
                let u = u.clamp(0.0, 1.0);
                let h = self.h;
                let k = ((u / h).floor() as usize).min(n - 2);
                let x0 = k as f64 * h;
                let x1 = x0 + h;
                let (y0, y1) = (self.values[k], self.values[k + 1]);
                let (m0, m1) = (self.second[k], self.second[k + 1]);

                let a = x1 - u;
                let b = u - x0;
                m0 * a.powi(3) / (6.0 * h)
                    + m1 * b.powi(3) / (6.0 * h)
                    + (y0 / h - m0 * h / 6.0) * a
                    + (y1 / h - m1 * h / 6.0) * b
            },
        }
    }
}

/// 生成缓入缓出、逐轴样条插值的采样轨迹
///
/// `step_count` 为采样总数（含起止两点），时间间隔为 `T / (step_count - 1)`。
pub fn smooth(
    waypoints: &[Waypoint],
    total_duration: Duration,
    step_count: usize,
) -> Result<Vec<TrajectorySample>, TrajectoryError> {
    if waypoints.is_empty() {
        return Err(TrajectoryError::NoWaypoints);
    }
    for (index, waypoint) in waypoints.iter().enumerate() {
        if waypoint.targets.is_empty() {
            return Err(TrajectoryError::EmptyWaypoint(index));
        }
        if let Some((&axis, _)) = waypoint.targets.iter().find(|(_, v)| !v.is_finite()) {
            return Err(TrajectoryError::NonFiniteTarget { index, axis });
        }
    }
    let total = total_duration.as_secs_f64();
    if total <= 0.0 {
        return Err(TrajectoryError::InvalidDuration(total));
    }
    if step_count < 2 {
        return Err(TrajectoryError::TooFewSteps(step_count));
    }

    let mut axes: SmallVec<[AxisName; 6]> = SmallVec::new();
    for waypoint in waypoints {
        for axis in waypoint.targets.keys() {
            if !axes.contains(axis) {
                axes.push(*axis);
            }
        }
    }

    let splines: SmallVec<[(AxisName, NaturalSpline); 6]> = axes
        .iter()
        .map(|&axis| (axis, NaturalSpline::new(filled_values(waypoints, axis))))
        .collect();

    let n = waypoints.len();
    let knots: Vec<f64> = (0..n)
        .map(|i| if n == 1 { 0.0 } else { i as f64 / (n - 1) as f64 })
        .collect();

    let tick = total / (step_count - 1) as f64;
    let mut next_knot = 0;
    let mut samples: Vec<TrajectorySample> = Vec::with_capacity(step_count);

    for index in 0..step_count {
        let t = if index + 1 == step_count {
            total
        } else {
            tick * index as f64
        };
        let s = ease_in_out(t, total);

        let positions: BTreeMap<AxisName, f64> = splines
            .iter()
            .map(|(axis, spline)| (*axis, spline.position(s)))
            .collect();

        let velocities: BTreeMap<AxisName, f64> = match samples.last() {
            Some(previous) => positions
                .iter()
                .map(|(axis, p)| (*axis, (p - previous.positions[axis]) / tick))
                .collect(),
            None => positions.keys().map(|axis| (*axis, 0.0)).collect(),
        };

        let mut waypoint_index = None;
        while next_knot < n && s + KNOT_EPSILON >= knots[next_knot] {
            waypoint_index = Some(next_knot);
            next_knot += 1;
        }

        samples.push(TrajectorySample {
            index,
            time_offset: Duration::from_secs_f64(t),
            positions,
            velocities,
            waypoint_index,
        });
    }

    Ok(samples)
}

/// 单轴在每个路点上的值：缺失时沿用前值，前导缺失用首个值回填
fn filled_values(waypoints: &[Waypoint], axis: AxisName) -> Vec<f64> {
    let first = waypoints
        .iter()
        .find_map(|w| w.targets.get(&axis).copied())
        .unwrap_or(0.0);
    let mut current = first;
    waypoints
        .iter()
        .map(|w| {
            if let Some(&value) = w.targets.get(&axis) {
                current = value;
            }
            current
        })
        .collect()
}
