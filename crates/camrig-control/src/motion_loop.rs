//! 控制循环
//!
//! 每个周期消费一个轨迹采样：
//!
//! 1. 批量读当前位置（部分轴缺失时照常继续）
//! 2. 更新预测器，发布滤波快照
//! 3. 计算目标：默认取轨迹值，对焦跟踪时 pan/tilt/对焦取预测输出
//! 4. 先写 profile velocity，再写目标位置
//! 5. 到达路点时发送拍摄通知
//!
//! 周期使用绝对时间锚点，超时后重置锚点而不是追赶。
//! 连续通信失败达到上限时终止会话，力矩保持原状。

use crate::session::{CaptureEvent, SessionOutcome, SessionStats};
use arc_swap::ArcSwap;
use camrig_driver::{AxisLimits, BusSerializer, DriverError, MotionRegisters};
use camrig_motion::{KalmanState, MotionPredictor, PredictorInput, PredictorOutput, TrajectorySample};
use camrig_protocol::{AxisId, AxisName};
use camrig_tools::LoopSettings;
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// 控制循环对外发布的最新状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MotionSnapshot {
    /// 已初始化的主从轴滤波状态
    pub filtered: BTreeMap<AxisName, KalmanState>,
    pub prediction: Option<PredictorOutput>,
    /// 最近执行的采样序号
    pub sample_index: Option<usize>,
}

/// 控制线程需要的全部共享对象
pub(crate) struct LoopContext {
    pub session: u64,
    pub bus: Arc<BusSerializer>,
    pub predictor: Arc<Mutex<MotionPredictor>>,
    pub snapshot: Arc<ArcSwap<MotionSnapshot>>,
    pub capture: Option<Sender<CaptureEvent>>,
    pub stop: Arc<AtomicBool>,
    pub samples: Vec<TrajectorySample>,
    pub total_duration: Duration,
    pub settings: LoopSettings,
}

/// 参与控制的轴
#[derive(Debug, Clone, Copy)]
struct LoopAxis {
    name: AxisName,
    id: AxisId,
    limits: AxisLimits,
}

/// 单个周期的结果
#[derive(Debug, Default)]
struct TickReport {
    absent: usize,
}

pub(crate) struct MotionLoop {
    ctx: LoopContext,
    axes: Vec<LoopAxis>,
    period: Duration,
    last_goals: BTreeMap<AxisName, i32>,
    stats: SessionStats,
}

impl MotionLoop {
    pub fn new(ctx: LoopContext) -> Self {
        let directory = ctx.bus.directory().clone();
        let planned = ctx.samples.first().map(|s| &s.positions);
        let axes = directory
            .entries()
            .filter(|entry| {
                matches!(entry.name, AxisName::Slider | AxisName::Pan | AxisName::Tilt | AxisName::Focus)
                    || planned.is_some_and(|p| p.contains_key(&entry.name))
            })
            .map(|entry| LoopAxis {
                name: entry.name,
                id: entry.id,
                limits: entry.limits,
            })
            .collect();
        let period = Duration::from_secs_f64(1.0 / ctx.settings.frequency_hz);
        Self {
            ctx,
            axes,
            period,
            last_goals: BTreeMap::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn run(mut self) -> SessionOutcome {
        if self.ctx.settings.realtime_priority {
            raise_thread_priority();
        }
        info!(
            "Session {} started: {} samples over {:?} at {} Hz",
            self.ctx.session,
            self.ctx.samples.len(),
            self.ctx.total_duration,
            self.ctx.settings.frequency_hz
        );

        let samples = std::mem::take(&mut self.ctx.samples);
        let max_failures = self.ctx.settings.max_consecutive_failures;
        let mut consecutive_failures = 0u32;
        let mut next_tick = Instant::now();

        for sample in &samples {
            if self.ctx.stop.load(Ordering::Acquire) {
                info!("Session {} stopped at sample {}", self.ctx.session, sample.index);
                return SessionOutcome::Stopped(self.stats);
            }

            // 1. 设定下一个锚点（绝对时间）
            next_tick += self.period;

            // 2. 执行一个周期
            match self.tick(sample) {
                Ok(report) => {
                    consecutive_failures = 0;
                    self.stats.ticks += 1;
                    if report.absent > 0 {
                        self.stats.partial_ticks += 1;
                    }
                },
                Err(e) => {
                    consecutive_failures += 1;
                    self.stats.failed_ticks += 1;
                    if consecutive_failures >= max_failures {
                        error!(
                            "Session {}: {} consecutive bus failures, aborting: {}",
                            self.ctx.session, consecutive_failures, e
                        );
                        return SessionOutcome::Failed {
                            reason: format!("{consecutive_failures} consecutive bus failures: {e}"),
                            stats: self.stats,
                        };
                    }
                    warn!(
                        "Session {}: bus error at sample {} ({}/{}): {}, skipping",
                        self.ctx.session, sample.index, consecutive_failures, max_failures, e
                    );
                },
            }

            // 3. 睡眠到下一个锚点
            let now = Instant::now();
            if next_tick > now {
                spin_sleep::sleep(next_tick - now);
            } else {
                self.stats.overruns += 1;
                warn!(
                    "Motion loop overrun: tick took {:?} (period {:?})",
                    now.duration_since(next_tick - self.period),
                    self.period
                );
                next_tick = now;
            }
        }

        info!(
            "Session {} completed: {} ticks, {} failed, {} partial, {} overruns",
            self.ctx.session,
            self.stats.ticks,
            self.stats.failed_ticks,
            self.stats.partial_ticks,
            self.stats.overruns
        );
        SessionOutcome::Completed(self.stats)
    }

    fn tick(&mut self, sample: &TrajectorySample) -> Result<TickReport, DriverError> {
        let motion = MotionRegisters::new(&self.ctx.bus);
        let ids: Vec<AxisId> = self.axes.iter().map(|a| a.id).collect();

        // 1. 读取
        let readings = motion.present_positions(&ids)?;
        let mut measured_steps = BTreeMap::new();
        let mut measured = BTreeMap::new();
        for axis in &self.axes {
            if let Some(Some(steps)) = readings.get(&axis.id) {
                measured_steps.insert(axis.name, *steps);
                measured.insert(axis.name, axis.limits.to_units(*steps));
            }
        }
        let absent = readings.values().filter(|v| v.is_none()).count();
        if absent > 0 {
            debug!("Sample {}: {} axes absent", sample.index, absent);
        }

        // 2. 预测
        let input = PredictorInput {
            slider: measured.get(&AxisName::Slider).copied(),
            pan: measured.get(&AxisName::Pan).copied(),
            tilt: measured.get(&AxisName::Tilt).copied(),
            slider_velocity: sample.velocities.get(&AxisName::Slider).copied(),
            pan_velocity: sample.velocities.get(&AxisName::Pan).copied(),
            tilt_velocity: sample.velocities.get(&AxisName::Tilt).copied(),
            profile_duration: Some(self.ctx.total_duration.as_secs_f64()),
        };
        let (output, tracking, filtered) = {
            let mut predictor = self.ctx.predictor.lock();
            let output = predictor.update(&input);
            let filtered: BTreeMap<AxisName, KalmanState> =
                [AxisName::Slider, AxisName::Pan, AxisName::Tilt]
                    .into_iter()
                    .filter_map(|axis| predictor.estimate(axis).map(|state| (axis, state)))
                    .collect();
            (output, predictor.is_focus_tracking(), filtered)
        };
        self.ctx.snapshot.store(Arc::new(MotionSnapshot {
            filtered,
            prediction: Some(output),
            sample_index: Some(sample.index),
        }));

        // 3. 目标
        let tracking = tracking && measured.contains_key(&AxisName::Slider);
        let mut goals = Vec::with_capacity(self.axes.len());
        let mut velocities = Vec::with_capacity(self.axes.len());
        let mut written = Vec::with_capacity(self.axes.len());
        for axis in &self.axes {
            let planned = sample
                .positions
                .get(&axis.name)
                .map(|&units| axis.limits.to_clamped_steps(units));
            let goal = match (axis.name, tracking) {
                (AxisName::Pan, true) => Some(axis.limits.to_clamped_steps(output.pan_angle)),
                (AxisName::Tilt, true) => Some(axis.limits.to_clamped_steps(output.tilt_angle)),
                (AxisName::Focus, true) => output
                    .focus_steps
                    .map(|steps| axis.limits.clamp_steps(steps))
                    .or(planned),
                _ => planned,
            };
            let Some(goal) = goal else {
                continue;
            };

            let reference = self
                .last_goals
                .get(&axis.name)
                .or_else(|| measured_steps.get(&axis.name))
                .copied();
            let velocity = match reference {
                Some(from) => profile_velocity(goal, from, self.period, &axis.limits),
                None => axis.limits.max_velocity_steps,
            };
            trace!("Goal {} → {} at {} steps/s", axis.name, goal, velocity);
            goals.push((axis.id, goal));
            velocities.push((axis.id, velocity));
            written.push((axis.name, goal));
        }

        // 4. 写入；只有舵机确实收到的目标才作为下个周期的参考
        if !goals.is_empty() {
            motion.write_profile_velocities(&velocities)?;
            motion.write_goal_positions(&goals)?;
            self.last_goals.extend(written);
        }

        // 5. 路点通知
        if let Some(waypoint_index) = sample.waypoint_index {
            self.notify_capture(sample, waypoint_index);
        }

        Ok(TickReport { absent })
    }

    fn notify_capture(&self, sample: &TrajectorySample, waypoint_index: usize) {
        let Some(capture) = &self.ctx.capture else {
            return;
        };
        let event = CaptureEvent {
            session: self.ctx.session,
            waypoint_index,
            sample_index: sample.index,
            time_offset: sample.time_offset,
            positions: sample.positions.clone(),
        };
        match capture.try_send(event) {
            Ok(()) => debug!("Waypoint {} reached at sample {}", waypoint_index, sample.index),
            Err(TrySendError::Full(_)) => {
                warn!("Capture queue full, dropping waypoint {} event", waypoint_index)
            },
            Err(TrySendError::Disconnected(_)) => {
                trace!("Capture receiver gone, dropping waypoint {} event", waypoint_index)
            },
        }
    }
}

/// 一个周期内走完 `goal - from` 所需的 profile velocity（步/秒），限制到 `[1, max]`
pub(crate) fn profile_velocity(goal: i32, from: i32, period: Duration, limits: &AxisLimits) -> i32 {
    let delta = (goal as f64 - from as f64).abs();
    let velocity = (delta / period.as_secs_f64()).ceil();
    if velocity.is_finite() && velocity < limits.max_velocity_steps as f64 {
        limits.clamp_velocity(velocity as i32)
    } else {
        limits.max_velocity_steps
    }
}

fn raise_thread_priority() {
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("Motion loop thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    "Failed to set motion loop thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    #[cfg(not(feature = "realtime"))]
    warn!("Realtime priority requested but the `realtime` feature is disabled");
}
