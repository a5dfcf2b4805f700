//! 运动控制器
//!
//! 持有总线、预测器和当前会话。同一时刻只有一个会话：启动新会话时，
//! 正在运行的会话先被停止并回收。
//!
//! 控制线程通过 [`ArcSwap`] 发布最新快照，查询接口不与控制线程竞争锁。

use crate::ControlError;
use crate::motion_loop::{LoopContext, MotionLoop, MotionSnapshot};
use crate::session::{
    CaptureEvent, SessionHandle, SessionOutcome, SessionRequest, SessionState, SessionStats,
    validate_request,
};
use arc_swap::ArcSwap;
use camrig_driver::BusSerializer;
use camrig_motion::{KalmanState, MotionPredictor, PredictorOutput, smooth, step_count_for};
use camrig_protocol::AxisName;
use camrig_tools::{FocusPoint, RigConfig};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

struct ActiveSession {
    id: u64,
    stop: Arc<AtomicBool>,
    thread: Arc<Mutex<LoopThread>>,
}

/// 控制线程的回收点
///
/// 第一个拿到锁的调用者负责 join，结果缓存给后来者；
/// 其他调用者在锁上等待，因此拿到结果时线程一定已经退出。
struct LoopThread {
    handle: Option<JoinHandle<SessionOutcome>>,
    outcome: Option<SessionOutcome>,
}

impl LoopThread {
    fn join(&mut self) -> Option<SessionOutcome> {
        if let Some(handle) = self.handle.take() {
            self.outcome = Some(join_loop(handle));
        }
        self.outcome.clone()
    }
}

pub struct MotionController {
    bus: Arc<BusSerializer>,
    config: RigConfig,
    predictor: Arc<Mutex<MotionPredictor>>,
    snapshot: Arc<ArcSwap<MotionSnapshot>>,
    state: Arc<ArcSwap<SessionState>>,
    capture: Option<Sender<CaptureEvent>>,
    active: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
}

impl MotionController {
    /// 创建控制器
    ///
    /// 配置先经过校验；仍在使用临时常数的配置项会逐一告警，但不阻止运行。
    pub fn new(bus: Arc<BusSerializer>, config: RigConfig) -> Result<Self, ControlError> {
        config.validate()?;
        for field in config.uncalibrated() {
            warn!("{} is not calibrated, using provisional value", field);
        }
        Ok(Self {
            predictor: Arc::new(Mutex::new(MotionPredictor::from_config(&config))),
            bus,
            config,
            snapshot: Arc::new(ArcSwap::from_pointee(MotionSnapshot::default())),
            state: Arc::new(ArcSwap::from_pointee(SessionState::Idle)),
            capture: None,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    /// 到达路点时向 `sender` 发送通知（非阻塞，队列满时丢弃）
    pub fn with_capture(mut self, sender: Sender<CaptureEvent>) -> Self {
        self.capture = Some(sender);
        self
    }

    pub fn bus(&self) -> &Arc<BusSerializer> {
        &self.bus
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    /// 启动会话
    ///
    /// 请求在调用线程上校验并展开为采样轨迹；失败时不影响正在运行的会话。
    /// 请求不带对焦点时关闭对焦跟踪，pan/tilt 按轨迹运行。
    pub fn start_session(&self, request: SessionRequest) -> Result<SessionHandle, ControlError> {
        let waypoints = validate_request(&request, self.bus.directory(), &self.config)?;
        let steps = step_count_for(request.duration, self.config.motion_loop.frequency_hz);
        let samples = smooth(&waypoints, request.duration, steps)?;

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            warn!("Session conflict: stopping session {} before starting a new one", previous.id);
            previous.stop.store(true, Ordering::Release);
            // 其他线程可能正在 wait/stop 旧会话，这里同样等到旧线程退出
            if let Some(outcome) = previous.thread.lock().join() {
                info!("Session {} ended with {:?}", previous.id, outcome);
            }
        }

        {
            let mut predictor = self.predictor.lock();
            predictor.reset();
            let tracking = request.focus_point.is_some();
            predictor.set_focus_point(request.focus_point);
            predictor.enable_focus_tracking(tracking);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = LoopContext {
            session: id,
            bus: self.bus.clone(),
            predictor: self.predictor.clone(),
            snapshot: self.snapshot.clone(),
            capture: self.capture.clone(),
            stop: stop.clone(),
            samples,
            total_duration: request.duration,
            settings: self.config.motion_loop.clone(),
        };
        let state = self.state.clone();
        self.state.store(Arc::new(SessionState::Running));
        let thread = std::thread::Builder::new()
            .name(format!("camrig-motion-{id}"))
            .spawn(move || {
                let outcome = MotionLoop::new(ctx).run();
                // 会话被替换前必定已被 join，这里写入的总是当前会话的状态
                state.store(Arc::new(outcome.state()));
                outcome
            })
            .map_err(|e| {
                self.state.store(Arc::new(SessionState::Failed));
                ControlError::Spawn(e)
            })?;

        *active = Some(ActiveSession {
            id,
            stop,
            thread: Arc::new(Mutex::new(LoopThread {
                handle: Some(thread),
                outcome: None,
            })),
        });
        info!("Session {} scheduled: {} samples", id, steps);
        Ok(SessionHandle { id })
    }

    /// 请求停止并等待控制线程退出
    ///
    /// 句柄不是当前会话（已结束并回收，或已被替换）时返回 `None`。
    pub fn stop_session(&self, handle: SessionHandle) -> Option<SessionOutcome> {
        let thread = {
            let active = self.active.lock();
            let session = active.as_ref().filter(|s| s.id == handle.id)?;
            session.stop.store(true, Ordering::Release);
            session.thread.clone()
        };
        self.finish(handle, &thread)
    }

    /// 等待会话自然结束
    pub fn wait_session(&self, handle: SessionHandle) -> Option<SessionOutcome> {
        let thread = {
            let active = self.active.lock();
            active.as_ref().filter(|s| s.id == handle.id)?.thread.clone()
        };
        self.finish(handle, &thread)
    }

    /// 当前会话的句柄
    pub fn current_session(&self) -> Option<SessionHandle> {
        self.active.lock().as_ref().map(|s| SessionHandle { id: s.id })
    }

    pub fn session_state(&self) -> SessionState {
        **self.state.load()
    }

    pub fn snapshot(&self) -> MotionSnapshot {
        self.snapshot.load().as_ref().clone()
    }

    /// 主从轴的滤波状态；估计器未初始化时为 `None`
    pub fn filtered_state(&self, axis: AxisName) -> Option<KalmanState> {
        self.snapshot.load().filtered.get(&axis).copied()
    }

    pub fn last_prediction(&self) -> Option<PredictorOutput> {
        self.snapshot.load().prediction
    }

    /// 设置（或清除）对焦点，立即作用于正在运行的会话
    pub fn set_focus_point(&self, point: Option<FocusPoint>) -> Result<(), ControlError> {
        if let Some(point) = &point
            && !point.is_finite()
        {
            return Err(ControlError::invalid("focus point has non-finite coordinates"));
        }
        self.predictor.lock().set_focus_point(point);
        Ok(())
    }

    pub fn focus_point(&self) -> Option<FocusPoint> {
        self.predictor.lock().focus_point().cloned()
    }

    /// 打开或关闭对焦跟踪；关闭时估计器重置，已发布的滤波状态清空
    pub fn enable_focus_tracking(&self, enable: bool) {
        self.predictor.lock().enable_focus_tracking(enable);
        if !enable {
            let current = self.snapshot.load();
            self.snapshot.store(Arc::new(MotionSnapshot {
                filtered: BTreeMap::new(),
                ..current.as_ref().clone()
            }));
        }
    }

    pub fn is_focus_tracking(&self) -> bool {
        self.predictor.lock().is_focus_tracking()
    }

    /// 等待控制线程退出；会话仍是当前会话时写入最终状态并清空槽位
    fn finish(&self, handle: SessionHandle, thread: &Mutex<LoopThread>) -> Option<SessionOutcome> {
        let outcome = thread.lock().join()?;
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|s| s.id == handle.id) {
            self.state.store(Arc::new(outcome.state()));
            *active = None;
        }
        Some(outcome)
    }
}

impl Drop for MotionController {
    fn drop(&mut self) {
        if let Some(session) = self.active.get_mut().take() {
            session.stop.store(true, Ordering::Release);
            let _ = session.thread.lock().join();
        }
    }
}

fn join_loop(thread: JoinHandle<SessionOutcome>) -> SessionOutcome {
    thread.join().unwrap_or_else(|_| {
        error!("Motion loop thread panicked");
        SessionOutcome::Failed {
            reason: "motion loop thread panicked".to_string(),
            stats: SessionStats::default(),
        }
    })
}
