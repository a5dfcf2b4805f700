//! 运动会话集成测试
//!
//! 在 Mock 总线上运行完整的控制线程：
//! - 会话完成、停止、替换
//! - 连续通信失败终止会话
//! - 对焦跟踪接管 pan/tilt
//! - 路点拍摄通知

use camrig_bus::MockBus;
use camrig_control::{
    ControlError, MotionController, SessionOutcome, SessionRequest, SessionState,
};
use camrig_driver::{AxisDirectory, BusSerializer, SerializerConfig};
use camrig_motion::Waypoint;
use camrig_protocol::{AxisName, Instruction, Register};
use camrig_tools::{FocusPoint, RigConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const SLIDER: u8 = 2;
const PAN: u8 = 3;

fn controller_on(bus: &MockBus) -> MotionController {
    let config = RigConfig::default();
    let directory = Arc::new(AxisDirectory::from_config(&config).unwrap());
    let serializer = BusSerializer::new(
        Box::new(bus.transport()),
        directory,
        SerializerConfig::default(),
    );
    MotionController::new(Arc::new(serializer), config).unwrap()
}

fn slider_move(to: f64, duration: Duration) -> SessionRequest {
    SessionRequest::new(
        vec![
            Waypoint::new().with(AxisName::Slider, 0.0),
            Waypoint::new().with(AxisName::Slider, to),
        ],
        duration,
    )
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn test_session_completes_at_final_waypoint() {
    let bus = MockBus::with_servos(1..=6);
    let controller = controller_on(&bus);

    let handle = controller
        .start_session(slider_move(100.0, Duration::from_millis(300)))
        .unwrap();
    let outcome = controller.wait_session(handle).unwrap();

    match outcome {
        SessionOutcome::Completed(stats) => {
            assert_eq!(stats.ticks, 30);
            assert_eq!(stats.failed_ticks, 0);
        },
        other => panic!("Expected Completed, got {:?}", other),
    }
    assert_eq!(controller.session_state(), SessionState::Completed);
    assert!(controller.current_session().is_none());

    // 100 mm / 0.015625 mm/步
    assert_eq!(bus.register(SLIDER, Register::GOAL_POSITION), Some(6400));
}

#[test]
fn test_profile_velocity_written_before_goal() {
    let bus = MockBus::with_servos(1..=6);
    let controller = controller_on(&bus);

    let handle = controller
        .start_session(slider_move(50.0, Duration::from_millis(100)))
        .unwrap();
    controller.wait_session(handle).unwrap();

    let slider_writes: Vec<_> = bus.writes().into_iter().filter(|w| w.id == SLIDER).collect();
    let first_velocity = slider_writes
        .iter()
        .position(|w| w.address == Register::PROFILE_VELOCITY.address)
        .unwrap();
    let first_goal = slider_writes
        .iter()
        .position(|w| w.address == Register::GOAL_POSITION.address)
        .unwrap();
    assert!(first_velocity < first_goal);

    for write in &slider_writes {
        if write.address == Register::PROFILE_VELOCITY.address {
            assert!((1..=2_000).contains(&write.value), "{write:?}");
        }
    }
}

#[test]
fn test_stop_session_halts_writes() {
    let bus = MockBus::with_servos(1..=6);
    let controller = controller_on(&bus);

    // 10 个路点，10 秒
    let waypoints = (0..10)
        .map(|i| Waypoint::new().with(AxisName::Slider, i as f64 * 50.0))
        .collect();
    let handle = controller
        .start_session(SessionRequest::new(waypoints, Duration::from_secs(10)))
        .unwrap();
    assert_eq!(controller.session_state(), SessionState::Running);

    // 两个周期 = 两次 velocity 写 + 两次 goal 写
    assert!(wait_until(Duration::from_secs(2), || {
        bus.transmit_count(Instruction::BulkWrite) >= 4
    }));

    let outcome = controller.stop_session(handle).unwrap();
    match outcome {
        SessionOutcome::Stopped(stats) => assert!(stats.ticks >= 2),
        other => panic!("Expected Stopped, got {:?}", other),
    }
    assert_eq!(controller.session_state(), SessionState::Stopped);

    let writes = bus.transmit_count(Instruction::BulkWrite);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(bus.transmit_count(Instruction::BulkWrite), writes);

    // 结果已取走
    assert!(controller.stop_session(handle).is_none());
}

#[test]
fn test_consecutive_failures_abort_session() {
    let bus = MockBus::with_servos(1..=6);
    let controller = controller_on(&bus);
    bus.set_disconnected(true);

    let handle = controller
        .start_session(slider_move(100.0, Duration::from_secs(1)))
        .unwrap();
    let outcome = controller.wait_session(handle).unwrap();

    match &outcome {
        SessionOutcome::Failed { reason, stats } => {
            assert!(reason.contains("3 consecutive"), "{reason}");
            assert_eq!(stats.failed_ticks, 3);
            assert_eq!(stats.ticks, 0);
        },
        other => panic!("Expected Failed, got {:?}", other),
    }
    assert_eq!(controller.session_state(), SessionState::Failed);
    // 力矩保持原状
    assert_eq!(bus.write_count(Register::TORQUE_ENABLE), 0);
}

#[test]
fn test_transient_failures_are_skipped() {
    let bus = MockBus::with_servos(1..=6);
    let controller = controller_on(&bus);
    bus.fail_next_transmits(2);

    let handle = controller
        .start_session(slider_move(100.0, Duration::from_millis(200)))
        .unwrap();
    let outcome = controller.wait_session(handle).unwrap();

    match outcome {
        SessionOutcome::Completed(stats) => {
            assert_eq!(stats.failed_ticks, 2);
            assert_eq!(stats.ticks, 18);
        },
        other => panic!("Expected Completed, got {:?}", other),
    }
}

#[test]
fn test_silent_axis_counts_as_partial_tick() {
    let bus = MockBus::with_servos(1..=6);
    bus.set_silent(5, true);
    let controller = controller_on(&bus);

    let handle = controller
        .start_session(slider_move(20.0, Duration::from_millis(100)))
        .unwrap();
    let outcome = controller.wait_session(handle).unwrap();

    let stats = *outcome.stats();
    assert_eq!(outcome.state(), SessionState::Completed);
    assert_eq!(stats.ticks, 10);
    assert_eq!(stats.partial_ticks, 0);

    // 缺失的轴参与轨迹时才计入
    let request = SessionRequest::new(
        vec![
            Waypoint::new().with(AxisName::Slider, 0.0).with(AxisName::Zoom, 0.0),
            Waypoint::new().with(AxisName::Slider, 20.0).with(AxisName::Zoom, 30.0),
        ],
        Duration::from_millis(100),
    );
    let handle = controller.start_session(request).unwrap();
    let stats = *controller.wait_session(handle).unwrap().stats();
    assert_eq!(stats.ticks, 10);
    assert_eq!(stats.partial_ticks, 10);
}

#[test]
fn test_new_session_replaces_running_one() {
    let bus = MockBus::with_servos(1..=6);
    let controller = controller_on(&bus);

    let first = controller
        .start_session(slider_move(500.0, Duration::from_secs(10)))
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        bus.transmit_count(Instruction::BulkWrite) >= 2
    }));

    let second = controller
        .start_session(slider_move(50.0, Duration::from_millis(100)))
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(controller.current_session(), Some(second));

    // 被替换的会话不能再等待
    assert!(controller.wait_session(first).is_none());
    assert!(matches!(
        controller.wait_session(second),
        Some(SessionOutcome::Completed(_))
    ));
}

#[test]
fn test_replacement_waits_for_thread_held_by_waiter() {
    let bus = MockBus::with_servos(1..=6);
    let controller = Arc::new(controller_on(&bus));

    let first = controller
        .start_session(slider_move(500.0, Duration::from_secs(10)))
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        bus.transmit_count(Instruction::BulkWrite) >= 2
    }));

    // 另一个线程先进入 wait_session，持有旧会话的回收点
    let waiter_done = Arc::new(AtomicBool::new(false));
    let waiter = {
        let controller = controller.clone();
        let waiter_done = waiter_done.clone();
        thread::spawn(move || {
            let outcome = controller.wait_session(first);
            waiter_done.store(true, Ordering::Release);
            outcome
        })
    };
    thread::sleep(Duration::from_millis(30));
    assert!(!waiter_done.load(Ordering::Acquire));

    let pan_move = SessionRequest::new(
        vec![
            Waypoint::new().with(AxisName::Pan, 0.0),
            Waypoint::new().with(AxisName::Pan, 90.0),
        ],
        Duration::from_secs(10),
    );
    let second = controller.start_session(pan_move).unwrap();

    // 旧线程已退出：新会话启动后不再有滑轨写入
    let slider_goals = || {
        bus.writes()
            .into_iter()
            .filter(|w| w.id == SLIDER && w.address == Register::GOAL_POSITION.address)
            .count()
    };
    let before = slider_goals();

    assert!(matches!(waiter.join().unwrap(), Some(SessionOutcome::Stopped(_))));
    assert_eq!(controller.current_session(), Some(second));
    assert_eq!(controller.session_state(), SessionState::Running);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(slider_goals(), before);
    assert_eq!(controller.session_state(), SessionState::Running);

    assert!(matches!(
        controller.stop_session(second),
        Some(SessionOutcome::Stopped(_))
    ));
    assert_eq!(controller.session_state(), SessionState::Stopped);
}

#[test]
fn test_invalid_config_rejected() {
    let bus = MockBus::with_servos(1..=6);
    let mut config = RigConfig::default();
    let directory = Arc::new(AxisDirectory::from_config(&config).unwrap());
    let serializer = BusSerializer::new(
        Box::new(bus.transport()),
        directory,
        SerializerConfig::default(),
    );
    config.motion_loop.frequency_hz = 0.0;
    assert!(matches!(
        MotionController::new(Arc::new(serializer), config),
        Err(ControlError::Config(_))
    ));
}

#[test]
fn test_invalid_request_touches_nothing() {
    let bus = MockBus::with_servos(1..=6);
    let controller = controller_on(&bus);

    let empty = SessionRequest::new(vec![], Duration::from_secs(1));
    assert!(matches!(
        controller.start_session(empty),
        Err(ControlError::InvalidRequest(_))
    ));

    let too_fast = SessionRequest::new(
        vec![Waypoint::new().with(AxisName::Slider, 100.0).velocity_hint(40.0)],
        Duration::from_secs(1),
    );
    assert!(controller.start_session(too_fast).is_err());

    assert_eq!(controller.session_state(), SessionState::Idle);
    assert!(bus.events().is_empty());
}

#[test]
fn test_focus_tracking_drives_pan() {
    let bus = MockBus::with_servos(1..=6);
    let controller = controller_on(&bus);

    // 不跟踪时只写轨迹中的轴
    let handle = controller
        .start_session(slider_move(100.0, Duration::from_millis(100)))
        .unwrap();
    controller.wait_session(handle).unwrap();
    let pan_goals = |bus: &MockBus| {
        bus.writes()
            .into_iter()
            .filter(|w| w.id == PAN && w.address == Register::GOAL_POSITION.address)
            .count()
    };
    assert_eq!(pan_goals(&bus), 0);
    assert!(!controller.is_focus_tracking());

    let request = slider_move(300.0, Duration::from_millis(200))
        .with_focus_point(FocusPoint::at(-400.0, 600.0, -300.0));
    let handle = controller.start_session(request).unwrap();
    controller.wait_session(handle).unwrap();

    assert!(controller.is_focus_tracking());
    assert_eq!(pan_goals(&bus), 20);
    let pan = bus.register(PAN, Register::GOAL_POSITION).unwrap();
    assert!((760..=3_900).contains(&pan));

    let prediction = controller.last_prediction().unwrap();
    assert!(prediction.focus_steps.is_some());
    assert!(controller.filtered_state(AxisName::Slider).is_some());
    assert!(controller.filtered_state(AxisName::Pan).is_some());

    controller.enable_focus_tracking(false);
    assert!(!controller.is_focus_tracking());
    assert!(controller.filtered_state(AxisName::Slider).is_none());
}

#[test]
fn test_session_without_focus_point_follows_trajectory() {
    let bus = MockBus::with_servos(1..=6);
    let controller = controller_on(&bus);

    let tracked = slider_move(300.0, Duration::from_millis(100))
        .with_focus_point(FocusPoint::at(-400.0, 600.0, -300.0));
    let handle = controller.start_session(tracked).unwrap();
    controller.wait_session(handle).unwrap();
    assert!(controller.is_focus_tracking());

    let pan_move = SessionRequest::new(
        vec![
            Waypoint::new().with(AxisName::Pan, 0.0),
            Waypoint::new().with(AxisName::Pan, 90.0),
        ],
        Duration::from_millis(100),
    );
    let handle = controller.start_session(pan_move).unwrap();
    controller.wait_session(handle).unwrap();

    assert!(!controller.is_focus_tracking());
    assert!(controller.focus_point().is_none());
    assert!(controller.last_prediction().unwrap().focus_steps.is_none());
    // (90° + 180°) / (360° / 4096)
    assert_eq!(bus.register(PAN, Register::GOAL_POSITION), Some(3072));
}

#[test]
fn test_rejects_non_finite_focus_point() {
    let bus = MockBus::with_servos(1..=6);
    let controller = controller_on(&bus);
    assert!(controller
        .set_focus_point(Some(FocusPoint::at(f64::INFINITY, 0.0, 0.0)))
        .is_err());
    assert!(controller.focus_point().is_none());

    controller
        .set_focus_point(Some(FocusPoint::at(100.0, 200.0, 0.0)))
        .unwrap();
    assert_eq!(controller.focus_point().map(|p| p.y), Some(200.0));
}

#[test]
fn test_capture_events_at_waypoints() {
    let bus = MockBus::with_servos(1..=6);
    let (tx, rx) = crossbeam_channel::bounded(16);
    let controller = controller_on(&bus).with_capture(tx);

    let request = SessionRequest::new(
        vec![
            Waypoint::new().with(AxisName::Slider, 0.0),
            Waypoint::new().with(AxisName::Slider, 100.0),
            Waypoint::new().with(AxisName::Slider, 200.0),
        ],
        Duration::from_millis(400),
    );
    let handle = controller.start_session(request).unwrap();
    controller.wait_session(handle).unwrap();

    let events: Vec<_> = rx.try_iter().collect();
    let indices: Vec<usize> = events.iter().map(|e| e.waypoint_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(events[0].sample_index, 0);
    assert_eq!(events[2].sample_index, 39);
    assert_eq!(events[2].time_offset, Duration::from_millis(400));
    assert!((events[2].positions[&AxisName::Slider] - 200.0).abs() < 1e-9);
    assert!(events.iter().all(|e| e.session == handle.id()));
}
