//! # Camrig Control - 运动会话
//!
//! 在独立的控制线程上回放轨迹：
//!
//! - [`SessionRequest`] - 路点、总时长、可选对焦点
//! - [`MotionController`] - 启动、停止、等待会话，查询滤波状态
//! - 控制循环：读位置 → 预测 → 写 profile velocity 与目标位置
//!
//! # 示例
//!
//! ```rust,no_run
//! use camrig_control::{MotionController, SessionRequest};
//! use camrig_driver::BusBuilder;
//! use camrig_motion::Waypoint;
//! use camrig_protocol::AxisName;
//! use camrig_tools::RigConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RigConfig::load_from_file("camrig.toml")?;
//! let bus = Arc::new(BusBuilder::from_config(&config)?.build()?);
//! let controller = MotionController::new(bus, config)?;
//!
//! let request = SessionRequest::new(
//!     vec![
//!         Waypoint::new().with(AxisName::Slider, 0.0),
//!         Waypoint::new().with(AxisName::Slider, 500.0),
//!     ],
//!     Duration::from_secs(5),
//! );
//! let handle = controller.start_session(request)?;
//! let outcome = controller.wait_session(handle);
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

mod controller;
mod error;
mod motion_loop;
pub mod session;

pub use controller::MotionController;
pub use error::ControlError;
pub use motion_loop::MotionSnapshot;
pub use session::{
    CaptureEvent, SessionHandle, SessionOutcome, SessionRequest, SessionState, SessionStats,
};
