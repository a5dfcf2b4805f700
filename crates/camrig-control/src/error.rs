//! 控制层错误类型

use camrig_driver::DriverError;
use camrig_motion::TrajectoryError;
use camrig_tools::ConfigError;
use thiserror::Error;

/// 会话控制错误
#[derive(Error, Debug)]
pub enum ControlError {
    /// 会话请求不可执行（空路点、时长非法、对焦点非有限、轴未配置、全部路点超限）
    #[error("Invalid session request: {0}")]
    InvalidRequest(String),

    #[error("Focus point {0} not found")]
    UnknownFocusPoint(u32),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Trajectory error: {0}")]
    Trajectory(#[from] TrajectoryError),

    #[error("Failed to spawn motion loop thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl ControlError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ControlError::InvalidRequest(reason.into())
    }
}
