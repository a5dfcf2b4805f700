//! 运动层错误类型

use camrig_protocol::AxisName;
use thiserror::Error;

/// 状态估计错误
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorError {
    /// 协方差失去正定性或出现非有限值，估计器已被重置
    #[error("Numerical instability in state estimate, estimator was reset")]
    NumericalInstability,
}

/// 轨迹平滑错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrajectoryError {
    #[error("Trajectory needs at least one waypoint")]
    NoWaypoints,

    #[error("Waypoint {0} has no axis targets")]
    EmptyWaypoint(usize),

    #[error("Waypoint {index} has non-finite target for {axis}")]
    NonFiniteTarget { index: usize, axis: AxisName },

    #[error("Invalid duration: {0} s")]
    InvalidDuration(f64),

    #[error("At least 2 samples are required, got {0}")]
    TooFewSteps(usize),
}
