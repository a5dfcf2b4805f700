//! # Camrig Motion - 运动估计与跟踪
//!
//! 纯计算层，不访问总线：
//!
//! - [`kalman`] - 单轴常加速度卡尔曼滤波
//! - [`geometry`] - 对焦几何（pan/tilt 角、对焦距离）
//! - [`predictor`] - 主从轴前瞻预测
//! - [`trajectory`] - 路点样条平滑与缓入缓出采样
//!
//! 控制循环（`camrig-control`）每个周期把测量值送入 [`MotionPredictor`]，
//! 用得到的目标值写舵机。

mod error;
pub mod geometry;
pub mod kalman;
pub mod predictor;
pub mod trajectory;

pub use error::{EstimatorError, TrajectoryError};
pub use geometry::{CameraGeometry, FocusRange, normalize_angle};
pub use kalman::{KalmanEstimator, KalmanState};
pub use predictor::{MotionPredictor, PredictorInput, PredictorOutput};
pub use trajectory::{TrajectorySample, Waypoint, smooth, step_count_for};
