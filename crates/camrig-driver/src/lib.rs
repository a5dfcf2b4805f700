//! 驱动层
//!
//! 本 crate 提供舵机总线的设备访问：
//! - 轴目录（名称 ↔ 地址双射、行程与单位换算）
//! - 总线串行化器（互斥的批量读写事务，部分应答容忍）
//! - 寄存器分组：运动、PID、状态
//! - 事务指标（原子计数器）
//!
//! # 使用场景
//!
//! 控制循环与维护工具（归零、调参、状态查看）共享同一个 [`BusSerializer`]，
//! 所有总线访问都经过它的锁。

mod builder;
mod directory;
mod error;
pub mod metrics;
pub mod registers;
mod serializer;

pub use builder::BusBuilder;
pub use directory::{AxisDirectory, AxisEntry, AxisLimits};
pub use error::DriverError;
pub use metrics::{BusMetrics, BusMetricsSnapshot};
pub use registers::{
    AxisStatus, LimitWarning, MotionRegisters, PidRegisters, PositionGains, StatusRegisters,
    VelocityGains,
};
pub use serializer::{BulkReadResult, BusSerializer, SerializerConfig};
