//! 寄存器分组
//!
//! 每组只借用 [`BusSerializer`](crate::BusSerializer)，没有自身状态；
//! 组合使用而不是层层继承。

mod motion;
mod pid;
mod status;

pub use motion::MotionRegisters;
pub use pid::{PidRegisters, PositionGains, VelocityGains};
pub use status::{AxisStatus, LimitWarning, StatusRegisters};
