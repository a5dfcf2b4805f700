//! 力矩开关命令

use crate::connection::Connection;
use anyhow::Result;
use camrig_driver::MotionRegisters;
use camrig_protocol::AxisName;
use clap::{Args, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorqueState {
    On,
    Off,
}

/// 力矩命令参数
#[derive(Args, Debug)]
pub struct TorqueCommand {
    /// 打开或关闭
    #[arg(value_enum)]
    pub state: TorqueState,

    /// 只作用于这些轴（默认全部）
    #[arg(short, long, value_delimiter = ',')]
    pub axes: Vec<AxisName>,
}

impl TorqueCommand {
    pub fn execute(&self, connection: &Connection) -> Result<()> {
        let axes = connection.resolve_axes(&self.axes)?;
        let ids: Vec<_> = axes.iter().map(|(_, id)| *id).collect();
        let enabled = self.state == TorqueState::On;

        MotionRegisters::new(&connection.bus).set_torque(&ids, enabled)?;
        for (name, id) in &axes {
            println!("  {} {} → {}", name, id, if enabled { "ON" } else { "OFF" });
        }
        Ok(())
    }
}
