//! PID 增益命令
//!
//! 读取或写入位置环/速度环增益。写入前先校验范围，越界时不写任何轴。

use crate::connection::Connection;
use anyhow::Result;
use camrig_driver::{PidRegisters, PositionGains, VelocityGains};
use camrig_protocol::AxisName;
use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum PidCommand {
    /// 读取增益
    Get {
        /// 只查询这些轴（默认全部）
        #[arg(short, long, value_delimiter = ',')]
        axes: Vec<AxisName>,
    },

    /// 写位置环增益（0..=16383）
    SetPosition {
        #[arg(short, long, value_delimiter = ',', required = true)]
        axes: Vec<AxisName>,
        #[arg(long)]
        p: i32,
        #[arg(long)]
        i: i32,
        #[arg(long)]
        d: i32,
    },

    /// 写速度环增益（P 1000..=16383，I 1..=16383）
    SetVelocity {
        #[arg(short, long, value_delimiter = ',', required = true)]
        axes: Vec<AxisName>,
        #[arg(long)]
        p: i32,
        #[arg(long)]
        i: i32,
    },
}

impl PidCommand {
    pub fn execute(&self, connection: &Connection) -> Result<()> {
        let pid = PidRegisters::new(&connection.bus);
        match self {
            PidCommand::Get { axes } => {
                let axes = connection.resolve_axes(axes)?;
                let ids: Vec<_> = axes.iter().map(|(_, id)| *id).collect();
                let position = pid.position_gains(&ids)?;
                let velocity = pid.velocity_gains(&ids)?;
                println!("🎛️  增益:");
                for (name, id) in &axes {
                    let position = match position.get(id).copied().flatten() {
                        Some(g) => format!("P={} I={} D={}", g.p, g.i, g.d),
                        None => "(无应答)".to_string(),
                    };
                    let velocity = match velocity.get(id).copied().flatten() {
                        Some(g) => format!("P={} I={}", g.p, g.i),
                        None => "(无应答)".to_string(),
                    };
                    println!("  {:<9} 位置环 {:<24} 速度环 {}", name, position, velocity);
                }
            },

            PidCommand::SetPosition { axes, p, i, d } => {
                let gains = PositionGains { p: *p, i: *i, d: *d };
                let values: Vec<_> = connection
                    .resolve_axes(axes)?
                    .into_iter()
                    .map(|(_, id)| (id, gains))
                    .collect();
                pid.write_position_gains(&values)?;
                println!("✅ 位置环增益已写入 {} 个轴", values.len());
            },

            PidCommand::SetVelocity { axes, p, i } => {
                let gains = VelocityGains { p: *p, i: *i };
                let values: Vec<_> = connection
                    .resolve_axes(axes)?
                    .into_iter()
                    .map(|(_, id)| (id, gains))
                    .collect();
                pid.write_velocity_gains(&values)?;
                println!("✅ 速度环增益已写入 {} 个轴", values.len());
            },
        }
        Ok(())
    }
}
