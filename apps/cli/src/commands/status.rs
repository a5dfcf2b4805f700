//! 状态查询命令
//!
//! 位置、力矩、温度、电压、电流；电流超过建议上限时给出提示。

use crate::connection::Connection;
use anyhow::Result;
use camrig_driver::{MotionRegisters, StatusRegisters};
use camrig_protocol::AxisName;
use clap::Args;

/// 状态查询命令参数
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// 只查询这些轴（默认全部）
    #[arg(short, long, value_delimiter = ',')]
    pub axes: Vec<AxisName>,

    /// 以 JSON 输出
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub fn execute(&self, connection: &Connection) -> Result<()> {
        let axes = connection.resolve_axes(&self.axes)?;
        let ids: Vec<_> = axes.iter().map(|(_, id)| *id).collect();
        let directory = connection.bus.directory();

        let motion = MotionRegisters::new(&connection.bus);
        let positions = motion.present_positions(&ids)?;
        let torque = motion.torque_states(&ids)?;
        let status = StatusRegisters::new(&connection.bus, connection.config.current_ma_per_unit());
        let snapshot = status.snapshot(&ids)?;
        let warnings = status.check_limits(&snapshot);

        let rows: Vec<_> = axes
            .iter()
            .map(|(name, id)| {
                let steps = positions.get(id).copied().flatten();
                let units = steps.zip(directory.limits(*name)).map(|(s, l)| l.to_units(s));
                let axis_status = snapshot.get(id).copied().unwrap_or_default();
                serde_json::json!({
                    "axis": name.as_str(),
                    "id": id.raw(),
                    "steps": steps,
                    "position": units,
                    "torque": torque.get(id).copied().flatten(),
                    "temperature_c": axis_status.temperature_c,
                    "voltage_v": axis_status.voltage_v,
                    "current_ma": axis_status.current_ma,
                    "over_current": warnings.iter().any(|w| w.axis == *id),
                })
            })
            .collect();

        if self.json {
            let metrics = connection.bus.metrics().snapshot();
            let value = serde_json::json!({
                "axes": rows,
                "bus": {
                    "transactions": metrics.transactions,
                    "communication_errors": metrics.communication_errors,
                    "partial_reads": metrics.partial_reads,
                    "error_rate": metrics.error_rate(),
                },
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }

        println!("📊 轴状态:");
        for ((name, id), row) in axes.iter().zip(&rows) {
            let position = match row["position"].as_f64() {
                Some(units) if name.is_angular() => format!("{units:8.2}°"),
                Some(units) => format!("{units:8.2}mm"),
                None => "   (无应答)".to_string(),
            };
            println!(
                "  {:<9} {}  {}  力矩 {:<5}  {}°C  {}V  {}mA",
                name.as_str(),
                id,
                position,
                fmt_opt(&row["torque"]),
                fmt_opt(&row["temperature_c"]),
                fmt_opt(&row["voltage_v"]),
                fmt_opt(&row["current_ma"]),
            );
        }
        for warning in &warnings {
            println!(
                "⚠️  {} 电流 {:.0} mA 超过建议上限 {:.0} mA",
                warning.axis, warning.current_ma, warning.limit_ma
            );
        }
        Ok(())
    }
}

fn fmt_opt(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{f:.1}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}
