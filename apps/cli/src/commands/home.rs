//! 归零命令
//!
//! 把指定轴的当前位置设为零点。写零点偏移会关闭该轴力矩。

use crate::connection::Connection;
use anyhow::Result;
use camrig_driver::MotionRegisters;
use camrig_protocol::AxisName;
use clap::Args;

/// 归零命令参数
#[derive(Args, Debug)]
pub struct HomeCommand {
    /// 需要归零的轴
    #[arg(required = true, value_delimiter = ',')]
    pub axes: Vec<AxisName>,
}

impl HomeCommand {
    pub fn execute(&self, connection: &Connection) -> Result<()> {
        let motion = MotionRegisters::new(&connection.bus);
        for (name, id) in connection.resolve_axes(&self.axes)? {
            let offset = motion.home_to_current(id)?;
            println!("🏠 {} {} 零点偏移 = {}（力矩已关闭）", name, id, offset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionArgs;
    use camrig_protocol::Register;

    #[test]
    fn test_home_sets_offset_from_present_position() {
        let config = tempfile::NamedTempFile::new().unwrap();
        let connection = ConnectionArgs {
            config: Some(config.path().to_path_buf()),
            port: None,
            mock: true,
        }
        .connect()
        .unwrap();
        let mock = connection.mock.clone().unwrap();
        mock.set_register(1, Register::PRESENT_POSITION, 1500);
        mock.set_register(1, Register::TORQUE_ENABLE, 1);

        HomeCommand {
            axes: vec![AxisName::Turntable],
        }
        .execute(&connection)
        .unwrap();
        assert_eq!(mock.register(1, Register::HOMING_OFFSET), Some(-1500));
        assert_eq!(mock.register(1, Register::TORQUE_ENABLE), Some(0));
    }
}
