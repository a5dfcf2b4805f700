//! 驱动层错误类型定义

use camrig_bus::BusError;
use camrig_protocol::{AxisId, AxisName, ProtocolError};
use camrig_tools::ConfigError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 总线传输错误（通信失败，不重试）
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// 协议编解码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 请求的轴全部没有应答
    #[error("No response from any of {requested} axes")]
    NoResponse { requested: usize },

    /// 单轴指令返回了错误状态
    #[error("Axis {axis} reported status error 0x{code:02X}")]
    DeviceStatus { axis: AxisId, code: u8 },

    /// 地址不在轴目录中
    #[error("Axis {0} is not in the directory")]
    UnknownAxis(AxisId),

    /// 轴名称不在轴目录中
    #[error("Axis {0} is not configured")]
    UnknownAxisName(AxisName),

    /// 同一请求中重复的地址
    #[error("Axis {0} appears more than once in the request")]
    DuplicateAxis(AxisId),

    /// 空请求
    #[error("Empty request")]
    EmptyRequest,

    /// 增益超出舵机接受范围
    #[error("{name} gain {value} outside [{min}, {max}]")]
    GainOutOfRange {
        name: &'static str,
        value: i32,
        min: i32,
        max: i32,
    },

    /// 无效输入
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl DriverError {
    /// 通信类错误（传输失败或无应答），控制循环据此累计失败次数
    pub fn is_communication(&self) -> bool {
        matches!(self, DriverError::Bus(_) | DriverError::NoResponse { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::DriverError;
    use camrig_bus::BusError;
    use camrig_protocol::{AxisId, ProtocolError};

    /// 测试 DriverError 的 Display 实现
    #[test]
    fn test_driver_error_display() {
        let driver_error = DriverError::Bus(BusError::Timeout);
        assert_eq!(driver_error.to_string(), "Bus error: Read timeout");

        let driver_error = DriverError::NoResponse { requested: 3 };
        assert_eq!(driver_error.to_string(), "No response from any of 3 axes");

        let axis = AxisId::new(4).unwrap();
        let driver_error = DriverError::DeviceStatus { axis, code: 0x04 };
        assert_eq!(driver_error.to_string(), "Axis #4 reported status error 0x04");

        let driver_error = DriverError::GainOutOfRange {
            name: "velocity P",
            value: 20,
            min: 1000,
            max: 16383,
        };
        assert!(driver_error.to_string().contains("velocity P gain 20"));
    }

    #[test]
    fn test_communication_classification() {
        assert!(DriverError::Bus(BusError::Timeout).is_communication());
        assert!(DriverError::NoResponse { requested: 1 }.is_communication());
        assert!(!DriverError::EmptyRequest.is_communication());
        assert!(!DriverError::Protocol(ProtocolError::InvalidHeader).is_communication());
    }

    /// 测试 From<ProtocolError> 转换
    #[test]
    fn test_from_protocol_error() {
        let driver_error: DriverError = ProtocolError::InvalidWidth(3).into();
        match driver_error {
            DriverError::Protocol(ProtocolError::InvalidWidth(width)) => assert_eq!(width, 3),
            other => panic!("Expected Protocol variant, got {:?}", other),
        }
    }
}
