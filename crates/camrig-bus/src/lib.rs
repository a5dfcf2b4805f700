//! # Camrig Bus
//!
//! 半双工舵机总线传输层抽象
//!
//! 上层（`camrig-driver`）只依赖 [`BusTransport`] trait，
//! 具体后端：
//! - `serial`: USB 串口适配器（默认）
//! - `mock`: 模拟舵机控制表，用于测试

use camrig_protocol::{ProtocolError, StatusPacket};
use std::time::Duration;
use thiserror::Error;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(feature = "serial")]
pub mod serial;

#[cfg(any(test, feature = "mock"))]
pub use mock::{BusEvent, BusEventKind, MockBus, MockTransport, WriteRecord};

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] BusDeviceError),
    #[error("Protocol Error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Read timeout")]
    Timeout,
    #[error("Port not open")]
    NotOpen,
}

impl BusError {
    /// 单个状态包损坏，事务可继续收集其余应答
    pub fn is_packet_level(&self) -> bool {
        matches!(self, BusError::Protocol(_))
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDeviceErrorKind {
    Unknown,
    NotFound,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    InvalidResponse,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct BusDeviceError {
    pub kind: BusDeviceErrorKind,
    pub message: String,
}

impl BusDeviceError {
    pub fn new(kind: BusDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            BusDeviceErrorKind::AccessDenied | BusDeviceErrorKind::NotFound
        )
    }
}

impl From<String> for BusDeviceError {
    fn from(message: String) -> Self {
        Self::new(BusDeviceErrorKind::Unknown, message)
    }
}

/// 半双工总线传输
///
/// 一次事务为 `discard_input` → `transmit` → 若干次 `receive`，
/// 事务的原子性由上层互斥锁保证，传输本身不做同步。
pub trait BusTransport: Send {
    /// 发送一个完整的指令包
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BusError>;

    /// 接收下一个状态包，超时返回 [`BusError::Timeout`]
    fn receive(&mut self) -> Result<StatusPacket, BusError>;

    fn set_receive_timeout(&mut self, _timeout: Duration) {}

    fn receive_timeout(&mut self, timeout: Duration) -> Result<StatusPacket, BusError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }

    /// 丢弃接收缓冲中的残留字节
    fn discard_input(&mut self) -> Result<(), BusError> {
        Ok(())
    }
}

impl<T: BusTransport + ?Sized> BusTransport for Box<T> {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        (**self).transmit(bytes)
    }

    fn receive(&mut self) -> Result<StatusPacket, BusError> {
        (**self).receive()
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        (**self).set_receive_timeout(timeout)
    }

    fn discard_input(&mut self) -> Result<(), BusError> {
        (**self).discard_input()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_error_display() {
        assert_eq!(BusError::Timeout.to_string(), "Read timeout");

        let err = BusError::Device(BusDeviceError::new(
            BusDeviceErrorKind::NotFound,
            "/dev/ttyUSB9",
        ));
        assert_eq!(err.to_string(), "Device Error: NotFound: /dev/ttyUSB9");

        let err: BusError = ProtocolError::InvalidHeader.into();
        assert!(err.is_packet_level());
        assert!(err.to_string().contains("Invalid packet header"));
    }

    #[test]
    fn test_device_error_fatal() {
        assert!(BusDeviceError::new(BusDeviceErrorKind::AccessDenied, "x").is_fatal());
        assert!(!BusDeviceError::new(BusDeviceErrorKind::Busy, "x").is_fatal());
        let err: BusDeviceError = "boom".to_string().into();
        assert_eq!(err.kind, BusDeviceErrorKind::Unknown);
    }
}
