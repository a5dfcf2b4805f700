//! USB 串口后端
//!
//! 通过 `serialport` 打开适配器，接收侧用 [`StatusFramer`] 从字节流切分状态包。

use crate::{BusDeviceError, BusDeviceErrorKind, BusError, BusTransport};
use camrig_protocol::{StatusFramer, StatusPacket};
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 默认串口设备
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// 默认波特率
pub const DEFAULT_BAUD_RATE: u32 = 2_000_000;

/// 单次 `read` 的阻塞上限，整体超时由 `receive` 自行计时
const POLL_INTERVAL: Duration = Duration::from_millis(2);

const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(20);

impl From<serialport::Error> for BusDeviceError {
    fn from(err: serialport::Error) -> Self {
        let kind = match err.kind() {
            serialport::ErrorKind::NoDevice => BusDeviceErrorKind::NotFound,
            serialport::ErrorKind::InvalidInput => BusDeviceErrorKind::UnsupportedConfig,
            serialport::ErrorKind::Io(ErrorKind::PermissionDenied) => {
                BusDeviceErrorKind::AccessDenied
            },
            serialport::ErrorKind::Io(ErrorKind::WouldBlock) => BusDeviceErrorKind::Busy,
            serialport::ErrorKind::Io(_) => BusDeviceErrorKind::Backend,
            serialport::ErrorKind::Unknown => BusDeviceErrorKind::Unknown,
        };
        BusDeviceError::new(kind, err.to_string())
    }
}

impl From<serialport::Error> for BusError {
    fn from(err: serialport::Error) -> Self {
        BusError::Device(err.into())
    }
}

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    framer: StatusFramer,
    receive_timeout: Duration,
    read_buf: [u8; 256],
}

impl SerialTransport {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, BusError> {
        let port = serialport::new(path, baud_rate)
            .timeout(POLL_INTERVAL)
            .open()?;
        debug!("Opened serial bus {} at {} baud", path, baud_rate);
        Ok(Self {
            port,
            framer: StatusFramer::new(),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            read_buf: [0u8; 256],
        })
    }
}

impl BusTransport for SerialTransport {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        trace!("TX {} bytes", bytes.len());
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<StatusPacket, BusError> {
        let deadline = Instant::now() + self.receive_timeout;
        loop {
            if let Some(result) = self.framer.try_extract_packet() {
                return result.map_err(BusError::from);
            }
            if Instant::now() >= deadline {
                return Err(BusError::Timeout);
            }
            match self.port.read(&mut self.read_buf) {
                Ok(0) => {},
                Ok(n) => {
                    trace!("RX {} bytes", n);
                    self.framer.push_bytes(&self.read_buf[..n]);
                },
                Err(e) if e.kind() == ErrorKind::TimedOut => {},
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.receive_timeout = timeout;
    }

    fn discard_input(&mut self) -> Result<(), BusError> {
        self.framer.clear();
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
