//! Builder 模式实现
//!
//! 链式构造 [`BusSerializer`]：串口参数、轴目录，或直接注入传输对象（测试用）。

use crate::serializer::SerializerConfig;
use crate::{AxisDirectory, BusSerializer, DriverError};
use camrig_bus::BusTransport;
use camrig_tools::RigConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 串行化器 Builder
///
/// # Example
///
/// ```no_run
/// use camrig_driver::BusBuilder;
/// use camrig_tools::RigConfig;
///
/// let config = RigConfig::default();
/// let bus = BusBuilder::from_config(&config)
///     .unwrap()
///     .port("/dev/ttyUSB1")
///     .build()
///     .unwrap();
/// ```
#[derive(Default)]
pub struct BusBuilder {
    port: Option<String>,
    baud_rate: Option<u32>,
    receive_timeout: Option<Duration>,
    directory: Option<Arc<AxisDirectory>>,
    transport: Option<Box<dyn BusTransport>>,
}

impl BusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从配置读取串口参数并建立轴目录
    pub fn from_config(config: &RigConfig) -> Result<Self, DriverError> {
        let directory = AxisDirectory::from_config(config)?;
        Ok(Self {
            port: Some(config.bus.port.clone()),
            baud_rate: Some(config.bus.baud_rate),
            receive_timeout: Some(Duration::from_millis(config.bus.receive_timeout_ms)),
            directory: Some(Arc::new(directory)),
            transport: None,
        })
    }

    /// 设置串口设备（可选，默认 `/dev/ttyUSB0`）
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// 设置波特率（可选，默认 2 Mbaud）
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    pub fn directory(mut self, directory: Arc<AxisDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// 使用给定的传输对象，不再打开串口
    pub fn transport(mut self, transport: Box<dyn BusTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<BusSerializer, DriverError> {
        let directory = match self.directory {
            Some(directory) => directory,
            None => Arc::new(AxisDirectory::from_config(&RigConfig::default())?),
        };
        let mut config = SerializerConfig::default();
        if let Some(timeout) = self.receive_timeout {
            config.receive_timeout = timeout;
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => Self::open_serial(self.port, self.baud_rate)?,
        };

        info!("Bus serializer ready with {} axes", directory.len());
        Ok(BusSerializer::new(transport, directory, config))
    }

    #[cfg(feature = "serial")]
    fn open_serial(
        port: Option<String>,
        baud_rate: Option<u32>,
    ) -> Result<Box<dyn BusTransport>, DriverError> {
        use camrig_bus::serial::{DEFAULT_BAUD_RATE, DEFAULT_PORT, SerialTransport};

        let port = port.unwrap_or_else(|| DEFAULT_PORT.to_string());
        let transport = SerialTransport::open(&port, baud_rate.unwrap_or(DEFAULT_BAUD_RATE))?;
        Ok(Box::new(transport))
    }

    #[cfg(not(feature = "serial"))]
    fn open_serial(
        _port: Option<String>,
        _baud_rate: Option<u32>,
    ) -> Result<Box<dyn BusTransport>, DriverError> {
        Err(DriverError::InvalidInput(
            "serial backend disabled; inject a transport".to_string(),
        ))
    }
}
