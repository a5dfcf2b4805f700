//! 配置加载与总线连接
//!
//! 配置文件查找顺序：`--config` 参数 → `~/.config/camrig/camrig.toml` → 内置默认值。

use anyhow::{Context, Result};
use camrig_bus::MockBus;
use camrig_driver::{BusBuilder, BusSerializer};
use camrig_protocol::{AxisId, AxisName};
use camrig_tools::RigConfig;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// 所有命令共用的连接参数
#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// 配置文件路径
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 串口设备（覆盖配置）
    #[arg(short, long, global = true)]
    pub port: Option<String>,

    /// 使用模拟总线，不访问硬件
    #[arg(long, global = true)]
    pub mock: bool,
}

/// 默认配置文件位置
pub fn default_config_path() -> Result<PathBuf> {
    let mut path = dirs::config_dir().ok_or_else(|| anyhow::anyhow!("无法确定配置目录"))?;
    path.push("camrig");
    path.push("camrig.toml");
    Ok(path)
}

impl ConnectionArgs {
    /// 实际使用的配置文件；不存在时返回 `None`
    pub fn config_path(&self) -> Result<Option<PathBuf>> {
        match &self.config {
            Some(path) => Ok(Some(path.clone())),
            None => {
                let path = default_config_path()?;
                Ok(path.exists().then_some(path))
            },
        }
    }

    pub fn load_config(&self) -> Result<RigConfig> {
        match self.config_path()? {
            Some(path) => load_config_file(&path),
            None => {
                info!("No config file found, using defaults");
                Ok(RigConfig::default())
            },
        }
    }

    /// 加载配置并建立总线
    pub fn connect(&self) -> Result<Connection> {
        let mut config = self.load_config()?;
        if let Some(port) = &self.port {
            config.bus.port = port.clone();
        }

        let mut builder = BusBuilder::from_config(&config)?;
        let mock = if self.mock {
            let bus = MockBus::with_servos(config.axes.values().map(|a| a.id));
            builder = builder.transport(Box::new(bus.transport()));
            println!("🧪 使用模拟总线");
            Some(bus)
        } else {
            println!("🔌 打开串口 {} @ {} baud", config.bus.port, config.bus.baud_rate);
            None
        };
        let bus = Arc::new(builder.build()?);
        Ok(Connection { bus, config, mock })
    }
}

fn load_config_file(path: &Path) -> Result<RigConfig> {
    let config = RigConfig::load_from_file(path)
        .with_context(|| format!("加载配置文件失败: {}", path.display()))?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// 已打开的总线与对应配置
pub struct Connection {
    pub bus: Arc<BusSerializer>,
    pub config: RigConfig,
    /// 模拟模式下的总线句柄
    pub mock: Option<MockBus>,
}

impl Connection {
    /// 解析轴参数；为空时返回目录中的全部轴
    pub fn resolve_axes(&self, names: &[AxisName]) -> Result<Vec<(AxisName, AxisId)>> {
        let directory = self.bus.directory();
        if names.is_empty() {
            return Ok(directory.entries().map(|e| (e.name, e.id)).collect());
        }
        names
            .iter()
            .map(|&name| {
                directory
                    .id(name)
                    .map(|id| (name, id))
                    .ok_or_else(|| anyhow::anyhow!("轴 {} 未配置", name))
            })
            .collect()
    }
}
