//! # Camrig Tools - 共享数据结构
//!
//! **依赖原则**: 只依赖 `camrig-protocol`，不依赖驱动层与运动层
//!
//! ## 包含模块
//!
//! - `config` - 云台配置（TOML）
//! - `focus` - 对焦点与对焦点存储
//! - `profile` - 运动轨迹文件格式

pub mod config;
pub mod focus;
pub mod profile;

pub use config::*;
pub use focus::*;
pub use profile::*;

use camrig_protocol::AxisName;
use thiserror::Error;

/// 配置与数据文件错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Axis id {id} assigned to both {first} and {second}")]
    DuplicateAxisId {
        id: u8,
        first: AxisName,
        second: AxisName,
    },

    #[error("Axis {0} is not configured")]
    MissingAxis(AxisName),
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
