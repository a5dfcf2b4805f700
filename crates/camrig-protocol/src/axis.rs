//! 轴标识
//!
//! 逻辑轴名称（`AxisName`）是整个工作区唯一的轴名称来源，
//! 总线地址（`AxisId`）由轴目录在启动时与名称一一绑定。

use crate::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// 总线广播地址
pub const BROADCAST_ID: u8 = 0xFE;

/// 单个舵机可用的最大地址
pub const MAX_DEVICE_ID: u8 = 0xFC;

/// 舵机总线地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct AxisId(u8);

impl AxisId {
    /// 创建地址，拒绝广播地址与保留地址
    pub fn new(id: u8) -> Result<Self, ProtocolError> {
        if id > MAX_DEVICE_ID {
            return Err(ProtocolError::InvalidAxisId(id));
        }
        Ok(Self(id))
    }

    #[inline]
    pub const fn raw(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for AxisId {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AxisId> for u8 {
    fn from(id: AxisId) -> Self {
        id.0
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 逻辑轴名称
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AxisName {
    /// 转台（角度）
    Turntable,
    /// 滑轨（毫米）
    Slider,
    /// 水平摇头（角度）
    Pan,
    /// 俯仰（角度）
    Tilt,
    /// 变焦
    Zoom,
    /// 对焦
    Focus,
}

impl AxisName {
    pub const ALL: [AxisName; 6] = [
        AxisName::Turntable,
        AxisName::Slider,
        AxisName::Pan,
        AxisName::Tilt,
        AxisName::Zoom,
        AxisName::Focus,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            AxisName::Turntable => "turntable",
            AxisName::Slider => "slider",
            AxisName::Pan => "pan",
            AxisName::Tilt => "tilt",
            AxisName::Zoom => "zoom",
            AxisName::Focus => "focus",
        }
    }

    /// 出厂接线时的默认总线地址
    pub const fn default_id(self) -> AxisId {
        match self {
            AxisName::Turntable => AxisId(1),
            AxisName::Slider => AxisId(2),
            AxisName::Pan => AxisId(3),
            AxisName::Tilt => AxisId(4),
            AxisName::Zoom => AxisId(5),
            AxisName::Focus => AxisId(6),
        }
    }

    /// 物理单位是否为角度
    pub const fn is_angular(self) -> bool {
        matches!(
            self,
            AxisName::Turntable | AxisName::Pan | AxisName::Tilt
        )
    }
}

impl fmt::Display for AxisName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AxisName {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AxisName::ALL
            .into_iter()
            .find(|axis| axis.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ProtocolError::UnknownAxis(s.to_string()))
    }
}
