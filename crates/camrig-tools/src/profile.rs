//! # 运动轨迹文件
//!
//! 轨迹由若干路点组成，每个路点给出部分轴的目标（物理单位）
//! 以及到达该路点所用的时间。

use crate::ConfigError;
use camrig_protocol::AxisName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 未指定时每段的默认时长
pub const DEFAULT_SEGMENT_DURATION_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub points: Vec<ProfilePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilePoint {
    /// 各轴目标（度或毫米）
    pub positions: BTreeMap<AxisName, f64>,
    /// 速度提示（物理单位/秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
    /// 加速度提示（物理单位/秒²）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<f64>,
    /// 从上一个路点到达本路点的时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_point_id: Option<u32>,
}

impl ProfilePoint {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms.unwrap_or(DEFAULT_SEGMENT_DURATION_MS))
    }
}

impl Profile {
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let profile: Profile = serde_json::from_str(content)?;
        if profile.points.is_empty() {
            return Err(ConfigError::invalid("points", "profile has no points"));
        }
        if profile.total_duration().is_none() {
            return Err(ConfigError::invalid("duration_ms", "total profile duration overflows"));
        }
        Ok(profile)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// 整条轨迹的时长
    ///
    /// 轨迹从第一个路点出发，因此第一个路点的时长只在单点轨迹中使用。
    /// 各段之和溢出时返回 `None`。
    pub fn total_duration(&self) -> Option<Duration> {
        match self.points.as_slice() {
            [] => Some(Duration::ZERO),
            [only] => Some(only.duration()),
            [_, rest @ ..] => rest
                .iter()
                .try_fold(Duration::ZERO, |total, point| total.checked_add(point.duration())),
        }
    }

    /// 第一个引用对焦点的路点
    pub fn first_focus_point_id(&self) -> Option<u32> {
        self.points.iter().find_map(|p| p.focus_point_id)
    }
}
