//! 轴目录
//!
//! 逻辑轴名称与总线地址之间的双向映射，以及每个轴的物理限制。
//! 映射在启动时建立，之后只读。

use crate::DriverError;
use camrig_protocol::{AxisId, AxisName};
use camrig_tools::{ConfigError, RigConfig};
use std::collections::{BTreeMap, BTreeSet};

/// 单轴物理限制与单位换算
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub min_steps: i32,
    pub max_steps: i32,
    pub max_velocity_steps: i32,
    /// 每步对应的物理单位
    pub unit_per_step: f64,
    /// 零点偏移（物理单位）
    pub offset: f64,
}

impl AxisLimits {
    pub fn new(
        min_steps: i32,
        max_steps: i32,
        max_velocity_steps: i32,
        unit_per_step: f64,
        offset: f64,
    ) -> Result<Self, DriverError> {
        if min_steps > max_steps {
            return Err(DriverError::InvalidInput(format!(
                "min_steps {min_steps} exceeds max_steps {max_steps}"
            )));
        }
        if !(unit_per_step.is_finite() && unit_per_step > 0.0) {
            return Err(DriverError::InvalidInput(format!(
                "unit_per_step must be positive, got {unit_per_step}"
            )));
        }
        if max_velocity_steps < 1 {
            return Err(DriverError::InvalidInput(format!(
                "max_velocity_steps must be positive, got {max_velocity_steps}"
            )));
        }
        Ok(Self {
            min_steps,
            max_steps,
            max_velocity_steps,
            unit_per_step,
            offset,
        })
    }

    /// 限制到行程范围内，范围内的值原样返回
    #[inline]
    pub fn clamp_steps(&self, steps: i32) -> i32 {
        steps.clamp(self.min_steps, self.max_steps)
    }

    #[inline]
    pub fn contains(&self, steps: i32) -> bool {
        (self.min_steps..=self.max_steps).contains(&steps)
    }

    /// 限制 profile velocity 到 `[1, max_velocity_steps]`
    ///
    /// 舵机把 0 解释为不限速，因此下限为 1。
    #[inline]
    pub fn clamp_velocity(&self, velocity: i32) -> i32 {
        velocity.clamp(1, self.max_velocity_steps)
    }

    /// 物理单位 → 步数：`(units + offset) / unit_per_step`，四舍五入，未限幅
    pub fn to_steps(&self, units: f64) -> i32 {
        ((units + self.offset) / self.unit_per_step).round() as i32
    }

    /// 物理单位 → 限幅后的步数
    pub fn to_clamped_steps(&self, units: f64) -> i32 {
        self.clamp_steps(self.to_steps(units))
    }

    /// 步数 → 物理单位：`steps × unit_per_step − offset`
    pub fn to_units(&self, steps: i32) -> f64 {
        steps as f64 * self.unit_per_step - self.offset
    }

    /// 物理速度 → 步数/秒
    pub fn velocity_to_steps(&self, units_per_second: f64) -> f64 {
        units_per_second / self.unit_per_step
    }

    /// 行程范围对应的物理单位区间
    pub fn unit_range(&self) -> (f64, f64) {
        (self.to_units(self.min_steps), self.to_units(self.max_steps))
    }
}

/// 目录中的一个轴
#[derive(Debug, Clone, PartialEq)]
pub struct AxisEntry {
    pub name: AxisName,
    pub id: AxisId,
    pub limits: AxisLimits,
    /// 建议电流上限（mA）
    pub current_limit_ma: Option<f64>,
}

/// 轴名称 ↔ 总线地址的双射
#[derive(Debug, Clone, Default)]
pub struct AxisDirectory {
    by_name: BTreeMap<AxisName, AxisEntry>,
    by_id: BTreeMap<AxisId, AxisName>,
}

impl AxisDirectory {
    /// 建立目录，拒绝重复的名称或地址
    pub fn new(entries: impl IntoIterator<Item = AxisEntry>) -> Result<Self, DriverError> {
        let mut directory = Self::default();
        for entry in entries {
            if let Some(&first) = directory.by_id.get(&entry.id) {
                return Err(ConfigError::DuplicateAxisId {
                    id: entry.id.raw(),
                    first,
                    second: entry.name,
                }
                .into());
            }
            if directory.by_name.contains_key(&entry.name) {
                return Err(DriverError::InvalidInput(format!(
                    "axis {} configured twice",
                    entry.name
                )));
            }
            directory.by_id.insert(entry.id, entry.name);
            directory.by_name.insert(entry.name, entry);
        }
        Ok(directory)
    }

    pub fn from_config(config: &RigConfig) -> Result<Self, DriverError> {
        config.validate()?;
        let mut entries = Vec::with_capacity(config.axes.len());
        for (&name, settings) in &config.axes {
            entries.push(AxisEntry {
                name,
                id: AxisId::new(settings.id)?,
                limits: AxisLimits::new(
                    settings.min_steps,
                    settings.max_steps,
                    settings.max_velocity_steps,
                    settings.unit_per_step,
                    config.resolved_offset(name),
                )?,
                current_limit_ma: settings.current_limit_ma,
            });
        }
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn id(&self, name: AxisName) -> Option<AxisId> {
        self.by_name.get(&name).map(|e| e.id)
    }

    pub fn name(&self, id: AxisId) -> Option<AxisName> {
        self.by_id.get(&id).copied()
    }

    pub fn entry(&self, name: AxisName) -> Option<&AxisEntry> {
        self.by_name.get(&name)
    }

    pub fn entry_by_id(&self, id: AxisId) -> Option<&AxisEntry> {
        self.name(id).and_then(|name| self.by_name.get(&name))
    }

    pub fn limits(&self, name: AxisName) -> Option<&AxisLimits> {
        self.by_name.get(&name).map(|e| &e.limits)
    }

    pub fn contains(&self, name: AxisName) -> bool {
        self.by_name.contains_key(&name)
    }

    /// 按名称顺序遍历
    pub fn entries(&self) -> impl Iterator<Item = &AxisEntry> {
        self.by_name.values()
    }

    pub fn ids(&self) -> Vec<AxisId> {
        self.by_name.values().map(|e| e.id).collect()
    }

    /// 名称列表 → 地址列表
    pub fn resolve(&self, names: &[AxisName]) -> Result<Vec<AxisId>, DriverError> {
        names
            .iter()
            .map(|&name| self.id(name).ok_or(DriverError::UnknownAxisName(name)))
            .collect()
    }

    /// 校验请求地址：非空、均在目录中、无重复
    pub fn validate_request<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a AxisId>,
    ) -> Result<usize, DriverError> {
        let mut seen = BTreeSet::new();
        for id in ids {
            if !self.by_id.contains_key(id) {
                return Err(DriverError::UnknownAxis(*id));
            }
            if !seen.insert(*id) {
                return Err(DriverError::DuplicateAxis(*id));
            }
        }
        if seen.is_empty() {
            return Err(DriverError::EmptyRequest);
        }
        Ok(seen.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(raw: u8) -> AxisId {
        AxisId::new(raw).unwrap()
    }

    fn pan_limits() -> AxisLimits {
        AxisLimits::new(760, 3900, 1800, 360.0 / 4096.0, 180.0).unwrap()
    }

    #[test]
    fn test_unit_conversion() {
        let limits = pan_limits();
        assert_eq!(limits.to_steps(0.0), 2048);
        assert_eq!(limits.to_units(2048), 0.0);
        assert_eq!(limits.to_steps(90.0), 3072);

        let slider = AxisLimits::new(0, 89_600, 2000, 64.0 / 4096.0, 0.0).unwrap();
        assert_eq!(slider.to_steps(100.0), 6400);
        assert_eq!(slider.to_units(6400), 100.0);
    }

    #[test]
    fn test_clamping() {
        let limits = pan_limits();
        assert_eq!(limits.clamp_steps(100), 760);
        assert_eq!(limits.clamp_steps(5000), 3900);
        assert_eq!(limits.to_clamped_steps(-179.0), 760);
        assert_eq!(limits.clamp_velocity(0), 1);
        assert_eq!(limits.clamp_velocity(9000), 1800);
    }

    #[test]
    fn test_invalid_limits() {
        assert!(AxisLimits::new(10, 0, 100, 1.0, 0.0).is_err());
        assert!(AxisLimits::new(0, 10, 100, 0.0, 0.0).is_err());
        assert!(AxisLimits::new(0, 10, 0, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_directory_from_default_config() {
        let directory = AxisDirectory::from_config(&RigConfig::default()).unwrap();
        assert_eq!(directory.len(), 6);
        assert_eq!(directory.id(AxisName::Slider), Some(id(2)));
        assert_eq!(directory.name(id(4)), Some(AxisName::Tilt));
        assert_eq!(directory.limits(AxisName::Tilt).unwrap().offset, 180.0);
        assert_eq!(
            directory.resolve(&[AxisName::Pan, AxisName::Tilt]).unwrap(),
            vec![id(3), id(4)]
        );
    }

    #[test]
    fn test_directory_rejects_duplicate_id() {
        let limits = pan_limits();
        let result = AxisDirectory::new([
            AxisEntry {
                name: AxisName::Pan,
                id: id(3),
                limits,
                current_limit_ma: None,
            },
            AxisEntry {
                name: AxisName::Tilt,
                id: id(3),
                limits,
                current_limit_ma: None,
            },
        ]);
        assert!(matches!(
            result,
            Err(DriverError::Config(ConfigError::DuplicateAxisId { id: 3, .. }))
        ));
    }

    #[test]
    fn test_validate_request() {
        let directory = AxisDirectory::from_config(&RigConfig::default()).unwrap();
        assert_eq!(directory.validate_request(&[id(1), id(2)]).unwrap(), 2);
        assert!(matches!(
            directory.validate_request(&[]),
            Err(DriverError::EmptyRequest)
        ));
        assert!(matches!(
            directory.validate_request(&[id(1), id(1)]),
            Err(DriverError::DuplicateAxis(_))
        ));
        assert!(matches!(
            directory.validate_request(&[id(9)]),
            Err(DriverError::UnknownAxis(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_clamp_is_noop_inside_and_idempotent(
            min in -100_000i32..100_000,
            span in 0i32..100_000,
            value in any::<i32>(),
        ) {
            let limits = AxisLimits::new(min, min + span, 100, 1.0, 0.0).unwrap();
            let clamped = limits.clamp_steps(value);
            prop_assert!(limits.contains(clamped));
            prop_assert_eq!(limits.clamp_steps(clamped), clamped);
            if limits.contains(value) {
                prop_assert_eq!(clamped, value);
            }
        }
    }
}
