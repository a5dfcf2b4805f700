//! 温度、电压、电流读数
//!
//! 电流上限只用于告警，不会切断力矩。

use crate::{BusSerializer, DriverError};
use camrig_protocol::{AxisId, Register, as_signed_word};
use std::collections::BTreeMap;
use tracing::warn;

/// 单轴状态读数，缺失的寄存器为 `None`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisStatus {
    pub temperature_c: Option<i32>,
    pub voltage_v: Option<f64>,
    pub current_ma: Option<f64>,
}

/// 电流超过建议上限
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitWarning {
    pub axis: AxisId,
    pub current_ma: f64,
    pub limit_ma: f64,
}

pub struct StatusRegisters<'a> {
    bus: &'a BusSerializer,
    current_ma_per_unit: f64,
}

impl<'a> StatusRegisters<'a> {
    /// `current_ma_per_unit` 为电流寄存器的换算系数（需标定）
    pub fn new(bus: &'a BusSerializer, current_ma_per_unit: f64) -> Self {
        Self {
            bus,
            current_ma_per_unit,
        }
    }

    pub fn temperatures(&self, axes: &[AxisId]) -> Result<BTreeMap<AxisId, Option<i32>>, DriverError> {
        self.bus.bulk_read(axes, Register::PRESENT_TEMPERATURE)
    }

    /// 电压（V），寄存器单位 0.1 V
    pub fn voltages(&self, axes: &[AxisId]) -> Result<BTreeMap<AxisId, Option<f64>>, DriverError> {
        Ok(self
            .bus
            .bulk_read(axes, Register::PRESENT_VOLTAGE)?
            .into_iter()
            .map(|(id, raw)| (id, raw.map(|v| v as f64 / 10.0)))
            .collect())
    }

    /// 电流（mA），寄存器为有符号 16 位
    pub fn currents(&self, axes: &[AxisId]) -> Result<BTreeMap<AxisId, Option<f64>>, DriverError> {
        let scale = self.current_ma_per_unit;
        Ok(self
            .bus
            .bulk_read(axes, Register::PRESENT_CURRENT)?
            .into_iter()
            .map(|(id, raw)| (id, raw.map(|v| as_signed_word(v) as f64 * scale)))
            .collect())
    }

    pub fn snapshot(&self, axes: &[AxisId]) -> Result<BTreeMap<AxisId, AxisStatus>, DriverError> {
        let temperatures = self.temperatures(axes)?;
        let voltages = self.voltages(axes)?;
        let currents = self.currents(axes)?;
        Ok(axes
            .iter()
            .map(|id| {
                let status = AxisStatus {
                    temperature_c: temperatures.get(id).copied().flatten(),
                    voltage_v: voltages.get(id).copied().flatten(),
                    current_ma: currents.get(id).copied().flatten(),
                };
                (*id, status)
            })
            .collect())
    }

    /// 与目录中的建议电流上限比较
    pub fn check_limits(&self, snapshot: &BTreeMap<AxisId, AxisStatus>) -> Vec<LimitWarning> {
        let directory = self.bus.directory();
        let mut warnings = Vec::new();
        for (&axis, status) in snapshot {
            let (Some(current_ma), Some(limit_ma)) = (
                status.current_ma,
                directory.entry_by_id(axis).and_then(|e| e.current_limit_ma),
            ) else {
                continue;
            };
            if current_ma.abs() > limit_ma {
                warn!(
                    "Axis {} current {:.0} mA exceeds advisory limit {:.0} mA",
                    axis, current_ma, limit_ma
                );
                warnings.push(LimitWarning {
                    axis,
                    current_ma,
                    limit_ma,
                });
            }
        }
        warnings
    }
}
