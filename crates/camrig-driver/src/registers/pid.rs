//! 位置/速度环增益

use crate::{BulkReadResult, BusSerializer, DriverError};
use camrig_protocol::{AxisId, Register};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use tracing::info;

const GAIN_MAX: i32 = 16_383;
const POSITION_GAIN_RANGE: RangeInclusive<i32> = 0..=GAIN_MAX;
const VELOCITY_P_RANGE: RangeInclusive<i32> = 1_000..=GAIN_MAX;
const VELOCITY_I_RANGE: RangeInclusive<i32> = 1..=GAIN_MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionGains {
    pub p: i32,
    pub i: i32,
    pub d: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VelocityGains {
    pub p: i32,
    pub i: i32,
}

fn check(name: &'static str, value: i32, range: &RangeInclusive<i32>) -> Result<(), DriverError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(DriverError::GainOutOfRange {
            name,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

impl PositionGains {
    pub fn validate(&self) -> Result<(), DriverError> {
        check("position P", self.p, &POSITION_GAIN_RANGE)?;
        check("position I", self.i, &POSITION_GAIN_RANGE)?;
        check("position D", self.d, &POSITION_GAIN_RANGE)
    }
}

impl VelocityGains {
    pub fn validate(&self) -> Result<(), DriverError> {
        check("velocity P", self.p, &VELOCITY_P_RANGE)?;
        check("velocity I", self.i, &VELOCITY_I_RANGE)
    }
}

fn value(result: &BulkReadResult, id: &AxisId) -> Option<i32> {
    result.get(id).copied().flatten()
}

pub struct PidRegisters<'a> {
    bus: &'a BusSerializer,
}

impl<'a> PidRegisters<'a> {
    pub fn new(bus: &'a BusSerializer) -> Self {
        Self { bus }
    }

    /// 读位置环增益，任一寄存器缺失则该轴为 `None`
    pub fn position_gains(
        &self,
        axes: &[AxisId],
    ) -> Result<BTreeMap<AxisId, Option<PositionGains>>, DriverError> {
        let p = self.bus.bulk_read(axes, Register::POSITION_P_GAIN)?;
        let i = self.bus.bulk_read(axes, Register::POSITION_I_GAIN)?;
        let d = self.bus.bulk_read(axes, Register::POSITION_D_GAIN)?;
        Ok(axes
            .iter()
            .map(|id| {
                let gains = match (value(&p, id), value(&i, id), value(&d, id)) {
                    (Some(p), Some(i), Some(d)) => Some(PositionGains { p, i, d }),
                    _ => None,
                };
                (*id, gains)
            })
            .collect())
    }

    pub fn velocity_gains(
        &self,
        axes: &[AxisId],
    ) -> Result<BTreeMap<AxisId, Option<VelocityGains>>, DriverError> {
        let p = self.bus.bulk_read(axes, Register::VELOCITY_P_GAIN)?;
        let i = self.bus.bulk_read(axes, Register::VELOCITY_I_GAIN)?;
        Ok(axes
            .iter()
            .map(|id| {
                let gains = match (value(&p, id), value(&i, id)) {
                    (Some(p), Some(i)) => Some(VelocityGains { p, i }),
                    _ => None,
                };
                (*id, gains)
            })
            .collect())
    }

    /// 写位置环增益，所有值先校验，任一越界则不写入
    pub fn write_position_gains(&self, gains: &[(AxisId, PositionGains)]) -> Result<(), DriverError> {
        for (_, g) in gains {
            g.validate()?;
        }
        let p: SmallVec<[(AxisId, i32); 8]> = gains.iter().map(|(id, g)| (*id, g.p)).collect();
        let i: SmallVec<[(AxisId, i32); 8]> = gains.iter().map(|(id, g)| (*id, g.i)).collect();
        let d: SmallVec<[(AxisId, i32); 8]> = gains.iter().map(|(id, g)| (*id, g.d)).collect();
        self.bus.bulk_write(&p, Register::POSITION_P_GAIN)?;
        self.bus.bulk_write(&i, Register::POSITION_I_GAIN)?;
        self.bus.bulk_write(&d, Register::POSITION_D_GAIN)?;
        info!("Position gains written for {} axes", gains.len());
        Ok(())
    }

    /// 写速度环增益，P ∈ [1000, 16383]，I ∈ [1, 16383]
    pub fn write_velocity_gains(&self, gains: &[(AxisId, VelocityGains)]) -> Result<(), DriverError> {
        for (_, g) in gains {
            g.validate()?;
        }
        let p: SmallVec<[(AxisId, i32); 8]> = gains.iter().map(|(id, g)| (*id, g.p)).collect();
        let i: SmallVec<[(AxisId, i32); 8]> = gains.iter().map(|(id, g)| (*id, g.i)).collect();
        self.bus.bulk_write(&p, Register::VELOCITY_P_GAIN)?;
        self.bus.bulk_write(&i, Register::VELOCITY_I_GAIN)?;
        info!("Velocity gains written for {} axes", gains.len());
        Ok(())
    }
}
