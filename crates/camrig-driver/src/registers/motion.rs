//! 运动相关寄存器：位置、profile、力矩、零点

use crate::{BulkReadResult, BusSerializer, DriverError};
use camrig_protocol::{AxisId, Register};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub struct MotionRegisters<'a> {
    bus: &'a BusSerializer,
}

impl<'a> MotionRegisters<'a> {
    pub fn new(bus: &'a BusSerializer) -> Self {
        Self { bus }
    }

    pub fn present_positions(&self, axes: &[AxisId]) -> Result<BulkReadResult, DriverError> {
        self.bus.bulk_read(axes, Register::PRESENT_POSITION)
    }

    pub fn goal_positions(&self, axes: &[AxisId]) -> Result<BulkReadResult, DriverError> {
        self.bus.bulk_read(axes, Register::GOAL_POSITION)
    }

    /// 写目标位置，超出行程的值先限幅
    pub fn write_goal_positions(&self, goals: &[(AxisId, i32)]) -> Result<(), DriverError> {
        let clamped = self.clamp_each(goals, |limits, steps| limits.clamp_steps(steps), "goal position")?;
        self.bus.bulk_write(&clamped, Register::GOAL_POSITION)
    }

    /// 写 profile velocity，限制到 `[1, max_velocity_steps]`
    pub fn write_profile_velocities(&self, velocities: &[(AxisId, i32)]) -> Result<(), DriverError> {
        let clamped = self.clamp_each(
            velocities,
            |limits, velocity| limits.clamp_velocity(velocity),
            "profile velocity",
        )?;
        self.bus.bulk_write(&clamped, Register::PROFILE_VELOCITY)
    }

    pub fn write_profile_accelerations(
        &self,
        accelerations: &[(AxisId, i32)],
    ) -> Result<(), DriverError> {
        if let Some((axis, value)) = accelerations.iter().find(|(_, a)| *a < 0) {
            return Err(DriverError::InvalidInput(format!(
                "negative profile acceleration {value} for axis {axis}"
            )));
        }
        self.bus.bulk_write(accelerations, Register::PROFILE_ACCELERATION)
    }

    pub fn set_torque(&self, axes: &[AxisId], enabled: bool) -> Result<(), DriverError> {
        let values: SmallVec<[(AxisId, i32); 8]> =
            axes.iter().map(|&id| (id, i32::from(enabled))).collect();
        self.bus.bulk_write(&values, Register::TORQUE_ENABLE)?;
        info!("Torque {} for {:?}", if enabled { "enabled" } else { "disabled" }, axes);
        Ok(())
    }

    pub fn torque_states(&self, axes: &[AxisId]) -> Result<BTreeMap<AxisId, Option<bool>>, DriverError> {
        Ok(self
            .bus
            .bulk_read(axes, Register::TORQUE_ENABLE)?
            .into_iter()
            .map(|(id, value)| (id, value.map(|v| v != 0)))
            .collect())
    }

    /// 把当前位置设为零点
    ///
    /// 零点偏移在 EEPROM 区，写入前必须关闭力矩；返回新的偏移值。
    pub fn home_to_current(&self, axis: AxisId) -> Result<i32, DriverError> {
        self.bus.write(axis, Register::TORQUE_ENABLE, 0)?;
        let present = self.bus.read(axis, Register::PRESENT_POSITION)?;
        let previous = self.bus.read(axis, Register::HOMING_OFFSET)?;
        let offset = previous.checked_sub(present).ok_or_else(|| {
            DriverError::InvalidInput(format!("homing offset overflow for axis {axis}"))
        })?;
        self.bus.write(axis, Register::HOMING_OFFSET, offset)?;
        info!(
            "Axis {} homed: present {} → offset {} (was {})",
            axis, present, offset, previous
        );
        Ok(offset)
    }

    fn clamp_each(
        &self,
        values: &[(AxisId, i32)],
        clamp: impl Fn(&crate::AxisLimits, i32) -> i32,
        what: &str,
    ) -> Result<SmallVec<[(AxisId, i32); 8]>, DriverError> {
        let directory = self.bus.directory();
        values
            .iter()
            .map(|&(id, value)| {
                let entry = directory.entry_by_id(id).ok_or(DriverError::UnknownAxis(id))?;
                let clamped = clamp(&entry.limits, value);
                if clamped != value {
                    warn!(
                        "{} {} for {} out of range, clamped to {}",
                        what, value, entry.name, clamped
                    );
                } else {
                    debug!("{} {} for {}", what, value, entry.name);
                }
                Ok((id, clamped))
            })
            .collect()
    }
}
