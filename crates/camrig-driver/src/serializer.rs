//! 总线串行化器
//!
//! 半双工总线上同一时刻只能有一个事务。`BusSerializer` 用一把互斥锁
//! 覆盖完整的请求：清空接收缓冲、构建指令包、发送、收集应答、解析，
//! 锁释放前事务一定已经结束。
//!
//! 批量读对单个轴的缺失或损坏应答是容忍的：该轴的结果为 `None`。
//! 传输失败直接返回错误，不做重试。

use crate::metrics::BusMetrics;
use crate::{AxisDirectory, DriverError};
use camrig_bus::{BusError, BusTransport};
use camrig_protocol::{AxisId, InstructionPacket, Register, StatusPacket, decode_value};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// 批量读结果：每个请求的轴一项，`None` 表示该轴本次缺失
pub type BulkReadResult = BTreeMap<AxisId, Option<i32>>;

/// 串行化器配置
#[derive(Debug, Clone, Copy)]
pub struct SerializerConfig {
    /// 等待应答的超时
    pub receive_timeout: Duration,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_millis(20),
        }
    }
}

pub struct BusSerializer {
    transport: Mutex<Box<dyn BusTransport>>,
    directory: Arc<AxisDirectory>,
    metrics: Arc<BusMetrics>,
    config: SerializerConfig,
}

impl BusSerializer {
    pub fn new(
        transport: Box<dyn BusTransport>,
        directory: Arc<AxisDirectory>,
        config: SerializerConfig,
    ) -> Self {
        Self {
            transport: Mutex::new(transport),
            directory,
            metrics: Arc::new(BusMetrics::new()),
            config,
        }
    }

    pub fn directory(&self) -> &Arc<AxisDirectory> {
        &self.directory
    }

    pub fn metrics(&self) -> &Arc<BusMetrics> {
        &self.metrics
    }

    /// 从多个轴读取同一个寄存器
    pub fn bulk_read(
        &self,
        axes: &[AxisId],
        register: Register,
    ) -> Result<BulkReadResult, DriverError> {
        self.directory.validate_request(axes)?;
        let requests: SmallVec<[(AxisId, Register); 8]> =
            axes.iter().map(|&id| (id, register)).collect();

        let mut transport = self.transport.lock();
        BusMetrics::bump(&self.metrics.transactions);
        BusMetrics::bump(&self.metrics.bulk_reads);

        let packet = InstructionPacket::bulk_read(&requests)?;
        let mut results: BulkReadResult = axes.iter().map(|&id| (id, None)).collect();
        let responded = self
            .exchange(&mut **transport, &packet, axes.len(), |status| {
                let Ok(id) = AxisId::new(status.id) else {
                    return false;
                };
                let Some(slot) = results.get_mut(&id) else {
                    trace!("Ignoring status from unrequested axis {}", id);
                    return false;
                };
                if slot.is_some() {
                    return false;
                }
                if let Some(code) = status.error_code() {
                    warn!("Axis {} answered bulk read with error {:?}", id, code);
                    return true;
                }
                match decode_value(&status.params, register.width) {
                    Ok(value) => *slot = Some(value),
                    Err(e) => warn!("Axis {} returned malformed data: {}", id, e),
                }
                true
            })
            .inspect_err(|_| BusMetrics::bump(&self.metrics.communication_errors))?;
        drop(transport);

        if responded == 0 {
            BusMetrics::bump(&self.metrics.communication_errors);
            return Err(DriverError::NoResponse {
                requested: axes.len(),
            });
        }

        let absent = results.values().filter(|v| v.is_none()).count();
        if absent > 0 {
            BusMetrics::bump(&self.metrics.partial_reads);
            self.metrics
                .absent_results
                .fetch_add(absent as u64, std::sync::atomic::Ordering::Relaxed);
            trace!(
                "Bulk read of {:?}: {} of {} axes absent",
                register,
                absent,
                axes.len()
            );
        }
        Ok(results)
    }

    /// 向多个轴写入同一个寄存器（各轴取值不同），无应答
    pub fn bulk_write(&self, values: &[(AxisId, i32)], register: Register) -> Result<(), DriverError> {
        self.directory.validate_request(values.iter().map(|(id, _)| id))?;
        let entries: SmallVec<[(AxisId, Register, i32); 8]> =
            values.iter().map(|&(id, value)| (id, register, value)).collect();

        let mut transport = self.transport.lock();
        BusMetrics::bump(&self.metrics.transactions);
        BusMetrics::bump(&self.metrics.bulk_writes);

        let packet = InstructionPacket::bulk_write(&entries)?;
        self.exchange(&mut **transport, &packet, 0, |_| false)
            .inspect_err(|_| BusMetrics::bump(&self.metrics.communication_errors))?;
        Ok(())
    }

    /// 单轴读
    pub fn read(&self, axis: AxisId, register: Register) -> Result<i32, DriverError> {
        let status = self.transact_single(InstructionPacket::read(axis, register), axis)?;
        Ok(decode_value(&status.params, register.width)?)
    }

    /// 单轴写，等待舵机确认
    pub fn write(&self, axis: AxisId, register: Register, value: i32) -> Result<(), DriverError> {
        self.transact_single(InstructionPacket::write(axis, register, value)?, axis)?;
        Ok(())
    }

    /// Ping，返回型号
    pub fn ping(&self, axis: AxisId) -> Result<u16, DriverError> {
        let status = self.transact_single(InstructionPacket::ping(axis), axis)?;
        match status.params.as_slice() {
            [lo, hi, ..] => Ok(camrig_protocol::makeword(*lo, *hi)),
            _ => Err(DriverError::InvalidInput(format!(
                "ping reply from {} too short",
                axis
            ))),
        }
    }

    fn transact_single(
        &self,
        packet: InstructionPacket,
        axis: AxisId,
    ) -> Result<StatusPacket, DriverError> {
        self.directory.validate_request(&[axis])?;

        let mut transport = self.transport.lock();
        BusMetrics::bump(&self.metrics.transactions);

        let mut reply = None;
        self.exchange(&mut **transport, &packet, 1, |status| {
            if status.id != axis.raw() {
                return false;
            }
            reply = Some(status.clone());
            true
        })
        .inspect_err(|_| BusMetrics::bump(&self.metrics.communication_errors))?;
        drop(transport);

        let Some(status) = reply else {
            BusMetrics::bump(&self.metrics.communication_errors);
            return Err(DriverError::NoResponse { requested: 1 });
        };
        if status.error_code().is_some() {
            return Err(DriverError::DeviceStatus {
                axis,
                code: status.error,
            });
        }
        Ok(status)
    }

    /// 在已持有锁的传输上完成一次事务
    ///
    /// `accept` 返回 `true` 表示该状态包计入期望的应答数。
    /// 返回被接受的应答数；超时即结束收集。
    fn exchange(
        &self,
        transport: &mut dyn BusTransport,
        packet: &InstructionPacket,
        expected: usize,
        mut accept: impl FnMut(&StatusPacket) -> bool,
    ) -> Result<usize, DriverError> {
        transport.discard_input()?;
        transport.set_receive_timeout(self.config.receive_timeout);
        transport.transmit(&packet.to_bytes())?;

        let mut accepted = 0;
        while accepted < expected {
            match transport.receive() {
                Ok(status) => {
                    if accept(&status) {
                        accepted += 1;
                    }
                },
                Err(BusError::Timeout) => break,
                Err(e) if e.is_packet_level() => {
                    BusMetrics::bump(&self.metrics.corrupt_packets);
                    warn!("Dropping corrupt status packet: {}", e);
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(accepted)
    }
}
