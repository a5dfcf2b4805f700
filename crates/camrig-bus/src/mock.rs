//! Mock 总线
//!
//! 为每个舵机模拟一张控制表，按真实帧格式解析指令包并生成状态包，
//! 支持静默设备（不应答）、故障注入、应答延迟和事务事件记录。
//!
//! [`MockBus`] 是共享句柄，测试代码可以在传输层被上层独占时继续检查状态。

use crate::{BusError, BusTransport};
use camrig_protocol::{
    AxisId, Instruction, InstructionPacket, Register, RegisterWidth, StatusPacket, decode_value,
    encode_value, makeword,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

const CONTROL_TABLE_SIZE: usize = 256;

/// X 系列舵机型号（XM430-W350）
const MOCK_MODEL_NUMBER: i32 = 1020;
const MOCK_FIRMWARE_VERSION: u8 = 45;

/// 传输层事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEventKind {
    Discard,
    Transmit(Instruction),
    Receive,
}

/// 带线程标识的传输层事件
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub kind: BusEventKind,
    pub thread: ThreadId,
    pub at: Instant,
}

/// 一次寄存器写入记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub id: u8,
    pub address: u16,
    pub value: i32,
}

struct MockServo {
    table: [u8; CONTROL_TABLE_SIZE],
}

impl MockServo {
    fn new() -> Self {
        let mut servo = Self {
            table: [0u8; CONTROL_TABLE_SIZE],
        };
        servo.store(Register::MODEL_NUMBER, MOCK_MODEL_NUMBER);
        servo.store(Register::PRESENT_TEMPERATURE, 35);
        servo.store(Register::PRESENT_VOLTAGE, 120);
        servo
    }

    fn store(&mut self, register: Register, value: i32) {
        if let Ok(bytes) = encode_value(value, register.width) {
            self.write_bytes(register.address, &bytes);
        }
    }

    fn load(&self, register: Register) -> i32 {
        let start = register.address as usize;
        decode_value(&self.table[start..start + register.len()], register.width).unwrap_or(0)
    }

    fn write_bytes(&mut self, address: u16, data: &[u8]) -> bool {
        let start = address as usize;
        match self.table.get_mut(start..start + data.len()) {
            Some(slot) => {
                slot.copy_from_slice(data);
                true
            },
            None => false,
        }
    }

    fn read_bytes(&self, address: u16, len: usize) -> Option<Vec<u8>> {
        let start = address as usize;
        self.table.get(start..start + len).map(<[u8]>::to_vec)
    }
}

struct MockBusInner {
    servos: BTreeMap<u8, MockServo>,
    silent: BTreeSet<u8>,
    fail_transmits: u32,
    fail_writes: u32,
    fail_all: bool,
    follow_goal: bool,
    response_delay: Duration,
    events: Vec<BusEvent>,
    writes: Vec<WriteRecord>,
}

/// 模拟总线的共享句柄
#[derive(Clone)]
pub struct MockBus {
    inner: Arc<Mutex<MockBusInner>>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockBusInner {
                servos: BTreeMap::new(),
                silent: BTreeSet::new(),
                fail_transmits: 0,
                fail_writes: 0,
                fail_all: false,
                follow_goal: true,
                response_delay: Duration::ZERO,
                events: Vec::new(),
                writes: Vec::new(),
            })),
        }
    }
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建挂有给定舵机的总线
    pub fn with_servos(ids: impl IntoIterator<Item = u8>) -> Self {
        let bus = Self::new();
        for id in ids {
            bus.add_servo(id);
        }
        bus
    }

    /// 创建连接到本总线的传输对象
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            bus: self.clone(),
            pending: VecDeque::new(),
        }
    }

    pub fn add_servo(&self, id: u8) {
        self.inner.lock().servos.insert(id, MockServo::new());
    }

    /// 静默的舵机收到指令但不应答
    pub fn set_silent(&self, id: u8, silent: bool) {
        let mut inner = self.inner.lock();
        if silent {
            inner.silent.insert(id);
        } else {
            inner.silent.remove(&id);
        }
    }

    /// 接下来 `count` 次发送返回 IO 错误
    pub fn fail_next_transmits(&self, count: u32) {
        self.inner.lock().fail_transmits = count;
    }

    /// 接下来 `count` 次写指令（Write/BulkWrite）发送失败，读指令不受影响
    pub fn fail_next_writes(&self, count: u32) {
        self.inner.lock().fail_writes = count;
    }

    /// 所有发送都返回 IO 错误（模拟拔线）
    pub fn set_disconnected(&self, disconnected: bool) {
        self.inner.lock().fail_all = disconnected;
    }

    /// 写入目标位置后当前位置是否立即跟随
    pub fn set_follow_goal(&self, follow: bool) {
        self.inner.lock().follow_goal = follow;
    }

    /// 每次发送的模拟线路延迟
    pub fn set_response_delay(&self, delay: Duration) {
        self.inner.lock().response_delay = delay;
    }

    pub fn set_register(&self, id: u8, register: Register, value: i32) {
        if let Some(servo) = self.inner.lock().servos.get_mut(&id) {
            servo.store(register, value);
        }
    }

    pub fn register(&self, id: u8, register: Register) -> Option<i32> {
        self.inner.lock().servos.get(&id).map(|s| s.load(register))
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.inner.lock().events.clone()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.inner.lock().writes.clone()
    }

    /// 对某个寄存器的写入次数
    pub fn write_count(&self, register: Register) -> usize {
        self.inner
            .lock()
            .writes
            .iter()
            .filter(|w| w.address == register.address)
            .count()
    }

    /// 某条指令的发送次数
    pub fn transmit_count(&self, instruction: Instruction) -> usize {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| e.kind == BusEventKind::Transmit(instruction))
            .count()
    }

    pub fn clear_log(&self) {
        let mut inner = self.inner.lock();
        inner.events.clear();
        inner.writes.clear();
    }

    fn record(&self, kind: BusEventKind) {
        self.inner.lock().events.push(BusEvent {
            kind,
            thread: thread::current().id(),
            at: Instant::now(),
        });
    }

    /// 处理一条指令包，返回需要回送的状态包
    fn process(&self, packet: &InstructionPacket) -> Vec<StatusPacket> {
        let mut inner = self.inner.lock();
        let mut replies = Vec::new();

        match packet.instruction {
            Instruction::BulkRead => {
                for chunk in packet.params.chunks_exact(5) {
                    let id = chunk[0];
                    let address = makeword(chunk[1], chunk[2]);
                    let len = makeword(chunk[3], chunk[4]) as usize;
                    if inner.silent.contains(&id) {
                        continue;
                    }
                    if let Some(data) = inner.servos.get(&id).and_then(|s| s.read_bytes(address, len))
                        && let Ok(axis) = AxisId::new(id)
                    {
                        replies.push(StatusPacket::new(axis, 0, data));
                    }
                }
            },
            Instruction::BulkWrite => {
                let mut rest = packet.params.as_slice();
                while rest.len() >= 5 {
                    let id = rest[0];
                    let address = makeword(rest[1], rest[2]);
                    let len = makeword(rest[3], rest[4]) as usize;
                    let Some(data) = rest.get(5..5 + len) else {
                        break;
                    };
                    inner.apply_write(id, address, data);
                    rest = &rest[5 + len..];
                }
            },
            Instruction::Write => {
                if packet.params.len() >= 2 {
                    let address = makeword(packet.params[0], packet.params[1]);
                    let written = inner.apply_write(packet.id, address, &packet.params[2..]);
                    if written
                        && !inner.silent.contains(&packet.id)
                        && let Ok(axis) = AxisId::new(packet.id)
                    {
                        replies.push(StatusPacket::new(axis, 0, Vec::new()));
                    }
                }
            },
            Instruction::Read => {
                if packet.params.len() == 4 && !inner.silent.contains(&packet.id) {
                    let address = makeword(packet.params[0], packet.params[1]);
                    let len = makeword(packet.params[2], packet.params[3]) as usize;
                    if let Some(data) =
                        inner.servos.get(&packet.id).and_then(|s| s.read_bytes(address, len))
                        && let Ok(axis) = AxisId::new(packet.id)
                    {
                        replies.push(StatusPacket::new(axis, 0, data));
                    }
                }
            },
            Instruction::Ping => {
                if inner.servos.contains_key(&packet.id)
                    && !inner.silent.contains(&packet.id)
                    && let Ok(axis) = AxisId::new(packet.id)
                    && let Ok(model) = encode_value(MOCK_MODEL_NUMBER, Register::MODEL_NUMBER.width)
                {
                    let mut params = model.to_vec();
                    params.push(MOCK_FIRMWARE_VERSION);
                    replies.push(StatusPacket::new(axis, 0, params));
                }
            },
            _ => {},
        }

        replies
    }
}

impl MockBusInner {
    fn apply_write(&mut self, id: u8, address: u16, data: &[u8]) -> bool {
        let follow_goal = self.follow_goal;
        let Some(servo) = self.servos.get_mut(&id) else {
            return false;
        };
        if !servo.write_bytes(address, data) {
            return false;
        }

        if follow_goal && address == Register::GOAL_POSITION.address {
            servo.write_bytes(Register::PRESENT_POSITION.address, data);
        }

        let value = RegisterWidth::from_len(data.len() as u8)
            .and_then(|width| decode_value(data, width))
            .unwrap_or(0);
        self.writes.push(WriteRecord { id, address, value });
        true
    }
}

/// 连接到 [`MockBus`] 的传输对象
pub struct MockTransport {
    bus: MockBus,
    pending: VecDeque<StatusPacket>,
}

impl MockTransport {
    pub fn bus(&self) -> &MockBus {
        &self.bus
    }
}

impl BusTransport for MockTransport {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        let packet = InstructionPacket::parse(bytes)?;
        self.bus.record(BusEventKind::Transmit(packet.instruction));

        let delay = {
            let mut inner = self.bus.inner.lock();
            if inner.fail_all || inner.fail_transmits > 0 {
                inner.fail_transmits = inner.fail_transmits.saturating_sub(1);
                return Err(BusError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "mock bus disconnected",
                )));
            }
            if inner.fail_writes > 0
                && matches!(packet.instruction, Instruction::Write | Instruction::BulkWrite)
            {
                inner.fail_writes -= 1;
                return Err(BusError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "mock write dropped",
                )));
            }
            inner.response_delay
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        self.pending.extend(self.bus.process(&packet));
        Ok(())
    }

    fn receive(&mut self) -> Result<StatusPacket, BusError> {
        self.bus.record(BusEventKind::Receive);
        // 经过一次真实编解码，覆盖 CRC 与填充路径
        match self.pending.pop_front() {
            Some(status) => Ok(StatusPacket::parse(&status.to_bytes())?),
            None => Err(BusError::Timeout),
        }
    }

    fn discard_input(&mut self) -> Result<(), BusError> {
        self.bus.record(BusEventKind::Discard);
        self.pending.clear();
        Ok(())
    }
}
