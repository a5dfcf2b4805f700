//! Dynamixel 2.0 指令包与状态包
//!
//! 帧格式：
//!
//! ```text
//! FF FF FD 00 | ID | LEN_L LEN_H | INST | PARAM ... | CRC_L CRC_H
//! ```
//!
//! `LEN` 从 `INST` 数到 CRC（含），指令与参数区在发送前做字节填充：
//! 出现 `FF FF FD` 时在其后插入一个 `FD`。

use crate::{AxisId, BROADCAST_ID, ProtocolError, Register, encode_value, hibyte, lobyte, makeword};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 包头
pub const HEADER: [u8; 4] = [0xFF, 0xFF, 0xFD, 0x00];

/// 包头 + ID + 长度字段
const PREFIX_LEN: usize = 7;

/// 状态包最短长度字段：INST + ERR + CRC
const MIN_STATUS_LENGTH: usize = 4;

/// 单包长度字段上限
const MAX_PACKET_LENGTH: usize = 1024;

/// 帧缓冲上限，超过后丢弃最旧字节
const MAX_FRAMER_BUFFER: usize = 4096;

/// 指令码
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    Reboot = 0x08,
    Status = 0x55,
    SyncRead = 0x82,
    SyncWrite = 0x83,
    BulkRead = 0x92,
    BulkWrite = 0x93,
}

/// 状态包错误码（ERR 字段低 7 位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum StatusError {
    ResultFail = 0x01,
    InstructionError = 0x02,
    CrcError = 0x03,
    DataRangeError = 0x04,
    DataLengthError = 0x05,
    DataLimitError = 0x06,
    AccessError = 0x07,
}

const fn build_crc_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u16; 256] = build_crc_table();

/// CRC-16（多项式 0x8005，初值 0，不反转）
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &byte| {
        let index = ((crc >> 8) ^ byte as u16) & 0xFF;
        (crc << 8) ^ CRC_TABLE[index as usize]
    })
}

fn stuff(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    for &byte in payload {
        out.push(byte);
        if out.ends_with(&[0xFF, 0xFF, 0xFD]) {
            out.push(0xFD);
        }
    }
    out
}

fn unstuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i..].starts_with(&[0xFF, 0xFF, 0xFD, 0xFD]) {
            out.extend_from_slice(&[0xFF, 0xFF, 0xFD]);
            i += 4;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

/// 组装完整帧：包头、ID、长度、填充后的负载与 CRC
fn frame(id: u8, payload: &[u8]) -> Vec<u8> {
    let stuffed = stuff(payload);
    let length = (stuffed.len() + 2) as u16;

    let mut bytes = Vec::with_capacity(PREFIX_LEN + stuffed.len() + 2);
    bytes.extend_from_slice(&HEADER);
    bytes.push(id);
    bytes.push(lobyte(length));
    bytes.push(hibyte(length));
    bytes.extend_from_slice(&stuffed);
    let crc = crc16(&bytes);
    bytes.push(lobyte(crc));
    bytes.push(hibyte(crc));
    bytes
}

/// 拆帧：校验包头、长度与 CRC，返回 ID 与去填充后的负载
fn unframe(bytes: &[u8]) -> Result<(u8, Vec<u8>), ProtocolError> {
    if bytes.len() < PREFIX_LEN + 3 {
        return Err(ProtocolError::InvalidLength {
            expected: PREFIX_LEN + 3,
            actual: bytes.len(),
        });
    }
    if bytes[..4] != HEADER {
        return Err(ProtocolError::InvalidHeader);
    }

    let length = makeword(bytes[5], bytes[6]) as usize;
    let total = PREFIX_LEN + length;
    if bytes.len() != total || length < 3 {
        return Err(ProtocolError::InvalidLength {
            expected: total,
            actual: bytes.len(),
        });
    }

    let expected = makeword(bytes[total - 2], bytes[total - 1]);
    let actual = crc16(&bytes[..total - 2]);
    if expected != actual {
        return Err(ProtocolError::CrcMismatch { expected, actual });
    }

    Ok((bytes[4], unstuff(&bytes[PREFIX_LEN..total - 2])))
}

fn address_and_length(register: Register) -> [u8; 4] {
    let len = register.len() as u16;
    [
        lobyte(register.address),
        hibyte(register.address),
        lobyte(len),
        hibyte(len),
    ]
}

/// 主机发往舵机的指令包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionPacket {
    pub id: u8,
    pub instruction: Instruction,
    pub params: Vec<u8>,
}

impl InstructionPacket {
    pub fn ping(id: AxisId) -> Self {
        Self {
            id: id.raw(),
            instruction: Instruction::Ping,
            params: Vec::new(),
        }
    }

    pub fn read(id: AxisId, register: Register) -> Self {
        Self {
            id: id.raw(),
            instruction: Instruction::Read,
            params: address_and_length(register).to_vec(),
        }
    }

    pub fn write(id: AxisId, register: Register, value: i32) -> Result<Self, ProtocolError> {
        let mut params = vec![lobyte(register.address), hibyte(register.address)];
        params.extend_from_slice(&encode_value(value, register.width)?);
        Ok(Self {
            id: id.raw(),
            instruction: Instruction::Write,
            params,
        })
    }

    /// 批量读：每个设备 `ID, ADDR_L, ADDR_H, LEN_L, LEN_H`，广播地址发送
    pub fn bulk_read(requests: &[(AxisId, Register)]) -> Result<Self, ProtocolError> {
        if requests.is_empty() {
            return Err(ProtocolError::EmptyRequest);
        }
        let mut params = Vec::with_capacity(requests.len() * 5);
        for (id, register) in requests {
            params.push(id.raw());
            params.extend_from_slice(&address_and_length(*register));
        }
        Ok(Self {
            id: BROADCAST_ID,
            instruction: Instruction::BulkRead,
            params,
        })
    }

    /// 批量写：每个设备 `ID, ADDR_L, ADDR_H, LEN_L, LEN_H, DATA...`，无应答
    pub fn bulk_write(entries: &[(AxisId, Register, i32)]) -> Result<Self, ProtocolError> {
        if entries.is_empty() {
            return Err(ProtocolError::EmptyRequest);
        }
        let mut params = Vec::with_capacity(entries.len() * 9);
        for (id, register, value) in entries {
            params.push(id.raw());
            params.extend_from_slice(&address_and_length(*register));
            params.extend_from_slice(&encode_value(*value, register.width)?);
        }
        Ok(Self {
            id: BROADCAST_ID,
            instruction: Instruction::BulkWrite,
            params,
        })
    }

    /// 广播指令不产生状态包
    pub fn expects_reply(&self) -> bool {
        self.id != BROADCAST_ID || self.instruction == Instruction::BulkRead
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.params.len() + 1);
        payload.push(self.instruction.into());
        payload.extend_from_slice(&self.params);
        frame(self.id, &payload)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (id, payload) = unframe(bytes)?;
        let instruction = Instruction::try_from(payload[0])
            .map_err(|_| ProtocolError::UnexpectedInstruction(payload[0]))?;
        Ok(Self {
            id,
            instruction,
            params: payload[1..].to_vec(),
        })
    }
}

/// 舵机返回的状态包
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPacket {
    pub id: u8,
    pub error: u8,
    pub params: Vec<u8>,
}

impl StatusPacket {
    pub fn new(id: AxisId, error: u8, params: Vec<u8>) -> Self {
        Self {
            id: id.raw(),
            error,
            params,
        }
    }

    /// 硬件告警位（过热、过载等）
    pub fn alert(&self) -> bool {
        self.error & 0x80 != 0
    }

    /// 指令处理错误，`None` 表示成功
    pub fn error_code(&self) -> Option<Result<StatusError, u8>> {
        match self.error & 0x7F {
            0 => None,
            code => Some(StatusError::try_from(code).map_err(|_| code)),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.params.len() + 2);
        payload.push(Instruction::Status.into());
        payload.push(self.error);
        payload.extend_from_slice(&self.params);
        frame(self.id, &payload)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (id, payload) = unframe(bytes)?;
        if payload[0] != u8::from(Instruction::Status) {
            return Err(ProtocolError::UnexpectedInstruction(payload[0]));
        }
        if payload.len() < 2 {
            return Err(ProtocolError::InvalidLength {
                expected: 2,
                actual: payload.len(),
            });
        }
        Ok(Self {
            id,
            error: payload[1],
            params: payload[2..].to_vec(),
        })
    }
}

/// 从字节流中切分状态包
///
/// 串口读到的数据可能包含多个包或半个包，`push_bytes` 追加数据，
/// `try_extract_packet` 每次取出一个完整包。
#[derive(Debug, Default)]
pub struct StatusFramer {
    buffer: Vec<u8>,
}

impl StatusFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > MAX_FRAMER_BUFFER {
            let excess = self.buffer.len() - MAX_FRAMER_BUFFER;
            self.buffer.drain(..excess);
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// 取出下一个状态包
    ///
    /// 返回 `None` 表示数据不足；`Some(Err(_))` 表示丢弃了一个损坏的包。
    pub fn try_extract_packet(&mut self) -> Option<Result<StatusPacket, ProtocolError>> {
        let Some(start) = self.buffer.windows(HEADER.len()).position(|w| w == HEADER) else {
            // 保留可能是半个包头的尾部
            let keep = self.buffer.len().min(HEADER.len() - 1);
            let drop = self.buffer.len() - keep;
            self.buffer.drain(..drop);
            return None;
        };
        self.buffer.drain(..start);

        if self.buffer.len() < PREFIX_LEN {
            return None;
        }

        let length = makeword(self.buffer[5], self.buffer[6]) as usize;
        if !(MIN_STATUS_LENGTH..=MAX_PACKET_LENGTH).contains(&length) {
            self.buffer.drain(..1);
            return Some(Err(ProtocolError::InvalidLength {
                expected: MIN_STATUS_LENGTH,
                actual: length,
            }));
        }

        let total = PREFIX_LEN + length;
        if self.buffer.len() < total {
            return None;
        }

        let frame: Vec<u8> = self.buffer.drain(..total).collect();
        Some(StatusPacket::parse(&frame))
    }
}
