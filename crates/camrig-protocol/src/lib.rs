//! # Camrig Protocol
//!
//! 相机云台总线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `axis`: 逻辑轴名称与总线地址
//! - `register`: 舵机控制表寄存器与多字节编解码
//! - `packet`: Dynamixel 2.0 指令包/状态包构建、解析与 CRC
//!
//! ## 字节序
//!
//! 多字节寄存器使用小端字节序：先低字（LW）后高字（HW），
//! 每个字内先低字节后高字节，即 `LE(LW), HE(LW), LE(HW), HE(HW)`。

pub mod axis;
pub mod packet;
pub mod register;

pub use axis::*;
pub use packet::*;
pub use register::*;

use thiserror::Error;

/// 协议层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid register width: {0} (expected 1, 2 or 4)")]
    InvalidWidth(u8),

    #[error("Value {value} does not fit a {width}-byte register")]
    ValueOutOfRange { value: i32, width: u8 },

    #[error("Unknown axis name: {0}")]
    UnknownAxis(String),

    #[error("Invalid axis id: {0}")]
    InvalidAxisId(u8),

    #[error("Invalid packet header")]
    InvalidHeader,

    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Unexpected instruction: 0x{0:02X}")]
    UnexpectedInstruction(u8),

    #[error("Empty request")]
    EmptyRequest,
}

/// 取 16 位值的低字节
#[inline]
pub const fn lobyte(word: u16) -> u8 {
    (word & 0xFF) as u8
}

/// 取 16 位值的高字节
#[inline]
pub const fn hibyte(word: u16) -> u8 {
    (word >> 8) as u8
}

/// 取 32 位值的低字
#[inline]
pub const fn loword(value: u32) -> u16 {
    (value & 0xFFFF) as u16
}

/// 取 32 位值的高字
#[inline]
pub const fn hiword(value: u32) -> u16 {
    (value >> 16) as u16
}

/// 由低字节与高字节组合 16 位值
#[inline]
pub const fn makeword(lo: u8, hi: u8) -> u16 {
    (lo as u16) | ((hi as u16) << 8)
}

/// 由低字与高字组合 32 位值
#[inline]
pub const fn makedword(lo: u16, hi: u16) -> u32 {
    (lo as u32) | ((hi as u32) << 16)
}
