//! 舵机控制表寄存器与多字节编解码

use crate::{ProtocolError, hibyte, hiword, lobyte, loword, makedword, makeword};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smallvec::SmallVec;

/// 寄存器宽度（字节数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RegisterWidth {
    Byte = 1,
    Word = 2,
    DoubleWord = 4,
}

impl RegisterWidth {
    /// 从原始字节数解析宽度
    pub fn from_len(len: u8) -> Result<Self, ProtocolError> {
        Self::try_from(len).map_err(|_| ProtocolError::InvalidWidth(len))
    }

    #[inline]
    pub const fn len(self) -> usize {
        self as usize
    }

    /// 可写入该宽度寄存器的取值范围（同时接受有符号与无符号解释）
    const fn value_range(self) -> (i64, i64) {
        match self {
            RegisterWidth::Byte => (i8::MIN as i64, u8::MAX as i64),
            RegisterWidth::Word => (i16::MIN as i64, u16::MAX as i64),
            RegisterWidth::DoubleWord => (i32::MIN as i64, i32::MAX as i64),
        }
    }
}

/// 控制表中的一个寄存器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub address: u16,
    pub width: RegisterWidth,
}

impl Register {
    pub const fn new(address: u16, width: RegisterWidth) -> Self {
        Self { address, width }
    }

    pub const MODEL_NUMBER: Register = Register::new(0, RegisterWidth::Word);
    pub const HOMING_OFFSET: Register = Register::new(20, RegisterWidth::DoubleWord);
    pub const TORQUE_ENABLE: Register = Register::new(64, RegisterWidth::Byte);
    pub const VELOCITY_I_GAIN: Register = Register::new(76, RegisterWidth::Word);
    pub const VELOCITY_P_GAIN: Register = Register::new(78, RegisterWidth::Word);
    pub const POSITION_D_GAIN: Register = Register::new(80, RegisterWidth::Word);
    pub const POSITION_I_GAIN: Register = Register::new(82, RegisterWidth::Word);
    pub const POSITION_P_GAIN: Register = Register::new(84, RegisterWidth::Word);
    pub const PROFILE_ACCELERATION: Register = Register::new(108, RegisterWidth::DoubleWord);
    pub const PROFILE_VELOCITY: Register = Register::new(112, RegisterWidth::DoubleWord);
    pub const GOAL_POSITION: Register = Register::new(116, RegisterWidth::DoubleWord);
    pub const PRESENT_CURRENT: Register = Register::new(126, RegisterWidth::Word);
    pub const PRESENT_POSITION: Register = Register::new(132, RegisterWidth::DoubleWord);
    pub const PRESENT_VOLTAGE: Register = Register::new(144, RegisterWidth::Word);
    pub const PRESENT_TEMPERATURE: Register = Register::new(146, RegisterWidth::Byte);

    #[inline]
    pub const fn len(&self) -> usize {
        self.width.len()
    }
}

/// 编码后的寄存器值（最多 4 字节，栈上存储）
pub type RegisterBytes = SmallVec<[u8; 4]>;

/// 将值按寄存器宽度编码为线上字节
///
/// 4 字节值的顺序为 `LE(LW), HE(LW), LE(HW), HE(HW)`。
pub fn encode_value(value: i32, width: RegisterWidth) -> Result<RegisterBytes, ProtocolError> {
    let (min, max) = width.value_range();
    if (value as i64) < min || (value as i64) > max {
        return Err(ProtocolError::ValueOutOfRange {
            value,
            width: width.into(),
        });
    }

    let raw = value as u32;
    let mut bytes = RegisterBytes::new();
    match width {
        RegisterWidth::Byte => bytes.push(lobyte(loword(raw))),
        RegisterWidth::Word => {
            bytes.push(lobyte(loword(raw)));
            bytes.push(hibyte(loword(raw)));
        },
        RegisterWidth::DoubleWord => {
            bytes.push(lobyte(loword(raw)));
            bytes.push(hibyte(loword(raw)));
            bytes.push(lobyte(hiword(raw)));
            bytes.push(hibyte(hiword(raw)));
        },
    }
    Ok(bytes)
}

/// 将线上字节按寄存器宽度还原
///
/// 1/2 字节寄存器按无符号值返回（与控制表一致），需要有符号解释的寄存器
/// 使用 [`as_signed_word`]；4 字节寄存器按 32 位补码还原。
pub fn decode_value(bytes: &[u8], width: RegisterWidth) -> Result<i32, ProtocolError> {
    if bytes.len() != width.len() {
        return Err(ProtocolError::InvalidLength {
            expected: width.len(),
            actual: bytes.len(),
        });
    }

    let value = match width {
        RegisterWidth::Byte => bytes[0] as i32,
        RegisterWidth::Word => makeword(bytes[0], bytes[1]) as i32,
        RegisterWidth::DoubleWord => {
            makedword(makeword(bytes[0], bytes[1]), makeword(bytes[2], bytes[3])) as i32
        },
    };
    Ok(value)
}

/// 将 16 位无符号读数解释为有符号值（如电流寄存器）
#[inline]
pub const fn as_signed_word(value: i32) -> i32 {
    (value as u16) as i16 as i32
}
