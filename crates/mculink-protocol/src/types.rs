//! Register value types and their 4-byte wire encoding.

use crate::constants::VALUE_SIZE;
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared type of a register.
///
/// Every value occupies four big-endian bytes on the wire. Integer types
/// narrower than 32 bits live in the low-order bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ValueType {
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Signed 16-bit integer.
    Int16,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Signed 32-bit integer. Used when an item declares no type.
    #[default]
    Int32,
    /// Unsigned 32-bit integer.
    UInt32,
    /// IEEE-754 single precision.
    Float32,
}

impl ValueType {
    /// Logical width in bits.
    pub fn bit_width(self) -> u32 {
        match self {
            ValueType::Int8 | ValueType::UInt8 => 8,
            ValueType::Int16 | ValueType::UInt16 => 16,
            ValueType::Int32 | ValueType::UInt32 | ValueType::Float32 => 32,
        }
    }

    /// Whether integer values of this type carry a sign.
    pub fn is_signed(self) -> bool {
        matches!(self, ValueType::Int8 | ValueType::Int16 | ValueType::Int32)
    }

    /// Inclusive integer range, `None` for floats.
    pub fn int_range(self) -> Option<(i64, i64)> {
        match self {
            ValueType::Float32 => None,
            ty if ty.is_signed() => {
                let half = 1i64 << (ty.bit_width() - 1);
                Some((-half, half - 1))
            }
            ty => Some((0, (1i64 << ty.bit_width()) - 1)),
        }
    }

    /// Name used by the item catalog.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Int8 => "int8_t",
            ValueType::UInt8 => "uint8_t",
            ValueType::Int16 => "int16_t",
            ValueType::UInt16 => "uint16_t",
            ValueType::Int32 => "int32_t",
            ValueType::UInt32 => "uint32_t",
            ValueType::Float32 => "float",
        }
    }

    fn mask(self) -> u64 {
        (1u64 << self.bit_width()) - 1
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int8_t" | "int8" | "i8" => Ok(ValueType::Int8),
            "uint8_t" | "uint8" | "u8" => Ok(ValueType::UInt8),
            "int16_t" | "int16" | "i16" => Ok(ValueType::Int16),
            "uint16_t" | "uint16" | "u16" => Ok(ValueType::UInt16),
            "int32_t" | "int32" | "i32" => Ok(ValueType::Int32),
            "uint32_t" | "uint32" | "u32" => Ok(ValueType::UInt32),
            "float" | "float32" | "f32" => Ok(ValueType::Float32),
            _ => Err(ProtocolError::UnknownValueType(s.to_string())),
        }
    }
}

impl TryFrom<String> for ValueType {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ValueType> for String {
    fn from(ty: ValueType) -> Self {
        ty.as_str().to_string()
    }
}

/// A decoded register value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterValue {
    /// Any integer type, widened.
    Int(i64),
    /// A `float` register.
    Float(f32),
}

impl RegisterValue {
    /// Value as an integer, truncating floats toward zero.
    pub fn as_i64(self) -> i64 {
        match self {
            RegisterValue::Int(v) => v,
            RegisterValue::Float(v) => v as i64,
        }
    }

    /// Value as a float.
    pub fn as_f32(self) -> f32 {
        match self {
            RegisterValue::Int(v) => v as f32,
            RegisterValue::Float(v) => v,
        }
    }

    /// Parse user input for a register of type `ty`.
    ///
    /// Integers accept decimal or `0x` hex and must fit the type's range.
    pub fn parse(text: &str, ty: ValueType) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidValue {
            text: text.to_string(),
            value_type: ty,
        };
        let trimmed = text.trim();

        let Some((min, max)) = ty.int_range() else {
            return trimmed
                .parse::<f32>()
                .map(RegisterValue::Float)
                .map_err(|_| invalid());
        };

        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (radix, body) = match digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
        {
            Some(hex) => (16, hex),
            None => (10, digits),
        };
        // One optional leading '-' only; from_str_radix would accept another sign.
        if body.starts_with(['+', '-']) {
            return Err(invalid());
        }
        let magnitude = u64::from_str_radix(body, radix).map_err(|_| invalid())? as i128;
        let value = if negative { -magnitude } else { magnitude };

        if value < i128::from(min) || value > i128::from(max) {
            return Err(invalid());
        }
        Ok(RegisterValue::Int(value as i64))
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Int(v) => write!(f, "{}", v),
            RegisterValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Encode `value` as the 4-byte big-endian wire word for type `ty`.
///
/// Integers are masked to the type's width; out-of-range values wrap.
pub fn pack(value: RegisterValue, ty: ValueType) -> [u8; VALUE_SIZE] {
    match ty {
        ValueType::Float32 => value.as_f32().to_be_bytes(),
        _ => {
            let word = (value.as_i64() as u64 & ty.mask()) as u32;
            word.to_be_bytes()
        }
    }
}

/// Decode a 4-byte big-endian wire word as type `ty`.
pub fn unpack(raw: [u8; VALUE_SIZE], ty: ValueType) -> RegisterValue {
    let word = u32::from_be_bytes(raw);
    match ty {
        ValueType::Float32 => RegisterValue::Float(f32::from_bits(word)),
        _ => {
            let bits = ty.bit_width();
            let low = word as u64 & ty.mask();
            if ty.is_signed() && low >= 1u64 << (bits - 1) {
                RegisterValue::Int(low as i64 - (1i64 << bits))
            } else {
                RegisterValue::Int(low as i64)
            }
        }
    }
}

/// Display adapter printing bytes as spaced upper-case hex (`5A 10 00 02`).
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, byte) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}
