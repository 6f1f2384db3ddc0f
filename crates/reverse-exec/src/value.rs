use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror;

/// Errors produced when parsing the textual form of a [HexValue].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("hex value must start with 0x: {0}")]
    MissingPrefix(String),

    #[error("hex value has no digits")]
    Empty,

    #[error("hex value {0} is wider than 64 bits")]
    TooWide(String),

    #[error("invalid hex digits in {0}")]
    InvalidDigits(String),
}

/// Concrete value with a bit width no greater than 64.
///
/// The width is part of the value: two values with the same number but different widths render
/// differently and merge differently into a register.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HexValue {
    value: u64,
    bits: u32,
}

impl HexValue {
    pub const MAX_BITS: u32 = u64::BITS;

    /// Construct a value of the given bit width. Bits of `value` above the width are discarded.
    /// A width of zero or above 64 is clamped into `1..=64`.
    pub fn new(value: u64, bits: u32) -> Self {
        let bits = bits.clamp(1, Self::MAX_BITS);
        Self {
            value: value & Self::mask(bits),
            bits,
        }
    }

    /// Construct a value from little-endian bytes. At most 8 bytes are considered.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let bytes = &bytes[..bytes.len().min(8)];
        let value = bytes
            .iter()
            .enumerate()
            .fold(0u64, |acc, (i, &b)| acc | (u64::from(b) << (8 * i)));
        Self::new(value, (bytes.len() as u32 * u8::BITS).max(u8::BITS))
    }

    fn mask(bits: u32) -> u64 {
        u64::MAX >> (Self::MAX_BITS - bits)
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of bytes needed to hold this value.
    pub fn num_bytes(&self) -> usize {
        self.bits.div_ceil(u8::BITS) as usize
    }

    /// Number of hex digits in the rendered form, excluding the `0x` prefix.
    pub fn hex_digits(&self) -> usize {
        self.bits.div_ceil(4) as usize
    }

    /// Little-endian bytes of this value, [Self::num_bytes] long.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.value.to_le_bytes()[..self.num_bytes()].to_vec()
    }

    /// Keep only the low-order `bits` of this value. Widening is not performed.
    pub fn truncate(self, bits: u32) -> Self {
        if bits >= self.bits {
            self
        } else {
            Self::new(self.value, bits)
        }
    }

    /// Reinterpret this value at a different width: wider widths zero-extend, narrower widths
    /// keep the low-order bits.
    pub fn resize(self, bits: u32) -> Self {
        Self::new(self.value, bits)
    }

    /// Replace the low-order bits of this value with `low`, preserving the high-order bits. If
    /// `low` is at least as wide as this value, the result is `low` truncated to this width.
    pub fn overlay_low(self, low: HexValue) -> Self {
        if low.bits >= self.bits {
            return low.truncate(self.bits);
        }

        let low_mask = Self::mask(low.bits);
        Self::new((self.value & !low_mask) | low.value, self.bits)
    }

    /// Wrapping subtraction at this value's width.
    pub fn wrapping_sub(self, rhs: u64) -> Self {
        Self::new(self.value.wrapping_sub(rhs), self.bits)
    }
}

impl fmt::Display for HexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{value:0width$x}",
            value = self.value,
            width = self.hex_digits()
        )
    }
}

/// Parses the debugger form of a value. The number of digits gives the width, so `0x0005` is a
/// 16-bit value.
impl FromStr for HexValue {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| ParseError::MissingPrefix(s.to_string()))?;

        if digits.is_empty() {
            return Err(ParseError::Empty);
        }

        if digits.len() > 16 {
            return Err(ParseError::TooWide(s.to_string()));
        }

        let value =
            u64::from_str_radix(digits, 16).map_err(|_| ParseError::InvalidDigits(s.to_string()))?;
        Ok(Self::new(value, digits.len() as u32 * 4))
    }
}

macro_rules! impl_from_uint {
    ($type:ty) => {
        impl From<$type> for HexValue {
            fn from(value: $type) -> Self {
                HexValue::new(value.into(), <$type>::BITS)
            }
        }
    };
}

impl_from_uint!(u8);
impl_from_uint!(u16);
impl_from_uint!(u32);
impl_from_uint!(u64);
