//! Fixed-width pointer codec.
//!
//! A [`Pointer`] is the raw encoding of a target address: exactly
//! `width` bytes (4 or 8) in the target's byte order. Values that do not
//! fit the width are truncated and offsets wrap modulo `2^(8 * width)`,
//! matching the fixed-width integer arithmetic of the target.

use std::fmt;

use crate::error::{Error, Result};

/// Byte order of the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Builds pointers of one width and byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerMaker {
    endian: Endian,
    width: usize,
}

impl PointerMaker {
    /// Create a maker for `width`-byte pointers. Only 4 and 8 are supported.
    pub fn new(endian: Endian, width: usize) -> Result<Self> {
        match width {
            4 | 8 => Ok(Self { endian, width }),
            _ => Err(Error::Config(format!(
                "unsupported pointer width {} (expected 4 or 8)",
                width
            ))),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Encode `value`, truncating it to the configured width.
    pub fn make(&self, value: u64) -> Pointer {
        let value = value & mask(self.width);
        let mut raw = [0u8; 8];
        match self.endian {
            Endian::Little => {
                raw[..self.width].copy_from_slice(&value.to_le_bytes()[..self.width]);
            }
            Endian::Big => {
                raw[..self.width].copy_from_slice(&value.to_be_bytes()[8 - self.width..]);
            }
        }
        Pointer {
            raw,
            width: self.width,
            endian: self.endian,
        }
    }

    /// Parse a hex address such as `0xdeadbeef` or `deadbeef`.
    pub fn parse_hex(&self, s: &str) -> Result<Pointer> {
        let digits = s
            .trim()
            .strip_prefix("0x")
            .or_else(|| s.trim().strip_prefix("0X"))
            .unwrap_or(s.trim());
        let value = u64::from_str_radix(digits, 16)
            .map_err(|e| Error::Pointer(format!("'{}': {}", s, e)))?;
        if value & !mask(self.width) != 0 {
            return Err(Error::Pointer(format!(
                "'{}' does not fit in {} bytes",
                s, self.width
            )));
        }
        Ok(self.make(value))
    }

    /// Decode exactly `width` raw bytes.
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<Pointer> {
        if bytes.len() != self.width {
            return Err(Error::Pointer(format!(
                "expected {} bytes, got {}",
                self.width,
                bytes.len()
            )));
        }
        let mut raw = [0u8; 8];
        raw[..self.width].copy_from_slice(bytes);
        Ok(Pointer {
            raw,
            width: self.width,
            endian: self.endian,
        })
    }
}

/// Encode `value` as a `width`-byte pointer. Fails only on an unsupported width.
pub fn make_pointer(value: u64, endian: Endian, width: usize) -> Result<Pointer> {
    Ok(PointerMaker::new(endian, width)?.make(value))
}

/// An encoded target address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    raw: [u8; 8],
    width: usize,
    endian: Endian,
}

impl Pointer {
    /// The raw encoding, exactly `width` bytes long.
    pub fn bytes(&self) -> &[u8] {
        &self.raw[..self.width]
    }

    /// The decoded address.
    pub fn uint(&self) -> u64 {
        let mut buf = [0u8; 8];
        match self.endian {
            Endian::Little => {
                buf[..self.width].copy_from_slice(self.bytes());
                u64::from_le_bytes(buf)
            }
            Endian::Big => {
                buf[8 - self.width..].copy_from_slice(self.bytes());
                u64::from_be_bytes(buf)
            }
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// A new pointer at `self + delta`, wrapping at the pointer width.
    pub fn offset(&self, delta: i64) -> Pointer {
        let maker = PointerMaker {
            endian: self.endian,
            width: self.width,
        };
        maker.make(self.uint().wrapping_add_signed(delta))
    }
}

fn mask(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.uint())
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pointer({:#0w$x}, {:?})",
            self.uint(),
            self.endian,
            w = self.width * 2 + 2
        )
    }
}

impl fmt::LowerHex for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.uint(), f)
    }
}
