//! Fixed-point and integer encodings used by the device firmware
//!
//! Every parameter written into an image is converted from a real value to
//! one of a small set of word formats. Conversion rounds half away from zero
//! and fails with a range error rather than saturating, so a mis-scaled
//! model never produces a silently clipped image.

use core::fmt;

use crate::error::{ImageError, Result};

/// Description of a fixed-point (or plain integer) word format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedPointFormat {
    /// Total number of bits in the encoded value
    pub bits: u32,
    /// Number of fractional bits
    pub frac_bits: u32,
    /// Two's-complement signed
    pub signed: bool,
    name: &'static str,
}

impl FixedPointFormat {
    /// Signed, 16 integer bits and 15 fractional bits
    pub const S1615: Self = Self::new("S1615", 32, 15, true);
    /// Unsigned pure fraction in [0, 1)
    pub const U032: Self = Self::new("U032", 32, 32, false);
    /// Signed pure fraction in [-1, 1)
    pub const S031: Self = Self::new("S031", 32, 31, true);
    /// Unsigned, 16 integer bits and 16 fractional bits
    pub const U1616: Self = Self::new("U1616", 32, 16, false);
    /// Signed 32-bit integer
    pub const INT32: Self = Self::new("INT32", 32, 0, true);
    /// Unsigned 32-bit integer
    pub const UINT32: Self = Self::new("UINT32", 32, 0, false);
    /// Signed 16-bit integer
    pub const INT16: Self = Self::new("INT16", 16, 0, true);
    /// Unsigned 16-bit integer
    pub const UINT16: Self = Self::new("UINT16", 16, 0, false);
    /// Unsigned 8-bit integer
    pub const UINT8: Self = Self::new("UINT8", 8, 0, false);

    const fn new(name: &'static str, bits: u32, frac_bits: u32, signed: bool) -> Self {
        Self {
            bits,
            frac_bits,
            signed,
            name,
        }
    }

    /// Short name of the format, e.g. `S1615`
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Number of bytes the encoded value occupies
    pub const fn bytes(&self) -> usize {
        (self.bits as usize + 7) / 8
    }

    /// Multiplier from real value to raw integer
    pub fn scale(&self) -> f64 {
        2f64.powi(self.frac_bits as i32)
    }

    /// Smallest representable step
    pub fn resolution(&self) -> f64 {
        1.0 / self.scale()
    }

    fn raw_min(&self) -> i64 {
        if self.signed {
            -(1i64 << (self.bits - 1))
        } else {
            0
        }
    }

    fn raw_max(&self) -> i64 {
        if self.signed {
            (1i64 << (self.bits - 1)) - 1
        } else {
            (1i64 << self.bits) - 1
        }
    }

    fn mask(&self) -> u64 {
        (1u64 << self.bits) - 1
    }

    /// Smallest representable real value
    pub fn min_value(&self) -> f64 {
        self.raw_min() as f64 / self.scale()
    }

    /// Largest representable real value
    pub fn max_value(&self) -> f64 {
        self.raw_max() as f64 / self.scale()
    }

    /// Encode a real value into the raw bit pattern (low `bits` bits of the result)
    pub fn encode(&self, value: f64) -> Result<u32> {
        if !value.is_finite() {
            return Err(ImageError::range(value, self.name));
        }
        // f64::round is half away from zero
        let scaled = (value * self.scale()).round();
        if scaled < self.raw_min() as f64 || scaled > self.raw_max() as f64 {
            return Err(ImageError::range(value, self.name));
        }
        let raw = scaled as i64;
        Ok(((raw as u64) & self.mask()) as u32)
    }

    /// Decode a raw bit pattern back into a real value
    pub fn decode(&self, raw: u32) -> f64 {
        let raw = (raw as u64) & self.mask();
        let value = if self.signed {
            let shift = 64 - self.bits;
            ((raw << shift) as i64 >> shift) as f64
        } else {
            raw as f64
        };
        value / self.scale()
    }
}

impl fmt::Display for FixedPointFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Encode `value` in `format`
pub fn encode(value: f64, format: FixedPointFormat) -> Result<u32> {
    format.encode(value)
}

/// Decode `raw` from `format`
pub fn decode(raw: u32, format: FixedPointFormat) -> f64 {
    format.decode(raw)
}
