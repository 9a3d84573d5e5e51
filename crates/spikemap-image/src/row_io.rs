//! Packing synaptic rows into device words
//!
//! A synapse word carries the fixed-point weight in the upper half and a
//! 16-bit control field in the lower half:
//!
//! ```text
//!  31            16 15   13 12    9  8   7        0
//! +----------------+-------+-------+----+----------+
//! |     weight     |   0   | d - 1 | ty |  index   |
//! +----------------+-------+-------+----+----------+
//! ```
//!
//! `index` is relative to the first atom of the postsynaptic slice and `d`
//! is the delay in timesteps. Weights are stored as magnitudes, the sign is
//! carried by the synapse type.

use crate::error::{ImageError, Result};
use crate::fixed_point::FixedPointFormat;
use crate::ids::SynapseType;
use crate::synapse_row::SynapticRow;

/// Bits of the postsynaptic index
pub const SYNAPSE_INDEX_BITS: u32 = 8;
/// Bits of the synapse type
pub const SYNAPSE_TYPE_BITS: u32 = 1;
/// Bits of the stored delay
pub const SYNAPSE_DELAY_BITS: u32 = 4;
/// Shift of the weight within a synapse word
pub const SYNAPSE_WEIGHT_SHIFT: u32 = 16;
/// Largest delay a row can carry without a delay extension
pub const MAX_NATIVE_DELAY: u32 = 1 << SYNAPSE_DELAY_BITS;

const INDEX_MASK: u32 = (1 << SYNAPSE_INDEX_BITS) - 1;
const TYPE_MASK: u32 = (1 << SYNAPSE_TYPE_BITS) - 1;
const DELAY_MASK: u32 = (1 << SYNAPSE_DELAY_BITS) - 1;
const DELAY_SHIFT: u32 = SYNAPSE_INDEX_BITS + SYNAPSE_TYPE_BITS;

/// Row encodings supported by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RowFormat {
    /// Fixed weights, one word per synapse
    Static,
    /// Plastic weights and controls as separate half-word arrays
    Plastic,
}

impl RowFormat {
    /// Row encoder for this format
    pub fn io(self) -> &'static dyn SynapseRowIo {
        match self {
            RowFormat::Static => &StaticRowIo,
            RowFormat::Plastic => &PlasticRowIo,
        }
    }
}

/// Encoder and decoder of one row format
pub trait SynapseRowIo: Send + Sync {
    /// Format handled
    fn format(&self) -> RowFormat;

    /// Words occupied by a row padded to `padded_len` synapses
    fn row_words(&self, padded_len: usize) -> usize;

    /// Pack `row` for a postsynaptic slice starting at `post_lo`
    fn encode_row(
        &self,
        row: &SynapticRow,
        post_lo: u32,
        weight_scales: &[f64],
        padded_len: usize,
    ) -> Result<Vec<u32>>;

    /// Unpack a row previously produced by [`SynapseRowIo::encode_row`]
    fn decode_row(&self, words: &[u32], post_lo: u32, weight_scales: &[f64])
        -> Result<SynapticRow>;
}

/// Control half-word of one synapse
pub fn synapse_control(index: u32, delay: u32, synapse_type: SynapseType) -> Result<u32> {
    if index > INDEX_MASK {
        return Err(ImageError::configuration(
            "synapse_index",
            format!("postsynaptic index {} does not fit {} bits", index, SYNAPSE_INDEX_BITS),
        ));
    }
    if delay == 0 || delay > MAX_NATIVE_DELAY {
        return Err(ImageError::configuration(
            "synapse_delay",
            format!("delay {} outside 1..={}", delay, MAX_NATIVE_DELAY),
        ));
    }
    Ok(((delay - 1) & DELAY_MASK) << DELAY_SHIFT
        | (synapse_type.index() as u32 & TYPE_MASK) << SYNAPSE_INDEX_BITS
        | index)
}

fn split_control(control: u32) -> Result<(u32, u32, SynapseType)> {
    let index = control & INDEX_MASK;
    let ty = SynapseType::from_index(((control >> SYNAPSE_INDEX_BITS) & TYPE_MASK) as usize)?;
    let delay = ((control >> DELAY_SHIFT) & DELAY_MASK) + 1;
    Ok((index, delay, ty))
}

fn scale_for(weight_scales: &[f64], ty: SynapseType) -> Result<f64> {
    weight_scales.get(ty.index()).copied().ok_or_else(|| {
        ImageError::configuration("weight_scales", format!("no scale for {} synapses", ty))
    })
}

/// Fixed-point weight magnitude
pub fn encode_weight(weight: f64, scale: f64) -> Result<u32> {
    FixedPointFormat::UINT16.encode(weight.abs() * scale)
}

fn relative_index(target: u32, post_lo: u32) -> Result<u32> {
    target.checked_sub(post_lo).ok_or_else(|| {
        ImageError::configuration(
            "synapse_index",
            format!("target {} precedes slice start {}", target, post_lo),
        )
    })
}

fn check_padding(row: &SynapticRow, padded_len: usize) -> Result<()> {
    if row.len() > padded_len {
        return Err(ImageError::configuration(
            "row_length",
            format!("row of {} synapses padded to {}", row.len(), padded_len),
        ));
    }
    Ok(())
}

/// Static row: `[0, n_fixed, 0, synapse words..., zero padding]`
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticRowIo;

impl SynapseRowIo for StaticRowIo {
    fn format(&self) -> RowFormat {
        RowFormat::Static
    }

    fn row_words(&self, padded_len: usize) -> usize {
        3 + padded_len
    }

    fn encode_row(
        &self,
        row: &SynapticRow,
        post_lo: u32,
        weight_scales: &[f64],
        padded_len: usize,
    ) -> Result<Vec<u32>> {
        check_padding(row, padded_len)?;
        let mut words = Vec::with_capacity(self.row_words(padded_len));
        words.extend_from_slice(&[0, row.len() as u32, 0]);
        for (target, weight, delay, ty) in row.iter() {
            let control = synapse_control(relative_index(target, post_lo)?, delay, ty)?;
            let w = encode_weight(weight, scale_for(weight_scales, ty)?)?;
            words.push(w << SYNAPSE_WEIGHT_SHIFT | control);
        }
        words.resize(self.row_words(padded_len), 0);
        Ok(words)
    }

    fn decode_row(
        &self,
        words: &[u32],
        post_lo: u32,
        weight_scales: &[f64],
    ) -> Result<SynapticRow> {
        if words.len() < 3 {
            return Err(ImageError::invalid_format("static row shorter than header"));
        }
        let n = words[1] as usize;
        let body = words
            .get(3..3 + n)
            .ok_or_else(|| ImageError::invalid_format(format!("static row claims {} synapses", n)))?;
        let mut row = SynapticRow::new();
        for &word in body {
            let (index, delay, ty) = split_control(word & 0xFFFF)?;
            let weight = (word >> SYNAPSE_WEIGHT_SHIFT) as f64 / scale_for(weight_scales, ty)?;
            row.push(post_lo + index, weight, delay, ty);
        }
        Ok(row)
    }
}

/// Plastic row: `[plastic_words, pre_trace, weights..., 0, n_plastic, controls...]`
///
/// Weights and controls are arrays of half-words, low half first.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlasticRowIo;

fn half_words(n: usize) -> usize {
    (n + 1) / 2
}

fn pack_halves(values: &[u32], n_words: usize) -> Vec<u32> {
    let mut words = vec![0u32; n_words];
    for (i, &v) in values.iter().enumerate() {
        words[i / 2] |= (v & 0xFFFF) << (16 * (i % 2));
    }
    words
}

fn unpack_half(words: &[u32], i: usize) -> u32 {
    (words[i / 2] >> (16 * (i % 2))) & 0xFFFF
}

impl SynapseRowIo for PlasticRowIo {
    fn format(&self) -> RowFormat {
        RowFormat::Plastic
    }

    fn row_words(&self, padded_len: usize) -> usize {
        4 + 2 * half_words(padded_len)
    }

    fn encode_row(
        &self,
        row: &SynapticRow,
        post_lo: u32,
        weight_scales: &[f64],
        padded_len: usize,
    ) -> Result<Vec<u32>> {
        check_padding(row, padded_len)?;
        let h = half_words(padded_len);
        let mut weights = Vec::with_capacity(row.len());
        let mut controls = Vec::with_capacity(row.len());
        for (target, weight, delay, ty) in row.iter() {
            controls.push(synapse_control(relative_index(target, post_lo)?, delay, ty)?);
            weights.push(encode_weight(weight, scale_for(weight_scales, ty)?)?);
        }

        let mut words = Vec::with_capacity(self.row_words(padded_len));
        words.push(1 + h as u32);
        words.push(0);
        words.extend(pack_halves(&weights, h));
        words.push(0);
        words.push(row.len() as u32);
        words.extend(pack_halves(&controls, h));
        Ok(words)
    }

    fn decode_row(
        &self,
        words: &[u32],
        post_lo: u32,
        weight_scales: &[f64],
    ) -> Result<SynapticRow> {
        let plastic_words = *words
            .first()
            .ok_or_else(|| ImageError::invalid_format("empty plastic row"))? as usize;
        let h = plastic_words
            .checked_sub(1)
            .ok_or_else(|| ImageError::invalid_format("plastic row without trace header"))?;
        if words.len() < 4 + 2 * h {
            return Err(ImageError::invalid_format(format!(
                "plastic row of {} words, expected {}",
                words.len(),
                4 + 2 * h
            )));
        }
        let weight_words = &words[2..2 + h];
        let n = words[3 + h] as usize;
        let control_words = &words[4 + h..4 + 2 * h];
        if n > 2 * h {
            return Err(ImageError::invalid_format(format!(
                "plastic row claims {} synapses in {} half-words",
                n,
                2 * h
            )));
        }

        let mut row = SynapticRow::new();
        for i in 0..n {
            let (index, delay, ty) = split_control(unpack_half(control_words, i))?;
            let weight = unpack_half(weight_words, i) as f64 / scale_for(weight_scales, ty)?;
            row.push(post_lo + index, weight, delay, ty);
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> SynapticRow {
        let mut r = SynapticRow::new();
        r.push(100, 0.5, 1, SynapseType::Excitatory);
        r.push(103, 0.25, 16, SynapseType::Inhibitory);
        r.push(355, 1.0, 7, SynapseType::Excitatory);
        r
    }

    const SCALES: [f64; 2] = [1024.0, 2048.0];

    #[test]
    fn test_static_word_layout() {
        let words = StaticRowIo.encode_row(&row(), 100, &SCALES, 8).unwrap();
        assert_eq!(words.len(), 11);
        assert_eq!(&words[..3], &[0, 3, 0]);
        assert_eq!(words[3], 512 << 16);
        assert_eq!(words[4], 512 << 16 | 15 << 9 | 1 << 8 | 3);
        assert_eq!(words[5], 1024 << 16 | 6 << 9 | 255);
        assert!(words[6..].iter().all(|&w| w == 0));
    }

    #[test]
    fn test_static_decode() {
        let words = StaticRowIo.encode_row(&row(), 100, &SCALES, 8).unwrap();
        let decoded = StaticRowIo.decode_row(&words, 100, &SCALES).unwrap();
        assert_eq!(decoded, row());
    }

    #[test]
    fn test_plastic_layout() {
        let io = PlasticRowIo;
        let words = io.encode_row(&row(), 100, &SCALES, 8).unwrap();
        assert_eq!(words.len(), io.row_words(8));
        assert_eq!(words[0], 5);
        assert_eq!(words[2], 512 | 512 << 16);
        assert_eq!(words[6], 0);
        assert_eq!(words[7], 3);
        let decoded = io.decode_row(&words, 100, &SCALES).unwrap();
        assert_eq!(decoded, row());
    }

    #[test]
    fn test_rejects_unencodable_synapses() {
        let mut r = SynapticRow::new();
        r.push(0, 0.5, 17, SynapseType::Excitatory);
        assert!(StaticRowIo.encode_row(&r, 0, &SCALES, 1).is_err());

        let mut r = SynapticRow::new();
        r.push(256, 0.5, 1, SynapseType::Excitatory);
        assert!(StaticRowIo.encode_row(&r, 0, &SCALES, 1).is_err());

        assert!(StaticRowIo.encode_row(&row(), 100, &SCALES, 1).is_err());
    }

    #[test]
    fn test_weight_overflow_is_range_error() {
        let mut r = SynapticRow::new();
        r.push(0, 100.0, 1, SynapseType::Excitatory);
        let err = StaticRowIo.encode_row(&r, 0, &SCALES, 1).unwrap_err();
        assert!(matches!(err, ImageError::Range { .. }));
    }
}
