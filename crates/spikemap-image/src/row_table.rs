//! Row-length translation table
//!
//! Rows in a synaptic block are padded to one of a fixed set of lengths.
//! The class index of that length is what the master population table
//! stores, and the table itself is written verbatim into the image.

use crate::error::{ImageError, Result};

/// Allowed padded row lengths, indexed by class
pub const ROW_LENGTHS: [u32; 8] = [0, 1, 8, 16, 32, 64, 128, 256];

/// Longest row a block may hold
pub const MAX_ROW_LENGTH: usize = 256;

/// Size of the translation table region in bytes
pub const ROW_TABLE_BYTES: usize = ROW_LENGTHS.len() * 4;

/// Smallest class whose length holds `n_synapses`
pub fn row_length_class(n_synapses: usize) -> Result<u8> {
    ROW_LENGTHS
        .iter()
        .position(|&len| len as usize >= n_synapses)
        .map(|class| class as u8)
        .ok_or_else(|| {
            ImageError::configuration(
                "row_length",
                format!(
                    "row of {} synapses exceeds maximum of {}",
                    n_synapses, MAX_ROW_LENGTH
                ),
            )
        })
}

/// Padded length of a class
pub fn row_length(class: u8) -> Result<usize> {
    ROW_LENGTHS
        .get(class as usize)
        .map(|&len| len as usize)
        .ok_or_else(|| ImageError::invalid_format(format!("unknown row class {}", class)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_selection() {
        assert_eq!(row_length_class(0).unwrap(), 0);
        assert_eq!(row_length_class(1).unwrap(), 1);
        assert_eq!(row_length_class(2).unwrap(), 2);
        assert_eq!(row_length_class(8).unwrap(), 2);
        assert_eq!(row_length_class(9).unwrap(), 3);
        assert_eq!(row_length_class(256).unwrap(), 7);
        assert!(row_length_class(257).is_err());
    }

    #[test]
    fn test_lengths_are_ascending() {
        assert!(ROW_LENGTHS.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(row_length(7).unwrap(), MAX_ROW_LENGTH);
        assert!(row_length(8).is_err());
    }
}
