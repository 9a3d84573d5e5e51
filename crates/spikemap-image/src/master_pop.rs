//! Master population table
//!
//! Maps an incoming routing key to the synaptic block that holds the rows
//! of its source slice. Each entry is three words: key, mask, and
//! `(block_offset >> 4) << 8 | row_class`. Block offsets are relative to
//! the start of the synaptic matrix region and 16-byte aligned.

use crate::error::{ImageError, Result};
use crate::ids::KeyAndMask;
use crate::row_table::ROW_LENGTHS;

/// Required alignment of synaptic blocks
pub const BLOCK_ALIGNMENT: usize = 16;

/// Bytes per table entry
pub const ENTRY_BYTES: usize = 12;

/// One routing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterPopulationTableEntry {
    /// Source key and mask
    pub key_and_mask: KeyAndMask,
    /// Byte offset of the block within the matrix region
    pub block_offset: u32,
    /// Row length class of the block
    pub row_class: u8,
}

impl MasterPopulationTableEntry {
    /// Packed third word
    pub fn address_word(&self) -> u32 {
        ((self.block_offset >> 4) << 8) | self.row_class as u32
    }

    /// Inverse of [`MasterPopulationTableEntry::address_word`]
    pub fn from_words(key: u32, mask: u32, address: u32) -> Self {
        Self {
            key_and_mask: KeyAndMask::new(key, mask),
            block_offset: (address >> 8) << 4,
            row_class: (address & 0xFF) as u8,
        }
    }
}

/// Sorted, collision-free key-to-block index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterPopulationTable {
    entries: Vec<MasterPopulationTableEntry>,
}

impl MasterPopulationTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Size in bytes of a table with `n_entries`
    pub const fn size_for(n_entries: usize) -> usize {
        4 + n_entries * ENTRY_BYTES
    }

    /// Add an entry, rejecting keys that collide with an existing one
    pub fn add_entry(
        &mut self,
        key_and_mask: KeyAndMask,
        block_offset: u32,
        row_class: u8,
    ) -> Result<()> {
        if block_offset as usize % BLOCK_ALIGNMENT != 0 {
            return Err(ImageError::configuration(
                "master_pop_table",
                format!("block offset {:#x} is not 16-byte aligned", block_offset),
            ));
        }
        if row_class as usize >= ROW_LENGTHS.len() {
            return Err(ImageError::configuration(
                "master_pop_table",
                format!("row class {} out of range", row_class),
            ));
        }
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.key_and_mask.overlaps(&key_and_mask))
        {
            return Err(ImageError::configuration(
                "master_pop_table",
                format!(
                    "key {:#010x}/{:#010x} collides with {:#010x}/{:#010x}",
                    key_and_mask.key,
                    key_and_mask.mask,
                    existing.key_and_mask.key,
                    existing.key_and_mask.mask
                ),
            ));
        }
        let entry = MasterPopulationTableEntry {
            key_and_mask,
            block_offset,
            row_class,
        };
        let at = self
            .entries
            .partition_point(|e| e.key_and_mask.key < key_and_mask.key);
        self.entries.insert(at, entry);
        Ok(())
    }

    /// Entries sorted by key
    pub fn entries(&self) -> &[MasterPopulationTableEntry] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no entries were added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry routing `key`
    pub fn lookup(&self, key: u32) -> Option<&MasterPopulationTableEntry> {
        self.entries.iter().find(|e| e.key_and_mask.matches(key))
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        Self::size_for(self.entries.len())
    }

    /// Serialized words: count, then key, mask, address per entry
    pub fn to_words(&self) -> Vec<u32> {
        let mut words = Vec::with_capacity(1 + self.entries.len() * 3);
        words.push(self.entries.len() as u32);
        for e in &self.entries {
            words.push(e.key_and_mask.key);
            words.push(e.key_and_mask.mask);
            words.push(e.address_word());
        }
        words
    }

    /// Parse a serialized table
    pub fn from_words(words: &[u32]) -> Result<Self> {
        let n = *words
            .first()
            .ok_or_else(|| ImageError::invalid_format("empty master population table"))?
            as usize;
        if words.len() < 1 + n * 3 {
            return Err(ImageError::invalid_format(format!(
                "master population table claims {} entries in {} words",
                n,
                words.len()
            )));
        }
        let entries = words[1..1 + n * 3]
            .chunks_exact(3)
            .map(|c| MasterPopulationTableEntry::from_words(c[0], c[1], c[2]))
            .collect();
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_sorted_by_key() {
        let mut t = MasterPopulationTable::new();
        t.add_entry(KeyAndMask::new(0x0000_1000, 0xFFFF_F800), 64, 2).unwrap();
        t.add_entry(KeyAndMask::new(0x0000_0000, 0xFFFF_F800), 0, 7).unwrap();
        let keys: Vec<u32> = t.entries().iter().map(|e| e.key_and_mask.key).collect();
        assert_eq!(keys, vec![0, 0x1000]);
        assert_eq!(t.size(), 4 + 24);
    }

    #[test]
    fn test_collision_rejected() {
        let mut t = MasterPopulationTable::new();
        t.add_entry(KeyAndMask::new(0x0000_0000, 0xFFFF_F000), 0, 1).unwrap();
        let err = t
            .add_entry(KeyAndMask::new(0x0000_0800, 0xFFFF_F800), 16, 1)
            .unwrap_err();
        assert!(matches!(err, ImageError::Configuration { .. }));
    }

    #[test]
    fn test_misaligned_block_rejected() {
        let mut t = MasterPopulationTable::new();
        assert!(t.add_entry(KeyAndMask::new(0, 0xFFFF_F800), 20, 1).is_err());
    }

    #[test]
    fn test_words_roundtrip_and_lookup() {
        let mut t = MasterPopulationTable::new();
        t.add_entry(KeyAndMask::new(0x0100_0000, 0xFFFF_F800), 0x2340, 3).unwrap();
        let words = t.to_words();
        assert_eq!(words[3], (0x234 << 8) | 3);
        let parsed = MasterPopulationTable::from_words(&words).unwrap();
        assert_eq!(parsed, t);
        assert_eq!(parsed.lookup(0x0100_0005).unwrap().block_offset, 0x2340);
        assert!(parsed.lookup(0x0200_0000).is_none());
    }
}
