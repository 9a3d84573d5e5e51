//! Identifier types shared by the image builder and the buffer protocol

use core::fmt;
use core::ops::RangeInclusive;

use crate::error::{ImageError, Result};

/// Coordinates of one processing core: chip `(x, y)` and processor `p`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoreLocation {
    /// Chip x coordinate
    pub x: u8,
    /// Chip y coordinate
    pub y: u8,
    /// Processor on the chip
    pub p: u8,
}

impl CoreLocation {
    /// Create a new core location
    pub const fn new(x: u8, y: u8, p: u8) -> Self {
        Self { x, y, p }
    }

    /// Chip identifier as carried in protocol messages: `x << 8 | y`
    pub const fn chip_id(&self) -> u16 {
        ((self.x as u16) << 8) | self.y as u16
    }

    /// Rebuild a location from a chip identifier and processor
    pub const fn from_chip_id(chip_id: u16, p: u8) -> Self {
        Self {
            x: (chip_id >> 8) as u8,
            y: (chip_id & 0xFF) as u8,
            p,
        }
    }
}

impl fmt::Display for CoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.p)
    }
}

/// Contiguous inclusive range of atoms placed on one core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PlacedSlice {
    /// Core the slice lives on
    pub core: CoreLocation,
    /// First atom (inclusive)
    pub lo_atom: u32,
    /// Last atom (inclusive)
    pub hi_atom: u32,
}

impl PlacedSlice {
    /// Create a new slice, rejecting inverted ranges
    pub fn new(core: CoreLocation, lo_atom: u32, hi_atom: u32) -> Result<Self> {
        if lo_atom > hi_atom {
            return Err(ImageError::configuration(
                "slice",
                format!("lo_atom {} > hi_atom {} on core {}", lo_atom, hi_atom, core),
            ));
        }
        Ok(Self { core, lo_atom, hi_atom })
    }

    /// Number of atoms in the slice
    pub const fn n_atoms(&self) -> u32 {
        self.hi_atom - self.lo_atom + 1
    }

    /// True if the global atom index is part of this slice
    pub const fn contains(&self, atom: u32) -> bool {
        atom >= self.lo_atom && atom <= self.hi_atom
    }

    /// Global atom indices of the slice
    pub fn atoms(&self) -> RangeInclusive<u32> {
        self.lo_atom..=self.hi_atom
    }
}

impl fmt::Display for PlacedSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}@{}", self.lo_atom, self.hi_atom, self.core)
    }
}

/// Routing key and mask assigned to the outgoing traffic of one slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyAndMask {
    /// Base routing key
    pub key: u32,
    /// Mask applied before comparing with `key`
    pub mask: u32,
}

impl KeyAndMask {
    /// Mask used by the default coordinate-based allocation (2048 keys per core)
    pub const DEFAULT_MASK: u32 = 0xFFFF_F800;

    /// Create a new key and mask
    pub const fn new(key: u32, mask: u32) -> Self {
        Self { key, mask }
    }

    /// Default key derived from the core coordinates
    pub const fn from_core(core: CoreLocation) -> Self {
        let p = if core.p == 0 { 0 } else { core.p as u32 - 1 };
        Self {
            key: ((core.x as u32) << 24) | ((core.y as u32) << 16) | (p << 11),
            mask: Self::DEFAULT_MASK,
        }
    }

    /// True if `key` is routed by this entry
    pub const fn matches(&self, key: u32) -> bool {
        key & self.mask == self.key
    }

    /// True if some key is matched by both entries
    pub const fn overlaps(&self, other: &KeyAndMask) -> bool {
        (self.key ^ other.key) & self.mask & other.mask == 0
    }

    /// Number of keys covered by the mask
    pub const fn n_keys(&self) -> u64 {
        1u64 << (!self.mask).count_ones()
    }
}

/// Synapse types understood by the neuron firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SynapseType {
    /// Excitatory input
    Excitatory,
    /// Inhibitory input
    Inhibitory,
}

impl SynapseType {
    /// Number of synapse types
    pub const COUNT: usize = 2;

    /// All synapse types in index order
    pub const ALL: [SynapseType; 2] = [SynapseType::Excitatory, SynapseType::Inhibitory];

    /// Index used in synapse words and per-type arrays
    pub const fn index(self) -> usize {
        match self {
            SynapseType::Excitatory => 0,
            SynapseType::Inhibitory => 1,
        }
    }

    /// Inverse of [`SynapseType::index`]
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| ImageError::invalid_format(format!("unknown synapse type {}", index)))
    }
}

impl fmt::Display for SynapseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynapseType::Excitatory => write!(f, "excitatory"),
            SynapseType::Inhibitory => write!(f, "inhibitory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chip_id_roundtrip() {
        let core = CoreLocation::new(3, 7, 12);
        assert_eq!(core.chip_id(), 0x0307);
        assert_eq!(CoreLocation::from_chip_id(core.chip_id(), 12), core);
    }

    #[test]
    fn test_slice() {
        let core = CoreLocation::new(0, 0, 1);
        let slice = PlacedSlice::new(core, 256, 511).unwrap();
        assert_eq!(slice.n_atoms(), 256);
        assert!(slice.contains(300));
        assert!(!slice.contains(512));
        assert!(PlacedSlice::new(core, 5, 4).is_err());
    }

    #[test]
    fn test_default_keys_do_not_overlap() {
        let a = KeyAndMask::from_core(CoreLocation::new(0, 0, 1));
        let b = KeyAndMask::from_core(CoreLocation::new(0, 0, 2));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&a));
        assert!(a.matches(a.key + 17));
        assert!(!a.matches(b.key));
        assert_eq!(a.n_keys(), 2048);
    }
}
