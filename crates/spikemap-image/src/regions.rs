//! Region planning and the image pointer table
//!
//! An image starts with a two-word header (magic, version) followed by a
//! pointer table of `max_regions` little-endian byte offsets. Each reserved
//! region gets its offset in the table; omitted regions hold zero. Regions
//! are laid out contiguously in ascending index order after the table.

use core::fmt;

use crate::error::{ImageError, Result};
use crate::{magic, round_up_to_word, WORD_BYTES};

/// Byte offset of the pointer table within an image
pub const POINTER_TABLE_OFFSET: usize = 2 * WORD_BYTES;

/// Default number of pointer-table slots
pub const DEFAULT_MAX_REGIONS: usize = 16;

/// A named region slot of some image kind
pub trait Region: Copy + fmt::Debug {
    /// Slot in the pointer table
    fn index(self) -> u32;
    /// Human readable label used in errors and logs
    fn label(self) -> &'static str;
}

/// Regions of a neuron population core
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum PopulationRegion {
    /// Timing and recording setup
    System = 0,
    /// Per-atom neuron parameters
    NeuronParams = 1,
    /// Per-type synapse shaping parameters
    SynapseParams = 2,
    /// Row-length translation table
    RowLenTranslation = 3,
    /// Master population table
    MasterPopTable = 4,
    /// Synaptic matrix blocks
    SynapticMatrix = 5,
    /// Recorded spikes
    SpikeHistory = 6,
    /// Recorded membrane potentials
    PotentialHistory = 7,
    /// Recorded synaptic input
    GsynHistory = 8,
    /// Plasticity parameters
    StdpParams = 9,
    /// Profiler samples
    Profiling = 10,
}

impl PopulationRegion {
    /// All population regions in index order
    pub const ALL: [PopulationRegion; 11] = [
        PopulationRegion::System,
        PopulationRegion::NeuronParams,
        PopulationRegion::SynapseParams,
        PopulationRegion::RowLenTranslation,
        PopulationRegion::MasterPopTable,
        PopulationRegion::SynapticMatrix,
        PopulationRegion::SpikeHistory,
        PopulationRegion::PotentialHistory,
        PopulationRegion::GsynHistory,
        PopulationRegion::StdpParams,
        PopulationRegion::Profiling,
    ];
}

impl Region for PopulationRegion {
    fn index(self) -> u32 {
        self as u32
    }

    fn label(self) -> &'static str {
        match self {
            PopulationRegion::System => "system",
            PopulationRegion::NeuronParams => "neuron_params",
            PopulationRegion::SynapseParams => "synapse_params",
            PopulationRegion::RowLenTranslation => "row_len_translation",
            PopulationRegion::MasterPopTable => "master_pop_table",
            PopulationRegion::SynapticMatrix => "synaptic_matrix",
            PopulationRegion::SpikeHistory => "spike_history",
            PopulationRegion::PotentialHistory => "potential_history",
            PopulationRegion::GsynHistory => "gsyn_history",
            PopulationRegion::StdpParams => "stdp_params",
            PopulationRegion::Profiling => "profiling",
        }
    }
}

/// Regions of a delay-extension core
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum DelayRegion {
    /// Timing setup
    Timings = 0,
    /// Executable component identifiers
    Components = 1,
    /// Delay parameters and stage bitmasks
    DelayParams = 2,
}

impl Region for DelayRegion {
    fn index(self) -> u32 {
        self as u32
    }

    fn label(self) -> &'static str {
        match self {
            DelayRegion::Timings => "timings",
            DelayRegion::Components => "components",
            DelayRegion::DelayParams => "delay_params",
        }
    }
}

/// Position of one reserved region in an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSpan {
    /// Pointer-table slot
    pub index: u32,
    /// Byte offset from the start of the image
    pub offset: u32,
    /// Size in bytes, a multiple of the word size
    pub size: u32,
}

impl RegionSpan {
    /// Byte range within the image
    pub fn range(&self) -> core::ops::Range<usize> {
        self.offset as usize..(self.offset + self.size) as usize
    }
}

/// Accumulates region reservations for one image
#[derive(Debug, Clone)]
pub struct RegionPlanner {
    capacity: usize,
    max_regions: usize,
    reserved: Vec<(u32, &'static str, usize)>,
    // last index seen, omitted regions included
    last: Option<(u32, &'static str)>,
    used: usize,
}

impl RegionPlanner {
    /// Create a planner for an image of at most `capacity` bytes
    pub fn new(capacity: usize, max_regions: usize) -> Self {
        let used = header_size(max_regions);
        Self {
            capacity,
            max_regions,
            reserved: Vec::new(),
            last: None,
            used,
        }
    }

    /// Reserve `size` bytes for `region`, rounded up to a whole word.
    ///
    /// A size of zero omits the region. Regions must be reserved in
    /// strictly ascending index order and each at most once.
    pub fn reserve<R: Region>(&mut self, region: R, size: usize) -> Result<()> {
        let index = region.index();
        if index as usize >= self.max_regions {
            return Err(ImageError::configuration(
                region.label(),
                format!("index {} exceeds max_regions {}", index, self.max_regions),
            ));
        }
        if let Some((last, last_label)) = self.last {
            if index == last {
                return Err(ImageError::configuration(region.label(), "reserved twice"));
            }
            if index < last {
                return Err(ImageError::configuration(
                    region.label(),
                    format!("reserved after higher region {}", last_label),
                ));
            }
        }
        if size == 0 {
            log::trace!("Omitting empty region {}", region.label());
            self.last = Some((index, region.label()));
            return Ok(());
        }

        let size = round_up_to_word(size);
        if self.used + size > self.capacity {
            return Err(ImageError::configuration(
                region.label(),
                format!(
                    "image needs {} bytes, core has {}",
                    self.used + size,
                    self.capacity
                ),
            ));
        }
        self.used += size;
        self.last = Some((index, region.label()));
        self.reserved.push((index, region.label(), size));
        Ok(())
    }

    /// Bytes used so far, including the header
    pub fn used(&self) -> usize {
        self.used
    }

    /// Finalize offsets
    pub fn finish(self) -> RegionLayout {
        let mut offset = header_size(self.max_regions);
        let spans = self
            .reserved
            .into_iter()
            .map(|(index, _, size)| {
                let span = RegionSpan {
                    index,
                    offset: offset as u32,
                    size: size as u32,
                };
                offset += size;
                span
            })
            .collect();
        RegionLayout {
            max_regions: self.max_regions,
            spans,
            total_size: offset,
        }
    }
}

/// Size of header plus pointer table
pub const fn header_size(max_regions: usize) -> usize {
    POINTER_TABLE_OFFSET + max_regions * WORD_BYTES
}

/// Final placement of every reserved region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionLayout {
    max_regions: usize,
    spans: Vec<RegionSpan>,
    total_size: usize,
}

impl RegionLayout {
    /// Number of pointer-table slots
    pub fn max_regions(&self) -> usize {
        self.max_regions
    }

    /// Total image size in bytes
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Reserved regions in index order
    pub fn spans(&self) -> &[RegionSpan] {
        &self.spans
    }

    /// Span of a region slot, `None` if it was omitted
    pub fn span(&self, index: u32) -> Option<&RegionSpan> {
        self.spans.iter().find(|s| s.index == index)
    }

    /// Header words and pointer table as bytes
    pub fn header_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(header_size(self.max_regions));
        bytes.extend_from_slice(&magic::IMAGE.to_le_bytes());
        bytes.extend_from_slice(&magic::IMAGE_VERSION.to_le_bytes());
        let mut table = vec![0u32; self.max_regions];
        for span in &self.spans {
            table[span.index as usize] = span.offset;
        }
        for offset in table {
            bytes.extend_from_slice(&offset.to_le_bytes());
        }
        bytes
    }

    /// Recover the layout from image bytes.
    ///
    /// Region sizes are implied by the next region's offset, or the image
    /// length for the last region.
    pub fn decode(bytes: &[u8], max_regions: usize) -> Result<Self> {
        let header = header_size(max_regions);
        if bytes.len() < header {
            return Err(ImageError::invalid_format(format!(
                "image of {} bytes shorter than header of {}",
                bytes.len(),
                header
            )));
        }
        let magic_word = read_u32(bytes, 0);
        if magic_word != magic::IMAGE {
            return Err(ImageError::invalid_format(format!(
                "bad magic {:#010x}",
                magic_word
            )));
        }
        let version = read_u32(bytes, WORD_BYTES);
        if version != magic::IMAGE_VERSION {
            return Err(ImageError::invalid_format(format!(
                "unsupported version {:#010x}",
                version
            )));
        }

        let mut present: Vec<(u32, u32)> = (0..max_regions)
            .map(|i| (i as u32, read_u32(bytes, POINTER_TABLE_OFFSET + i * WORD_BYTES)))
            .filter(|&(_, offset)| offset != 0)
            .collect();
        present.sort_by_key(|&(_, offset)| offset);

        let mut spans = Vec::with_capacity(present.len());
        for (n, &(index, offset)) in present.iter().enumerate() {
            let end = present
                .get(n + 1)
                .map(|&(_, next)| next as usize)
                .unwrap_or(bytes.len());
            if (offset as usize) < header || end > bytes.len() || end < offset as usize {
                return Err(ImageError::invalid_format(format!(
                    "region {} offset {} outside image",
                    index, offset
                )));
            }
            spans.push(RegionSpan {
                index,
                offset,
                size: (end - offset as usize) as u32,
            });
        }
        spans.sort_by_key(|s| s.index);

        Ok(Self {
            max_regions,
            spans,
            total_size: bytes.len(),
        })
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
