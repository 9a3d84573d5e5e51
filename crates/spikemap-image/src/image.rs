//! Image buffers and bounded region writers

use crate::error::{ImageError, Result};
use crate::fixed_point::FixedPointFormat;
use crate::ids::CoreLocation;
use crate::regions::{Region, RegionLayout, RegionSpan};

/// Mutable byte image being filled region by region
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    layout: RegionLayout,
    bytes: Vec<u8>,
}

impl ImageBuffer {
    /// Allocate a zeroed image for `layout` with the header already written
    pub fn new(layout: RegionLayout) -> Self {
        let mut bytes = vec![0u8; layout.total_size()];
        let header = layout.header_bytes();
        bytes[..header.len()].copy_from_slice(&header);
        Self { layout, bytes }
    }

    /// Layout the buffer was created from
    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    /// True if the region was reserved with a non-zero size
    pub fn has_region<R: Region>(&self, region: R) -> bool {
        self.layout.span(region.index()).is_some()
    }

    /// Open a writer positioned at the start of `region`
    pub fn region<R: Region>(&mut self, region: R) -> Result<RegionCursor<'_>> {
        let span = *self
            .layout
            .span(region.index())
            .ok_or_else(|| ImageError::configuration(region.label(), "region was not reserved"))?;
        Ok(RegionCursor {
            label: region.label(),
            data: &mut self.bytes[span.range()],
            position: 0,
        })
    }

    /// Seal the buffer into an image of `core`
    pub fn into_image(self, core: CoreLocation) -> CoreImage {
        CoreImage {
            core,
            layout: self.layout,
            bytes: self.bytes,
        }
    }
}

/// Sequential little-endian writer confined to one region
#[derive(Debug)]
pub struct RegionCursor<'a> {
    label: &'static str,
    data: &'a mut [u8],
    position: usize,
}

impl<'a> RegionCursor<'a> {
    /// Bytes written so far
    pub fn written(&self) -> usize {
        self.position
    }

    /// Bytes still available
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Append raw bytes
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(ImageError::region_too_small(
                self.label,
                self.position + bytes.len(),
                self.data.len(),
            ));
        }
        self.data[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }

    /// Append one 32-bit word
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Append one signed 32-bit word
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Append a sequence of words
    pub fn write_words(&mut self, words: &[u32]) -> Result<()> {
        let needed = words.len() * 4;
        if needed > self.remaining() {
            return Err(ImageError::region_too_small(
                self.label,
                self.position + needed,
                self.data.len(),
            ));
        }
        for &word in words {
            self.write_u32(word)?;
        }
        Ok(())
    }

    /// Encode `value` in `format` and append it using the format's width
    pub fn write_value(&mut self, value: f64, format: FixedPointFormat) -> Result<()> {
        let raw = format.encode(value)?;
        match format.bytes() {
            1 => self.write_bytes(&[raw as u8]),
            2 => self.write_bytes(&(raw as u16).to_le_bytes()),
            _ => self.write_u32(raw),
        }
    }

    /// Skip `count` zero bytes
    pub fn skip(&mut self, count: usize) -> Result<()> {
        if count > self.remaining() {
            return Err(ImageError::region_too_small(
                self.label,
                self.position + count,
                self.data.len(),
            ));
        }
        self.position += count;
        Ok(())
    }

    /// Check that the region was filled exactly
    pub fn finish(self) -> Result<usize> {
        if self.position != self.data.len() {
            return Err(ImageError::configuration(
                self.label,
                format!(
                    "wrote {} bytes into a region of {}",
                    self.position,
                    self.data.len()
                ),
            ));
        }
        Ok(self.position)
    }
}

/// Complete binary image of one core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreImage {
    core: CoreLocation,
    layout: RegionLayout,
    bytes: Vec<u8>,
}

impl CoreImage {
    /// Parse image bytes previously produced for `core`
    pub fn from_bytes(core: CoreLocation, bytes: Vec<u8>, max_regions: usize) -> Result<Self> {
        let layout = RegionLayout::decode(&bytes, max_regions)?;
        Ok(Self { core, layout, bytes })
    }

    /// Core the image belongs to
    pub fn core(&self) -> CoreLocation {
        self.core
    }

    /// Region layout
    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into raw bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Image size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the image has no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes of one region, `None` if omitted
    pub fn region_bytes<R: Region>(&self, region: R) -> Option<&[u8]> {
        self.layout
            .span(region.index())
            .map(|span| &self.bytes[span.range()])
    }

    /// Words of one region, `None` if omitted
    pub fn region_words<R: Region>(&self, region: R) -> Option<Vec<u32>> {
        self.region_bytes(region).map(words_from_bytes)
    }

    /// Span of one region
    pub fn span<R: Region>(&self, region: R) -> Option<RegionSpan> {
        self.layout.span(region.index()).copied()
    }

    /// CRC32 over the full image
    pub fn checksum(&self) -> u32 {
        calculate_checksum(&self.bytes)
    }
}

/// CRC32 checksum of a byte slice
pub fn calculate_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Reinterpret little-endian bytes as words, ignoring a trailing partial word
pub fn words_from_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
