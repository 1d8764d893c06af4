// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Region header and layout validation.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐ 0
//! │ RegionHeader (64 bytes)                      │
//! ├──────────────────────────────────────────────┤ REGISTER_AREA_OFFSET
//! │ EndpointRegisters × MAX_ENDPOINTS (32 B each)│
//! ├──────────────────────────────────────────────┤ cell_offset (4 KiB aligned)
//! │ cell 0 │ cell 1 │ ...        (CELL_SIZE each)│
//! └──────────────────────────────────────────────┘ total_size
//! ```
//!
//! A process that opens the region by name trusts no offset until magic,
//! version and the CRC32 over the header fields check out.

use crate::error::SharedMemoryError;
use crate::layout::{align_up, BufferLayout, CELL_SIZE};
use crate::shm::registers::REGISTER_SLOT_SIZE;
use crate::shm::SharedMemoryRegion;
use crate::types::{EndpointIndex, SampleDepth, MAX_ENDPOINTS};

/// Magic bytes identifying a vcable region.
pub const MAGIC: [u8; 8] = *b"VCABLE\0\0";

/// Layout version written into every header.
pub const LAYOUT_VERSION: u32 = 1;

/// Offset of the register area from the region base.
pub const REGISTER_AREA_OFFSET: usize = 64;

/// Alignment of the cell area.
pub const CELL_AREA_ALIGNMENT: usize = 4096;

/// Header stored at offset 0 of every region.
#[repr(C)]
#[derive(Clone, Copy)]
struct RegionHeader {
    magic: [u8; 8],
    version: u32,
    frame_size: u32,
    sample_rate: u32,
    sample_bits: u32,
    min_frame_count: u32,
    max_endpoints: u32,
    register_offset: u32,
    cell_offset: u32,
    cell_count: u32,
    cell_size: u32,
    checksum: u32,
    _reserved: [u32; 3],
}

const HEADER_SIZE: usize = std::mem::size_of::<RegionHeader>();
const _: () = assert!(HEADER_SIZE == REGISTER_AREA_OFFSET);

impl RegionHeader {
    fn checksum_of(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.magic);
        for field in [
            self.version,
            self.frame_size,
            self.sample_rate,
            self.sample_bits,
            self.min_frame_count,
            self.max_endpoints,
            self.register_offset,
            self.cell_offset,
            self.cell_count,
            self.cell_size,
        ] {
            hasher.update(&field.to_le_bytes());
        }
        hasher.finalize()
    }
}

/// Where everything lives inside a session's region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    pub frame_size: u32,
    pub sample_rate: u32,
    pub sample_depth: SampleDepth,
    pub min_frame_count: u32,
    pub register_offset: usize,
    pub cell_offset: usize,
    pub cell_count: usize,
    pub total_size: usize,
}

impl RegionLayout {
    /// Compute the region geometry for a validated buffer layout.
    pub fn for_buffer(layout: &BufferLayout) -> Self {
        let register_end = REGISTER_AREA_OFFSET + MAX_ENDPOINTS * REGISTER_SLOT_SIZE;
        let cell_offset = align_up(register_end, CELL_AREA_ALIGNMENT);
        let cell_count = layout.cell_count();

        Self {
            frame_size: layout.frame_size,
            sample_rate: layout.sample_rate.hz(),
            sample_depth: layout.sample_depth,
            min_frame_count: layout.min_frame_count,
            register_offset: REGISTER_AREA_OFFSET,
            cell_offset,
            cell_count,
            total_size: cell_offset + cell_count * CELL_SIZE,
        }
    }

    /// Offset of an endpoint's register slot.
    pub fn register_slot_offset(&self, index: EndpointIndex) -> usize {
        self.register_offset + index.as_usize() * REGISTER_SLOT_SIZE
    }

    /// Absolute offset of a cell.
    pub fn cell_byte_offset(&self, cell: usize) -> usize {
        self.cell_offset + cell * CELL_SIZE
    }

    /// Stamp the header into a freshly created region.
    pub fn write_header(&self, region: &SharedMemoryRegion) -> Result<(), SharedMemoryError> {
        if region.size() < self.total_size {
            return Err(SharedMemoryError::InvalidHeader {
                reason: format!(
                    "region of {} bytes cannot hold layout of {} bytes",
                    region.size(),
                    self.total_size
                ),
            });
        }

        let mut header = RegionHeader {
            magic: MAGIC,
            version: LAYOUT_VERSION,
            frame_size: self.frame_size,
            sample_rate: self.sample_rate,
            sample_bits: self.sample_depth.bits(),
            min_frame_count: self.min_frame_count,
            max_endpoints: MAX_ENDPOINTS as u32,
            register_offset: self.register_offset as u32,
            cell_offset: self.cell_offset as u32,
            cell_count: self.cell_count as u32,
            cell_size: CELL_SIZE as u32,
            checksum: 0,
            _reserved: [0; 3],
        };
        header.checksum = header.checksum_of();

        // SAFETY: region holds at least HEADER_SIZE bytes (checked above, the
        // layout always starts past the header); the header is written before
        // the region is handed to any other process.
        unsafe {
            std::ptr::write_unaligned(region.as_ptr() as *mut RegionHeader, header);
        }
        Ok(())
    }

    /// Read and validate the header of an opened region.
    pub fn read_header(region: &SharedMemoryRegion) -> Result<Self, SharedMemoryError> {
        if region.size() < HEADER_SIZE {
            return Err(SharedMemoryError::InvalidHeader {
                reason: format!("region of {} bytes has no header", region.size()),
            });
        }

        // SAFETY: size checked above; the header is immutable after creation.
        let header: RegionHeader =
            unsafe { std::ptr::read_unaligned(region.as_ptr() as *const RegionHeader) };

        if header.magic != MAGIC {
            return Err(SharedMemoryError::InvalidHeader {
                reason: "bad magic".to_string(),
            });
        }
        if header.version != LAYOUT_VERSION {
            return Err(SharedMemoryError::InvalidHeader {
                reason: format!("unsupported layout version {}", header.version),
            });
        }

        let actual = header.checksum_of();
        if actual != header.checksum {
            return Err(SharedMemoryError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }

        if header.cell_size as usize != CELL_SIZE
            || header.max_endpoints as usize != MAX_ENDPOINTS
        {
            return Err(SharedMemoryError::InvalidHeader {
                reason: format!(
                    "built for cell size {} / {} endpoints, region has {} / {}",
                    CELL_SIZE, MAX_ENDPOINTS, header.cell_size, header.max_endpoints
                ),
            });
        }

        let sample_depth =
            SampleDepth::from_bits(header.sample_bits).map_err(|e| {
                SharedMemoryError::InvalidHeader {
                    reason: e.to_string(),
                }
            })?;

        let layout = Self {
            frame_size: header.frame_size,
            sample_rate: header.sample_rate,
            sample_depth,
            min_frame_count: header.min_frame_count,
            register_offset: header.register_offset as usize,
            cell_offset: header.cell_offset as usize,
            cell_count: header.cell_count as usize,
            total_size: header.cell_offset as usize + header.cell_count as usize * CELL_SIZE,
        };

        if layout.total_size > region.size() {
            return Err(SharedMemoryError::InvalidHeader {
                reason: format!(
                    "layout needs {} bytes, mapping has {}",
                    layout.total_size,
                    region.size()
                ),
            });
        }

        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_layout() -> BufferLayout {
        BufferLayout::new(4 * CELL_SIZE as u64, 256, 48_000, 16, 4).unwrap()
    }

    #[test]
    fn test_geometry() {
        let layout = RegionLayout::for_buffer(&buffer_layout());
        assert_eq!(layout.register_offset, 64);
        // 64 + 64 × 32 = 2112 → aligned to 4096.
        assert_eq!(layout.cell_offset, 4096);
        assert_eq!(layout.cell_count, 4);
        assert_eq!(layout.total_size, 4096 + 4 * CELL_SIZE);
        assert_eq!(layout.cell_byte_offset(1), 4096 + CELL_SIZE);
        assert_eq!(
            layout.register_slot_offset(EndpointIndex::new(2).unwrap()),
            64 + 64
        );
    }

    #[test]
    fn test_header_round_trip() {
        let layout = RegionLayout::for_buffer(&buffer_layout());
        let region = SharedMemoryRegion::anonymous(layout.total_size).unwrap();
        layout.write_header(&region).unwrap();
        assert_eq!(RegionLayout::read_header(&region).unwrap(), layout);
    }

    #[test]
    fn test_corrupted_header_is_rejected() {
        let layout = RegionLayout::for_buffer(&buffer_layout());
        let region = SharedMemoryRegion::anonymous(layout.total_size).unwrap();
        layout.write_header(&region).unwrap();

        // Flip a byte in frame_size.
        // SAFETY: test owns the mapping exclusively
        unsafe { *region.as_ptr().add(12) ^= 0xFF };

        assert!(matches!(
            RegionLayout::read_header(&region),
            Err(SharedMemoryError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_blank_region_is_rejected() {
        let region = SharedMemoryRegion::anonymous(8192).unwrap();
        assert!(matches!(
            RegionLayout::read_header(&region),
            Err(SharedMemoryError::InvalidHeader { .. })
        ));
    }
}
