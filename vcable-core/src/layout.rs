// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Session-wide buffer layout and ring sizing.
//!
//! `frame_size` is the number of ring bytes one tick moves for an endpoint.
//! It has to hold a whole number of interleaved sample frames for every
//! endpoint that uses it; that is checked when the endpoint is sized.

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;
use crate::types::{ChannelCount, SampleDepth, SampleRate};

/// Fixed size of one allocation cell (64 KiB).
pub const CELL_SIZE: usize = 64 * 1024;
/// Largest cell area a session may request (256 MiB).
pub const MAX_BUFFER_SIZE: u64 = 256 * 1024 * 1024;
/// Largest per-tick transfer (64 KiB).
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;
/// Largest minimum frame count.
pub const MAX_MIN_FRAME_COUNT: u32 = 64;

/// Validated buffer layout of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferLayout {
    /// Requested size of the cell area in bytes.
    pub buffer_size: u64,
    /// Ring bytes moved per tick per endpoint.
    pub frame_size: u32,
    pub sample_rate: SampleRate,
    pub sample_depth: SampleDepth,
    /// Minimum ring length, in ticks, for every endpoint.
    pub min_frame_count: u32,
}

impl BufferLayout {
    /// Validate raw layout parameters.
    ///
    /// Runs before any region is created, so a rejected layout leaves the
    /// session exactly as it was.
    pub fn new(
        buffer_size: u64,
        frame_size: u32,
        sample_rate: u32,
        sample_depth_bits: u32,
        min_frame_count: u32,
    ) -> Result<Self, HardValidationError> {
        let sample_rate = SampleRate::new(sample_rate)?;
        let sample_depth = SampleDepth::from_bits(sample_depth_bits)?;

        if buffer_size < CELL_SIZE as u64 || buffer_size > MAX_BUFFER_SIZE {
            return Err(HardValidationError::BufferSizeOutOfRange {
                size: buffer_size,
                min: CELL_SIZE as u64,
                max: MAX_BUFFER_SIZE,
            });
        }

        if frame_size == 0 || frame_size > MAX_FRAME_SIZE {
            return Err(HardValidationError::InvalidFieldValue {
                field: "frame_size",
                value: frame_size.to_string(),
                reason: format!("Must be between 1 and {} bytes", MAX_FRAME_SIZE),
            });
        }

        if frame_size as usize % sample_depth.bytes() != 0 {
            return Err(HardValidationError::MisalignedFrameSize {
                frame_size,
                frame_bytes: sample_depth.bytes() as u32,
            });
        }

        if min_frame_count == 0 || min_frame_count > MAX_MIN_FRAME_COUNT {
            return Err(HardValidationError::InvalidFieldValue {
                field: "min_frame_count",
                value: min_frame_count.to_string(),
                reason: format!("Must be between 1 and {}", MAX_MIN_FRAME_COUNT),
            });
        }

        Ok(Self {
            buffer_size,
            frame_size,
            sample_rate,
            sample_depth,
            min_frame_count,
        })
    }

    /// Number of cells backing the requested buffer size.
    pub fn cell_count(&self) -> usize {
        div_ceil(self.buffer_size as usize, CELL_SIZE)
    }

    /// Bytes of one interleaved sample frame for `channels`.
    pub fn frame_bytes(&self, channels: ChannelCount) -> usize {
        channels.as_usize() * self.sample_depth.bytes()
    }

    /// Samples per channel moved by one tick.
    pub fn samples_per_tick(&self, channels: ChannelCount) -> usize {
        self.frame_size as usize / self.frame_bytes(channels)
    }

    /// Check that a tick window splits evenly into sample frames for `channels`.
    pub fn check_channels(&self, channels: ChannelCount) -> Result<(), HardValidationError> {
        let frame_bytes = self.frame_bytes(channels);
        if self.frame_size as usize % frame_bytes != 0 {
            return Err(HardValidationError::MisalignedFrameSize {
                frame_size: self.frame_size,
                frame_bytes: frame_bytes as u32,
            });
        }
        Ok(())
    }

    /// Ring size for an endpoint that asked for `requested` bytes.
    ///
    /// `roundUp(max(requested, min_frame_count × frame_size × channels),
    /// frame_size × channels)`.
    pub fn ring_size(
        &self,
        requested: u32,
        channels: ChannelCount,
    ) -> Result<u32, HardValidationError> {
        self.check_channels(channels)?;

        let granule = self.frame_size as u64 * channels.value() as u64;
        let minimum = self.min_frame_count as u64 * granule;
        let size = round_up((requested as u64).max(minimum), granule);

        if size > MAX_BUFFER_SIZE {
            return Err(HardValidationError::BufferSizeOutOfRange {
                size,
                min: minimum,
                max: MAX_BUFFER_SIZE,
            });
        }

        Ok(size as u32)
    }
}

/// Cells needed to hold `bytes`.
pub fn cells_for(bytes: u32) -> usize {
    div_ceil(bytes as usize, CELL_SIZE)
}

fn div_ceil(value: usize, divisor: usize) -> usize {
    value.div_ceil(divisor)
}

/// Round value up to a multiple of granule (granule > 0).
pub const fn round_up(value: u64, granule: u64) -> u64 {
    value.div_ceil(granule) * granule
}

/// Align value up to a power-of-two alignment.
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}
