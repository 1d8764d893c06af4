// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Every type validates its invariants at creation time, so the session and
//! tick engine never see an out-of-range channel count or sample rate.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Minimum supported sample rate in Hz.
pub const MIN_SAMPLE_RATE: u32 = 8_000;
/// Maximum supported sample rate in Hz.
pub const MAX_SAMPLE_RATE: u32 = 384_000;
/// Maximum number of interleaved channels per endpoint.
pub const MAX_CHANNELS: u16 = 32;
/// Maximum number of endpoints (register slots) per session.
pub const MAX_ENDPOINTS: usize = 64;

/// Identifier of a control session in the process-wide registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Index of an endpoint's slot in the register file.
/// Always below [`MAX_ENDPOINTS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct EndpointIndex(u32);

impl EndpointIndex {
    /// Create a new EndpointIndex with bounds validation.
    pub fn new(index: u32) -> Result<Self, HardValidationError> {
        if index as usize >= MAX_ENDPOINTS {
            return Err(HardValidationError::InvalidFieldValue {
                field: "endpoint_index",
                value: index.to_string(),
                reason: format!("Index must be below {}", MAX_ENDPOINTS),
            });
        }
        Ok(Self(index))
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EndpointIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl TryFrom<u32> for EndpointIndex {
    type Error = HardValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EndpointIndex> for u32 {
    fn from(index: EndpointIndex) -> Self {
        index.0
    }
}

/// Data direction of an endpoint as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Host renders into the ring; the tick engine demuxes it out.
    Playback,
    /// The tick engine muxes client buffers into the ring; the host captures it.
    Recording,
}

impl Direction {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Playback => "playback",
            Self::Recording => "recording",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validated channel count (1..=MAX_CHANNELS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct ChannelCount(u16);

impl ChannelCount {
    pub fn new(channels: u16) -> Result<Self, HardValidationError> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(HardValidationError::ChannelCountOutOfRange {
                channels: channels as u32,
                max: MAX_CHANNELS as u32,
            });
        }
        Ok(Self(channels))
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ChannelCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ch", self.0)
    }
}

impl TryFrom<u16> for ChannelCount {
    type Error = HardValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelCount> for u16 {
    fn from(channels: ChannelCount) -> Self {
        channels.0
    }
}

/// Validated sample rate in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SampleRate(u32);

impl SampleRate {
    pub fn new(rate: u32) -> Result<Self, HardValidationError> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
            return Err(HardValidationError::SampleRateOutOfRange {
                rate,
                min: MIN_SAMPLE_RATE,
                max: MAX_SAMPLE_RATE,
            });
        }
        Ok(Self(rate))
    }

    pub fn hz(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz", self.0)
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = HardValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SampleRate> for u32 {
    fn from(rate: SampleRate) -> Self {
        rate.0
    }
}

/// Fixed-width PCM sample depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SampleDepth {
    Bits8,
    Bits16,
    Bits24,
    Bits32,
}

impl SampleDepth {
    pub fn from_bits(bits: u32) -> Result<Self, HardValidationError> {
        match bits {
            8 => Ok(Self::Bits8),
            16 => Ok(Self::Bits16),
            24 => Ok(Self::Bits24),
            32 => Ok(Self::Bits32),
            _ => Err(HardValidationError::UnsupportedSampleDepth { bits }),
        }
    }

    pub const fn bits(&self) -> u32 {
        match self {
            Self::Bits8 => 8,
            Self::Bits16 => 16,
            Self::Bits24 => 24,
            Self::Bits32 => 32,
        }
    }

    /// Width of one sample in bytes.
    pub const fn bytes(&self) -> usize {
        (self.bits() / 8) as usize
    }
}

impl fmt::Display for SampleDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

impl TryFrom<u32> for SampleDepth {
    type Error = HardValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_bits(value)
    }
}

impl From<SampleDepth> for u32 {
    fn from(depth: SampleDepth) -> Self {
        depth.bits()
    }
}

/// How often the tick engine signals an endpoint's notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum NotificationCount {
    /// Never signal.
    #[default]
    None,
    /// Signal once per full wrap of the ring.
    PerWrap,
    /// Signal at the half-buffer mark and at the wrap.
    HalfAndWrap,
}

impl NotificationCount {
    pub fn new(count: u32) -> Result<Self, HardValidationError> {
        match count {
            0 => Ok(Self::None),
            1 => Ok(Self::PerWrap),
            2 => Ok(Self::HalfAndWrap),
            _ => Err(HardValidationError::InvalidFieldValue {
                field: "notification_count",
                value: count.to_string(),
                reason: "Must be 0, 1 or 2".to_string(),
            }),
        }
    }

    /// Register encoding.
    pub const fn raw(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::PerWrap => 1,
            Self::HalfAndWrap => 2,
        }
    }
}

impl TryFrom<u32> for NotificationCount {
    type Error = HardValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NotificationCount> for u32 {
    fn from(count: NotificationCount) -> Self {
        count.raw()
    }
}

/// Validated device name shown to the host.
/// Non-empty, printable, at most 64 characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointName(String);

impl EndpointName {
    pub fn new(name: impl Into<String>) -> Result<Self, HardValidationError> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "endpoint_name",
                value: name,
                reason: "Endpoint name cannot be empty".to_string(),
            });
        }

        if name.chars().count() > 64 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "endpoint_name",
                value: name.clone(),
                reason: format!("Endpoint name too long: {} chars (max 64)", name.len()),
            });
        }

        if name.chars().any(|c| c.is_control()) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "endpoint_name",
                value: name,
                reason: "Endpoint name must not contain control characters".to_string(),
            });
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EndpointName {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EndpointName> for String {
    fn from(name: EndpointName) -> Self {
        name.0
    }
}

/// Validated process ID.
/// Must be positive (non-zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(u32);

impl ProcessId {
    pub fn new(pid: u32) -> Result<Self, HardValidationError> {
        if pid == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "process_id",
                value: "0".to_string(),
                reason: "Process ID 0 is reserved".to_string(),
            });
        }
        Ok(Self(pid))
    }

    /// The calling process.
    pub fn current() -> Self {
        Self(nix::unistd::getpid().as_raw() as u32)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ProcessId> for u32 {
    fn from(pid: ProcessId) -> Self {
        pid.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_index_bounds() {
        assert!(EndpointIndex::new(0).is_ok());
        assert!(EndpointIndex::new(MAX_ENDPOINTS as u32 - 1).is_ok());
        assert!(EndpointIndex::new(MAX_ENDPOINTS as u32).is_err());
    }

    #[test]
    fn test_channel_count() {
        assert!(ChannelCount::new(1).is_ok());
        assert!(ChannelCount::new(MAX_CHANNELS).is_ok());
        assert!(ChannelCount::new(0).is_err());
        assert!(ChannelCount::new(MAX_CHANNELS + 1).is_err());
    }

    #[test]
    fn test_sample_rate() {
        assert!(SampleRate::new(44_100).is_ok());
        assert!(SampleRate::new(MAX_SAMPLE_RATE).is_ok());
        assert!(SampleRate::new(MAX_SAMPLE_RATE + 1).is_err());
        assert!(SampleRate::new(7_999).is_err());
    }

    #[test]
    fn test_sample_depth() {
        assert_eq!(SampleDepth::from_bits(24).unwrap().bytes(), 3);
        assert_eq!(SampleDepth::from_bits(16).unwrap().bytes(), 2);
        assert!(SampleDepth::from_bits(12).is_err());
    }

    #[test]
    fn test_notification_count() {
        assert_eq!(NotificationCount::new(2).unwrap(), NotificationCount::HalfAndWrap);
        assert_eq!(NotificationCount::PerWrap.raw(), 1);
        assert!(NotificationCount::new(3).is_err());
    }

    #[test]
    fn test_endpoint_name() {
        assert!(EndpointName::new("Line 1 (Virtual)").is_ok());
        assert!(EndpointName::new("").is_err());
        assert!(EndpointName::new("   ").is_err());
        assert!(EndpointName::new("a".repeat(65)).is_err());
        assert!(EndpointName::new("bad\nname").is_err());
    }

    #[test]
    fn test_process_id() {
        assert!(ProcessId::new(0).is_err());
        assert_eq!(ProcessId::current().value(), std::process::id());
    }
}
