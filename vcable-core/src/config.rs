// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Describes a session: its buffer layout, how the tick engine runs, and the
//! endpoints to create. Any invalid field is a HardValidationError.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CableError, CableResult, HardValidationError};
use crate::layout::{cells_for, BufferLayout};
use crate::types::{ChannelCount, Direction, EndpointName, NotificationCount};

/// Raw layout section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawLayoutConfig {
    buffer_size: u64,
    frame_size: u32,
    #[serde(default = "default_sample_rate")]
    sample_rate: u32,
    #[serde(default = "default_sample_depth")]
    sample_depth: u32,
    #[serde(default = "default_min_frame_count")]
    min_frame_count: u32,
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_sample_depth() -> u32 {
    16
}

fn default_min_frame_count() -> u32 {
    4
}

/// Raw engine section.
#[derive(Debug, Deserialize)]
struct RawEngineConfig {
    #[serde(default)]
    period_us: Option<u64>,
    #[serde(default = "default_slots")]
    slots: usize,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    cpu: Option<usize>,
}

fn default_slots() -> usize {
    2
}

impl Default for RawEngineConfig {
    fn default() -> Self {
        Self {
            period_us: None,
            slots: default_slots(),
            region_name: None,
            cpu: None,
        }
    }
}

/// Raw endpoint entry.
#[derive(Debug, Deserialize)]
struct RawEndpointConfig {
    name: String,
    direction: Direction,
    channels: u16,
    #[serde(default)]
    ring_size: u32,
    #[serde(default)]
    notification_count: u32,
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    layout: RawLayoutConfig,
    #[serde(default)]
    engine: RawEngineConfig,
    endpoints: Vec<RawEndpointConfig>,
}

/// Validated tick engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tick period. Defaults to `frame_size` worth of samples for the widest
    /// endpoint at the session sample rate.
    pub period: Duration,
    pub slots: usize,
    pub region_name: Option<String>,
    pub cpu: Option<usize>,
}

/// Validated endpoint entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: EndpointName,
    pub direction: Direction,
    pub channels: ChannelCount,
    /// Requested ring bytes. Rounded up when the ring is allocated.
    pub ring_size: u32,
    pub notification_count: NotificationCount,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub layout: BufferLayout,
    pub engine: EngineConfig,
    pub endpoints: Vec<EndpointConfig>,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> CableResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(CableError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| CableError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> CableResult<Config> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| CableError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> CableResult<Config> {
        let l = raw.layout;
        let layout = BufferLayout::new(
            l.buffer_size,
            l.frame_size,
            l.sample_rate,
            l.sample_depth,
            l.min_frame_count,
        )?;

        let mut endpoints = Vec::with_capacity(raw.endpoints.len());
        let mut seen_names = HashSet::new();
        let mut cells = 0usize;

        for raw_endpoint in raw.endpoints {
            let endpoint = Self::validate_endpoint(raw_endpoint)?;

            if !seen_names.insert(endpoint.name.as_str().to_string()) {
                return Err(HardValidationError::DuplicateEndpointName {
                    name: endpoint.name.to_string(),
                }
                .into());
            }

            let ring = layout.ring_size(endpoint.ring_size, endpoint.channels)?;
            cells += cells_for(ring);
            endpoints.push(endpoint);
        }

        if endpoints.is_empty() {
            return Err(HardValidationError::SchemaValidation {
                message: "At least one endpoint must be defined".to_string(),
            }
            .into());
        }

        if cells > layout.cell_count() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "buffer_size",
                value: layout.buffer_size.to_string(),
                reason: format!(
                    "Endpoint rings need {} cells, layout provides {}",
                    cells,
                    layout.cell_count()
                ),
            }
            .into());
        }

        let engine = Self::validate_engine(raw.engine, &layout, &endpoints)?;

        Ok(Config {
            layout,
            engine,
            endpoints,
        })
    }

    fn validate_engine(
        raw: RawEngineConfig,
        layout: &BufferLayout,
        endpoints: &[EndpointConfig],
    ) -> CableResult<EngineConfig> {
        if raw.slots == 0 || raw.slots > 8 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "slots",
                value: raw.slots.to_string(),
                reason: "Must be between 1 and 8".to_string(),
            }
            .into());
        }

        let period_us = match raw.period_us {
            Some(0) => {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "period_us",
                    value: "0".to_string(),
                    reason: "Period must be greater than 0".to_string(),
                }
                .into());
            }
            Some(us) => us,
            None => {
                let samples = endpoints
                    .iter()
                    .map(|e| layout.samples_per_tick(e.channels))
                    .min()
                    .unwrap_or(0) as u64;
                (samples * 1_000_000 / layout.sample_rate.hz() as u64).max(1)
            }
        };

        if let Some(name) = &raw.region_name {
            if name.is_empty() || name.contains('/') {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "region_name",
                    value: name.clone(),
                    reason: "Must be non-empty and contain no '/'".to_string(),
                }
                .into());
            }
        }

        Ok(EngineConfig {
            period: Duration::from_micros(period_us),
            slots: raw.slots,
            region_name: raw.region_name,
            cpu: raw.cpu,
        })
    }

    fn validate_endpoint(raw: RawEndpointConfig) -> CableResult<EndpointConfig> {
        Ok(EndpointConfig {
            name: EndpointName::new(raw.name)?,
            direction: raw.direction,
            channels: ChannelCount::new(raw.channels)?,
            ring_size: raw.ring_size,
            notification_count: NotificationCount::new(raw.notification_count)?,
        })
    }
}
