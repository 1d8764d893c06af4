// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

use serde::{Deserialize, Serialize};

use crate::endpoint::RingInfo;
use crate::layout::BufferLayout;
use crate::state::EndpointState;
use crate::types::{ChannelCount, Direction, EndpointIndex, EndpointName, SessionId};

/// Point-in-time view of a session, for `vcable run --json` and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub id: SessionId,
    pub connected: bool,
    pub layout: Option<BufferLayout>,
    pub region_size: Option<usize>,
    pub cells_total: usize,
    pub cells_used: usize,
    pub pending_creations: usize,
    pub pending_notifications: usize,
    pub pending_waiters: usize,
    pub endpoints: Vec<EndpointStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointStatus {
    pub index: EndpointIndex,
    pub name: EndpointName,
    pub direction: Direction,
    pub channels: ChannelCount,
    pub state: EndpointState,
    pub refs: u32,
    pub running: bool,
    pub ring: Option<RingInfo>,
    pub attachments: usize,
    pub generation: Option<u32>,
    pub position: Option<u32>,
    pub clock: Option<u32>,
}
