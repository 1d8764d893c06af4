// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Endpoint records and per-process attachments.
//!
//! Records live in the session's index-based table; nothing here points back
//! at the session. The reference count covers the session's own reference plus
//! every outstanding [`crate::registry::EndpointRef`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::shm::{CellRange, RegionLayout, RegisterSlot, SharedMemoryRegion};
use crate::state::{EndpointState, EndpointStateMachine};
use crate::types::{ChannelCount, Direction, EndpointIndex, EndpointName, NotificationCount, ProcessId};

/// Identity of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub index: EndpointIndex,
    pub name: EndpointName,
    pub direction: Direction,
    pub channels: ChannelCount,
}

/// Where an endpoint's ring ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingInfo {
    /// Absolute byte offset from the region base.
    pub offset: u32,
    pub size: u32,
    pub first_cell: usize,
    pub cell_count: usize,
}

/// A process's view of one endpoint's real-time properties.
///
/// Caches the process's own mapping of the region and the register slot
/// inside it. Cheap to clone; the mapping stays alive while any clone does.
#[derive(Debug, Clone)]
pub struct ProcessAttachment {
    pid: ProcessId,
    descriptor: EndpointDescriptor,
    layout: RegionLayout,
    registers: RegisterSlot,
}

impl ProcessAttachment {
    pub(crate) fn new(
        pid: ProcessId,
        descriptor: EndpointDescriptor,
        layout: RegionLayout,
        registers: RegisterSlot,
    ) -> Self {
        Self {
            pid,
            descriptor,
            layout,
            registers,
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    pub fn index(&self) -> EndpointIndex {
        self.descriptor.index
    }

    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    pub fn registers(&self) -> &RegisterSlot {
        &self.registers
    }

    pub fn region(&self) -> &Arc<SharedMemoryRegion> {
        self.registers.region()
    }
}

/// Session-internal bookkeeping for one endpoint.
#[derive(Debug)]
pub(crate) struct EndpointRecord {
    pub descriptor: EndpointDescriptor,
    pub machine: EndpointStateMachine,
    /// Session reference (while held) plus external references.
    pub refs: u32,
    pub session_ref: bool,
    pub running: bool,
    pub ring: Option<(CellRange, RingInfo)>,
    pub notification: NotificationCount,
    pub attachments: Vec<ProcessAttachment>,
}

impl EndpointRecord {
    pub fn new(descriptor: EndpointDescriptor) -> Self {
        let machine = EndpointStateMachine::new(descriptor.index);
        Self {
            descriptor,
            machine,
            refs: 1,
            session_ref: true,
            running: false,
            ring: None,
            notification: NotificationCount::None,
            attachments: Vec::new(),
        }
    }

    pub fn state(&self) -> EndpointState {
        self.machine.state()
    }

    pub fn attachment_for(&self, pid: ProcessId) -> Option<&ProcessAttachment> {
        self.attachments.iter().find(|a| a.pid == pid)
    }
}
