// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Control session: one client's buffer layout, region and endpoint table.
//!
//! Every resource-manager operation takes the session lock for its whole
//! duration. The tick engine never does; it only reads the registers through
//! a [`ProcessAttachment`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::endpoint::{EndpointDescriptor, EndpointRecord, ProcessAttachment, RingInfo};
use crate::error::{
    CableError, CableResult, HardValidationError, HostError, ResourceError, SharedMemoryError,
};
use crate::host::{CreationCompletion, DeviceRegistration, HostSurface};
use crate::layout::{cells_for, BufferLayout, CELL_SIZE};
use crate::notify::{NotificationData, NotificationQueue, SignalHandle, WaitNotifications};
use crate::shm::{
    CellAllocator, Generation, RegionLayout, RegisterSlot, RegisterSnapshot, SharedMemoryRegion,
};
use crate::state::EndpointState;
use crate::stats::{EndpointStatus, SessionStats};
use crate::types::{
    ChannelCount, Direction, EndpointIndex, EndpointName, NotificationCount, ProcessId, SessionId,
    MAX_ENDPOINTS,
};

/// Per-session options fixed at connect time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Base name for a named region other processes can open.
    /// `None` keeps the region anonymous and process-local.
    pub region_name: Option<String>,
}

/// What `set_buffer_layout` hands back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    pub base_address: usize,
    pub actual_size: usize,
    pub register_area_offset: usize,
    pub cell_area_offset: usize,
    pub cell_count: usize,
    pub region_name: Option<String>,
}

struct RegionState {
    region: Arc<SharedMemoryRegion>,
    geometry: RegionLayout,
    cells: CellAllocator,
}

impl RegionState {
    fn slot(&self, index: EndpointIndex) -> CableResult<RegisterSlot> {
        RegisterSlot::new(self.region.clone(), self.geometry.register_slot_offset(index)).ok_or_else(
            || {
                CableError::SharedMemory(SharedMemoryError::InvalidHeader {
                    reason: format!("register slot {} outside region", index),
                })
            },
        )
    }
}

struct SessionInner {
    connected: bool,
    layout: Option<BufferLayout>,
    region: Option<RegionState>,
    endpoints: Vec<Option<EndpointRecord>>,
    pending: Vec<EndpointIndex>,
    epoch: u64,
}

fn record_mut(
    endpoints: &mut [Option<EndpointRecord>],
    index: EndpointIndex,
) -> CableResult<&mut EndpointRecord> {
    endpoints
        .get_mut(index.as_usize())
        .and_then(Option::as_mut)
        .ok_or(CableError::EndpointNotFound(index))
}

/// Record the session still offers to clients: Active, and not deleted by
/// the session while external references keep it alive.
fn live_record_mut(
    endpoints: &mut [Option<EndpointRecord>],
    index: EndpointIndex,
) -> CableResult<&mut EndpointRecord> {
    let record = record_mut(endpoints, index)?;
    record.machine.require_active()?;
    if !record.session_ref {
        return Err(CableError::EndpointNotFound(index));
    }
    Ok(record)
}

/// A client's control session.
pub struct Session {
    id: SessionId,
    owner: ProcessId,
    options: SessionOptions,
    host: Arc<dyn HostSurface>,
    inner: Mutex<SessionInner>,
    queue: NotificationQueue,
    /// Each process's mapping of the current region.
    mappings: DashMap<ProcessId, Arc<SharedMemoryRegion>>,
}

impl Session {
    pub fn new(
        id: SessionId,
        owner: ProcessId,
        host: Arc<dyn HostSurface>,
        options: SessionOptions,
    ) -> Self {
        let mut endpoints = Vec::with_capacity(MAX_ENDPOINTS);
        endpoints.resize_with(MAX_ENDPOINTS, || None);

        Self {
            id,
            owner,
            options,
            host,
            inner: Mutex::new(SessionInner {
                connected: true,
                layout: None,
                region: None,
                endpoints,
                pending: Vec::new(),
                epoch: 0,
            }),
            queue: NotificationQueue::new(),
            mappings: DashMap::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn layout(&self) -> Option<BufferLayout> {
        self.lock().layout
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_connected(&self, inner: &SessionInner) -> CableResult<()> {
        if inner.connected {
            Ok(())
        } else {
            Err(CableError::SessionClosed(self.id))
        }
    }

    // =========================================================================
    // Buffer layout
    // =========================================================================

    /// Validate a layout and (re)create the session's region for it.
    pub fn set_buffer_layout(
        &self,
        buffer_size: u64,
        frame_size: u32,
        sample_rate: u32,
        sample_depth_bits: u32,
        min_frame_count: u32,
    ) -> CableResult<RegionInfo> {
        let layout = BufferLayout::new(
            buffer_size,
            frame_size,
            sample_rate,
            sample_depth_bits,
            min_frame_count,
        )?;
        self.apply_layout(layout)
    }

    /// Create the region for an already validated layout.
    ///
    /// Allowed again later only while no endpoint owns cells. Existing
    /// endpoints keep their index and state but lose every process attachment.
    pub fn apply_layout(&self, layout: BufferLayout) -> CableResult<RegionInfo> {
        let mut guard = self.lock();
        self.ensure_connected(&guard)?;

        let busy = guard
            .endpoints
            .iter()
            .flatten()
            .filter(|r| r.ring.is_some())
            .count();
        if busy > 0 {
            return Err(CableError::LayoutBusy {
                session: self.id,
                endpoints: busy,
            });
        }

        let geometry = RegionLayout::for_buffer(&layout);
        let epoch = guard.epoch + 1;
        let region_name = self
            .options
            .region_name
            .as_ref()
            .map(|base| format!("{}-{}", base, epoch));

        let region = match &region_name {
            Some(name) => SharedMemoryRegion::create(name, geometry.total_size)?,
            None => SharedMemoryRegion::anonymous(geometry.total_size)?,
        };
        geometry.write_header(&region)?;
        let region = Arc::new(region);

        let inner = &mut *guard;
        inner.epoch = epoch;
        for record in inner.endpoints.iter_mut().flatten() {
            record.attachments.clear();
        }
        self.mappings.clear();
        self.mappings.insert(self.owner, region.clone());

        let info = RegionInfo {
            base_address: region.base_address(),
            actual_size: region.size(),
            register_area_offset: geometry.register_offset,
            cell_area_offset: geometry.cell_offset,
            cell_count: geometry.cell_count,
            region_name,
        };

        inner.region = Some(RegionState {
            region,
            geometry,
            cells: CellAllocator::new(geometry.cell_count),
        });
        inner.layout = Some(layout);

        info!(
            session = %self.id,
            size = info.actual_size,
            cells = info.cell_count,
            frame_size = layout.frame_size,
            sample_rate = %layout.sample_rate,
            "Buffer layout configured"
        );
        Ok(info)
    }

    // =========================================================================
    // Endpoint creation
    // =========================================================================

    /// Start creating an endpoint.
    ///
    /// Validation and slot reservation happen here; the host's confirmation
    /// is awaited through the returned [`PendingEndpoint`].
    pub fn create_endpoint(
        self: &Arc<Self>,
        direction: Direction,
        channels: u16,
        name: &str,
    ) -> CableResult<PendingEndpoint> {
        let channels = ChannelCount::new(channels)?;
        let name = EndpointName::new(name)?;

        let registration = {
            let mut guard = self.lock();
            self.ensure_connected(&guard)?;
            let layout = guard.layout.ok_or(CableError::LayoutNotConfigured(self.id))?;
            layout.check_channels(channels)?;

            if guard
                .endpoints
                .iter()
                .flatten()
                .any(|r| r.descriptor.name == name)
            {
                return Err(HardValidationError::DuplicateEndpointName {
                    name: name.to_string(),
                }
                .into());
            }

            let slot = guard
                .endpoints
                .iter()
                .position(Option::is_none)
                .ok_or(ResourceError::RegisterSlotsExhausted { max: MAX_ENDPOINTS })?;
            let index = EndpointIndex::new(slot as u32)?;

            let inner = &mut *guard;
            if let Some(region) = inner.region.as_ref() {
                region.slot(index)?.clear();
            }

            let descriptor = EndpointDescriptor {
                index,
                name: name.clone(),
                direction,
                channels,
            };
            inner.endpoints[slot] = Some(EndpointRecord::new(descriptor));
            inner.pending.push(index);

            DeviceRegistration {
                session: self.id,
                index,
                name,
                direction,
                channels,
            }
        };

        debug!(
            session = %self.id,
            endpoint = %registration.index,
            name = %registration.name,
            direction = %direction,
            channels = %channels,
            "Endpoint pending host confirmation"
        );

        let index = registration.index;
        let session = Arc::downgrade(self);
        let (completion, rx) = CreationCompletion::pair(move |result| {
            if let Some(session) = session.upgrade() {
                let _ = session.finish_creation(index, result, false);
            }
        });
        self.host.register_device(registration, completion);

        Ok(PendingEndpoint {
            session: self.clone(),
            index,
            rx: Some(rx),
        })
    }

    fn finish_creation(
        &self,
        index: EndpointIndex,
        result: Result<(), HostError>,
        waiter_alive: bool,
    ) -> CableResult<EndpointIndex> {
        let mut guard = self.lock();
        guard.pending.retain(|i| *i != index);
        let connected = guard.connected;

        let record = record_mut(&mut guard.endpoints, index)?;
        let name = record.descriptor.name.to_string();

        match result {
            Ok(()) if connected && waiter_alive => {
                record.machine.transition_to(EndpointState::Active)?;
                info!(session = %self.id, endpoint = %index, name = %name, "Endpoint active");
                Ok(index)
            }
            Ok(()) => {
                self.delete_locked(&mut guard, index, true);
                if connected {
                    Err(CableError::HostRejected {
                        name,
                        source: HostError::Abandoned,
                    })
                } else {
                    Err(CableError::SessionClosed(self.id))
                }
            }
            Err(source) => {
                warn!(
                    session = %self.id,
                    endpoint = %index,
                    name = %name,
                    error = %source,
                    "Host rejected endpoint"
                );
                self.delete_locked(&mut guard, index, false);
                Err(CableError::HostRejected { name, source })
            }
        }
    }

    // =========================================================================
    // Ring and streaming operations
    // =========================================================================

    /// Allocate (or replace) the endpoint's ring.
    ///
    /// The new cells are taken before the old ones are released, so a failed
    /// reallocation leaves the old ring untouched.
    pub fn allocate_ring(&self, index: EndpointIndex, requested: u32) -> CableResult<RingInfo> {
        let mut guard = self.lock();
        self.ensure_connected(&guard)?;
        let inner = &mut *guard;

        let layout = inner.layout.ok_or(CableError::LayoutNotConfigured(self.id))?;
        let region = inner
            .region
            .as_mut()
            .ok_or(CableError::LayoutNotConfigured(self.id))?;
        let record = live_record_mut(&mut inner.endpoints, index)?;

        let size = layout.ring_size(requested, record.descriptor.channels)?;
        let cell_count = cells_for(size);
        if cell_count > region.cells.total() {
            return Err(ResourceError::RegionTooSmall {
                required: size as usize,
                available: region.cells.total() * CELL_SIZE,
            }
            .into());
        }

        let range = region.cells.allocate(cell_count)?;
        let offset = region.geometry.cell_byte_offset(range.first);
        let registers = match region.slot(index) {
            Ok(registers) => registers,
            Err(e) => {
                region.cells.free(range);
                return Err(e);
            }
        };

        // SAFETY: the range was free until now, so no tick reads it yet.
        unsafe { region.region.zero(offset, size as usize) };

        let info = RingInfo {
            offset: offset as u32,
            size,
            first_cell: range.first,
            cell_count: range.count,
        };

        if record.running {
            registers.deactivate();
        }
        registers.set_geometry(info.offset, info.size);
        registers.rewind();
        if record.running {
            registers.activate();
        }

        if let Some((old, _)) = record.ring.replace((range, info)) {
            region.cells.free(old);
        }

        debug!(
            session = %self.id,
            endpoint = %index,
            offset = info.offset,
            size = info.size,
            cells = info.cell_count,
            "Ring allocated"
        );
        Ok(info)
    }

    /// Release the endpoint's ring, stopping it first.
    pub fn free_ring(&self, index: EndpointIndex) -> CableResult<()> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let record = record_mut(&mut inner.endpoints, index)?;
        let Some((range, _)) = record.ring.take() else {
            return Err(CableError::RingNotAllocated(index));
        };

        if let Some(region) = inner.region.as_mut() {
            let registers = region.slot(index)?;
            registers.deactivate();
            registers.set_geometry(0, 0);
            registers.rewind();
            region.cells.free(range);
        }
        record.running = false;

        debug!(session = %self.id, endpoint = %index, "Ring freed");
        Ok(())
    }

    /// Rewind and activate the endpoint. Returns the new generation.
    pub fn start(&self, index: EndpointIndex) -> CableResult<Generation> {
        let mut guard = self.lock();
        self.ensure_connected(&guard)?;
        let inner = &mut *guard;

        let record = live_record_mut(&mut inner.endpoints, index)?;
        let Some((_, info)) = record.ring else {
            return Err(CableError::RingNotAllocated(index));
        };
        let region = inner
            .region
            .as_ref()
            .ok_or(CableError::LayoutNotConfigured(self.id))?;

        let registers = region.slot(index)?;
        registers.deactivate();
        registers.set_geometry(info.offset, info.size);
        registers.set_notification_count(record.notification.raw());
        registers.rewind();
        let generation = registers.activate();
        record.running = true;

        debug!(session = %self.id, endpoint = %index, generation = %generation, "Endpoint started");
        Ok(generation)
    }

    /// Deactivate the endpoint. Position and clock are kept for inspection.
    pub fn stop(&self, index: EndpointIndex) -> CableResult<Generation> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let record = record_mut(&mut inner.endpoints, index)?;
        let region = inner
            .region
            .as_ref()
            .ok_or(CableError::LayoutNotConfigured(self.id))?;

        let generation = region.slot(index)?.deactivate();
        record.running = false;

        debug!(session = %self.id, endpoint = %index, generation = %generation, "Endpoint stopped");
        Ok(generation)
    }

    /// Set notifications per wrap (0, 1 or 2).
    pub fn set_notification_count(&self, index: EndpointIndex, count: u32) -> CableResult<()> {
        let count = NotificationCount::new(count)?;

        let mut guard = self.lock();
        let inner = &mut *guard;
        let record = live_record_mut(&mut inner.endpoints, index)?;
        record.notification = count;

        if let Some(region) = inner.region.as_ref() {
            region.slot(index)?.set_notification_count(count.raw());
        }
        Ok(())
    }

    /// Register a notification handle for an endpoint.
    ///
    /// A duplicate of the handle is queued for the client together with the
    /// endpoint's current generation.
    pub fn attach_notification(
        &self,
        index: EndpointIndex,
        handle: &SignalHandle,
    ) -> CableResult<NotificationData> {
        let data = {
            let mut guard = self.lock();
            self.ensure_connected(&guard)?;
            let inner = &mut *guard;
            let record = live_record_mut(&mut inner.endpoints, index)?;
            let generation = match inner.region.as_ref() {
                Some(region) => region.slot(index)?.generation(),
                None => Generation::from_raw(0),
            };
            NotificationData::new(index, generation)
        };

        self.queue.post(handle, data)?;
        Ok(data)
    }

    /// Ask for up to `batch` posted notification handles.
    pub fn wait_notifications(&self, batch: usize) -> WaitNotifications {
        self.queue.wait(batch)
    }

    // =========================================================================
    // Process attachment
    // =========================================================================

    /// Get (or lazily create) `pid`'s attachment to an endpoint.
    pub fn attach(&self, index: EndpointIndex, pid: ProcessId) -> CableResult<ProcessAttachment> {
        let mut guard = self.lock();
        self.ensure_connected(&guard)?;
        let inner = &mut *guard;

        let record = live_record_mut(&mut inner.endpoints, index)?;
        if let Some(existing) = record.attachment_for(pid) {
            return Ok(existing.clone());
        }

        let region = inner
            .region
            .as_ref()
            .ok_or(CableError::LayoutNotConfigured(self.id))?;
        let mapping = self.mapping_for(pid, region)?;
        let registers = RegisterSlot::new(mapping, region.geometry.register_slot_offset(index))
            .ok_or_else(|| SharedMemoryError::InvalidHeader {
                reason: format!("register slot {} outside mapping", index),
            })?;

        let attachment =
            ProcessAttachment::new(pid, record.descriptor.clone(), region.geometry, registers);
        record.attachments.push(attachment.clone());

        debug!(session = %self.id, endpoint = %index, pid = %pid, "Process attached");
        Ok(attachment)
    }

    fn mapping_for(
        &self,
        pid: ProcessId,
        region: &RegionState,
    ) -> CableResult<Arc<SharedMemoryRegion>> {
        if let Some(mapping) = self.mappings.get(&pid) {
            return Ok(mapping.clone());
        }

        let mapping = if pid == self.owner || !region.region.is_named() {
            region.region.clone()
        } else {
            let opened = SharedMemoryRegion::open(region.region.name(), region.geometry.total_size)?;
            let geometry = RegionLayout::read_header(&opened)?;
            if geometry != region.geometry {
                return Err(SharedMemoryError::InvalidHeader {
                    reason: format!("{} does not match the session layout", region.region.name()),
                }
                .into());
            }
            Arc::new(opened)
        };

        self.mappings.insert(pid, mapping.clone());
        Ok(mapping)
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn registers(&self, index: EndpointIndex) -> CableResult<RegisterSnapshot> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        record_mut(&mut inner.endpoints, index)?;
        let region = inner
            .region
            .as_ref()
            .ok_or(CableError::LayoutNotConfigured(self.id))?;
        Ok(region.slot(index)?.snapshot())
    }

    pub fn descriptor(&self, index: EndpointIndex) -> CableResult<EndpointDescriptor> {
        let mut guard = self.lock();
        Ok(record_mut(&mut guard.endpoints, index)?.descriptor.clone())
    }

    pub fn state(&self, index: EndpointIndex) -> CableResult<EndpointState> {
        let mut guard = self.lock();
        Ok(record_mut(&mut guard.endpoints, index)?.state())
    }

    /// Endpoints that still exist, in index order.
    pub fn endpoints(&self) -> Vec<EndpointDescriptor> {
        self.lock()
            .endpoints
            .iter()
            .flatten()
            .map(|r| r.descriptor.clone())
            .collect()
    }

    /// No endpoint records remain.
    pub fn is_empty(&self) -> bool {
        self.lock().endpoints.iter().all(Option::is_none)
    }

    pub fn stats(&self) -> SessionStats {
        let guard = self.lock();
        let region = guard.region.as_ref();

        let endpoints = guard
            .endpoints
            .iter()
            .flatten()
            .map(|record| {
                let snapshot = region
                    .and_then(|r| r.slot(record.descriptor.index).ok())
                    .map(|slot| slot.snapshot());
                EndpointStatus {
                    index: record.descriptor.index,
                    name: record.descriptor.name.clone(),
                    direction: record.descriptor.direction,
                    channels: record.descriptor.channels,
                    state: record.state(),
                    refs: record.refs,
                    running: record.running,
                    ring: record.ring.map(|(_, info)| info),
                    attachments: record.attachments.len(),
                    generation: snapshot.map(|s| s.generation.raw()),
                    position: snapshot.map(|s| s.position),
                    clock: snapshot.map(|s| s.clock),
                }
            })
            .collect();

        SessionStats {
            id: self.id,
            connected: guard.connected,
            layout: guard.layout,
            region_size: region.map(|r| r.region.size()),
            cells_total: region.map_or(0, |r| r.cells.total()),
            cells_used: region.map_or(0, |r| r.cells.used()),
            pending_creations: guard.pending.len(),
            pending_notifications: self.queue.pending_items(),
            pending_waiters: self.queue.pending_waiters(),
            endpoints,
        }
    }

    // =========================================================================
    // Reference counting and teardown
    // =========================================================================

    /// Drop the session's own reference to an endpoint.
    ///
    /// The endpoint is stopped immediately; it is deleted once every external
    /// reference is gone. Until then the session treats it as gone for every
    /// operation, but its name stays taken: the host device still exists.
    /// Returns true if it was deleted now.
    pub fn delete_endpoint(&self, index: EndpointIndex) -> CableResult<bool> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let record = live_record_mut(&mut inner.endpoints, index)?;

        record.session_ref = false;
        record.running = false;
        record.refs -= 1;
        let remaining = record.refs;

        if let Some(region) = inner.region.as_ref() {
            region.slot(index)?.deactivate();
        }

        if remaining == 0 {
            self.delete_locked(inner, index, true);
            return Ok(true);
        }
        debug!(session = %self.id, endpoint = %index, refs = remaining, "Endpoint deletion deferred");
        Ok(false)
    }

    /// Take an external reference. Only live (Active) endpoints can be retained.
    pub(crate) fn retain(&self, index: EndpointIndex) -> CableResult<()> {
        let mut guard = self.lock();
        let record = live_record_mut(&mut guard.endpoints, index)?;
        record.refs += 1;
        Ok(())
    }

    /// Drop an external reference. Returns true if the endpoint was deleted.
    pub(crate) fn release(&self, index: EndpointIndex) -> bool {
        let mut guard = self.lock();
        let Ok(record) = record_mut(&mut guard.endpoints, index) else {
            return false;
        };
        record.refs = record.refs.saturating_sub(1);
        if record.refs > 0 {
            return false;
        }
        self.delete_locked(&mut guard, index, true);
        true
    }

    /// Disconnect: stop everything, drop the session's references, cancel
    /// notification waiters. Returns the number of records left behind.
    pub(crate) fn orphan_all(&self) -> usize {
        let mut guard = self.lock();
        if guard.connected {
            guard.connected = false;
            let inner = &mut *guard;

            for slot in 0..MAX_ENDPOINTS {
                let Some(record) = inner.endpoints[slot].as_mut() else {
                    continue;
                };
                // Pending creations finish (and delete themselves) on completion.
                if record.state() != EndpointState::Active {
                    continue;
                }

                let index = record.descriptor.index;
                record.running = false;
                if record.session_ref {
                    record.session_ref = false;
                    record.refs -= 1;
                }
                if let Some(registers) = inner.region.as_ref().and_then(|r| r.slot(index).ok()) {
                    registers.deactivate();
                }

                if record.refs == 0 {
                    self.delete_locked(inner, index, true);
                    continue;
                }

                if let Err(e) = record.machine.transition_to(EndpointState::Orphaned) {
                    warn!(session = %self.id, endpoint = %index, error = %e, "Failed to orphan endpoint");
                }
                warn!(session = %self.id, endpoint = %index, refs = record.refs, "Endpoint orphaned");
            }
        }

        let remaining = guard.endpoints.iter().flatten().count();
        drop(guard);

        let (waiters, items) = self.queue.cancel_all();
        info!(
            session = %self.id,
            remaining,
            cancelled_waiters = waiters,
            dropped_notifications = items,
            "Session disconnected"
        );
        remaining
    }

    fn delete_locked(&self, inner: &mut SessionInner, index: EndpointIndex, registered: bool) {
        let Some(mut record) = inner.endpoints[index.as_usize()].take() else {
            return;
        };
        if let Err(e) = record.machine.transition_to(EndpointState::Deleted) {
            warn!(session = %self.id, endpoint = %index, error = %e, "Unexpected delete transition");
        }

        if let Some(region) = inner.region.as_mut() {
            if let Ok(registers) = region.slot(index) {
                registers.clear();
            }
            if let Some((range, _)) = record.ring.take() {
                region.cells.free(range);
            }
        }
        inner.pending.retain(|i| *i != index);
        record.attachments.clear();

        if registered {
            self.host
                .unregister_device(self.id, index, &record.descriptor.name);
        }
        debug!(session = %self.id, endpoint = %index, name = %record.descriptor.name, "Endpoint deleted");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// An endpoint waiting for the host's confirmation.
///
/// Creation cannot be cancelled once the host has it. Dropping this handle
/// (or a [`PendingEndpoint::confirmed`] future) only gives up the wait: the
/// endpoint stays Pending until the host answers and is then torn down,
/// unregistering the device if the host had confirmed it.
#[derive(Debug)]
pub struct PendingEndpoint {
    session: Arc<Session>,
    index: EndpointIndex,
    rx: Option<oneshot::Receiver<Result<(), HostError>>>,
}

impl PendingEndpoint {
    pub fn index(&self) -> EndpointIndex {
        self.index
    }

    /// Wait for the host. On success the endpoint is Active.
    pub async fn confirmed(mut self) -> CableResult<EndpointIndex> {
        let result = match self.rx.as_mut() {
            Some(rx) => rx.await.unwrap_or(Err(HostError::Abandoned)),
            None => Err(HostError::Abandoned),
        };
        self.rx = None;
        self.session.finish_creation(self.index, result, true)
    }
}

impl Drop for PendingEndpoint {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            // After close() a result is either already here or goes back to
            // the session through the completion.
            rx.close();
            if let Ok(result) = rx.try_recv() {
                let _ = self.session.finish_creation(self.index, result, false);
            }
        }
    }
}
