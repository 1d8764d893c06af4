// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Real-time tick engine.
//!
//! Runs once per host period with no locks, no allocation and no logging.
//! Every endpoint is handled independently: snapshot the registers, move one
//! frame between the ring window and the slot's channel buffers, then commit
//! the position only if the generation survived the transfer.

use crate::endpoint::ProcessAttachment;
use crate::engine::interleave::{demux, mux};
use crate::error::{CableResult, HardValidationError};
use crate::notify::{Notification, SignalHandle};
use crate::shm::RegisterSnapshot;
use crate::types::{Direction, EndpointIndex};

/// Why an endpoint sat out a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Inactive, or no ring configured.
    Inactive,
    /// The window fell outside the ring or the mapping.
    OutOfBounds,
}

/// Hooks into the tick path. Called inline, so implementations must not block.
pub trait TickObserver {
    /// After the snapshot and bounds check, before any ring byte moves.
    fn before_transfer(&mut self, _endpoint: EndpointIndex) {}

    /// Between the transfer and the generation re-read.
    fn after_transfer(&mut self, _endpoint: EndpointIndex) {}

    fn on_committed(&mut self, _endpoint: EndpointIndex, _position: u32) {}

    fn on_discarded(&mut self, _endpoint: EndpointIndex) {}

    fn on_skipped(&mut self, _endpoint: EndpointIndex, _reason: SkipReason) {}

    fn on_notified(&mut self, _endpoint: EndpointIndex) {}
}

/// Observer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TickObserver for NoopObserver {}

/// Per-tick tally across all bound endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub committed: usize,
    pub discarded: usize,
    pub skipped: usize,
    pub notified: usize,
}

enum Outcome {
    Committed { notified: bool },
    Discarded,
    Skipped,
}

struct BoundEndpoint {
    attachment: ProcessAttachment,
    direction: Direction,
    frame_size: usize,
    sample_bytes: usize,
    samples_per_tick: u32,
    /// `[slot][channel]`, each `frame_size / channels` bytes.
    buffers: Vec<Vec<Vec<u8>>>,
    notification: Option<SignalHandle>,
}

impl BoundEndpoint {
    fn tick<O: TickObserver>(&mut self, slot: usize, observer: &mut O) -> Outcome {
        let index = self.attachment.index();
        let registers = self.attachment.registers();
        let buffers = &mut self.buffers[slot];

        // A snapshot torn by a concurrent reconfiguration counts as inactive.
        let snapshot = match registers.try_snapshot() {
            Some(snapshot) if snapshot.generation.is_active() && snapshot.buffer_size != 0 => {
                snapshot
            }
            _ => {
                zero(buffers);
                observer.on_skipped(index, SkipReason::Inactive);
                return Outcome::Skipped;
            }
        };

        let Some(start) = window_start(
            &snapshot,
            self.frame_size,
            self.attachment.layout().cell_offset,
            self.attachment.region().size(),
        ) else {
            zero(buffers);
            observer.on_skipped(index, SkipReason::OutOfBounds);
            return Outcome::Skipped;
        };

        observer.before_transfer(index);

        let region = self.attachment.region();
        // SAFETY: window_start checked [start, start + frame_size) against the
        // mapping. Only this engine touches this ring while it is active.
        let window = unsafe { region.as_ptr().add(start) };
        match self.direction {
            Direction::Playback => {
                let ring = unsafe { std::slice::from_raw_parts(window, self.frame_size) };
                demux(ring, buffers, self.sample_bytes);
            }
            Direction::Recording => {
                let ring = unsafe { std::slice::from_raw_parts_mut(window, self.frame_size) };
                mux(buffers, ring, self.sample_bytes);
            }
        }

        observer.after_transfer(index);

        let size = snapshot.buffer_size;
        let next = ((snapshot.position as u64 + self.frame_size as u64) % size as u64) as u32;

        let valid = snapshot.generation.still_valid(registers.revalidate())
            && registers.commit_position(snapshot.position, next);
        if !valid {
            match self.direction {
                Direction::Playback => zero(buffers),
                Direction::Recording => {
                    // Only wipe a window that still belongs to this ring.
                    if registers.buffer_offset() == snapshot.buffer_offset
                        && registers.buffer_size() == snapshot.buffer_size
                    {
                        // SAFETY: same bounds as the transfer above.
                        unsafe { std::ptr::write_bytes(window, 0, self.frame_size) };
                    }
                }
            }
            observer.on_discarded(index);
            return Outcome::Discarded;
        }

        registers.advance_clock(snapshot.clock, self.samples_per_tick);
        observer.on_committed(index, next);

        let half = size / 2;
        let wrapped = next == 0;
        let crossed_half = snapshot.position < half && next >= half;
        let due = match snapshot.notification_count {
            0 => false,
            1 => wrapped,
            _ => wrapped || crossed_half,
        };

        let mut notified = false;
        if due {
            if let Some(handle) = &self.notification {
                notified = handle.signal();
                if notified {
                    observer.on_notified(index);
                }
            }
        }
        Outcome::Committed { notified }
    }
}

/// Absolute start of the tick window, if it lies inside the snapshot's ring
/// and the ring lies inside the cell area of the mapping.
fn window_start(
    snapshot: &RegisterSnapshot,
    frame_size: usize,
    cell_offset: usize,
    region_size: usize,
) -> Option<usize> {
    let position = snapshot.position as usize;
    let offset = snapshot.buffer_offset as usize;
    let size = snapshot.buffer_size as usize;

    if position.checked_add(frame_size)? > size {
        return None;
    }
    if offset < cell_offset || offset.checked_add(size)? > region_size {
        return None;
    }
    Some(offset + position)
}

fn zero(buffers: &mut [Vec<u8>]) {
    for buffer in buffers {
        buffer.fill(0);
    }
}

/// Moves samples for every bound endpoint once per period.
pub struct TickEngine<O: TickObserver = NoopObserver> {
    slots: usize,
    endpoints: Vec<BoundEndpoint>,
    observer: O,
}

impl TickEngine<NoopObserver> {
    pub fn new(slots: usize) -> CableResult<Self> {
        Self::with_observer(slots, NoopObserver)
    }
}

impl<O: TickObserver> TickEngine<O> {
    pub fn with_observer(slots: usize, observer: O) -> CableResult<Self> {
        if slots == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "slots",
                value: slots.to_string(),
                reason: "Need at least one buffer slot".to_string(),
            }
            .into());
        }
        Ok(Self {
            slots,
            endpoints: Vec::new(),
            observer,
        })
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Start ticking an endpoint. Rebinding the same index replaces it.
    ///
    /// Channel buffers are allocated here, never in [`Self::tick`].
    pub fn bind(&mut self, attachment: ProcessAttachment) -> CableResult<()> {
        let descriptor = attachment.descriptor().clone();
        let layout = *attachment.layout();
        let channels = descriptor.channels.as_usize();
        let sample_bytes = layout.sample_depth.bytes();
        let frame_size = layout.frame_size as usize;
        let frame_bytes = channels * sample_bytes;

        if frame_size % frame_bytes != 0 {
            return Err(HardValidationError::MisalignedFrameSize {
                frame_size: layout.frame_size,
                frame_bytes: frame_bytes as u32,
            }
            .into());
        }

        let per_channel = frame_size / channels;
        let buffers = (0..self.slots)
            .map(|_| vec![vec![0u8; per_channel]; channels])
            .collect();

        let bound = BoundEndpoint {
            attachment,
            direction: descriptor.direction,
            frame_size,
            sample_bytes,
            samples_per_tick: (frame_size / frame_bytes) as u32,
            buffers,
            notification: None,
        };

        match self.position_of(descriptor.index) {
            Some(at) => self.endpoints[at] = bound,
            None => self.endpoints.push(bound),
        }
        Ok(())
    }

    pub fn unbind(&mut self, index: EndpointIndex) -> bool {
        match self.position_of(index) {
            Some(at) => {
                self.endpoints.remove(at);
                true
            }
            None => false,
        }
    }

    /// Use a delivered notification handle for its endpoint.
    /// Returns false if that endpoint is not bound.
    pub fn install_notification(&mut self, notification: Notification) -> bool {
        match self.position_of(notification.data.endpoint) {
            Some(at) => {
                self.endpoints[at].notification = Some(notification.handle);
                true
            }
            None => false,
        }
    }

    pub fn bound(&self) -> impl Iterator<Item = EndpointIndex> + '_ {
        self.endpoints.iter().map(|e| e.attachment.index())
    }

    /// Flat channel buffers of an endpoint for one slot.
    pub fn channel_buffers(&self, index: EndpointIndex, slot: usize) -> Option<&[Vec<u8>]> {
        let at = self.position_of(index)?;
        self.endpoints[at].buffers.get(slot).map(Vec::as_slice)
    }

    pub fn channel_buffers_mut(
        &mut self,
        index: EndpointIndex,
        slot: usize,
    ) -> Option<&mut [Vec<u8>]> {
        let at = self.position_of(index)?;
        self.endpoints[at].buffers.get_mut(slot).map(Vec::as_mut_slice)
    }

    /// Run one period against buffer slot `slot` (taken modulo the slot count).
    pub fn tick(&mut self, slot: usize) -> TickSummary {
        let slot = slot % self.slots;
        let mut summary = TickSummary::default();

        for endpoint in &mut self.endpoints {
            match endpoint.tick(slot, &mut self.observer) {
                Outcome::Committed { notified } => {
                    summary.committed += 1;
                    if notified {
                        summary.notified += 1;
                    }
                }
                Outcome::Discarded => summary.discarded += 1,
                Outcome::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    fn position_of(&self, index: EndpointIndex) -> Option<usize> {
        self.endpoints
            .iter()
            .position(|e| e.attachment.index() == index)
    }
}
