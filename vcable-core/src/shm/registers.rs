// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-endpoint register file and the generation protocol.
//!
//! Each endpoint owns one 32-byte slot in the register area. The resource
//! manager writes the ring geometry under the session lock and publishes it by
//! storing a new generation; the tick engine snapshots the generation, does its
//! transfer, and re-reads the generation before committing the position.
//!
//! ```text
//! generation:  [ version (31 bits) | active (1 bit) ]
//! ```

use std::ops::Deref;
use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::Arc;

use crate::shm::SharedMemoryRegion;

/// Size of one register slot in bytes.
pub const REGISTER_SLOT_SIZE: usize = std::mem::size_of::<EndpointRegisters>();

/// Control registers of one endpoint, shared by both sides.
#[repr(C, align(32))]
pub struct EndpointRegisters {
    generation: AtomicU32,
    position: AtomicU32,
    clock: AtomicU32,
    buffer_offset: AtomicU32,
    buffer_size: AtomicU32,
    notification_count: AtomicU32,
    _reserved: [u32; 2],
}

const _: () = assert!(std::mem::size_of::<EndpointRegisters>() == 32);

/// Version plus active flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Generation(u32);

impl Generation {
    const ACTIVE: u32 = 1;

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn is_active(&self) -> bool {
        self.0 & Self::ACTIVE != 0
    }

    pub const fn version(&self) -> u32 {
        self.0 >> 1
    }

    /// Next version with the active bit set.
    pub const fn activated(&self) -> Self {
        Self((self.version().wrapping_add(1) << 1) | Self::ACTIVE)
    }

    /// Same version with the active bit cleared.
    pub const fn deactivated(&self) -> Self {
        Self(self.0 & !Self::ACTIVE)
    }

    /// True when a tick that snapshotted `self` may commit after reading `now`.
    pub const fn still_valid(&self, now: Generation) -> bool {
        now.is_active() && now.version() == self.version()
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "v{}{}",
            self.version(),
            if self.is_active() { "+active" } else { "" }
        )
    }
}

/// Consistent-enough copy of a slot taken at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSnapshot {
    pub generation: Generation,
    pub position: u32,
    pub clock: u32,
    pub buffer_offset: u32,
    pub buffer_size: u32,
    pub notification_count: u32,
}

impl EndpointRegisters {
    // =========================================================================
    // Tick side (lock-free, never blocks)
    // =========================================================================

    pub fn generation(&self) -> Generation {
        Generation(self.generation.load(Ordering::Acquire))
    }

    /// Seqlock read of the slot.
    ///
    /// Returns `None` if the generation changed while the fields were read;
    /// the fields may then mix two geometries and must not be used.
    pub fn try_snapshot(&self) -> Option<RegisterSnapshot> {
        let generation = self.generation();
        let snapshot = RegisterSnapshot {
            generation,
            position: self.position.load(Ordering::Relaxed),
            clock: self.clock.load(Ordering::Relaxed),
            buffer_offset: self.buffer_offset.load(Ordering::Relaxed),
            buffer_size: self.buffer_size.load(Ordering::Relaxed),
            notification_count: self.notification_count.load(Ordering::Relaxed),
        };
        fence(Ordering::Acquire);
        let after = Generation(self.generation.load(Ordering::Relaxed));
        (after == generation).then_some(snapshot)
    }

    /// Consistent snapshot, retrying across concurrent reconfiguration.
    /// Not for the tick path; use [`Self::try_snapshot`] there.
    pub fn snapshot(&self) -> RegisterSnapshot {
        loop {
            if let Some(snapshot) = self.try_snapshot() {
                return snapshot;
            }
            std::hint::spin_loop();
        }
    }

    /// Re-read the generation after the transfer.
    pub fn revalidate(&self) -> Generation {
        fence(Ordering::Acquire);
        Generation(self.generation.load(Ordering::Relaxed))
    }

    /// Publish the next position if nobody reset it since the snapshot.
    pub fn commit_position(&self, expected: u32, next: u32) -> bool {
        self.position
            .compare_exchange(expected, next, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub fn advance_clock(&self, expected: u32, samples: u32) {
        let _ = self.clock.compare_exchange(
            expected,
            expected.wrapping_add(samples),
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    pub fn position(&self) -> u32 {
        self.position.load(Ordering::Acquire)
    }

    pub fn clock(&self) -> u32 {
        self.clock.load(Ordering::Acquire)
    }

    pub fn buffer_offset(&self) -> u32 {
        self.buffer_offset.load(Ordering::Acquire)
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size.load(Ordering::Acquire)
    }

    pub fn notification_count(&self) -> u32 {
        self.notification_count.load(Ordering::Acquire)
    }

    // =========================================================================
    // Resource-manager side (caller holds the session lock)
    // =========================================================================

    /// Write ring geometry. Only published by the next [`Self::activate`].
    pub(crate) fn set_geometry(&self, buffer_offset: u32, buffer_size: u32) {
        self.buffer_offset.store(buffer_offset, Ordering::Relaxed);
        self.buffer_size.store(buffer_size, Ordering::Relaxed);
    }

    pub(crate) fn set_notification_count(&self, count: u32) {
        self.notification_count.store(count, Ordering::Release);
    }

    /// Rewind position and clock. Only done while the slot is inactive.
    pub(crate) fn rewind(&self) {
        self.position.store(0, Ordering::Relaxed);
        self.clock.store(0, Ordering::Relaxed);
    }

    /// Bump the version and set the active bit.
    pub(crate) fn activate(&self) -> Generation {
        let next = self.generation().activated();
        self.generation.store(next.raw(), Ordering::Release);
        next
    }

    /// Clear the active bit, keeping the version.
    ///
    /// The fence orders this store before every field write that follows, so
    /// a reader that sees any of those writes also sees the generation change.
    pub(crate) fn deactivate(&self) -> Generation {
        let next = self.generation().deactivated();
        self.generation.store(next.raw(), Ordering::Release);
        fence(Ordering::Release);
        next
    }

    /// Return the slot to its power-on state (inactive, no ring).
    pub(crate) fn clear(&self) {
        self.deactivate();
        self.set_geometry(0, 0);
        self.set_notification_count(0);
        self.rewind();
    }
}

/// A register slot kept alive by the mapping it lives in.
///
/// This is how a process attachment caches "its pointer to the slot": the
/// slot borrows from the mapping, and the `Arc` keeps the mapping alive for as
/// long as the tick engine holds the slot.
#[derive(Clone)]
pub struct RegisterSlot {
    region: Arc<SharedMemoryRegion>,
    offset: usize,
}

impl RegisterSlot {
    /// Locate the slot at `offset` inside `region`.
    ///
    /// Returns `None` if the slot would fall outside the mapping or is not
    /// aligned for atomic access.
    pub fn new(region: Arc<SharedMemoryRegion>, offset: usize) -> Option<Self> {
        if !region.contains(offset, REGISTER_SLOT_SIZE) {
            return None;
        }
        if (region.base_address() + offset) % std::mem::align_of::<EndpointRegisters>() != 0 {
            return None;
        }
        Some(Self { region, offset })
    }

    pub fn region(&self) -> &Arc<SharedMemoryRegion> {
        &self.region
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Deref for RegisterSlot {
    type Target = EndpointRegisters;

    fn deref(&self) -> &EndpointRegisters {
        // SAFETY: bounds and alignment checked in `new`; the region outlives
        // self through the Arc; every field is an atomic.
        unsafe { &*(self.region.as_ptr().add(self.offset) as *const EndpointRegisters) }
    }
}

impl std::fmt::Debug for RegisterSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterSlot")
            .field("offset", &self.offset)
            .field("snapshot", &self.try_snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot() -> RegisterSlot {
        let region = Arc::new(SharedMemoryRegion::anonymous(4096).unwrap());
        RegisterSlot::new(region, 64).unwrap()
    }

    #[test]
    fn test_generation_encoding() {
        let g = Generation::default();
        assert!(!g.is_active());
        assert_eq!(g.version(), 0);

        let a = g.activated();
        assert!(a.is_active());
        assert_eq!(a.version(), 1);
        assert_eq!(a.raw(), 0b11);

        let d = a.deactivated();
        assert!(!d.is_active());
        assert_eq!(d.version(), 1);

        assert_eq!(d.activated().version(), 2);
    }

    #[test]
    fn test_still_valid() {
        let a = Generation::default().activated();
        assert!(a.still_valid(a));
        assert!(!a.still_valid(a.deactivated()));
        assert!(!a.still_valid(a.deactivated().activated()));
    }

    #[test]
    fn test_slot_bounds_and_alignment() {
        let region = Arc::new(SharedMemoryRegion::anonymous(4096).unwrap());
        assert!(RegisterSlot::new(region.clone(), 4096 - 32).is_some());
        assert!(RegisterSlot::new(region.clone(), 4096 - 16).is_none());
        assert!(RegisterSlot::new(region, 65).is_none());
    }

    #[test]
    fn test_activate_publishes_geometry() {
        let regs = slot();
        regs.set_geometry(8192, 4096);
        regs.set_notification_count(1);
        let g = regs.activate();

        let snap = regs.snapshot();
        assert_eq!(snap.generation, g);
        assert_eq!(snap.buffer_offset, 8192);
        assert_eq!(snap.buffer_size, 4096);
        assert_eq!(snap.notification_count, 1);
    }

    #[test]
    fn test_try_snapshot_never_mixes_geometries() {
        const A: (u32, u32) = (4096, 4096);
        const B: (u32, u32) = (65536 + 4096, 131072);

        let regs = slot();
        regs.set_geometry(A.0, A.1);
        regs.activate();

        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let writer = {
            let regs = regs.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut flip = false;
                while !stop.load(Ordering::Relaxed) {
                    let (offset, size) = if flip { A } else { B };
                    regs.deactivate();
                    regs.set_geometry(offset, size);
                    regs.rewind();
                    regs.activate();
                    flip = !flip;
                }
            })
        };

        for _ in 0..200_000 {
            if let Some(snap) = regs.try_snapshot() {
                if snap.generation.is_active() {
                    let pair = (snap.buffer_offset, snap.buffer_size);
                    assert!(pair == A || pair == B, "torn geometry {:?}", pair);
                }
            }
        }
        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }

    #[test]
    fn test_try_snapshot_matches_snapshot_when_quiet() {
        let regs = slot();
        regs.set_geometry(8192, 4096);
        regs.activate();
        assert_eq!(regs.try_snapshot(), Some(regs.snapshot()));
    }

    #[test]
    fn test_commit_position_fails_after_rewind() {
        let regs = slot();
        assert!(regs.commit_position(0, 256));
        assert_eq!(regs.position(), 256);

        // Resource manager rewinds while the tick is mid-flight.
        regs.rewind();
        assert!(!regs.commit_position(256, 512));
        assert_eq!(regs.position(), 0);
    }

    #[test]
    fn test_clear() {
        let regs = slot();
        regs.set_geometry(1, 2);
        regs.activate();
        regs.clear();
        let snap = regs.snapshot();
        assert!(!snap.generation.is_active());
        assert_eq!(snap.generation.version(), 1);
        assert_eq!(snap.buffer_size, 0);
    }
}
