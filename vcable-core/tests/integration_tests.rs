// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end integration tests for vcable.
//!
//! These tests drive a session the way a client does: configure a layout,
//! create endpoints, hand out notification handles, then run the tick engine
//! against the shared region.

use std::io::Write;
use std::sync::Arc;
use std::thread;

use tempfile::NamedTempFile;
use vcable_core::{
    CableError, ConfigLoader, Direction, DriverRegistry, EndpointIndex, EndpointState,
    HardValidationError, HostError, LoopbackHost, ProcessId, Session, SessionOptions,
    SignalHandle, TickEngine, TickObserver,
};

fn registry() -> Arc<DriverRegistry> {
    DriverRegistry::new_shared(Arc::new(LoopbackHost::new()))
}

async fn stereo_endpoint(
    session: &Arc<Session>,
    direction: Direction,
    name: &str,
) -> EndpointIndex {
    session
        .create_endpoint(direction, 2, name)
        .expect("create endpoint")
        .confirmed()
        .await
        .expect("host confirmation")
}

fn configure(session: &Session) {
    session
        .set_buffer_layout(1024 * 1024, 256, 48_000, 16, 4)
        .expect("layout");
}

/// Write bytes into the ring through the creator's mapping.
fn write_ring(session: &Session, index: EndpointIndex, at: usize, bytes: &[u8]) {
    let attachment = session.attach(index, ProcessId::current()).unwrap();
    let offset = attachment.registers().buffer_offset() as usize + at;
    assert!(attachment.region().contains(offset, bytes.len()));
    unsafe {
        std::ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            attachment.region().as_ptr().add(offset),
            bytes.len(),
        );
    }
}

fn read_ring(session: &Session, index: EndpointIndex, at: usize, len: usize) -> Vec<u8> {
    let attachment = session.attach(index, ProcessId::current()).unwrap();
    let offset = attachment.registers().buffer_offset() as usize + at;
    let mut out = vec![0u8; len];
    unsafe {
        std::ptr::copy_nonoverlapping(
            attachment.region().as_ptr().add(offset),
            out.as_mut_ptr(),
            len,
        );
    }
    out
}

/// Stereo playback, frame 256, ring 4096: one wrap takes 16 ticks and fires
/// exactly one notification.
#[tokio::test]
async fn test_playback_wrap_fires_one_notification() {
    let registry = registry();
    let session = registry.connect(SessionOptions::default());
    configure(&session);

    let index = stereo_endpoint(&session, Direction::Playback, "speakers").await;
    session.set_notification_count(index, 1).unwrap();
    let ring = session.allocate_ring(index, 4096).unwrap();
    assert_eq!(ring.size, 4096);

    let client_handle = SignalHandle::new().unwrap();
    let data = session.attach_notification(index, &client_handle).unwrap();
    assert_eq!(data.endpoint, index);

    let mut delivered = session.wait_notifications(8).await.unwrap();
    assert_eq!(delivered.len(), 1);

    session.start(index).unwrap();
    let mut engine = TickEngine::new(2).unwrap();
    engine
        .bind(session.attach(index, ProcessId::current()).unwrap())
        .unwrap();
    assert!(engine.install_notification(delivered.remove(0)));

    let mut notified = 0;
    for tick in 0..15 {
        let summary = engine.tick(tick);
        assert_eq!(summary.committed, 1);
        notified += summary.notified;
    }
    assert_eq!(notified, 0);
    assert_eq!(session.registers(index).unwrap().position, 15 * 256);

    let last = engine.tick(15);
    assert_eq!(last.notified, 1);
    assert_eq!(session.registers(index).unwrap().position, 0);
    assert_eq!(client_handle.try_consume().unwrap(), 1);
}

#[tokio::test]
async fn test_half_and_wrap_notifications() {
    let session = registry().connect(SessionOptions::default());
    configure(&session);
    let index = stereo_endpoint(&session, Direction::Playback, "speakers").await;
    session.set_notification_count(index, 2).unwrap();
    session.allocate_ring(index, 4096).unwrap();

    let handle = SignalHandle::new().unwrap();
    session.attach_notification(index, &handle).unwrap();
    let delivered = session.wait_notifications(1).await.unwrap();

    session.start(index).unwrap();
    let mut engine = TickEngine::new(1).unwrap();
    engine
        .bind(session.attach(index, ProcessId::current()).unwrap())
        .unwrap();
    for notification in delivered {
        engine.install_notification(notification);
    }

    let notified: usize = (0..32).map(|_| engine.tick(0).notified).sum();
    // Two wraps, two half-buffer crossings.
    assert_eq!(notified, 4);
    assert_eq!(handle.try_consume().unwrap(), 4);
}

#[tokio::test]
async fn test_playback_demuxes_ring_window() {
    let session = registry().connect(SessionOptions::default());
    configure(&session);
    let index = stereo_endpoint(&session, Direction::Playback, "speakers").await;
    session.allocate_ring(index, 4096).unwrap();
    session.start(index).unwrap();

    // 16-bit stereo: L sample = [f, 0x01], R sample = [f, 0x02].
    let window: Vec<u8> = (0..64u8).flat_map(|f| [f, 0x01, f, 0x02]).collect();
    write_ring(&session, index, 0, &window);

    let mut engine = TickEngine::new(1).unwrap();
    engine
        .bind(session.attach(index, ProcessId::current()).unwrap())
        .unwrap();
    engine.tick(0);

    let buffers = engine.channel_buffers(index, 0).unwrap();
    let left: Vec<u8> = (0..64u8).flat_map(|f| [f, 0x01]).collect();
    let right: Vec<u8> = (0..64u8).flat_map(|f| [f, 0x02]).collect();
    assert_eq!(buffers[0], left);
    assert_eq!(buffers[1], right);
}

#[tokio::test]
async fn test_recording_muxes_into_ring() {
    let session = registry().connect(SessionOptions::default());
    configure(&session);
    let index = stereo_endpoint(&session, Direction::Recording, "mic").await;
    session.allocate_ring(index, 4096).unwrap();
    session.start(index).unwrap();

    let mut engine = TickEngine::new(1).unwrap();
    engine
        .bind(session.attach(index, ProcessId::current()).unwrap())
        .unwrap();
    {
        let buffers = engine.channel_buffers_mut(index, 0).unwrap();
        buffers[0].fill(0x11);
        buffers[1].fill(0x22);
    }
    engine.tick(0);

    let ring = read_ring(&session, index, 0, 8);
    assert_eq!(ring, vec![0x11, 0x11, 0x22, 0x22, 0x11, 0x11, 0x22, 0x22]);
    assert_eq!(session.registers(index).unwrap().position, 256);
}

#[tokio::test]
async fn test_inactive_endpoint_never_mutates_registers() {
    let session = registry().connect(SessionOptions::default());
    configure(&session);
    let index = stereo_endpoint(&session, Direction::Playback, "speakers").await;
    session.allocate_ring(index, 4096).unwrap();
    session.start(index).unwrap();

    let mut engine = TickEngine::new(1).unwrap();
    engine
        .bind(session.attach(index, ProcessId::current()).unwrap())
        .unwrap();
    engine.tick(0);
    engine.tick(0);
    session.stop(index).unwrap();
    let before = session.registers(index).unwrap();

    for _ in 0..10 {
        engine.channel_buffers_mut(index, 0).unwrap()[1].fill(0x7F);
        let summary = engine.tick(0);
        assert_eq!(summary.skipped, 1);
        assert!(engine
            .channel_buffers(index, 0)
            .unwrap()
            .iter()
            .all(|b| b.iter().all(|&x| x == 0)));
    }
    assert_eq!(session.registers(index).unwrap(), before);
}

/// Stops (or restarts) the endpoint between the transfer and the re-read.
struct RaceInjector {
    session: Arc<Session>,
    restart: bool,
    discarded: usize,
}

impl TickObserver for RaceInjector {
    fn after_transfer(&mut self, endpoint: EndpointIndex) {
        self.session.stop(endpoint).unwrap();
        if self.restart {
            self.session.start(endpoint).unwrap();
        }
    }

    fn on_discarded(&mut self, _endpoint: EndpointIndex) {
        self.discarded += 1;
    }
}

#[tokio::test]
async fn test_generation_change_discards_tick() {
    for restart in [false, true] {
        let session = registry().connect(SessionOptions::default());
        configure(&session);
        let index = stereo_endpoint(&session, Direction::Playback, "speakers").await;
        session.allocate_ring(index, 4096).unwrap();
        session.start(index).unwrap();
        write_ring(&session, index, 0, &[0x55; 256]);

        let observer = RaceInjector {
            session: session.clone(),
            restart,
            discarded: 0,
        };
        let mut engine = TickEngine::with_observer(1, observer).unwrap();
        engine
            .bind(session.attach(index, ProcessId::current()).unwrap())
            .unwrap();

        let summary = engine.tick(0);
        assert_eq!(summary.discarded, 1);
        assert_eq!(summary.committed, 0);
        assert_eq!(engine.observer().discarded, 1);
        assert_eq!(session.registers(index).unwrap().position, 0);
        assert!(engine
            .channel_buffers(index, 0)
            .unwrap()
            .iter()
            .all(|b| b.iter().all(|&x| x == 0)));
    }
}

/// Reallocates the endpoint's ring after the snapshot, before the transfer.
struct Reallocator {
    session: Arc<Session>,
    armed: bool,
    new_size: u32,
}

impl TickObserver for Reallocator {
    fn before_transfer(&mut self, endpoint: EndpointIndex) {
        if std::mem::take(&mut self.armed) {
            self.session.allocate_ring(endpoint, self.new_size).unwrap();
        }
    }
}

#[tokio::test]
async fn test_reallocation_before_transfer_stays_inside_old_ring() {
    let session = registry().connect(SessionOptions::default());
    configure(&session);
    let mic = stereo_endpoint(&session, Direction::Recording, "mic").await;
    let aux = stereo_endpoint(&session, Direction::Playback, "aux").await;

    // Two cells for mic, then aux right behind it.
    let old = session.allocate_ring(mic, 128 * 1024).unwrap();
    assert_eq!(old.cell_count, 2);
    let aux_ring = session.allocate_ring(aux, 4096).unwrap();
    assert_eq!(aux_ring.first_cell, old.first_cell + 2);
    session.start(mic).unwrap();

    let observer = Reallocator {
        session: session.clone(),
        armed: false,
        new_size: 4096,
    };
    let mut engine = TickEngine::with_observer(1, observer).unwrap();
    engine
        .bind(session.attach(mic, ProcessId::current()).unwrap())
        .unwrap();
    {
        let buffers = engine.channel_buffers_mut(mic, 0).unwrap();
        buffers[0].fill(0x11);
        buffers[1].fill(0x22);
    }

    // Walk mic to the last window of its second cell.
    let last = 128 * 1024 - 256;
    for _ in 0..last / 256 {
        assert_eq!(engine.tick(0).committed, 1);
    }
    assert_eq!(session.registers(mic).unwrap().position, last as u32);

    engine.observer_mut().armed = true;
    let summary = engine.tick(0);
    assert_eq!(summary.discarded, 1);
    assert_eq!(summary.committed, 0);

    let regs = session.registers(mic).unwrap();
    assert_eq!(regs.position, 0);
    assert_eq!(regs.buffer_size, 4096);
    assert!(regs.generation.is_active());
    assert!(read_ring(&session, mic, 0, 4096).iter().all(|&b| b == 0));
    assert!(read_ring(&session, aux, 0, 4096).iter().all(|&b| b == 0));

    // The next tick runs against the new ring.
    assert_eq!(engine.tick(0).committed, 1);
    assert_eq!(read_ring(&session, mic, 0, 4), vec![0x11, 0x11, 0x22, 0x22]);
    assert!(read_ring(&session, aux, 0, 4096).iter().all(|&b| b == 0));
}

#[tokio::test]
async fn test_concurrent_ring_allocations_do_not_overlap() {
    let session = registry().connect(SessionOptions::default());
    session
        .set_buffer_layout(16 * 64 * 1024, 256, 48_000, 16, 4)
        .unwrap();

    let mut indices = Vec::new();
    for i in 0..8 {
        indices.push(stereo_endpoint(&session, Direction::Playback, &format!("ep{}", i)).await);
    }

    let handles: Vec<_> = indices
        .iter()
        .map(|&index| {
            let session = session.clone();
            thread::spawn(move || session.allocate_ring(index, 100_000).unwrap())
        })
        .collect();
    let rings: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for (i, a) in rings.iter().enumerate() {
        assert_eq!(a.cell_count, 2);
        for b in &rings[i + 1..] {
            let a_end = a.first_cell + a.cell_count;
            let b_end = b.first_cell + b.cell_count;
            assert!(a_end <= b.first_cell || b_end <= a.first_cell);
        }
    }
    assert_eq!(session.stats().cells_used, 16);

    // Full: the next request fails without touching anything.
    let extra = stereo_endpoint(&session, Direction::Playback, "extra").await;
    assert!(matches!(
        session.allocate_ring(extra, 4096),
        Err(CableError::Resource(_))
    ));

    // Freed cells are reused.
    session.free_ring(indices[3]).unwrap();
    let reused = session.allocate_ring(extra, 100_000).unwrap();
    assert_eq!(reused.first_cell, rings[3].first_cell);
}

#[tokio::test]
async fn test_notification_fifo_matching() {
    let session = registry().connect(SessionOptions::default());
    configure(&session);
    let a = stereo_endpoint(&session, Direction::Playback, "a").await;
    let b = stereo_endpoint(&session, Direction::Playback, "b").await;

    let w1 = session.wait_notifications(1);
    let w2 = session.wait_notifications(1);
    let i1 = SignalHandle::new().unwrap();
    let i2 = SignalHandle::new().unwrap();
    session.attach_notification(a, &i1).unwrap();
    session.attach_notification(b, &i2).unwrap();

    let first = w1.await.unwrap();
    let second = w2.await.unwrap();
    assert_eq!(first[0].data.endpoint, a);
    assert_eq!(second[0].data.endpoint, b);

    // The delivered copy is independent of the poster's handle.
    drop(i1);
    assert!(first[0].handle.signal());
    assert_eq!(first[0].handle.try_consume().unwrap(), 1);
}

#[tokio::test]
async fn test_layout_above_max_sample_rate_creates_no_region() {
    let session = registry().connect(SessionOptions::default());
    let err = session
        .set_buffer_layout(1024 * 1024, 256, 768_000, 16, 4)
        .unwrap_err();
    assert!(matches!(
        err,
        CableError::HardValidation(HardValidationError::SampleRateOutOfRange { .. })
    ));
    let stats = session.stats();
    assert!(stats.layout.is_none());
    assert!(stats.region_size.is_none());
    assert_eq!(stats.cells_total, 0);
}

#[tokio::test]
async fn test_host_rejection_leaves_nothing_behind() {
    let host = Arc::new(LoopbackHost::new());
    let registry = DriverRegistry::new_shared(host.clone());
    let session = registry.connect(SessionOptions::default());
    configure(&session);

    host.fail_next(HostError::Resources {
        reason: "no free pins".to_string(),
    });
    let pending = session
        .create_endpoint(Direction::Playback, 2, "speakers")
        .unwrap();
    let index = pending.index();
    let err = pending.confirmed().await.unwrap_err();
    assert!(matches!(
        err,
        CableError::HostRejected {
            source: HostError::Resources { .. },
            ..
        }
    ));
    assert!(matches!(
        session.state(index),
        Err(CableError::EndpointNotFound(_))
    ));
    assert!(session.endpoints().is_empty());
    assert_eq!(session.stats().pending_creations, 0);

    // The slot and the name are free again.
    let again = stereo_endpoint(&session, Direction::Playback, "speakers").await;
    assert_eq!(again, index);
    assert_eq!(host.registered(), 1);
}

#[tokio::test]
async fn test_disconnect_orphans_referenced_endpoints() {
    let host = Arc::new(LoopbackHost::new());
    let registry = DriverRegistry::new_shared(host.clone());
    let session = registry.connect(SessionOptions::default());
    configure(&session);

    let kept = stereo_endpoint(&session, Direction::Playback, "kept").await;
    let dropped = stereo_endpoint(&session, Direction::Recording, "dropped").await;
    session.allocate_ring(kept, 4096).unwrap();
    session.start(kept).unwrap();

    let waiter = session.wait_notifications(4);
    let reference = registry.retain(session.id(), kept).unwrap();

    assert_eq!(registry.disconnect(session.id()).unwrap(), 1);
    assert!(matches!(
        waiter.await,
        Err(CableError::NotificationsCancelled)
    ));
    assert_eq!(session.state(kept).unwrap(), EndpointState::Orphaned);
    assert!(matches!(
        session.state(dropped),
        Err(CableError::EndpointNotFound(_))
    ));
    assert!(!session.registers(kept).unwrap().generation.is_active());
    assert!(matches!(
        session.start(kept),
        Err(CableError::SessionClosed(_))
    ));
    assert_eq!(host.registered(), 1);

    drop(reference);
    assert!(registry.is_empty());
    assert_eq!(host.registered(), 0);
    assert_eq!(session.stats().cells_used, 0);
}

#[tokio::test]
async fn test_named_region_attach_from_other_process_id() {
    let registry = registry();
    let name = format!("vcable-test-{}", std::process::id());
    // Pretend the session belongs to another process so attach opens by name.
    let owner = ProcessId::new(1).unwrap();
    let session = registry.connect_as(
        owner,
        SessionOptions {
            region_name: Some(name.clone()),
        },
    );
    let info = session
        .set_buffer_layout(1024 * 1024, 256, 48_000, 16, 4)
        .unwrap();
    assert_eq!(info.region_name, Some(format!("{}-1", name)));

    let index = stereo_endpoint(&session, Direction::Playback, "speakers").await;
    session.allocate_ring(index, 4096).unwrap();
    session.start(index).unwrap();

    let attachment = session.attach(index, ProcessId::current()).unwrap();
    assert_ne!(attachment.region().base_address(), info.base_address);

    let mut engine = TickEngine::new(1).unwrap();
    engine.bind(attachment).unwrap();
    engine.tick(0);
    assert_eq!(session.registers(index).unwrap().position, 256);
}

#[test]
fn test_config_file_drives_session() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
layout:
  buffer_size: 1048576
  frame_size: 256
  sample_rate: 48000
  sample_depth: 16
engine:
  slots: 2
endpoints:
  - name: speakers
    direction: playback
    channels: 2
    ring_size: 4096
    notification_count: 1
"#
    )
    .unwrap();

    let config = ConfigLoader::load_file(file.path()).unwrap();
    let session = registry().connect(SessionOptions::default());
    session.apply_layout(config.layout).unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let endpoint = &config.endpoints[0];
    let index = runtime
        .block_on(
            session
                .create_endpoint(
                    endpoint.direction,
                    endpoint.channels.value(),
                    endpoint.name.as_str(),
                )
                .unwrap()
                .confirmed(),
        )
        .unwrap();
    let ring = session.allocate_ring(index, endpoint.ring_size).unwrap();
    assert_eq!(ring.size, 4096);

    let json = serde_json::to_string(&session.stats()).unwrap();
    assert!(json.contains("speakers"));
}
