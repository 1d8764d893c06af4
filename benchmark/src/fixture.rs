// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Session plus tick engine, provisioned for benchmarking.

use std::sync::Arc;

use thiserror::Error;
use vcable_core::layout::{cells_for, CELL_SIZE};
use vcable_core::{
    CableError, Direction, DriverRegistry, EndpointIndex, LoopbackHost, ProcessId, Session,
    SessionOptions, TickEngine,
};

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error(transparent)]
    Cable(#[from] CableError),
}

/// Shape of the fixture.
#[derive(Debug, Clone, Copy)]
pub struct TickFixtureSpec {
    pub endpoints: usize,
    pub channels: u16,
    pub frame_size: u32,
    pub direction: Direction,
    pub ring_size: u32,
}

impl Default for TickFixtureSpec {
    fn default() -> Self {
        Self {
            endpoints: 1,
            channels: 2,
            frame_size: 256,
            direction: Direction::Playback,
            ring_size: 16 * 1024,
        }
    }
}

/// A session whose endpoints are all started and bound to `engine`.
pub struct TickFixture {
    pub registry: Arc<DriverRegistry>,
    pub session: Arc<Session>,
    pub engine: TickEngine,
    pub endpoints: Vec<EndpointIndex>,
    slot: usize,
}

impl TickFixture {
    pub fn new(spec: TickFixtureSpec) -> Result<Self, FixtureError> {
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        let registry = DriverRegistry::new_shared(Arc::new(LoopbackHost::new()));
        let session = registry.connect(SessionOptions::default());

        let cells = spec.endpoints.max(1) * cells_for(spec.ring_size).max(1);
        session.set_buffer_layout((cells * CELL_SIZE) as u64, spec.frame_size, 48_000, 16, 4)?;

        let mut engine = TickEngine::new(2)?;
        let mut endpoints = Vec::with_capacity(spec.endpoints);
        for n in 0..spec.endpoints {
            let pending =
                session.create_endpoint(spec.direction, spec.channels, &format!("bench-{}", n))?;
            let index = runtime.block_on(pending.confirmed())?;
            session.allocate_ring(index, spec.ring_size)?;
            session.start(index)?;
            engine.bind(session.attach(index, ProcessId::current())?)?;
            endpoints.push(index);
        }

        Ok(Self {
            registry,
            session,
            engine,
            endpoints,
            slot: 0,
        })
    }

    /// One tick over every endpoint, alternating slots. Returns the commit count.
    pub fn tick(&mut self) -> usize {
        let summary = self.engine.tick(self.slot);
        self.slot ^= 1;
        summary.committed
    }
}

impl Drop for TickFixture {
    fn drop(&mut self) {
        let _ = self.registry.disconnect(self.session.id());
    }
}
