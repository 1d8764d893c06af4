//! Process-wide session registry using DashMap.
//!
//! Sessions are owned by the registry's arena. Endpoints never hold a pointer
//! back to their session; an [`EndpointRef`] names its endpoint by
//! `(SessionId, EndpointIndex)` and resolves it through the registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::{CableError, CableResult};
use crate::host::HostSurface;
use crate::session::{Session, SessionOptions};
use crate::types::{EndpointIndex, ProcessId, SessionId};

/// Thread-safe arena of control sessions.
pub struct DriverRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    next_id: AtomicU64,
    host: Arc<dyn HostSurface>,
}

impl DriverRegistry {
    pub fn new(host: Arc<dyn HostSurface>) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            host,
        }
    }

    /// Create a registry wrapped in an Arc for sharing across threads.
    pub fn new_shared(host: Arc<dyn HostSurface>) -> Arc<Self> {
        Arc::new(Self::new(host))
    }

    /// Open a control session owned by the calling process.
    pub fn connect(&self, options: SessionOptions) -> Arc<Session> {
        self.connect_as(ProcessId::current(), options)
    }

    /// Open a control session on behalf of `owner`.
    pub fn connect_as(&self, owner: ProcessId, options: SessionOptions) -> Arc<Session> {
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(Session::new(id, owner, self.host.clone(), options));
        self.sessions.insert(id, session.clone());
        info!(session = %id, owner = %owner, "Session connected");
        session
    }

    pub fn session(&self, id: SessionId) -> CableResult<Arc<Session>> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(CableError::SessionNotFound(id))
    }

    /// Disconnect a session.
    ///
    /// Endpoints still referenced elsewhere become Orphaned and keep the
    /// session in the arena until their last reference is released.
    pub fn disconnect(&self, id: SessionId) -> CableResult<usize> {
        let session = self.session(id)?;
        let remaining = session.orphan_all();
        self.reap(id);
        Ok(remaining)
    }

    /// Take a counted reference to a live endpoint.
    pub fn retain(self: &Arc<Self>, session: SessionId, index: EndpointIndex) -> CableResult<EndpointRef> {
        self.session(session)?.retain(index)?;
        Ok(EndpointRef {
            registry: Arc::downgrade(self),
            session,
            index,
        })
    }

    /// Drop a disconnected session once nothing is left in it.
    ///
    /// Also covers creations that were still pending at disconnect and
    /// deleted themselves afterwards.
    pub fn reap(&self, id: SessionId) -> bool {
        let removed = self
            .sessions
            .remove_if(&id, |_, s| !s.is_connected() && s.is_empty())
            .is_some();
        if removed {
            debug!(session = %id, "Session removed");
        }
        removed
    }

    /// Disconnect every session.
    pub fn shutdown(&self) {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        for id in ids {
            let _ = self.disconnect(id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

/// A counted reference to an endpoint, released on drop.
#[derive(Debug)]
pub struct EndpointRef {
    registry: Weak<DriverRegistry>,
    session: SessionId,
    index: EndpointIndex,
}

impl EndpointRef {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn index(&self) -> EndpointIndex {
        self.index
    }
}

impl Drop for EndpointRef {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let Ok(session) = registry.session(self.session) else {
            return;
        };
        if session.release(self.index) && !session.is_connected() {
            registry.reap(self.session);
        }
    }
}
