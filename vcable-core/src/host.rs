// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Host plugin surface.
//!
//! The host side (filter/pin factories, device interfaces) is an external
//! collaborator. The session only needs one thing from it: confirm or reject
//! a new device, asynchronously. The completion is a one-shot promise so the
//! session's creation state machine does not depend on how the host completes
//! its own requests.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

use crate::error::HostError;
use crate::types::{ChannelCount, Direction, EndpointIndex, EndpointName, SessionId};

/// What the host is asked to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRegistration {
    pub session: SessionId,
    pub index: EndpointIndex,
    pub name: EndpointName,
    pub direction: Direction,
    pub channels: ChannelCount,
}

/// Result handler for a completion whose waiter is already gone.
type Unclaimed = Box<dyn FnOnce(Result<(), HostError>) + Send>;

/// Completes a pending endpoint creation exactly once.
///
/// Dropping it without completing is reported as [`HostError::Abandoned`].
/// If the waiting side closed its receiver first, the result goes to the
/// session instead, so a confirmed device is still torn down properly.
pub struct CreationCompletion {
    tx: Option<oneshot::Sender<Result<(), HostError>>>,
    unclaimed: Option<Unclaimed>,
}

impl CreationCompletion {
    pub(crate) fn pair(
        unclaimed: impl FnOnce(Result<(), HostError>) + Send + 'static,
    ) -> (Self, oneshot::Receiver<Result<(), HostError>>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            tx: Some(tx),
            unclaimed: Some(Box::new(unclaimed)),
        };
        (completion, rx)
    }

    pub fn complete(mut self, result: Result<(), HostError>) {
        self.deliver(result);
    }

    fn deliver(&mut self, result: Result<(), HostError>) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        // `send` fails only once the receiver is closed; the result is ours again.
        if let Err(result) = tx.send(result) {
            if let Some(unclaimed) = self.unclaimed.take() {
                unclaimed(result);
            }
        }
    }
}

impl Drop for CreationCompletion {
    fn drop(&mut self) {
        self.deliver(Err(HostError::Abandoned));
    }
}

impl std::fmt::Debug for CreationCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreationCompletion")
            .field("completed", &self.tx.is_none())
            .finish_non_exhaustive()
    }
}

/// Host plugin surface consumed by sessions.
pub trait HostSurface: Send + Sync {
    /// Ask the host to expose a device. Must eventually complete `completion`.
    fn register_device(&self, registration: DeviceRegistration, completion: CreationCompletion);

    /// The endpoint backing a device was deleted.
    ///
    /// Called under the session lock: must not call into the session, nor
    /// complete or drop a parked [`CreationCompletion`].
    fn unregister_device(&self, _session: SessionId, _index: EndpointIndex, _name: &EndpointName) {}
}

/// In-process host that confirms immediately.
///
/// Rejects a device whose name is already registered, and can be primed to
/// fail the next registration.
#[derive(Debug, Default)]
pub struct LoopbackHost {
    names: Mutex<HashSet<String>>,
    fail_next: Mutex<Option<HostError>>,
}

impl LoopbackHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next registration fail with `error`.
    pub fn fail_next(&self, error: HostError) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn registered(&self) -> usize {
        self.names.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl HostSurface for LoopbackHost {
    fn register_device(&self, registration: DeviceRegistration, completion: CreationCompletion) {
        if let Some(error) = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            completion.complete(Err(error));
            return;
        }

        let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        if !names.insert(registration.name.as_str().to_string()) {
            completion.complete(Err(HostError::NameConflict {
                name: registration.name.to_string(),
            }));
            return;
        }

        tracing::debug!(
            session = %registration.session,
            endpoint = %registration.index,
            name = %registration.name,
            direction = %registration.direction,
            "Loopback host registered device"
        );
        completion.complete(Ok(()));
    }

    fn unregister_device(&self, _session: SessionId, _index: EndpointIndex, name: &EndpointName) {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(name: &str) -> DeviceRegistration {
        DeviceRegistration {
            session: SessionId::new(1),
            index: EndpointIndex::new(0).unwrap(),
            name: EndpointName::new(name).unwrap(),
            direction: Direction::Playback,
            channels: ChannelCount::new(2).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_loopback_confirms_and_detects_conflicts() {
        let host = LoopbackHost::new();

        let (c1, r1) = CreationCompletion::pair(|_| {});
        host.register_device(registration("a"), c1);
        assert_eq!(r1.await.unwrap(), Ok(()));

        let (c2, r2) = CreationCompletion::pair(|_| {});
        host.register_device(registration("a"), c2);
        assert!(matches!(r2.await.unwrap(), Err(HostError::NameConflict { .. })));

        host.unregister_device(SessionId::new(1), EndpointIndex::new(0).unwrap(), &EndpointName::new("a").unwrap());
        assert_eq!(host.registered(), 0);
    }

    #[tokio::test]
    async fn test_fail_next() {
        let host = LoopbackHost::new();
        host.fail_next(HostError::Resources {
            reason: "no pins".to_string(),
        });
        let (c, r) = CreationCompletion::pair(|_| {});
        host.register_device(registration("b"), c);
        assert!(matches!(r.await.unwrap(), Err(HostError::Resources { .. })));
        assert_eq!(host.registered(), 0);
    }

    #[tokio::test]
    async fn test_dropped_completion_reports_abandoned() {
        let (c, r) = CreationCompletion::pair(|_| {});
        drop(c);
        assert!(matches!(r.await.unwrap(), Err(HostError::Abandoned)));
    }

    #[test]
    fn test_closed_receiver_hands_result_back() {
        let (tx, seen) = std::sync::mpsc::channel();
        let (c, mut r) = CreationCompletion::pair(move |result| {
            let _ = tx.send(result);
        });
        r.close();
        c.complete(Ok(()));
        assert_eq!(seen.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn test_delivered_result_is_not_handed_back() {
        let (tx, seen) = std::sync::mpsc::channel();
        let (c, mut r) = CreationCompletion::pair(move |result| {
            let _ = tx.send(result);
        });
        c.complete(Ok(()));
        r.close();
        assert_eq!(r.try_recv().unwrap(), Ok(()));
        assert!(seen.try_recv().is_err());
    }
}
