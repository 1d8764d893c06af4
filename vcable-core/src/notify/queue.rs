// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Notification queue: FIFO matching of posted handles against waiters.
//!
//! Posters are resource-manager calls that register a notification handle for
//! an endpoint. Waiters are the client's outstanding "give me new handles"
//! requests. Whichever side arrives second completes the oldest entry on the
//! other side. Everything runs under one short-lived lock.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{CableError, CableResult, HardValidationError};
use crate::notify::SignalHandle;
use crate::shm::Generation;
use crate::types::EndpointIndex;

/// Upper bound on items handed to one waiter.
pub const MAX_BATCH: usize = 64;

/// What a delivered handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub endpoint: EndpointIndex,
    /// Generation of the endpoint when the handle was attached.
    pub generation: u32,
}

impl NotificationData {
    pub fn new(endpoint: EndpointIndex, generation: Generation) -> Self {
        Self {
            endpoint,
            generation: generation.raw(),
        }
    }

    /// Pack as `endpoint << 32 | generation` for transports that carry a u64.
    pub fn to_raw(&self) -> u64 {
        ((self.endpoint.value() as u64) << 32) | self.generation as u64
    }

    pub fn from_raw(raw: u64) -> Result<Self, HardValidationError> {
        Ok(Self {
            endpoint: EndpointIndex::new((raw >> 32) as u32)?,
            generation: raw as u32,
        })
    }
}

/// A delivered notification: the waiter's own copy of the handle.
#[derive(Debug)]
pub struct Notification {
    pub handle: SignalHandle,
    pub data: NotificationData,
}

/// A parked waiter. Waiters only park while no items are queued, so each
/// post completes exactly one of them with a single item.
struct Waiter {
    tx: oneshot::Sender<Vec<Notification>>,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<Notification>,
    waiters: VecDeque<Waiter>,
    closed: bool,
}

/// Cross-process notification handle queue.
#[derive(Default)]
pub struct NotificationQueue {
    state: Mutex<QueueState>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Post a handle. The handle is duplicated before the lock is taken, so
    /// the receiver owns its copy regardless of what the poster does next.
    pub fn post(&self, handle: &SignalHandle, data: NotificationData) -> CableResult<()> {
        let duplicate = handle.duplicate().map_err(|source| CableError::Io {
            context: "duplicating notification handle",
            source,
        })?;
        self.post_owned(Notification {
            handle: duplicate,
            data,
        })
    }

    /// Post an already-owned notification.
    pub fn post_owned(&self, notification: Notification) -> CableResult<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(CableError::NotificationsCancelled);
        }

        let mut item = notification;
        while let Some(waiter) = state.waiters.pop_front() {
            // A waiter whose future was dropped hands the item back.
            match waiter.tx.send(vec![item]) {
                Ok(()) => return Ok(()),
                Err(mut returned) => match returned.pop() {
                    Some(back) => item = back,
                    None => return Ok(()),
                },
            }
        }

        state.items.push_back(item);
        Ok(())
    }

    /// Wait for up to `batch` notifications.
    ///
    /// `batch` only bounds an immediate drain of queued items. A waiter that
    /// has to park is completed by the next post with that one item.
    ///
    /// The waiter is queued (or completed) when this is called, not when the
    /// returned future is first polled, so call order is FIFO order.
    pub fn wait(&self, batch: usize) -> WaitNotifications {
        let batch = batch.clamp(1, MAX_BATCH);
        let mut state = self.lock();

        if state.closed {
            return WaitNotifications::ready(Err(CableError::NotificationsCancelled));
        }

        if !state.items.is_empty() {
            let take = batch.min(state.items.len());
            let drained: Vec<Notification> = state.items.drain(..take).collect();
            return WaitNotifications::ready(Ok(drained));
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(Waiter { tx });
        WaitNotifications {
            inner: WaitState::Pending(rx),
        }
    }

    /// Complete every waiter with a cancellation and drop pending items.
    /// The queue refuses further posts and waits afterwards.
    pub fn cancel_all(&self) -> (usize, usize) {
        let mut state = self.lock();
        state.closed = true;
        let waiters = state.waiters.len();
        let items = state.items.len();
        // Dropping the senders resolves every receiver with an error.
        state.waiters.clear();
        state.items.clear();
        (waiters, items)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn pending_items(&self) -> usize {
        self.lock().items.len()
    }

    /// Waiters still interested in a delivery.
    pub fn pending_waiters(&self) -> usize {
        let mut state = self.lock();
        state.waiters.retain(|w| !w.tx.is_closed());
        state.waiters.len()
    }
}

impl std::fmt::Debug for NotificationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("NotificationQueue")
            .field("items", &state.items.len())
            .field("waiters", &state.waiters.len())
            .field("closed", &state.closed)
            .finish()
    }
}

enum WaitState {
    Ready(Option<CableResult<Vec<Notification>>>),
    Pending(oneshot::Receiver<Vec<Notification>>),
}

/// Future returned by [`NotificationQueue::wait`].
///
/// Dropping it cancels the wait; a later post skips it.
pub struct WaitNotifications {
    inner: WaitState,
}

impl WaitNotifications {
    fn ready(result: CableResult<Vec<Notification>>) -> Self {
        Self {
            inner: WaitState::Ready(Some(result)),
        }
    }

    /// True if the wait completed without blocking.
    pub fn is_ready(&self) -> bool {
        matches!(self.inner, WaitState::Ready(_))
    }
}

impl Future for WaitNotifications {
    type Output = CableResult<Vec<Notification>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            WaitState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(CableError::NotificationsCancelled)))
            }
            WaitState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|r| r.map_err(|_| CableError::NotificationsCancelled)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(index: u32) -> NotificationData {
        NotificationData::new(
            EndpointIndex::new(index).unwrap(),
            Generation::default().activated(),
        )
    }

    #[test]
    fn test_data_packing() {
        let d = data(5);
        assert_eq!(d.to_raw(), (5u64 << 32) | 3);
        assert_eq!(NotificationData::from_raw(d.to_raw()).unwrap(), d);
        assert!(NotificationData::from_raw(1000u64 << 32).is_err());
    }

    #[tokio::test]
    async fn test_post_then_wait_drains_immediately() {
        let queue = NotificationQueue::new();
        let handle = SignalHandle::new().unwrap();
        queue.post(&handle, data(1)).unwrap();
        queue.post(&handle, data(2)).unwrap();
        queue.post(&handle, data(3)).unwrap();

        let wait = queue.wait(2);
        assert!(wait.is_ready());
        let got = wait.await.unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].data, data(1));
        assert_eq!(got[1].data, data(2));
        assert_eq!(queue.pending_items(), 1);
    }

    #[tokio::test]
    async fn test_waiters_matched_fifo() {
        let queue = NotificationQueue::new();
        let handle = SignalHandle::new().unwrap();

        let w1 = queue.wait(4);
        let w2 = queue.wait(4);
        assert_eq!(queue.pending_waiters(), 2);

        queue.post(&handle, data(1)).unwrap();
        queue.post(&handle, data(2)).unwrap();

        let r2 = w2.await.unwrap();
        let r1 = w1.await.unwrap();
        assert_eq!(r1.len(), 1);
        assert_eq!(r1[0].data, data(1));
        assert_eq!(r2[0].data, data(2));
        assert_eq!(queue.pending_items(), 0);
    }

    #[tokio::test]
    async fn test_parked_waiter_gets_one_item_and_rest_queue() {
        let queue = NotificationQueue::new();
        let handle = SignalHandle::new().unwrap();

        let parked = queue.wait(8);
        assert!(!parked.is_ready());
        queue.post(&handle, data(1)).unwrap();
        queue.post(&handle, data(2)).unwrap();
        queue.post(&handle, data(3)).unwrap();

        let got = parked.await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data, data(1));
        assert_eq!(queue.pending_waiters(), 0);
        assert_eq!(queue.pending_items(), 2);

        let rest = queue.wait(8).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].data, data(2));
        assert_eq!(rest[1].data, data(3));
    }

    #[tokio::test]
    async fn test_items_matched_fifo() {
        let queue = NotificationQueue::new();
        let handle = SignalHandle::new().unwrap();
        queue.post(&handle, data(1)).unwrap();
        queue.post(&handle, data(2)).unwrap();

        let r1 = queue.wait(1).await.unwrap();
        let r2 = queue.wait(1).await.unwrap();
        assert_eq!(r1[0].data, data(1));
        assert_eq!(r2[0].data, data(2));
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let queue = NotificationQueue::new();
        let handle = SignalHandle::new().unwrap();

        let abandoned = queue.wait(1);
        let live = queue.wait(1);
        drop(abandoned);

        queue.post(&handle, data(7)).unwrap();
        assert_eq!(live.await.unwrap()[0].data, data(7));
        assert_eq!(queue.pending_items(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let queue = NotificationQueue::new();
        let handle = SignalHandle::new().unwrap();
        let w = queue.wait(1);

        assert_eq!(queue.cancel_all(), (1, 0));
        assert!(matches!(w.await, Err(CableError::NotificationsCancelled)));
        assert!(queue.is_closed());
        assert!(queue.post(&handle, data(1)).is_err());
        assert!(matches!(
            queue.wait(1).await,
            Err(CableError::NotificationsCancelled)
        ));
    }

    #[tokio::test]
    async fn test_delivered_handle_is_independent() {
        let queue = NotificationQueue::new();
        let handle = SignalHandle::new().unwrap();
        queue.post(&handle, data(0)).unwrap();

        let mut got = queue.wait(1).await.unwrap();
        let delivered = got.pop().unwrap();
        delivered.handle.signal();
        drop(delivered);

        // The poster's handle still works and saw the signal.
        assert_eq!(handle.try_consume().unwrap(), 1);
    }
}
