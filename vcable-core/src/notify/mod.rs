// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Cross-process notification delivery.

mod queue;
mod signal;

pub use queue::{Notification, NotificationData, NotificationQueue, WaitNotifications, MAX_BATCH};
pub use signal::{AsyncSignal, SignalHandle};
