// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Real-time side: interleaving and the per-period tick.

pub mod interleave;
mod tick;

pub use interleave::{demux, mux};
pub use tick::{NoopObserver, SkipReason, TickEngine, TickObserver, TickSummary};
