// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! vcable benchmark fixtures
//!
//! Builds a live session with running endpoints and a bound tick engine, so
//! the criterion benches measure the tick path and nothing else.

pub mod fixture;

pub use fixture::{FixtureError, TickFixture, TickFixtureSpec};
