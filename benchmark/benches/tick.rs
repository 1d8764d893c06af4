// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Full tick benchmarks.
//!
//! One tick walks every bound endpoint: register snapshot, transfer,
//! revalidation and position commit. These benches scale the endpoint count
//! and the per-tick window.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use vcable_benchmark::{TickFixture, TickFixtureSpec};
use vcable_core::Direction;

const ENDPOINT_COUNTS: &[usize] = &[1, 4, 16, 64];

const FRAME_SIZES: &[u32] = &[256, 1024, 4096];

fn bench_tick_endpoints(c: &mut Criterion) {
    for direction in [Direction::Playback, Direction::Recording] {
        let mut group = c.benchmark_group(format!("tick_{}", direction));
        group.measurement_time(Duration::from_secs(5));

        for &endpoints in ENDPOINT_COUNTS {
            let spec = TickFixtureSpec {
                endpoints,
                direction,
                ..Default::default()
            };
            group.throughput(Throughput::Bytes(endpoints as u64 * spec.frame_size as u64));

            group.bench_with_input(BenchmarkId::from_parameter(endpoints), &spec, |b, &spec| {
                let mut fixture = TickFixture::new(spec).expect("Failed to build fixture");
                b.iter(|| fixture.tick());
            });
        }

        group.finish();
    }
}

fn bench_tick_frame_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_frame_size");
    group.measurement_time(Duration::from_secs(5));

    for &frame_size in FRAME_SIZES {
        let spec = TickFixtureSpec {
            frame_size,
            ring_size: frame_size * 16,
            ..Default::default()
        };
        group.throughput(Throughput::Bytes(frame_size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(frame_size), &spec, |b, &spec| {
            let mut fixture = TickFixture::new(spec).expect("Failed to build fixture");
            b.iter(|| fixture.tick());
        });
    }

    group.finish();
}

/// Tick cost when every endpoint is stopped: snapshot and skip only.
fn bench_tick_inactive(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_inactive");

    for &endpoints in ENDPOINT_COUNTS {
        group.bench_with_input(
            BenchmarkId::from_parameter(endpoints),
            &endpoints,
            |b, &endpoints| {
                let mut fixture = TickFixture::new(TickFixtureSpec {
                    endpoints,
                    ..Default::default()
                })
                .expect("Failed to build fixture");
                for &index in &fixture.endpoints {
                    fixture.session.stop(index).expect("Failed to stop endpoint");
                }
                b.iter(|| fixture.tick());
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_tick_endpoints,
    bench_tick_frame_size,
    bench_tick_inactive
);
criterion_main!(benches);
