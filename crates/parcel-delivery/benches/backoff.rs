//! Micro-benchmarks for the dealer's timing computations.

use std::{hint::black_box, time::Duration};

use criterion::{criterion_group, criterion_main, Criterion};

use parcel_delivery::Dealer;

fn backoff_benchmarks(c: &mut Criterion) {
    c.bench_function("backoff_schedule_20_attempts", |b| {
        b.iter(|| {
            let mut total = Duration::ZERO;
            for attempt in 1..=20u32 {
                total += Dealer::backoff_delay(
                    black_box(attempt),
                    Duration::from_secs(1),
                    Duration::from_secs(512),
                );
            }
            total
        });
    });

    c.bench_function("max_occupancy", |b| {
        b.iter(|| Dealer::max_occupancy(black_box(Duration::from_secs(30)), black_box(10)));
    });
}

criterion_group!(benches, backoff_benchmarks);
criterion_main!(benches);
