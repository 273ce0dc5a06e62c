//! Benchmarks for the change-notification hot paths.
//!
//! Run with: cargo bench -p propnotify

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use propnotify::{NotifyingObject, PropertyChange, SourceExt, Subject, dedup};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const NAMES: [&str; 8] = [
    "Title", "Count", "Total", "Label", "Enabled", "Selected", "Width", "Height",
];

/// Deterministic pseudo-random name sequence (simple LCG).
fn name_sequence(len: u64) -> Vec<&'static str> {
    (0..len)
        .map(|i| NAMES[(i.wrapping_mul(6364136223846793005).wrapping_add(1) >> 33) as usize % NAMES.len()])
        .collect()
}

fn counting_object() -> (NotifyingObject, Arc<AtomicU64>) {
    let obj = NotifyingObject::new();
    let hits = Arc::new(AtomicU64::new(0));
    let h = Arc::clone(&hits);
    obj.subscribe_changed(move |_| {
        h.fetch_add(1, Ordering::Relaxed);
        Ok(())
    })
    .detach();
    (obj, hits)
}

// ---------------------------------------------------------------------------
// 1. Raise cost by observation level
// ---------------------------------------------------------------------------

fn bench_raise(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify/raise");
    let names = name_sequence(1_000);
    group.throughput(Throughput::Elements(names.len() as u64));

    group.bench_function("handlers_only", |b| {
        let (obj, hits) = counting_object();
        b.iter(|| {
            for name in &names {
                obj.raise_property_changed(name).unwrap();
            }
            black_box(hits.load(Ordering::Relaxed))
        })
    });

    group.bench_function("with_stream", |b| {
        let (obj, hits) = counting_object();
        let seen = Arc::new(AtomicU64::new(0));
        let s = Arc::clone(&seen);
        let _sub = obj.changed().subscribe_fn(move |_: Arc<PropertyChange>| {
            s.fetch_add(1, Ordering::Relaxed);
        });
        b.iter(|| {
            for name in &names {
                obj.raise_property_changed(name).unwrap();
            }
            black_box(hits.load(Ordering::Relaxed) + seen.load(Ordering::Relaxed))
        })
    });

    group.bench_function("delayed_stream", |b| {
        let (obj, _hits) = counting_object();
        let seen = Arc::new(AtomicU64::new(0));
        let s = Arc::clone(&seen);
        let _sub = obj.changed().subscribe_fn(move |_: Arc<PropertyChange>| {
            s.fetch_add(1, Ordering::Relaxed);
        });
        b.iter(|| {
            let _delay = obj.delay_change_notifications();
            for name in &names {
                obj.raise_property_changed(name).unwrap();
            }
        });
        black_box(seen.load(Ordering::Relaxed));
    });

    group.bench_function("set_if_changed_equal", |b| {
        let (obj, _hits) = counting_object();
        let mut field = 42u64;
        b.iter(|| {
            for _ in 0..names.len() {
                black_box(obj.raise_and_set_if_changed(&mut field, 42, "Field").unwrap());
            }
        })
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// 2. Batch deduplication
// ---------------------------------------------------------------------------

fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify/dedup");
    let id = NotifyingObject::new().id();
    let records: Vec<Arc<PropertyChange>> = NAMES
        .iter()
        .map(|n| Arc::new(PropertyChange::new(id, *n)))
        .collect();

    for count in [8u64, 128, 4_096] {
        group.throughput(Throughput::Elements(count));
        let batch: Vec<Arc<PropertyChange>> = name_sequence(count)
            .into_iter()
            .map(|name| {
                let idx = NAMES.iter().position(|n| *n == name).unwrap_or(0);
                Arc::clone(&records[idx])
            })
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(count), &batch, |b, batch| {
            b.iter(|| black_box(dedup(batch.clone())))
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 3. Derived property delivery
// ---------------------------------------------------------------------------

fn bench_derived(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify/derived");
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("deliver", |b| {
        let (obj, _hits) = counting_object();
        let upstream = Subject::<u64>::new();
        let prop = obj.derive(upstream.clone(), "Value").build().unwrap();
        let mut next = 0u64;
        b.iter(|| {
            for _ in 0..1_000 {
                next += 1;
                upstream.next(next);
            }
            black_box(prop.value())
        })
    });

    group.bench_function("read", |b| {
        let obj = NotifyingObject::new();
        let prop = obj
            .derive(Subject::<u64>::new(), "Value")
            .initial_value(7)
            .build()
            .unwrap();
        b.iter(|| {
            let mut sum = 0u64;
            for _ in 0..1_000 {
                sum = sum.wrapping_add(prop.value());
            }
            black_box(sum)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_raise, bench_dedup, bench_derived);
criterion_main!(benches);
