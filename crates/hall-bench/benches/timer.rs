//! Timer view benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use studyhall_core::{TimerRecord, TimerView};

fn bench_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer");
    let record = TimerRecord::new("bench", 25, 5).with_paused(false);

    // One full focus period plus the flip into break.
    group.bench_function("focus_period", |b| {
        b.iter(|| {
            let mut view = TimerView::from_record(black_box(&record));
            let mut writes = 0u32;
            for _ in 0..1500 {
                if view.tick().is_some() {
                    writes += 1;
                }
            }
            writes
        })
    });

    group.bench_function("reconcile_paused", |b| {
        let paused = record.clone().with_paused(true).with_remaining(10);
        let mut view = TimerView::from_record(&record);
        b.iter(|| view.apply_read(black_box(&paused)))
    });

    group.finish();
}

criterion_group!(benches, bench_ticks);
criterion_main!(benches);
