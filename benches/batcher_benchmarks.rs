//! Batcher throughput under single and concurrent producers.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::time::Duration;
use victoria_metrics_client::buffer::{BatchConfig, Batcher};
use victoria_metrics_client::{Labels, Sample};

fn sample(id: usize) -> Sample {
    Sample::new("bench_total", Labels::new(), id as i64, id as f64).unwrap()
}

fn batcher(max_batch_samples: usize) -> (Batcher, victoria_metrics_client::buffer::BatchReceiver) {
    Batcher::new(BatchConfig {
        max_batch_samples,
        max_batch_interval: Duration::from_secs(3600),
        max_in_flight_batches: usize::MAX / 2,
    })
}

fn bench_single_producer(c: &mut Criterion) {
    let mut group = c.benchmark_group("batcher_single_producer");
    let samples: Vec<Sample> = (0..10_000).map(sample).collect();
    group.throughput(Throughput::Elements(samples.len() as u64));

    for batch_size in [100, 1_000, 10_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    let (batcher, mut receiver) = batcher(batch_size);
                    for s in &samples {
                        batcher.add(black_box(s.clone())).unwrap();
                    }
                    let mut sealed = 0;
                    while receiver.try_next_batch().is_some() {
                        sealed += 1;
                    }
                    black_box(sealed)
                });
            },
        );
    }

    group.finish();
}

fn bench_concurrent_producers(c: &mut Criterion) {
    let mut group = c.benchmark_group("batcher_concurrent_producers");
    const PER_PRODUCER: usize = 2_500;

    for producers in [2, 4, 8] {
        group.throughput(Throughput::Elements((producers * PER_PRODUCER) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(producers),
            &producers,
            |b, &producers| {
                b.iter(|| {
                    let (batcher, mut receiver) = batcher(1_000);
                    let batcher = Arc::new(batcher);
                    std::thread::scope(|scope| {
                        for p in 0..producers {
                            let batcher = Arc::clone(&batcher);
                            scope.spawn(move || {
                                for i in 0..PER_PRODUCER {
                                    batcher.add(sample(p * PER_PRODUCER + i)).unwrap();
                                }
                            });
                        }
                    });
                    batcher.close();
                    let mut sealed = 0;
                    while receiver.try_next_batch().is_some() {
                        sealed += 1;
                    }
                    black_box(sealed)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_single_producer, bench_concurrent_producers);
criterion_main!(benches);
