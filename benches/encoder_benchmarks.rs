//! Wire encoding and compression benchmarks.
//!
//! Compares the three wire formats and the effect of compression on payload size.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use victoria_metrics_client::buffer::{Batch, FlushTrigger};
use victoria_metrics_client::sender::{Compression, LineEncoder, WireFormat};
use victoria_metrics_client::{Labels, Sample};

fn create_sample(id: usize) -> Sample {
    let labels = Labels::from_pairs([
        ("instance", format!("node-{}", id % 16)),
        ("job", "benchmark".to_string()),
        ("path", format!("/api/v1/items/{}", id % 64)),
    ])
    .unwrap();
    Sample::new(
        "http_request_duration_seconds",
        labels,
        1_700_000_000_000 + id as i64,
        id as f64 * 0.001,
    )
    .unwrap()
}

fn create_batch(size: usize) -> Batch {
    Batch::new((0..size).map(create_sample).collect(), FlushTrigger::SizeThreshold)
}

const FORMATS: [WireFormat; 3] = [
    WireFormat::PrometheusText,
    WireFormat::InfluxLine,
    WireFormat::PrometheusRemoteWrite,
];

fn bench_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("encoding");

    for batch_size in [100, 1_000, 10_000] {
        let batch = create_batch(batch_size);
        group.throughput(Throughput::Elements(batch_size as u64));

        for format in FORMATS {
            let encoder = LineEncoder::new(format);
            group.bench_with_input(
                BenchmarkId::new(format!("{format:?}"), batch_size),
                &batch,
                |b, batch| b.iter(|| encoder.encode(black_box(batch)).unwrap()),
            );
        }
    }

    group.finish();
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");
    let batch = create_batch(10_000);

    for format in FORMATS {
        let payload = LineEncoder::new(format).encode(&batch).unwrap();
        group.throughput(Throughput::Bytes(payload.len() as u64));

        for compression in [Compression::Gzip, Compression::Snappy] {
            group.bench_with_input(
                BenchmarkId::new(format!("{compression:?}"), format!("{format:?}")),
                &payload,
                |b, payload| b.iter(|| compression.apply(black_box(payload.clone())).unwrap()),
            );
        }
    }

    group.finish();
}

fn print_payload_sizes(_c: &mut Criterion) {
    let batch = create_batch(10_000);
    for format in FORMATS {
        let payload = LineEncoder::new(format).encode(&batch).unwrap();
        let gzip = Compression::Gzip.apply(payload.clone()).unwrap();
        let snappy = Compression::Snappy.apply(payload.clone()).unwrap();
        println!(
            "{format:?}: raw={} gzip={} snappy={}",
            payload.len(),
            gzip.len(),
            snappy.len()
        );
    }
}

criterion_group!(benches, bench_encoding, bench_compression, print_payload_sizes);
criterion_main!(benches);
