//! Benchmarks for route compilation and log decoding
//!
//! Run with: cargo bench

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sensorgraph::datalog::merge::MergeQueue;
use sensorgraph::datalog::LogRecord;
use sensorgraph::pipeline::{BuildContext, ComparisonOp, GraphState, MathOp};
use sensorgraph::{DeviceInfo, ProducerCatalog};

fn bench_route_build(c: &mut Criterion) {
    let catalog = ProducerCatalog::standard();
    let acceleration = catalog.get("acceleration").cloned().expect("standard producer");
    let state = GraphState::new();

    let mut group = c.benchmark_group("route_build");
    for stages in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::new("low_pass_chain", stages), &stages, |b, &n| {
            b.iter(|| {
                let mut ctx = BuildContext::new(&state, DeviceInfo::default());
                let mut builder = ctx.builder(acceleration.clone()).split().and_then(|r| r.index(0));
                for _ in 0..n {
                    builder = builder.and_then(|r| r.low_pass(4));
                }
                builder.and_then(|r| r.log()).expect("valid route");
                black_box(ctx.finish())
            })
        });
    }

    group.bench_function("filter_count_map", |b| {
        b.iter(|| {
            let mut ctx = BuildContext::new(&state, DeviceInfo::default());
            ctx.builder(acceleration.clone())
                .multicast()
                .and_then(|r| r.to())
                .and_then(|r| r.rss())
                .and_then(|r| r.filter(ComparisonOp::Gt, &[black_box(1.5)]))
                .and_then(|r| r.count())
                .and_then(|r| r.stream())
                .and_then(|r| r.to())
                .and_then(|r| r.low_pass(8))
                .and_then(|r| r.map(MathOp::Multiply, 0.5))
                .and_then(|r| r.log())
                .and_then(|r| r.end())
                .expect("valid route");
            black_box(ctx.finish())
        })
    });
    group.finish();
}

fn bench_config_encode(c: &mut Criterion) {
    let catalog = ProducerCatalog::standard();
    let temperature = catalog.get("temperature").cloned().expect("standard producer");
    let mut ctx = BuildContext::new(&GraphState::new(), DeviceInfo::default());
    ctx.builder(temperature)
        .low_pass(4)
        .and_then(|r| r.delay(2))
        .and_then(|r| r.find_threshold(sensorgraph::pipeline::ThresholdMode::Absolute, 30.0, 0.5))
        .expect("valid route");
    let route = ctx.finish();

    c.bench_function("config_encode", |b| {
        b.iter(|| {
            for stage in &route.stages {
                black_box(stage.config.encode());
            }
        })
    });
}

fn bench_log_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_records");
    for entries in [64usize, 1024] {
        let payload: Vec<u8> = (0..entries)
            .flat_map(|i| {
                let mut record = vec![(i % 3) as u8];
                record.extend_from_slice(&(i as u32).to_le_bytes());
                record.extend_from_slice(&[1, 2, 3, 4]);
                record
            })
            .collect();
        group.throughput(Throughput::Elements(entries as u64));
        group.bench_with_input(BenchmarkId::new("parse_and_merge", entries), &payload, |b, payload| {
            b.iter(|| {
                let mut queue = MergeQueue::new(vec![0, 1, 2]);
                let now = Utc::now();
                let mut merged = 0;
                for record in LogRecord::parse_all(payload).expect("whole records") {
                    if queue.push(record.log_id, now, record.data).is_some() {
                        merged += 1;
                    }
                }
                black_box(merged)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_route_build, bench_config_encode, bench_log_records);
criterion_main!(benches);
