//! Benchmarks for the sample path: buffer appends, window projection and
//! conversion to plot points
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mcu_link::acquisition::{project, to_plot_points, RingBuffer, WindowSpec};
use mcu_link::types::VarType;
use std::time::{Duration, Instant};

/// A full buffer with samples spaced `step` apart, ending at the returned instant
fn filled_buffer(capacity: usize, step: Duration) -> (RingBuffer, Instant) {
    let start = Instant::now();
    let mut buffer = RingBuffer::new(capacity);
    for i in 0..capacity {
        buffer.push_at(start + step * i as u32, (i as f64 * 0.01).sin());
    }
    (buffer, start + step * capacity as u32)
}

fn bench_ring_buffer_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer_push");

    for capacity in [1000, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("push_when_full", capacity),
            capacity,
            |b, &capacity| {
                let (mut buffer, _) = filled_buffer(capacity, Duration::from_millis(1));
                let mut value = 0.0;
                b.iter(|| {
                    value += 1.0;
                    buffer.push(black_box(value));
                });
            },
        );
    }

    group.finish();
}

fn bench_window_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_projection");
    let (buffer, now) = filled_buffer(10_000, Duration::from_millis(1));

    for seconds in [0.5, 2.0, 10.0].iter() {
        group.bench_with_input(BenchmarkId::new("time_span", seconds), seconds, |b, &seconds| {
            let spec = WindowSpec::TimeSpan { seconds };
            b.iter(|| black_box(project(&buffer, &spec, now)));
        });
    }

    for samples in [100, 1000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("count", samples), samples, |b, &samples| {
            let spec = WindowSpec::count(samples);
            b.iter(|| black_box(project(&buffer, &spec, now)));
        });
    }

    group.finish();
}

fn bench_plot_points(c: &mut Criterion) {
    let mut group = c.benchmark_group("plot_points");

    for size in [1000, 10_000].iter() {
        let (buffer, now) = filled_buffer(*size, Duration::from_millis(1));
        let samples = buffer.all();
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &samples, |b, samples| {
            b.iter(|| black_box(to_plot_points(samples, now)));
        });
    }

    group.finish();
}

fn bench_value_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_decoding");
    let cases = [
        (VarType::U8, vec![0x7Fu8]),
        (VarType::I16, (-1234i16).to_le_bytes().to_vec()),
        (VarType::U32, 0xDEAD_BEEFu32.to_le_bytes().to_vec()),
        (VarType::F32, 22.5f32.to_le_bytes().to_vec()),
    ];

    for (var_type, bytes) in cases.iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(var_type),
            bytes,
            |b, bytes| b.iter(|| black_box(var_type.decode(black_box(bytes)))),
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ring_buffer_push,
    bench_window_projection,
    bench_plot_points,
    bench_value_decoding,
);
criterion_main!(benches);
