//! aurora benchmark suite.
//!
//! - Key deduplication with few and many repeats
//! - Index construction
//! - JD to unix-millisecond conversion

use arrow::array::Float64Array;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use aurora::index::{IndexBuilder, Resolution, mark_as_duplicate};
use aurora::time::{TimeFormat, to_unix_millis};

/// `size` keys drawn from `distinct` values, in a repeating pattern.
fn generate_keys(size: usize, distinct: usize) -> Vec<String> {
    (0..size).map(|i| format!("2024 AB{}", i % distinct)).collect()
}

fn generate_resolutions(size: usize) -> Vec<Resolution> {
    (0..size)
        .map(|i| Resolution {
            original: format!("2024 AB{i}"),
            name: (i % 3 != 0).then(|| format!("Ceres{}", i % 50)),
            number: (i % 2 == 0).then(|| (i % 100).to_string()),
        })
        .collect()
}

fn dedup_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("mark_as_duplicate");

    for size in [1_000, 10_000, 100_000] {
        group.throughput(Throughput::Elements(size as u64));

        let unique = generate_keys(size, size);
        group.bench_with_input(BenchmarkId::new("unique", size), &unique, |b, keys| {
            b.iter(|| mark_as_duplicate(keys));
        });

        let repeated = generate_keys(size, size / 100);
        group.bench_with_input(
            BenchmarkId::new("hundredfold_repeats", size),
            &repeated,
            |b, keys| {
                b.iter(|| mark_as_duplicate(keys));
            },
        );
    }

    group.finish();
}

fn index_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_build");

    for size in [1_000, 10_000] {
        let builder: IndexBuilder = generate_resolutions(size).into_iter().collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &builder, |b, builder| {
            b.iter(|| builder.build());
        });
    }

    group.finish();
}

fn time_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("to_unix_millis");

    for size in [1_000, 100_000] {
        let jd = Float64Array::from_iter_values((0..size).map(|i| 2_460_000.5 + i as f64 * 1e-4));
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("jd", size), &jd, |b, jd| {
            b.iter(|| to_unix_millis(jd, TimeFormat::Jd, false));
        });
    }

    group.finish();
}

criterion_group!(benches, dedup_benchmarks, index_benchmarks, time_benchmarks);
criterion_main!(benches);
