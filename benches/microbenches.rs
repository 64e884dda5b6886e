//! Criterion microbenches for dataset decoding.
//!
//! Run with: `cargo bench`
//!
//! These benchmarks measure the performance of:
//! - IDX tensor parsing (from_idx_slice)
//! - Pickled CIFAR batch decoding (from_pickle_slice + decode_batch)
//! - Whitespace matrix parsing (whitespace_matrix_from_reader)
//! - Orientation correction over an image stack

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use std::path::Path;

use ml_datasets::datasets::cifar::decode_batch;
use ml_datasets::formats::idx::{from_idx_slice, to_idx_bytes, IdxArray};
use ml_datasets::formats::pickle::from_pickle_slice;
use ml_datasets::formats::table::whitespace_matrix_from_reader;
use ml_datasets::output::correct_orientation;
use ndarray::{Array3, ArrayD, IxDyn};

const IMAGE_COUNT: usize = 256;
const CIFAR_ROW: usize = 3 * 32 * 32;

/// 256 MNIST-sized images, encoded once outside the timed region.
fn idx_fixture() -> Vec<u8> {
    let data: Vec<u8> = (0..IMAGE_COUNT * 28 * 28).map(|i| (i % 251) as u8).collect();
    let array = ArrayD::from_shape_vec(IxDyn(&[IMAGE_COUNT, 28, 28]), data)
        .expect("fixture shape");
    to_idx_bytes(&IdxArray::U8(array))
}

/// A protocol-3 pickle of `{"data": [row, ...], "labels": [..]}`.
fn pickle_fixture(rows: usize) -> Vec<u8> {
    let mut out = vec![0x80, 0x03, b'}', b'('];
    let text = |out: &mut Vec<u8>, s: &str| {
        out.push(b'X');
        out.extend_from_slice(&(s.len() as u32).to_le_bytes());
        out.extend_from_slice(s.as_bytes());
    };

    text(&mut out, "data");
    out.extend_from_slice(b"](");
    for row in 0..rows {
        out.push(b'B');
        out.extend_from_slice(&(CIFAR_ROW as u32).to_le_bytes());
        out.extend((0..CIFAR_ROW).map(|i| ((row + i) % 256) as u8));
    }
    out.push(b'e');

    text(&mut out, "labels");
    out.extend_from_slice(b"](");
    for row in 0..rows {
        out.extend_from_slice(&[b'K', (row % 10) as u8]);
    }
    out.extend_from_slice(b"eu.");
    out
}

fn whitespace_fixture() -> String {
    let mut text = String::new();
    for row in 0..200 {
        text.push_str(&format!("{} ", row % 10));
        for col in 0..256 {
            text.push_str(&format!("{:.3} ", ((row * col) % 200) as f64 / 100.0 - 1.0));
        }
        text.push('\n');
    }
    text
}

/// Benchmark IDX parsing from a byte slice.
fn bench_idx_parse(c: &mut Criterion) {
    let bytes = idx_fixture();
    let mut group = c.benchmark_group("idx_parse");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("from_idx_slice", |b| {
        b.iter(|| {
            let array = from_idx_slice(black_box(&bytes)).unwrap();
            black_box(array)
        })
    });

    group.finish();
}

/// Benchmark unpickling plus batch decoding.
fn bench_cifar_batch(c: &mut Criterion) {
    let bytes = pickle_fixture(64);
    let mut group = c.benchmark_group("cifar_batch");
    group.throughput(Throughput::Elements(64));

    group.bench_function("from_pickle_slice", |b| {
        b.iter(|| {
            let value = from_pickle_slice(black_box(&bytes)).unwrap();
            black_box(value)
        })
    });

    let value = from_pickle_slice(&bytes).expect("fixture decodes");
    group.bench_function("decode_batch", |b| {
        b.iter(|| {
            let batch = decode_batch(black_box(&value), "labels", Path::new("bench")).unwrap();
            black_box(batch)
        })
    });

    group.finish();
}

/// Benchmark whitespace-separated matrix parsing.
fn bench_whitespace_matrix(c: &mut Criterion) {
    let text = whitespace_fixture();
    let mut group = c.benchmark_group("table_parse");
    group.throughput(Throughput::Bytes(text.len() as u64));

    group.bench_function("whitespace_matrix_from_reader", |b| {
        b.iter(|| {
            let matrix =
                whitespace_matrix_from_reader(black_box(text.as_bytes()), Path::new("bench"))
                    .unwrap();
            black_box(matrix)
        })
    });

    group.finish();
}

/// Benchmark orientation correction on a stack of images.
fn bench_orientation(c: &mut Criterion) {
    let images = Array3::from_shape_fn((IMAGE_COUNT, 28, 28), |(i, r, col)| {
        ((i + r * 28 + col) % 256) as u8
    });
    let mut group = c.benchmark_group("orientation");
    group.throughput(Throughput::Elements(IMAGE_COUNT as u64));

    group.bench_function("correct_orientation", |b| {
        b.iter(|| {
            let corrected = correct_orientation(black_box(&images));
            black_box(corrected)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_idx_parse,
    bench_cifar_batch,
    bench_whitespace_matrix,
    bench_orientation
);
criterion_main!(benches);
