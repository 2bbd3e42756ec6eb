//! Benchmarks for summary computation and the envelope codec.
//!
//! Run with: cargo bench -p prism-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use prism_core::envelope::{ComputeRequest, CorrelationId};
use prism_core::pipeline::{encode_image, ImageDecoder};

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }))
}

fn benchmark_summary_rgb(c: &mut Criterion) {
    let img = gradient(1920, 1080);

    c.bench_function("summary_rgb_1080p", |b| {
        b.iter(|| {
            let _ = prism_core::compute_summary(black_box(&img));
        })
    });
}

fn benchmark_summary_rgba(c: &mut Criterion) {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1024, 1024, Rgba([10, 20, 30, 128])));

    c.bench_function("summary_rgba_1mp", |b| {
        b.iter(|| {
            let _ = prism_core::compute_summary(black_box(&img));
        })
    });
}

fn benchmark_decode(c: &mut Criterion) {
    let bytes = encode_image(&gradient(640, 480), ImageFormat::Png).unwrap();
    let decoder = ImageDecoder::default();

    c.bench_function("decode_png_640x480", |b| {
        b.iter(|| {
            let _ = decoder.decode_sync(black_box(&bytes));
        })
    });
}

fn benchmark_envelope(c: &mut Criterion) {
    let bytes = encode_image(&gradient(640, 480), ImageFormat::Png).unwrap();
    let request = ComputeRequest::new(CorrelationId::new(), bytes);
    let encoded = request.encode();

    c.bench_function("request_encode", |b| {
        b.iter(|| black_box(&request).encode())
    });

    c.bench_function("request_decode", |b| {
        b.iter(|| ComputeRequest::decode(black_box(&encoded)))
    });
}

criterion_group!(
    benches,
    benchmark_summary_rgb,
    benchmark_summary_rgba,
    benchmark_decode,
    benchmark_envelope,
);
criterion_main!(benches);
