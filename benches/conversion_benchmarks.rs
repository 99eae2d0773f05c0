//! Performance benchmarks for CrabRecord frame ingestion
//!
//! Run with: cargo bench
//!
//! Covers format classification, every conversion path into the encoder's
//! 4:2:0 layout, and a full submit-and-drain cycle through openh264.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use crabrecord::recording::codec::{CodecParameters, EncoderSample, SampleSink};
use crabrecord::recording::{
    classify, ColorLayout, EncoderSession, EncoderSettings, FormatTag, FrameConverter,
    FrameGeometry, OpenH264Backend,
};
use crabrecord::testing::{
    synthetic_i422_frame, synthetic_jpeg_frame, synthetic_nv12_frame, synthetic_yuyv_frame,
};
use crabrecord::RecorderError;
use std::sync::Arc;
use std::time::Duration;

const RESOLUTIONS: [(u32, u32, &str); 3] = [
    (640, 480, "480p"),
    (1280, 720, "720p"),
    (1920, 1080, "1080p"),
];

/// Sink that only counts what it is handed
#[derive(Default)]
struct CountingSink {
    samples: u64,
}

impl SampleSink for CountingSink {
    fn on_format(&mut self, _params: &CodecParameters) -> Result<(), RecorderError> {
        Ok(())
    }

    fn write_sample(&mut self, sample: &EncoderSample<'_>) -> Result<(), RecorderError> {
        black_box(sample.payload());
        self.samples += 1;
        Ok(())
    }
}

fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("Format Classification");

    for (width, height, name) in RESOLUTIONS {
        let geometry = FrameGeometry::new(width, height);
        let yuyv = synthetic_yuyv_frame(0, width, height);
        let i422 = synthetic_i422_frame(0, width, height);

        group.bench_with_input(BenchmarkId::new("packed_422", name), &yuyv, |b, data| {
            b.iter(|| classify(black_box(data), geometry))
        });
        group.bench_with_input(BenchmarkId::new("planar_422", name), &i422, |b, data| {
            b.iter(|| classify(black_box(data), geometry))
        });
    }

    group.finish();
}

fn bench_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("Frame Conversion");
    group.measurement_time(Duration::from_secs(5));

    for (width, height, name) in RESOLUTIONS {
        let geometry = FrameGeometry::new(width, height);
        let inputs = [
            ("yuyv", FormatTag::Packed422, synthetic_yuyv_frame(0, width, height)),
            ("i422", FormatTag::Planar422, synthetic_i422_frame(0, width, height)),
            ("nv12", FormatTag::SemiPlanar420, synthetic_nv12_frame(0, width, height)),
        ];

        group.throughput(Throughput::Elements(geometry.pixels() as u64));
        for layout in [ColorLayout::SemiPlanar, ColorLayout::Planar] {
            for (label, tag, data) in &inputs {
                let id = format!("{}_to_{}", label, layout);
                group.bench_with_input(BenchmarkId::new(id, name), data, |b, data| {
                    let mut converter = FrameConverter::new(geometry, layout);
                    b.iter(|| {
                        let out = converter.convert(black_box(data), *tag).expect("conversion");
                        black_box(out.len())
                    });
                });
            }
        }

        // Per-frame allocation instead of the scratch arena
        group.bench_with_input(
            BenchmarkId::new("yuyv_without_scratch", name),
            &inputs[0].2,
            |b, data| {
                let mut converter = FrameConverter::without_scratch(geometry, ColorLayout::SemiPlanar);
                b.iter(|| {
                    let out = converter
                        .convert(black_box(data), FormatTag::Packed422)
                        .expect("conversion");
                    black_box(out.len())
                });
            },
        );
    }

    group.finish();
}

fn bench_jpeg_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("MJPEG Conversion");
    group.sample_size(20);

    for (width, height, name) in &RESOLUTIONS[..2] {
        let geometry = FrameGeometry::new(*width, *height);
        let jpeg = synthetic_jpeg_frame(0, *width, *height);

        group.throughput(Throughput::Bytes(jpeg.len() as u64));
        group.bench_with_input(BenchmarkId::new("decode_convert", name), &jpeg, |b, data| {
            let mut converter = FrameConverter::new(geometry, ColorLayout::SemiPlanar);
            b.iter(|| {
                let out = converter
                    .convert(black_box(data), FormatTag::Compressed)
                    .expect("decode");
                black_box(out.len())
            });
        });
    }

    group.finish();
}

fn bench_submit_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("Encoder Session");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    for (width, height, name) in &RESOLUTIONS[..2] {
        let frame = synthetic_nv12_frame(0, *width, *height);
        group.throughput(Throughput::Elements((*width * *height) as u64));
        group.bench_with_input(BenchmarkId::new("submit_drain", name), &frame, |b, frame| {
            let mut session = EncoderSession::new(Arc::new(OpenH264Backend::new()));
            session
                .configure(&EncoderSettings {
                    width: *width,
                    height: *height,
                    bitrate: 2_000_000,
                    frame_rate: 30,
                    key_frame_interval_secs: 2,
                    layout: Some(ColorLayout::SemiPlanar),
                })
                .expect("configure");
            session.open().expect("open");
            let mut sink = CountingSink::default();

            b.iter(|| {
                let pts = session.presentation_time_us();
                session.submit_frame(black_box(frame), pts).expect("submit");
                session.drain(false, &mut sink).expect("drain")
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_classification,
    bench_conversion,
    bench_jpeg_decode,
    bench_submit_and_drain,
);
criterion_main!(benches);
