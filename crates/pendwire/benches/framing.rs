// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Bench code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Bench parameters

//! Framing and matching benchmarks.
//!
//! Measures the per-frame costs on the hot paths:
//! - frame encoding (sender)
//! - frame validation (listener)
//! - stream deframing through `FrameReader`
//! - in-flight lookup by stamp (response matcher)

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pendwire::frame::{encode_frame, parse_frame, FrameReader};
use pendwire::registry::InFlightRegistry;
use pendwire::{Message, Request, StampedMessage};
use std::io::Cursor;

fn bench_encode_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_frame");
    for size in [16usize, 256, 4096, 65535] {
        let payload = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| black_box(encode_frame(black_box(payload)).unwrap()))
        });
    }
    group.finish();
}

fn bench_parse_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_frame");
    for size in [16usize, 4096] {
        let frame = encode_frame(&vec![0x5Au8; size]).unwrap();
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| black_box(parse_frame(black_box(frame))))
        });
    }
    group.finish();
}

fn bench_frame_reader_stream(c: &mut Criterion) {
    let mut stream = Vec::new();
    for i in 0..1000u32 {
        let body = StampedMessage::with_stamp(u64::from(i), vec![i as u8; 64]).encode();
        stream.extend(encode_frame(&body).unwrap());
    }

    let mut group = c.benchmark_group("frame_reader");
    group.throughput(Throughput::Elements(1000));
    group.bench_function("stamped_64b_x1000", |b| {
        b.iter(|| {
            let mut cursor = Cursor::new(black_box(&stream));
            let mut reader = FrameReader::new();
            let mut count = 0;
            while let Ok(Some(frame)) = reader.read_frame(&mut cursor) {
                black_box(frame);
                count += 1;
            }
            count
        })
    });
    group.finish();
}

fn bench_take_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("take_match");
    for depth in [1u64, 16, 256] {
        let reply = StampedMessage::with_stamp(depth - 1, b"r".to_vec()).encode();
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter_batched(
                || {
                    let registry = InFlightRegistry::new();
                    for stamp in 0..depth {
                        registry.insert(
                            Request::builder(StampedMessage::with_stamp(stamp, b"q".to_vec()))
                                .build(),
                        );
                    }
                    registry
                },
                |registry| black_box(registry.take_match(&reply)),
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_encode_frame,
    bench_parse_frame,
    bench_frame_reader_stream,
    bench_take_match
);
criterion_main!(benches);
