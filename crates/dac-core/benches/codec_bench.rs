//! Criterion benchmarks for the DAC wire codec.
//!
//! The streaming hot path encodes one `write` frame per round trip, so the
//! interesting numbers are batch encoding at realistic window sizes and the
//! response decode that follows each write.
//!
//! Run with:
//! ```bash
//! cargo bench --package dac-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dac_core::protocol::codec::{
    decode_broadcast, decode_response, encode_broadcast, encode_command, encode_response,
};
use dac_core::protocol::messages::{
    Command, DeviceIdentity, MacAddress, PlaybackState, Point, PointLayout, Response,
    StatusSnapshot, ACK,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_points(n: usize) -> Vec<Point> {
    (0..n)
        .map(|k| {
            let v = (k as i32 * 37 % 65_536 - 32_768) as i16;
            Point::new(v, v.wrapping_neg(), 65_535, (k * 11) as u16, 0)
        })
        .collect()
}

fn make_status() -> StatusSnapshot {
    StatusSnapshot {
        protocol_version: 1,
        playback_state: PlaybackState::Playing,
        buffer_fullness: 900,
        point_rate: 30_000,
        point_count: 123_456,
        ..StatusSnapshot::default()
    }
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_encode_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_write");

    for n in [1usize, 100, 1799] {
        let cmd = Command::Write(make_points(n));
        for layout in [PointLayout::Standard, PointLayout::Legacy] {
            let id = format!("{n}/{layout:?}");
            group.bench_with_input(BenchmarkId::new("points", id), &cmd, |b, cmd| {
                b.iter(|| encode_command(black_box(cmd), black_box(layout)).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let response = encode_response(&Response {
        ack: ACK,
        command: b'd',
        status: make_status(),
    });
    group.bench_function("response", |b| {
        b.iter(|| decode_response(black_box(&response)).unwrap())
    });

    let identity = DeviceIdentity {
        mac: MacAddress([0, 4, 0xA3, 1, 2, 3]),
        hw_revision: 1,
        sw_revision: 2,
        buffer_capacity: 1799,
        max_point_rate: 100_000,
    };
    let broadcast = encode_broadcast(&identity, &make_status());
    group.bench_function("broadcast", |b| {
        b.iter(|| decode_broadcast(black_box(&broadcast)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_encode_write, bench_decode);
criterion_main!(benches);
