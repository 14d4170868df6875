//! Criterion benchmarks for the LineHub framing layer.
//!
//! Measures encode latency and `FrameBuffer` reassembly throughput for the
//! shapes the receive loop actually sees: one frame per read, many frames
//! coalesced into one read, and a frame fragmented across many reads.
//!
//! Run with:
//! ```bash
//! cargo bench --package linehub-core --bench framing_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use linehub_core::{encode, FrameBuffer};

fn bench_encode(c: &mut Criterion) {
    let short = "hello";
    let long = "x".repeat(1024);

    c.bench_function("encode_short_payload", |b| {
        b.iter(|| encode(black_box(short)))
    });
    c.bench_function("encode_1k_payload", |b| {
        b.iter(|| encode(black_box(&long)))
    });
}

fn bench_reassembly(c: &mut Criterion) {
    // 64 complete frames delivered by a single read.
    let coalesced: Vec<u8> = (0..64)
        .flat_map(|i| encode(&format!("message number {i}")))
        .collect();

    c.bench_function("pop_64_coalesced_frames", |b| {
        b.iter(|| {
            let mut buf = FrameBuffer::new();
            buf.extend(black_box(&coalesced));
            let mut frames = 0;
            while buf.pop_frame().is_some() {
                frames += 1;
            }
            assert_eq!(frames, 64);
        })
    });

    // One 4 KiB frame arriving 16 bytes at a time.
    let frame = encode(&"y".repeat(4096));
    let fragments: Vec<&[u8]> = frame.chunks(16).collect();

    c.bench_function("reassemble_fragmented_4k_frame", |b| {
        b.iter(|| {
            let mut buf = FrameBuffer::new();
            let mut out = None;
            for fragment in &fragments {
                buf.extend(black_box(fragment));
                if let Some(frame) = buf.pop_frame() {
                    out = Some(frame);
                }
            }
            assert!(out.is_some());
        })
    });
}

criterion_group!(benches, bench_encode, bench_reassembly);
criterion_main!(benches);
