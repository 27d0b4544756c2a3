//! Frame codec and broadcast benchmark suite.
//!
//! Benchmarks the hot paths of the relay:
//! - Frame encode and decode, per length-field class
//! - Broadcast fan-out to rooms of 10, 100, 1000 members
//!
//! Run with: cargo bench --bench frame_codec
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::net::SocketAddr;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use roomcast::protocol::{encode_frame, encode_masked_frame, read_frame};
use roomcast::{ClientId, RoomRegistry};

// ============================================================================
// Benchmark Parameters
// ============================================================================

/// One size per length-field class: 7-bit, 16-bit, 64-bit.
const PAYLOAD_SIZES: &[usize] = &[64, 4 * 1024, 128 * 1024];

const ROOM_SIZES: &[usize] = &[10, 100, 1000];

const MASK_KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

// ============================================================================
// Benchmark: Encode
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for &size in PAYLOAD_SIZES {
        let payload = vec![b'a'; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("server_frame", size), &payload, |b, p| {
            b.iter(|| encode_frame(black_box(p)));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Decode
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");

    let mut group = c.benchmark_group("decode");

    for &size in PAYLOAD_SIZES {
        let frame = encode_masked_frame(&vec![b'a'; size], MASK_KEY);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("client_frame", size), &frame, |b, f| {
            b.to_async(&rt).iter(|| async {
                let mut reader = f.as_slice();
                read_frame(&mut reader).await.expect("valid frame")
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Broadcast Fan-out
// ============================================================================

fn bench_broadcast(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let _guard = rt.enter();

    let mut group = c.benchmark_group("broadcast");

    for &members in ROOM_SIZES {
        let registry = RoomRegistry::new(1024);
        for port in 0..members {
            let addr = SocketAddr::from(([127, 0, 0, 1], port as u16));
            let _ = registry.join("bench", addr, tokio::io::sink());
        }

        group.throughput(Throughput::Elements(members as u64));
        group.bench_with_input(BenchmarkId::new("room", members), &registry, |b, r| {
            b.iter(|| r.broadcast("bench", black_box("hello room"), ClientId::from_u64(0)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_broadcast);
criterion_main!(benches);
