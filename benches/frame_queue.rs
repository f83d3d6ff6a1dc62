//! Benchmarks for the producer-to-decoder hot path
//!
//! - Enqueue into a full queue (drop-oldest eviction on every call)
//! - Enqueue/dequeue round trip at steady state
//! - One session feed + drain against the mock codec
//!
//! Platform: Cross-platform (mock codec, CI-safe)

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use streamdecode::session::{DecoderSession, Drained};
use streamdecode::test_utils::MockCodecFactory;
use streamdecode::types::FrameRecord;
use streamdecode::{DecoderConfig, FrameQueue};

fn frame(sequence: u64, payload: &Arc<[u8]>) -> FrameRecord {
    FrameRecord::new(Arc::clone(payload), sequence * 33_333, sequence, false, 1280, 720)
}

fn bench_enqueue_overflow(c: &mut Criterion) {
    let payload: Arc<[u8]> = Arc::from(vec![0u8; 16 * 1024]);
    let queue = FrameQueue::default();
    for seq in 0..queue.capacity() as u64 {
        queue.enqueue(frame(seq, &payload));
    }

    let mut group = c.benchmark_group("frame_queue");
    group.throughput(Throughput::Elements(1));

    let mut seq = queue.capacity() as u64;
    group.bench_function("enqueue_full_drop_oldest", |b| {
        b.iter(|| {
            seq += 1;
            black_box(queue.enqueue(frame(seq, &payload)))
        })
    });

    group.bench_function("enqueue_dequeue", |b| {
        let queue = FrameQueue::default();
        b.iter(|| {
            queue.enqueue(frame(1, &payload));
            black_box(queue.dequeue())
        })
    });

    group.finish();
}

fn bench_session_cycle(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("Failed to build runtime");
    let factory = MockCodecFactory::new();
    let mut session = DecoderSession::new(Arc::new(factory), &DecoderConfig::default());
    session.configure(640, 480, None).expect("Failed to configure mock session");
    let unit = vec![0x65u8; 4 * 1024];

    c.bench_function("session_feed_drain_640x480", |b| {
        b.iter(|| {
            runtime.block_on(session.feed(&unit, 0)).expect("feed failed");
            if let Ok(Drained::Output(guard)) = session.drain() {
                black_box(guard.pixels().map(<[u8]>::len).ok());
                guard.release().expect("release failed");
            }
        })
    });
}

criterion_group!(benches, bench_enqueue_overflow, bench_session_cycle);
criterion_main!(benches);
