use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use harmoniq_rt::{
    AtomRtWriter, MailboxQueue, PoolConfig, PoolList, RingBuffer, SharedAtomRing,
    DEFAULT_MAILBOX_SLOTS, MEDIUM_RING_SIZE,
};

fn ring_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring");
    let frame = [0x5au8; 64];
    group.throughput(Throughput::Bytes(frame.len() as u64));

    group.bench_function("write_commit_read_64b", |b| {
        let mut ring = RingBuffer::medium();
        let mut out = [0u8; 64];
        b.iter(|| {
            ring.try_write(black_box(&frame));
            ring.commit_write();
            ring.try_read(&mut out);
            black_box(&out);
        });
    });

    group.bench_function("typed_f32_pairs", |b| {
        let mut ring = RingBuffer::small();
        b.iter(|| {
            let (producer, consumer) = ring.split();
            producer.try_write_u32(black_box(7));
            producer.try_write_f32(black_box(0.5));
            producer.commit_write();
            black_box((consumer.try_read_u32(), consumer.try_read_f32()));
        });
    });

    group.finish();
}

fn mailbox(c: &mut Criterion) {
    c.bench_function("mailbox_fill_drain", |b| {
        let mut queue = MailboxQueue::<DEFAULT_MAILBOX_SLOTS>::new();
        b.iter(|| {
            while queue.put(0x90, 60, 100) {}
            while let Some(entry) = queue.get() {
                black_box(entry);
            }
        });
    });
}

fn pool_append_splice(c: &mut Criterion) {
    c.bench_function("pool_append_256_splice", |b| {
        b.iter_batched(
            || PoolList::new::<u64>(PoolConfig::default()),
            |(mut producer, mut consumer)| {
                for value in 0..256u64 {
                    producer.append_rt(value);
                }
                consumer.splice();
                black_box(consumer.drain_live());
            },
            BatchSize::SmallInput,
        );
    });
}

fn atom_drain_swap(c: &mut Criterion) {
    c.bench_function("atom_put_128_drain_swap", |b| {
        let source = Arc::new(SharedAtomRing::new(MEDIUM_RING_SIZE));
        let scratch = SharedAtomRing::new(MEDIUM_RING_SIZE);
        let writer = AtomRtWriter::new(Arc::clone(&source));
        let mut payload = [0u8; 16];
        b.iter(|| {
            for index in 0..128 {
                writer.try_put(1, index, &0.25f32.to_ne_bytes());
            }
            source.drain_swap(&scratch);
            let mut ring = scratch.lock();
            while let Ok(Some(header)) = ring.try_read(&mut payload) {
                black_box(header);
            }
        });
    });
}

criterion_group!(benches, ring_block, mailbox, pool_append_splice, atom_drain_swap);
criterion_main!(benches);
