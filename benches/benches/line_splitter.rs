use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use harmoniq_pipe::LineSplitter;

fn split_messages(c: &mut Criterion) {
    let mut stream = Vec::new();
    for index in 0..1_000 {
        stream.extend_from_slice(format!("control {index} 0.{index}\n").as_bytes());
    }

    let mut group = c.benchmark_group("line_splitter");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    for chunk in [7usize, 512, 4096] {
        group.bench_function(format!("chunk_{chunk}"), |b| {
            b.iter(|| {
                let mut splitter = LineSplitter::new(64 * 1024);
                let mut lines = 0usize;
                for piece in stream.chunks(chunk) {
                    splitter.push(piece, |line| {
                        if line.is_ok() {
                            lines += 1;
                        }
                    });
                }
                black_box(lines)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, split_messages);
criterion_main!(benches);
