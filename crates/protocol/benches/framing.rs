//! Benchmarks for line framing and channel message encoding
//!
//! Run with: cargo bench -p protocol

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use protocol::{LineAccumulator, MessageDecoder, encode_message};

/// Typical printer chatter: short status lines
fn printer_output(lines: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..lines {
        out.extend_from_slice(format!("ok T:{}.0 /210.0 B:60.0 /60.0 @:127\n", 200 + i % 10).as_bytes());
    }
    out
}

fn bench_accumulate_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_accumulator");

    for chunk_size in [1usize, 64, 1024] {
        let data = printer_output(256);
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("chunk", chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                b.iter(|| {
                    let mut acc = LineAccumulator::new();
                    let mut count = 0;
                    for chunk in data.chunks(chunk_size) {
                        acc.accumulate(black_box(chunk)).unwrap();
                        count += acc.extract().len();
                    }
                    black_box(count)
                });
            },
        );
    }

    group.finish();
}

fn bench_message_decode(c: &mut Criterion) {
    let mut wire = Vec::new();
    for line in printer_output(256).split_inclusive(|&b| b == b'\n') {
        wire.extend(encode_message(line).unwrap());
    }

    c.bench_function("message_decoder_256_frames", |b| {
        b.iter(|| {
            let mut decoder = MessageDecoder::new();
            decoder.push(black_box(&wire));
            let mut count = 0;
            while let Some(msg) = decoder.next_message().unwrap() {
                count += msg.len();
            }
            black_box(count)
        });
    });
}

criterion_group!(benches, bench_accumulate_extract, bench_message_decode);
criterion_main!(benches);
