//! Benchmarks for CRC-32C and record framing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use zerostore::{ChecksumEngine, RecordCodec, VersionSet};

fn benchmark_backends(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");
    let engine = ChecksumEngine::detect();

    for size in [64usize, 1024, 64 * 1024].iter() {
        let data = vec![0xA5u8; *size];
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(
            BenchmarkId::new(format!("{:?}", engine.backend()), size),
            &data,
            |b, data| {
                b.iter(|| engine.compute(black_box(data)));
            },
        );
        group.bench_with_input(BenchmarkId::new("chunked", size), &data, |b, data| {
            b.iter(|| {
                data.chunks(61)
                    .fold(0, |crc, chunk| engine.update(crc, black_box(chunk)))
            });
        });
    }

    group.finish();
}

fn benchmark_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_codec");
    let codec = RecordCodec::new();

    for size in [37usize, 4096].iter() {
        let payload = vec![7u8; *size];
        let framed = codec.encode(&payload, 1).unwrap();
        let mut dst = vec![0u8; framed.len()];

        group.bench_with_input(BenchmarkId::new("encode_into", size), &payload, |b, payload| {
            b.iter(|| codec.encode_into(black_box(&mut dst), black_box(payload), 1).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &framed, |b, framed| {
            b.iter(|| {
                codec
                    .decode(black_box(framed), &VersionSet::ALL)
                    .unwrap()
                    .payload
                    .len()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_backends, benchmark_codec);
criterion_main!(benches);
