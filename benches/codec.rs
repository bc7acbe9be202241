use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mill_nio::{Codec, LengthFieldCodec, LineCodec, MessageBuffer};

const FRAMES: usize = 100;

fn length_field_stream(size: usize) -> Vec<u8> {
    let codec = LengthFieldCodec::default();
    let payload = Bytes::from(vec![0xAB; size]);
    let mut dst = BytesMut::new();
    for _ in 0..FRAMES {
        codec.encode(&payload, &mut dst).unwrap();
    }
    dst.to_vec()
}

fn bench_length_field_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("length_field_decode");
    let codec = LengthFieldCodec::default();

    for size in [64, 1024, 16 * 1024] {
        let stream = length_field_stream(size);
        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::new("frame_size", size), &stream, |b, stream| {
            b.iter(|| {
                let mut buffer = MessageBuffer::from(&stream[..]);
                let mut state = ();
                let messages = codec.decode_all(&mut state, &mut buffer).unwrap();
                black_box(messages.len())
            });
        });
    }
    group.finish();
}

fn bench_length_field_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("length_field_encode");
    let codec = LengthFieldCodec::default();

    for size in [64, 1024, 16 * 1024] {
        let payload = Bytes::from(vec![0xCD; size]);
        group.throughput(Throughput::Bytes(((size + 4) * FRAMES) as u64));
        group.bench_with_input(BenchmarkId::new("frame_size", size), &payload, |b, payload| {
            b.iter(|| {
                let mut dst = BytesMut::with_capacity((size + 4) * FRAMES);
                for _ in 0..FRAMES {
                    codec.encode(payload, &mut dst).unwrap();
                }
                black_box(dst.len())
            });
        });
    }
    group.finish();
}

fn bench_line_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_decode");
    let codec = LineCodec::default();

    for width in [16, 256, 4096] {
        let line = "x".repeat(width);
        let stream: String = (0..FRAMES).map(|_| format!("{line}\r\n")).collect();
        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::new("line_width", width), &stream, |b, stream| {
            b.iter(|| {
                let mut buffer = MessageBuffer::from(stream.as_bytes());
                let mut state = Default::default();
                let lines = codec.decode_all(&mut state, &mut buffer).unwrap();
                black_box(lines.len())
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_length_field_decode,
    bench_length_field_encode,
    bench_line_decode
);
criterion_main!(benches);
