use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kestrel_gdb::packet::{checksum, encode, PacketDecoder};

fn bench_checksum(c: &mut Criterion) {
    // A full `g` reply: 39 register bytes, hex encoded.
    let payload = vec![b'a'; 78];

    c.bench_function("rsp_checksum", |b| {
        b.iter(|| black_box(checksum(black_box(&payload))));
    });
}

fn bench_framing(c: &mut Criterion) {
    let frame = encode(&[b'5'; 512]);

    c.bench_function("rsp_encode", |b| {
        b.iter(|| black_box(encode(black_box(b"M800100,4:deadbeef"))));
    });
    c.bench_function("rsp_decode", |b| {
        b.iter(|| {
            let mut decoder = PacketDecoder::new();
            frame.iter().filter_map(|byte| decoder.push(*byte)).count()
        });
    });
}

criterion_group!(benches, bench_checksum, bench_framing);
criterion_main!(benches);
