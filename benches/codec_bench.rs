//! Address codec and cipher stream benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Runtime;

use sstunnel::crypto::{Cipher, CipherKind, CipherStream};
use sstunnel::proxy::address::Address;

fn bench_address_encode(c: &mut Criterion) {
    let ipv4: Address = "93.184.216.34:443".parse().unwrap();
    let domain = Address::domain("www.example.com", 443).unwrap();

    let mut group = c.benchmark_group("address_encode");
    group.bench_function("ipv4", |b| b.iter(|| black_box(ipv4.encode())));
    group.bench_function("domain", |b| b.iter(|| black_box(domain.encode())));
    group.finish();
}

fn bench_address_decode(c: &mut Criterion) {
    let ipv4 = "93.184.216.34:443".parse::<Address>().unwrap().encode();
    let domain = Address::domain("www.example.com", 443).unwrap().encode();

    let mut group = c.benchmark_group("address_decode");
    group.bench_function("ipv4", |b| b.iter(|| black_box(Address::decode(&ipv4).unwrap())));
    group.bench_function("domain", |b| {
        b.iter(|| black_box(Address::decode(&domain).unwrap()))
    });
    group.finish();
}

fn bench_stream_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let cipher = Cipher::from_password(CipherKind::ChaCha20Poly1305, "bench");
    let payload = vec![0xA5u8; 64 * 1024];

    let mut group = c.benchmark_group("cipher_stream");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("seal_open_64k", |b| {
        b.to_async(&rt).iter(|| {
            let cipher = cipher.clone();
            let payload = payload.clone();
            async move {
                let mut writer = CipherStream::new(Vec::new(), cipher.clone());
                writer.write_all(&payload).await.unwrap();
                writer.flush().await.unwrap();
                let wire = writer.into_inner();

                let mut reader = CipherStream::new(&wire[..], cipher);
                let mut out = Vec::with_capacity(payload.len());
                reader.read_to_end(&mut out).await.unwrap();
                black_box(out)
            }
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_address_encode,
    bench_address_decode,
    bench_stream_round_trip,
);

criterion_main!(benches);
