use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kmswrap::core::cipher::envelope::{envelope_decrypt, envelope_encrypt};
use kmswrap::core::cipher::AeadWrapper;
use kmswrap::{Options, Wrapper};
use std::time::Duration;

const SIZES: [usize; 5] = [32, 256, 1024, 4096, 16384];

/// Generate a payload of given size.
fn generate_payload(size: usize) -> Vec<u8> {
    vec![b'x'; size]
}

fn configured(key_mode: &str) -> AeadWrapper {
    let w = AeadWrapper::new();
    w.set_config(
        &Options::new()
            .with_config("key", AeadWrapper::generate_key())
            .with_config("key_mode", key_mode),
    )
    .unwrap();
    w
}

/// Benchmark the bare envelope engine, no key wrapping.
fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");
    group.sample_size(50);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(3));

    for size in SIZES {
        let payload = generate_payload(size);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(
            BenchmarkId::new("roundtrip", format!("{}B", size)),
            &payload,
            |b, payload| {
                b.iter(|| {
                    let info = envelope_encrypt(black_box(payload), None).unwrap();
                    let out = envelope_decrypt(black_box(&info), None).unwrap();
                    black_box(out);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark wrapper encryption in both key modes.
fn bench_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypt");
    group.sample_size(50);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(3));

    for mode in ["wrap", "derive"] {
        let w = configured(mode);
        for size in SIZES {
            let payload = generate_payload(size);
            group.throughput(Throughput::Bytes(size as u64));

            group.bench_with_input(
                BenchmarkId::new(mode, format!("{}B", size)),
                &payload,
                |b, payload| {
                    b.iter(|| {
                        let blob = w
                            .encrypt(Some(black_box(payload.as_slice())), &Options::new())
                            .unwrap();
                        black_box(blob);
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark decryption only with pre-encrypted blobs.
fn bench_decrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("decrypt");
    group.sample_size(50);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(3));

    let w = configured("wrap");
    for size in SIZES {
        let blob = w
            .encrypt(Some(&generate_payload(size)), &Options::new())
            .unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(
            BenchmarkId::new("wrap", format!("{}B", size)),
            &blob,
            |b, blob| {
                b.iter(|| {
                    let out = w.decrypt(Some(black_box(blob)), &Options::new()).unwrap();
                    black_box(out);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_envelope, bench_encrypt, bench_decrypt);
criterion_main!(benches);
