use criterion::{criterion_group, criterion_main, Criterion};
use custody_core::crypto::{decrypt, encrypt, KeyPair};
use custody_core::{reconstruct, split, SplitSpec};

fn bench_sharing(c: &mut Criterion) {
    let key = [0x5au8; 32];

    for (n, k) in [(5u8, 3u8), (7, 4), (16, 9)] {
        let spec = SplitSpec::new(n, k).unwrap();
        c.bench_function(&format!("split_32B_{}of{}", k, n), |b| {
            b.iter(|| split(&key, spec).unwrap())
        });

        let shares = split(&key, spec).unwrap();
        let quorum = &shares[..k as usize];
        c.bench_function(&format!("reconstruct_32B_{}of{}", k, n), |b| {
            b.iter(|| reconstruct(quorum, spec).unwrap())
        });
    }

    let pair = KeyPair::generate().unwrap();
    let payload = vec![7u8; 64 * 1024];
    c.bench_function("encrypt_64KiB", |b| {
        b.iter(|| encrypt(&payload, &pair.public_key).unwrap())
    });

    let envelope = encrypt(&payload, &pair.public_key).unwrap();
    c.bench_function("decrypt_64KiB", |b| {
        b.iter(|| decrypt(&envelope, pair.private_key()).unwrap())
    });
}

criterion_group!(benches, bench_sharing);
criterion_main!(benches);
