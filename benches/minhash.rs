use criterion::{criterion_group, criterion_main, Criterion};

use fracmash::encodings::HashFunctions;
use fracmash::signature::SigsTrait;
use fracmash::sketch::minhash::KmerMinHash;

fn random_dna(len: usize, seed: u64) -> Vec<u8> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| b"ACGT"[rng.gen_range(0..4)]).collect()
}

fn add_sequence(c: &mut Criterion) {
    let seq = random_dna(10_000, 42);

    let mut group = c.benchmark_group("add_sequence");

    group.bench_function("scaled 100", |b| {
        b.iter(|| {
            let mut mh = KmerMinHash::with_scaled(100, 21, HashFunctions::Murmur64Dna, 42, false);
            mh.add_sequence(&seq, false).unwrap();
        });
    });

    group.bench_function("num 500", |b| {
        b.iter(|| {
            let mut mh = KmerMinHash::with_num(500, 21, HashFunctions::Murmur64Dna, 42, false);
            mh.add_sequence(&seq, false).unwrap();
        });
    });

    group.bench_function("protein translated", |b| {
        b.iter(|| {
            let mut mh =
                KmerMinHash::with_scaled(100, 7, HashFunctions::Murmur64Protein, 42, false);
            mh.add_sequence(&seq, false).unwrap();
        });
    });

    group.finish();
}

fn comparisons(c: &mut Criterion) {
    let seq_a = random_dna(50_000, 1);
    let seq_b = random_dna(50_000, 2);

    let mut a = KmerMinHash::with_scaled(10, 21, HashFunctions::Murmur64Dna, 42, false);
    let mut b = KmerMinHash::with_scaled(10, 21, HashFunctions::Murmur64Dna, 42, false);
    a.add_sequence(&seq_a, false).unwrap();
    b.add_sequence(&seq_b, false).unwrap();

    let mut group = c.benchmark_group("comparisons");

    group.bench_function("jaccard", |bench| {
        bench.iter(|| a.jaccard(&b).unwrap());
    });

    group.bench_function("contained_by", |bench| {
        bench.iter(|| a.contained_by(&b).unwrap());
    });

    group.bench_function("merge", |bench| {
        bench.iter(|| {
            let mut m = a.clone();
            m.merge(&b).unwrap();
        });
    });

    group.finish();
}

criterion_group!(minhash, add_sequence, comparisons);
criterion_main!(minhash);
