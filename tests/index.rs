use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use fracmash::collection::Collection;
use fracmash::encodings::HashFunctions;
use fracmash::index::linear::LinearIndex;
use fracmash::index::revindex::RevIndex;
use fracmash::index::sbt::SBT;
use fracmash::index::search::SearchMeasure;
use fracmash::index::Index;
use fracmash::selection::Selection;
use fracmash::signature::Signature;
use fracmash::sketch::minhash::KmerMinHash;
use fracmash::sketch::Sketch;

fn scaled_sig(name: &str, hashes: &[u64]) -> Signature {
    let mut mh = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
    mh.add_many(hashes).unwrap();
    Signature::builder()
        .name(Some(name.into()))
        .signatures(vec![Sketch::MinHash(mh)])
        .build()
}

/// A pile of reference signatures with overlapping random hash sets.
fn random_sigs(n: usize, seed: u64) -> Vec<Signature> {
    let mut rng = StdRng::seed_from_u64(seed);
    let shared: Vec<u64> = (0..50).map(|_| rng.gen_range(1..1_000_000)).collect();

    (0..n)
        .map(|i| {
            let mut hashes: Vec<u64> = (0..rng.gen_range(20..200))
                .map(|_| rng.gen_range(1..1_000_000))
                .collect();
            // some signatures also carry the shared block
            if i % 3 == 0 {
                hashes.extend(&shared);
            }
            scaled_sig(&format!("sig{:02}", i), &hashes)
        })
        .collect()
}

fn query_from(sigs: &[Signature], seed: u64) -> KmerMinHash {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
    for sig in sigs.iter().step_by(2) {
        let mh = sig.minhash().unwrap();
        for h in mh.mins() {
            if rng.gen_bool(0.5) {
                query.add_hash(h);
            }
        }
    }
    query
}

#[test]
fn sbt_equals_linear_for_every_threshold() {
    let sigs = random_sigs(12, 1);
    let query = query_from(&sigs, 2);

    let linear = LinearIndex::from_collection(
        Collection::from_sigs(sigs.clone()).unwrap().try_into().unwrap(),
    );
    let sbt =
        SBT::from_collection(Collection::from_sigs(sigs).unwrap().try_into().unwrap()).unwrap();

    for threshold in [0.0, 0.01, 0.05, 0.1, 0.25, 0.5, 0.75, 0.95] {
        let mut linear_names: Vec<String> = linear
            .search(&query, SearchMeasure::Jaccard, threshold)
            .unwrap()
            .iter()
            .map(|m| m.name().clone())
            .collect();
        let mut sbt_names: Vec<String> = sbt
            .search(&query, SearchMeasure::Jaccard, threshold)
            .unwrap()
            .iter()
            .map(|m| m.name().clone())
            .collect();

        linear_names.sort();
        sbt_names.sort();
        assert_eq!(linear_names, sbt_names, "threshold {}", threshold);
    }
}

#[test]
fn revindex_equals_linear() {
    let sigs = random_sigs(10, 3);
    let query = query_from(&sigs, 4);

    let linear = LinearIndex::from_collection(
        Collection::from_sigs(sigs.clone()).unwrap().try_into().unwrap(),
    );
    let rev = RevIndex::from_collection(
        Collection::from_sigs(sigs).unwrap().try_into().unwrap(),
    )
    .unwrap();

    for measure in [
        SearchMeasure::Jaccard,
        SearchMeasure::Containment,
        SearchMeasure::MaxContainment,
    ] {
        for threshold in [0.0, 0.1, 0.5] {
            let mut a: Vec<String> = linear
                .search(&query, measure, threshold)
                .unwrap()
                .iter()
                .map(|m| m.name().clone())
                .collect();
            let mut b: Vec<String> = rev
                .search(&query, measure, threshold)
                .unwrap()
                .iter()
                .map(|m| m.name().clone())
                .collect();
            a.sort();
            b.sort();
            assert_eq!(a, b, "measure {:?} threshold {}", measure, threshold);
        }
    }
}

#[test]
fn prefetch_agrees_across_indices() {
    let sigs = random_sigs(9, 5);
    let query = query_from(&sigs, 6);

    let linear = LinearIndex::from_collection(
        Collection::from_sigs(sigs.clone()).unwrap().try_into().unwrap(),
    );
    let rev = RevIndex::from_collection(
        Collection::from_sigs(sigs.clone()).unwrap().try_into().unwrap(),
    )
    .unwrap();
    let sbt =
        SBT::from_collection(Collection::from_sigs(sigs).unwrap().try_into().unwrap()).unwrap();

    for threshold_bp in [1, 5, 20] {
        let mut a: Vec<String> = linear
            .prefetch(&query, threshold_bp)
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        let mut b: Vec<String> = rev
            .prefetch(&query, threshold_bp)
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        let mut c: Vec<String> = sbt
            .prefetch(&query, threshold_bp)
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        a.sort();
        b.sort();
        c.sort();
        assert_eq!(a, b, "threshold_bp {}", threshold_bp);
        assert_eq!(a, c, "threshold_bp {}", threshold_bp);
    }
}

#[test]
fn search_results_are_sorted_descending() {
    let sigs = random_sigs(10, 7);
    let query = query_from(&sigs, 8);

    let linear = LinearIndex::from_collection(
        Collection::from_sigs(sigs).unwrap().try_into().unwrap(),
    );

    let matches = linear.search(&query, SearchMeasure::Jaccard, 0.0).unwrap();
    for pair in matches.windows(2) {
        assert!(pair[0].similarity() >= pair[1].similarity());
    }
}

#[test]
fn selection_narrows_before_search() {
    let mut sigs = random_sigs(6, 9);
    // one signature at a different ksize
    let mut mh = KmerMinHash::with_scaled(1, 31, HashFunctions::Murmur64Dna, 42, false);
    mh.add_many(&[1, 2, 3]).unwrap();
    sigs.push(
        Signature::builder()
            .name(Some("other-k".into()))
            .signatures(vec![Sketch::MinHash(mh)])
            .build(),
    );

    let collection = Collection::from_sigs(sigs).unwrap();
    let mut selection = Selection::default();
    selection.set_ksize(21);

    use fracmash::selection::Select;
    let narrowed = collection.select(&selection).unwrap();
    assert_eq!(narrowed.len(), 6);

    // the narrowed collection is compatible and indexable
    let linear = LinearIndex::from_collection(narrowed.try_into().unwrap());
    assert_eq!(linear.len(), 6);
}

#[test]
fn empty_result_is_not_an_error() {
    let sigs = vec![scaled_sig("lonely", &[1, 2, 3])];
    let linear = LinearIndex::from_collection(
        Collection::from_sigs(sigs).unwrap().try_into().unwrap(),
    );

    let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
    query.add_many(&[900, 901]).unwrap();

    let matches = linear.search(&query, SearchMeasure::Jaccard, 0.1).unwrap();
    assert!(matches.is_empty());

    let overlaps = linear.prefetch(&query, 1).unwrap();
    assert!(overlaps.is_empty());
}
