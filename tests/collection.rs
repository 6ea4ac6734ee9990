use std::collections::HashSet;
use std::path::PathBuf;

use camino::Utf8PathBuf;

use fracmash::collection::{Collection, MANIFEST_LOCATION};
use fracmash::encodings::HashFunctions;
use fracmash::index::linear::LinearIndex;
use fracmash::index::search::SearchMeasure;
use fracmash::index::Index;
use fracmash::picklist::{PickColumn, Picklist};
use fracmash::prelude::*;
use fracmash::selection::Selection;
use fracmash::sketch::minhash::KmerMinHash;
use fracmash::sketch::Sketch;

fn test_data(filename: &str) -> Utf8PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/test-data");
    path.push(filename);
    Utf8PathBuf::from_path_buf(path).unwrap()
}

fn scaled_sig(name: &str, hashes: &[u64]) -> Signature {
    let mut mh = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
    mh.add_many(hashes).unwrap();
    Signature::builder()
        .name(Some(name.into()))
        .signatures(vec![Sketch::MinHash(mh)])
        .build()
}

#[test]
fn zip_collection_with_manifest() {
    let collection = Collection::from_zipfile(test_data("two-sigs.zip")).unwrap();
    assert_eq!(collection.len(), 2);

    let names: Vec<String> = collection
        .manifest()
        .iter()
        .map(|r| r.name().clone())
        .collect();
    assert_eq!(names, vec!["zipA", "zipB"]);

    let sig = collection.sig_for_dataset(0).unwrap();
    assert_eq!(sig.data().unwrap().name(), "zipA");
    let mh = sig.data().unwrap().minhash().unwrap().clone();
    assert_eq!(mh.mins(), vec![1, 2, 3]);

    // streaming signatures carry their location hints
    let locations: Vec<String> = collection
        .signatures_with_location()
        .map(|r| r.unwrap().1)
        .collect();
    assert_eq!(locations, vec!["signatures/a.sig", "signatures/b.sig"]);
}

#[test]
fn zip_collection_searchable() {
    let collection = Collection::from_zipfile(test_data("two-sigs.zip")).unwrap();
    let linear = LinearIndex::from_collection(collection.try_into().unwrap());

    let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
    query.add_many(&[3, 4, 5, 6]).unwrap();

    let matches = linear.search(&query, SearchMeasure::Jaccard, 0.5).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].name(), "zipB");
}

#[test]
fn zip_without_manifest_synthesizes_one() {
    let collection = Collection::from_zipfile(test_data("no-manifest.zip")).unwrap();
    // notes.txt is not a signature and must be ignored
    assert_eq!(collection.len(), 2);

    let mut names: Vec<String> = collection
        .manifest()
        .iter()
        .map(|r| r.name().clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["zipA", "zipB"]);

    // rows are loadable through the synthesized manifest
    for (idx, _) in collection.iter() {
        let sig = collection.sig_for_dataset(idx).unwrap();
        assert_eq!(sig.data().unwrap().size(), 1);
    }
}

#[test]
fn zip_selection_by_picklist() {
    let collection = Collection::from_zipfile(test_data("two-sigs.zip")).unwrap();

    let mut values = HashSet::new();
    values.insert("zipB".to_string());
    let mut selection = Selection::default();
    selection.set_picklist(Picklist::new(PickColumn::Name, values));

    let selected = collection.select(&selection).unwrap();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected.manifest().iter().next().unwrap().name(), "zipB");
}

#[test]
fn save_and_reload_directory_collection() {
    let dir = tempfile::TempDir::new().unwrap();
    let out = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

    let collection = Collection::from_sigs(vec![
        scaled_sig("x", &[1, 2, 3]),
        scaled_sig("y", &[4, 5, 6]),
    ])
    .unwrap();
    collection.save_to_directory(&out).unwrap();
    assert!(out.join(MANIFEST_LOCATION).exists());

    let reloaded = Collection::from_directory(&out).unwrap();
    assert_eq!(reloaded.len(), 2);

    // manifests agree on content digests
    let mut orig_md5s: Vec<String> = collection
        .manifest()
        .iter()
        .map(|r| r.md5().clone())
        .collect();
    let mut new_md5s: Vec<String> = reloaded
        .manifest()
        .iter()
        .map(|r| r.md5().clone())
        .collect();
    orig_md5s.sort();
    new_md5s.sort();
    assert_eq!(orig_md5s, new_md5s);
}

#[test]
fn standalone_manifest_over_saved_collection() {
    use fracmash::index::standalone::StandaloneManifestIndex;

    let dir = tempfile::TempDir::new().unwrap();
    let out = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

    let collection = Collection::from_sigs(vec![
        scaled_sig("x", &[1, 2, 3]),
        scaled_sig("y", &[4, 5, 6]),
    ])
    .unwrap();
    collection.save_to_directory(&out).unwrap();

    // the directory manifest is a standalone manifest whose rows point
    // at the saved signature files
    let index = StandaloneManifestIndex::from_path(out.join(MANIFEST_LOCATION)).unwrap();
    assert_eq!(index.len(), 2);

    let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
    query.add_many(&[4, 5, 6]).unwrap();

    let matches = index.search(&query, SearchMeasure::Jaccard, 0.9).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].name(), "y");
}
