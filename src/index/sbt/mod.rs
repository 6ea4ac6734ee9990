//! Sequence Bloom Trees: pruned similarity search.
//!
//! A binary tree where each internal node is a Bloom filter over the
//! union of hashes in its subtree and each leaf is one signature.
//! Search descends from the root, bounding the best attainable score
//! below each node and pruning subtrees that cannot reach the
//! threshold. Trees hold a single ksize, moltype and capacity
//! parameter.

pub mod mhbt;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::info;
use nohash_hasher::BuildNoHashHasher;
use serde::{Deserialize, Serialize};

pub use crate::index::sbt::mhbt::{Factory, Node};

use crate::collection::CollectionSet;
use crate::index::prefetch::{downsampled_overlap, PrefetchResult};
use crate::index::search::{sort_matches, SearchMeasure, SearchResult};
use crate::index::Index;
use crate::prelude::*;
use crate::sketch::minhash::KmerMinHash;
use crate::storage::{FSStorage, InnerStorage, SigStore, StorageInfo};
use crate::{Error, Result};

/// Target false-positive rate for internal-node filters.
pub const DEFAULT_FP_RATE: f64 = 0.01;

pub struct SBT {
    /// internal-node fan-out; always 2
    d: u32,
    storage: Option<InnerStorage>,
    factory: Factory,
    nodes: HashMap<u64, Node>,
    leaves: HashMap<u64, SigStore>,
}

const fn parent(pos: u64, d: u64) -> u64 {
    (pos - 1) / d
}

const fn child(parent: u64, pos: u64, d: u64) -> u64 {
    d * parent + pos + 1
}

impl FromFactory<Node> for SBT {
    fn factory(&self, name: &str) -> Result<Node> {
        Ok(Node::builder()
            .filename(name)
            .name(name)
            .data(self.factory.build())
            .build())
    }
}

impl SBT {
    pub fn new(factory: Factory) -> SBT {
        SBT {
            d: 2,
            storage: None,
            factory,
            nodes: Default::default(),
            leaves: Default::default(),
        }
    }

    #[inline(always)]
    fn parent(&self, pos: u64) -> Option<u64> {
        if pos == 0 {
            None
        } else {
            Some(parent(pos, u64::from(self.d)))
        }
    }

    #[inline(always)]
    fn children(&self, pos: u64) -> Vec<u64> {
        (0..u64::from(self.d))
            .map(|c| child(pos, c, u64::from(self.d)))
            .collect()
    }

    pub fn d(&self) -> u32 {
        self.d
    }

    pub fn storage(&self) -> Option<InnerStorage> {
        self.storage.clone()
    }

    pub fn leaves(&self) -> Vec<&SigStore> {
        self.leaves.values().collect()
    }

    /// Build a tree over a compatible collection: Bloom filters are
    /// sized from the largest sketch at the default fp rate, and the
    /// tree shape comes from [`scaffold`].
    pub fn from_collection(collection: CollectionSet) -> Result<SBT> {
        let largest = collection
            .manifest()
            .iter()
            .map(|r| r.n_hashes())
            .max()
            .unwrap_or(1);
        let ksize = collection
            .manifest()
            .first()
            .map(|r| r.ksize() as u64)
            .unwrap_or(1);
        let factory = Factory::from_fp_rate(largest, DEFAULT_FP_RATE, ksize);

        let mut datasets = Vec::with_capacity(collection.len());
        for (i, _record) in collection.iter() {
            datasets.push(collection.sig_for_dataset(i)?);
        }
        scaffold(datasets, factory)
    }

    /// Insert one signature, creating and updating internal filters so
    /// every ancestor summarizes its subtree.
    pub fn insert(&mut self, leaf: SigStore) -> Result<()> {
        if self.leaves.is_empty() && self.nodes.is_empty() {
            self.leaves.insert(0, leaf);
            return Ok(());
        }

        let pos = self.leaves.keys().max().unwrap_or(&0) + 1;
        let parent_pos = self.parent(pos).expect("pos > 0 always has a parent");

        let update_start;
        if let Some(sibling) = self.leaves.remove(&parent_pos) {
            // the parent slot holds a leaf: split it into an internal
            // node with the old leaf and the new one as children
            let mut new_node = self.factory(&format!("internal.{}", parent_pos))?;
            sibling.data()?.update(&mut new_node)?;
            leaf.data()?.update(&mut new_node)?;

            let children = self.children(parent_pos);
            self.leaves.insert(children[0], sibling);
            self.leaves.insert(children[1], leaf);
            self.nodes.insert(parent_pos, new_node);
            update_start = self.parent(parent_pos);
        } else if self.nodes.contains_key(&parent_pos) {
            // parent is an internal node with a free slot
            let node = self.nodes.get_mut(&parent_pos).unwrap();
            leaf.data()?.update(node)?;
            self.leaves.insert(pos, leaf);
            update_start = self.parent(parent_pos);
        } else {
            // parent slot is empty: create the internal node and hang
            // the leaf below it
            let mut new_node = self.factory(&format!("internal.{}", parent_pos))?;
            leaf.data()?.update(&mut new_node)?;
            let c_pos = self.children(parent_pos)[0];
            self.leaves.insert(c_pos, leaf);
            self.nodes.insert(parent_pos, new_node);
            update_start = self.parent(parent_pos);
        }

        // propagate the new leaf up to the root
        let inserted_pos = *self.leaves.keys().max().unwrap();
        let leaf_sig = self.leaves[&inserted_pos].data()?.clone();
        let mut cursor = update_start;
        while let Some(ppos) = cursor {
            if let Some(node) = self.nodes.get_mut(&ppos) {
                leaf_sig.update(node)?;
            }
            cursor = self.parent(ppos);
        }

        Ok(())
    }

    /// Depth-first traversal: descend where `node_pass` allows, yield
    /// leaf positions. Matches come out in traversal order.
    fn find_leaves<F>(&self, mut node_pass: F) -> Result<Vec<u64>>
    where
        F: FnMut(&Node) -> Result<bool>,
    {
        let mut found = vec![];
        let mut visited = HashSet::new();
        let mut queue = vec![0u64];

        while let Some(pos) = queue.pop() {
            if !visited.insert(pos) {
                continue;
            }

            if let Some(node) = self.nodes.get(&pos) {
                if node_pass(node)? {
                    queue.extend(self.children(pos));
                }
            } else if self.leaves.contains_key(&pos) {
                found.push(pos);
            }
        }

        Ok(found)
    }

    fn leaf_minhash(&self, pos: u64) -> Result<(&SigStore, &KmerMinHash)> {
        let leaf = &self.leaves[&pos];
        let sig = leaf.data()?;
        let mh = sig.minhash().ok_or_else(|| Error::Internal {
            message: format!("leaf {} holds no MinHash", pos),
        })?;
        Ok((leaf, mh))
    }

    /// Persist the tree: one file per node and leaf plus a JSON
    /// descriptor at `path`.
    pub fn save_file<P: AsRef<Path>>(
        &mut self,
        path: P,
        storage: Option<InnerStorage>,
    ) -> Result<()> {
        let ref_path = path.as_ref();
        let mut basename = ref_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Internal {
                message: "invalid SBT path".into(),
            })?
            .to_owned();
        if basename.ends_with(".sbt.json") {
            basename = basename.replace(".sbt.json", "");
        }
        let location = ref_path.parent().unwrap_or_else(|| Path::new("."));

        let (storage, args) = match storage {
            Some(s) => {
                let args = s.args();
                (s, args)
            }
            None => {
                let subdir = format!(".sbt.{}", basename);
                let fs = FSStorage::new(&location.to_string_lossy(), &subdir);
                let args = fs.args();
                (InnerStorage::new(fs), args)
            }
        };

        let storage_info = StorageInfo {
            backend: "FSStorage".into(),
            args,
        };

        let mut nodes = HashMap::with_capacity(self.nodes.len());
        for (n, node) in self.nodes.iter_mut() {
            node.data()?;
            node.storage = Some(storage.clone());

            let filename = node.save(&format!("internal.{}", n))?;
            nodes.insert(
                *n,
                NodeInfo {
                    filename,
                    name: node.name.clone(),
                    metadata: node.metadata.clone(),
                },
            );
        }

        let mut signatures = HashMap::with_capacity(self.leaves.len());
        for (n, leaf) in self.leaves.iter() {
            let sig = leaf.data()?;
            let filename = format!("signature.{}", sig.md5sum());

            let mut buffer = Vec::new();
            sig.to_writer(&mut buffer)?;
            let filename = storage.save(&filename, &buffer)?;

            signatures.insert(
                *n,
                DatasetInfo {
                    filename,
                    name: leaf.name(),
                    metadata: String::new(),
                },
            );
        }

        let info = SbtInfo {
            d: self.d,
            version: 6,
            storage: storage_info,
            factory: self.factory.clone(),
            nodes,
            signatures,
        };

        let file = File::create(path)?;
        serde_json::to_writer(file, &info)?;
        self.storage = Some(storage);

        Ok(())
    }

    /// Load a tree descriptor; node and leaf data stay on disk until
    /// touched.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<SBT> {
        let file = File::open(&path)?;
        let reader = BufReader::new(file);

        let sinfo: SbtInfo = serde_json::from_reader(reader).map_err(|e| Error::CorruptedSbt {
            message: e.to_string(),
        })?;
        if sinfo.d != 2 {
            return Err(Error::CorruptedSbt {
                message: format!("unsupported fan-out {}", sinfo.d),
            });
        }

        let mut st: FSStorage = (&sinfo.storage.args).into();
        let basepath = path
            .as_ref()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_string_lossy()
            .to_string();
        st.set_base(&basepath);
        let storage = InnerStorage::new(st);

        let nodes = sinfo
            .nodes
            .into_iter()
            .map(|(n, l)| {
                (
                    n,
                    Node::builder()
                        .filename(l.filename)
                        .name(l.name)
                        .metadata(l.metadata)
                        .storage(Some(storage.clone()))
                        .build(),
                )
            })
            .collect();

        let leaves = sinfo
            .signatures
            .into_iter()
            .map(|(n, l)| {
                (
                    n,
                    SigStore::builder()
                        .filename(l.filename)
                        .name(l.name)
                        .storage(Some(storage.clone()))
                        .build(),
                )
            })
            .collect();

        Ok(SBT {
            d: sinfo.d,
            factory: sinfo.factory,
            storage: Some(storage),
            nodes,
            leaves,
        })
    }
}

impl Index for SBT {
    fn len(&self) -> usize {
        self.leaves.len()
    }

    fn signatures(&self) -> Result<Vec<SigStore>> {
        self.leaves
            .values()
            .map(|leaf| {
                leaf.data()?;
                Ok(leaf.clone())
            })
            .collect()
    }

    fn search(
        &self,
        query: &KmerMinHash,
        measure: SearchMeasure,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        let positions = self.find_leaves(|node| {
            let bound = match measure {
                SearchMeasure::Jaccard => node.similarity_bound(query)?,
                SearchMeasure::Containment => node.containment_bound(query)?,
                SearchMeasure::MaxContainment => f64::max(
                    node.containment_bound(query)?,
                    node.similarity_bound(query)?,
                ),
            };
            Ok(bound >= threshold)
        })?;

        let mut matches = vec![];
        for pos in positions {
            let (leaf, mh) = self.leaf_minhash(pos)?;
            let score = measure.measure(query, mh)?;
            if score >= threshold && score > 0. {
                matches.push(SearchResult::new(
                    score,
                    leaf.name(),
                    mh.md5sum(),
                    leaf.filename(),
                ));
            }
        }

        sort_matches(&mut matches);
        Ok(matches)
    }

    fn prefetch(&self, query: &KmerMinHash, threshold_bp: u64) -> Result<Vec<PrefetchResult>> {
        if query.scaled() == 0 {
            return Err(Error::ScaledRequired);
        }
        let threshold_hashes = (threshold_bp + query.scaled() - 1) / query.scaled();

        let positions =
            self.find_leaves(|node| Ok(node.overlap_bound(query)? >= threshold_hashes))?;

        let mut matches = vec![];
        for pos in positions {
            let (leaf, mh) = self.leaf_minhash(pos)?;
            let (overlap, scaled, _q_ds, m_ds) = downsampled_overlap(query, mh)?;
            if overlap > 0 && overlap * scaled >= threshold_bp {
                matches.push(PrefetchResult {
                    name: leaf.name(),
                    md5sum: mh.md5sum(),
                    location: leaf.filename(),
                    minhash: m_ds,
                    overlap,
                });
            }
        }

        Ok(matches)
    }
}

type LeafHashes = HashSet<u64, BuildNoHashHasher<u64>>;

/// A subtree under construction: the union of all hashes below it and
/// the smallest leaf size, carried up so internal filters and their
/// `min_n_below` bound can be materialized in one pass.
struct Cluster {
    hashes: LeafHashes,
    min_leaf: u64,
    kind: ClusterKind,
}

enum ClusterKind {
    Leaf(SigStore),
    Pair(Box<Cluster>, Option<Box<Cluster>>),
}

impl Cluster {
    fn leaf(sig: SigStore) -> Result<Cluster> {
        let mh = sig.data()?.minhash().ok_or_else(|| Error::Internal {
            message: "scaffold leaf without a MinHash".into(),
        })?;
        let hashes: LeafHashes = mh.iter_mins().copied().collect();
        let min_leaf = u64::max(1, hashes.len() as u64);

        Ok(Cluster {
            hashes,
            min_leaf,
            kind: ClusterKind::Leaf(sig),
        })
    }

    fn pair(left: Cluster, right: Option<Cluster>) -> Cluster {
        let mut hashes: LeafHashes = left.hashes.iter().copied().collect();
        let mut min_leaf = left.min_leaf;
        if let Some(ref r) = right {
            hashes.extend(r.hashes.iter().copied());
            min_leaf = u64::min(min_leaf, r.min_leaf);
        }

        Cluster {
            hashes,
            min_leaf,
            kind: ClusterKind::Pair(Box::new(left), right.map(Box::new)),
        }
    }

    fn overlap(&self, other: &Cluster) -> usize {
        let (small, large) = if self.hashes.len() <= other.hashes.len() {
            (&self.hashes, &other.hashes)
        } else {
            (&other.hashes, &self.hashes)
        };
        small.iter().filter(|h| large.contains(h)).count()
    }
}

/// One clustering round: take each subtree and pair it with the
/// remaining subtree it shares the most hashes with. An odd one out
/// gets a single-child parent.
fn pair_round(mut current: Vec<Cluster>) -> Vec<Cluster> {
    let mut next = Vec::with_capacity(current.len() / 2 + 1);

    while let Some(item) = current.pop() {
        if current.is_empty() {
            next.push(Cluster::pair(item, None));
            break;
        }

        let mut partner_pos = 0;
        let mut best_overlap = 0;
        for (pos, cand) in current.iter().enumerate() {
            let common = item.overlap(cand);
            if common > best_overlap {
                best_overlap = common;
                partner_pos = pos;
            }
        }
        let partner = current.remove(partner_pos);
        next.push(Cluster::pair(item, Some(partner)));
    }

    next
}

/// Batch tree construction: repeatedly pair the most-similar subtrees
/// bottom-up until one root remains, then materialize one Bloom filter
/// per internal cluster from its union hash set. Groups similar leaves
/// under shared ancestors, which is what makes search pruning bite.
pub fn scaffold(datasets: Vec<SigStore>, factory: Factory) -> Result<SBT> {
    let mut sbt = SBT::new(factory);
    if datasets.is_empty() {
        return Ok(sbt);
    }
    if datasets.len() == 1 {
        let sig = datasets.into_iter().next().expect("one dataset");
        sbt.leaves.insert(0, sig);
        return Ok(sbt);
    }

    info!("scaffolding a tree over {} leaves", datasets.len());
    let mut round = datasets
        .into_iter()
        .map(Cluster::leaf)
        .collect::<Result<Vec<_>>>()?;
    while round.len() > 1 {
        round = pair_round(round);
    }
    let root = round.pop().expect("one cluster remains after pairing");

    let mut queue = vec![(0u64, root)];
    while let Some((pos, cluster)) = queue.pop() {
        match cluster.kind {
            ClusterKind::Leaf(sig) => {
                sbt.leaves.insert(pos, sig);
            }
            ClusterKind::Pair(left, right) => {
                let mut node = sbt.factory(&format!("internal.{}", pos))?;
                {
                    let ng = node.data.get_mut().expect("factory nodes are resident");
                    for h in &cluster.hashes {
                        ng.count(*h);
                    }
                }
                node.metadata.insert("min_n_below".into(), cluster.min_leaf);
                sbt.nodes.insert(pos, node);

                let children = sbt.children(pos);
                queue.push((children[0], *left));
                if let Some(right) = right {
                    queue.push((children[1], *right));
                }
            }
        }
    }

    Ok(sbt)
}

#[derive(Serialize, Deserialize, Debug)]
struct NodeInfo {
    filename: String,
    name: String,
    metadata: HashMap<String, u64>,
}

#[derive(Serialize, Deserialize, Debug)]
struct DatasetInfo {
    filename: String,
    name: String,
    metadata: String,
}

#[derive(Serialize, Deserialize)]
struct SbtInfo {
    d: u32,
    version: u32,
    storage: StorageInfo,
    factory: Factory,
    nodes: HashMap<u64, NodeInfo>,
    signatures: HashMap<u64, DatasetInfo>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collection::Collection;
    use crate::encodings::HashFunctions;
    use crate::signature::Signature;
    use crate::sketch::Sketch;

    fn scaled_sig(name: &str, hashes: &[u64]) -> Signature {
        let mut mh = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        mh.add_many(hashes).unwrap();
        Signature::builder()
            .name(Some(name.into()))
            .signatures(vec![Sketch::MinHash(mh)])
            .build()
    }

    fn test_tree() -> SBT {
        let collection = Collection::from_sigs(vec![
            scaled_sig("a", &[1, 2, 3, 4]),
            scaled_sig("b", &[3, 4, 5, 6]),
            scaled_sig("c", &[100, 101, 102]),
            scaled_sig("d", &[200, 201]),
        ])
        .unwrap();
        SBT::from_collection(collection.try_into().unwrap()).unwrap()
    }

    #[test]
    fn tree_shape() {
        let sbt = test_tree();
        assert_eq!(sbt.len(), 4);
        assert!(!sbt.nodes.is_empty());
    }

    #[test]
    fn search_matches_linear_results() {
        use crate::index::linear::LinearIndex;

        let sigs = vec![
            scaled_sig("a", &[1, 2, 3, 4]),
            scaled_sig("b", &[3, 4, 5, 6]),
            scaled_sig("c", &[100, 101, 102]),
            scaled_sig("d", &[200, 201]),
        ];

        let sbt = {
            let collection = Collection::from_sigs(sigs.clone()).unwrap();
            SBT::from_collection(collection.try_into().unwrap()).unwrap()
        };
        let linear = {
            let collection = Collection::from_sigs(sigs).unwrap();
            LinearIndex::from_collection(collection.try_into().unwrap())
        };

        let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        query.add_many(&[1, 2, 3, 4]).unwrap();

        for threshold in [0.0, 0.1, 0.5, 0.9] {
            let mut from_sbt: Vec<String> = sbt
                .search(&query, SearchMeasure::Jaccard, threshold)
                .unwrap()
                .iter()
                .map(|m| m.name().clone())
                .collect();
            let mut from_linear: Vec<String> = linear
                .search(&query, SearchMeasure::Jaccard, threshold)
                .unwrap()
                .iter()
                .map(|m| m.name().clone())
                .collect();
            from_sbt.sort();
            from_linear.sort();
            assert_eq!(from_sbt, from_linear, "threshold {}", threshold);
        }
    }

    #[test]
    fn incremental_insert_matches_scaffold() {
        let sigs = vec![
            scaled_sig("a", &[1, 2, 3, 4]),
            scaled_sig("b", &[3, 4, 5, 6]),
            scaled_sig("c", &[100, 101, 102]),
            scaled_sig("d", &[200, 201]),
        ];

        let scaffolded = {
            let collection = Collection::from_sigs(sigs.clone()).unwrap();
            SBT::from_collection(collection.try_into().unwrap()).unwrap()
        };

        let incremental = {
            let collection = Collection::from_sigs(sigs).unwrap();
            let collection: crate::collection::CollectionSet = collection.try_into().unwrap();
            let mut sbt = SBT::new(Factory::default());
            for (i, _record) in collection.iter() {
                sbt.insert(collection.sig_for_dataset(i).unwrap()).unwrap();
            }
            sbt
        };

        assert_eq!(scaffolded.len(), incremental.len());

        let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        query.add_many(&[1, 2, 3, 4, 100, 101]).unwrap();

        for threshold in [0.0, 0.1, 0.5] {
            let mut a: Vec<String> = scaffolded
                .search(&query, SearchMeasure::Jaccard, threshold)
                .unwrap()
                .iter()
                .map(|m| m.name().clone())
                .collect();
            let mut b: Vec<String> = incremental
                .search(&query, SearchMeasure::Jaccard, threshold)
                .unwrap()
                .iter()
                .map(|m| m.name().clone())
                .collect();
            a.sort();
            b.sort();
            assert_eq!(a, b, "threshold {}", threshold);
        }
    }

    #[test]
    fn scaffold_groups_similar_leaves() {
        // two pairs of near-identical signatures: each pair must share
        // a parent so pruning can skip the other subtree
        let sigs = vec![
            scaled_sig("a1", &[1, 2, 3, 4]),
            scaled_sig("b1", &[100, 101, 102, 103]),
            scaled_sig("a2", &[1, 2, 3, 5]),
            scaled_sig("b2", &[100, 101, 102, 104]),
        ];

        let collection = Collection::from_sigs(sigs).unwrap();
        let sbt = SBT::from_collection(collection.try_into().unwrap()).unwrap();

        // siblings share a parent position: parent(2p+1) == parent(2p+2)
        let mut by_parent: std::collections::HashMap<u64, Vec<String>> = Default::default();
        for (pos, leaf) in sbt.leaves.iter() {
            by_parent
                .entry(parent(*pos, 2))
                .or_default()
                .push(leaf.name());
        }

        for siblings in by_parent.values_mut() {
            siblings.sort();
            let stems: Vec<char> = siblings
                .iter()
                .filter_map(|n| n.chars().next())
                .collect();
            assert!(
                stems.windows(2).all(|w| w[0] == w[1]),
                "mixed siblings: {:?}",
                siblings
            );
        }
    }

    #[test]
    fn prefetch_finds_overlaps() {
        let sbt = test_tree();

        let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        query.add_many(&[1, 2, 3, 100, 101]).unwrap();

        let mut names: Vec<String> = sbt
            .prefetch(&query, 2)
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn descriptor_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let descriptor = dir.path().join("tree.sbt.json");

        let mut sbt = test_tree();
        sbt.save_file(&descriptor, None).unwrap();

        let loaded = SBT::from_path(&descriptor).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.d(), 2);

        let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        query.add_many(&[1, 2, 3, 4]).unwrap();

        let matches = loaded
            .search(&query, SearchMeasure::Jaccard, 0.5)
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name(), "a");
    }

    #[test]
    fn corrupt_descriptor_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let descriptor = dir.path().join("bad.sbt.json");
        std::fs::write(&descriptor, b"{ not json").unwrap();

        assert!(matches!(
            SBT::from_path(&descriptor),
            Err(Error::CorruptedSbt { .. })
        ));
    }
}
