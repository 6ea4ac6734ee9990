//! Inverted index: hash → dataset ids.
//!
//! Turns containment search into a streaming tally: each query hash
//! looks up the datasets containing it and bumps their counters, so
//! candidates are ranked without a cross-product over signatures.
//! Scaled sketches only, one scaled value per index; the map stays
//! resident in memory.

use std::collections::HashMap;

use log::{debug, info};
use nohash_hasher::BuildNoHashHasher;
use roaring::RoaringBitmap;

use crate::collection::{CollectionSet, Idx};
use crate::index::prefetch::{downsampled_overlap, PrefetchResult};
use crate::index::search::{sort_matches, SearchMeasure, SearchResult};
use crate::index::{Index, SigCounter};
use crate::prelude::*;
use crate::sketch::minhash::KmerMinHash;
use crate::sketch::Sketch;
use crate::storage::SigStore;
use crate::{Error, Result};
use crate::HashIntoType;

type HashToIdx = HashMap<HashIntoType, Datasets, BuildNoHashHasher<HashIntoType>>;

/// The set of datasets containing one hash. Most hashes occur in one
/// dataset, so the single-id case avoids a bitmap allocation.
#[derive(Debug, Default, Clone)]
pub enum Datasets {
    #[default]
    Empty,
    Unique(Idx),
    Many(RoaringBitmap),
}

impl IntoIterator for Datasets {
    type Item = Idx;
    type IntoIter = Box<dyn Iterator<Item = Self::Item>>;

    fn into_iter(self) -> Self::IntoIter {
        match self {
            Self::Empty => Box::new(std::iter::empty()),
            Self::Unique(v) => Box::new(std::iter::once(v)),
            Self::Many(v) => Box::new(v.into_iter()),
        }
    }
}

impl Extend<Idx> for Datasets {
    fn extend<T>(&mut self, iter: T)
    where
        T: IntoIterator<Item = Idx>,
    {
        if let Self::Many(v) = self {
            v.extend(iter);
            return;
        }

        let mut it = iter.into_iter();
        while let Some(value) = it.next() {
            match self {
                Self::Empty => *self = Datasets::Unique(value),
                Self::Unique(v) => {
                    if *v != value {
                        *self = Self::Many([*v, value].iter().copied().collect());
                    }
                }
                Self::Many(v) => {
                    v.extend(it);
                    return;
                }
            }
        }
    }
}

impl Datasets {
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Unique(_) => 1,
            Self::Many(v) => v.len() as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ids(&self) -> Vec<Idx> {
        match self {
            Self::Empty => vec![],
            Self::Unique(v) => vec![*v],
            Self::Many(v) => v.iter().collect(),
        }
    }
}

pub struct RevIndex {
    collection: CollectionSet,
    hash_to_idx: HashToIdx,
    scaled: u64,
}

impl RevIndex {
    /// Invert a compatible, scaled collection into the hash → ids map.
    pub fn from_collection(collection: CollectionSet) -> Result<RevIndex> {
        if collection.is_empty() {
            return Ok(RevIndex {
                collection,
                hash_to_idx: HashToIdx::with_hasher(BuildNoHashHasher::default()),
                scaled: 0,
            });
        }

        let scaled = collection.template_record()?.scaled();
        if scaled == 0 {
            return Err(Error::ScaledRequired);
        }

        let mut hash_to_idx = HashToIdx::with_hasher(BuildNoHashHasher::default());
        for (dataset_id, _record) in collection.iter() {
            if dataset_id % 1000 == 0 && dataset_id > 0 {
                info!("indexed {} reference sigs", dataset_id);
            }

            let sig = collection.sig_for_dataset(dataset_id)?;
            let data = sig.data()?;
            let Some(Sketch::MinHash(mh)) = data.get_sketch() else {
                continue;
            };

            for hash in mh.iter_mins() {
                hash_to_idx
                    .entry(*hash)
                    .or_default()
                    .extend(std::iter::once(dataset_id));
            }
        }
        debug!("inverted index over {} distinct hashes", hash_to_idx.len());

        Ok(RevIndex {
            collection,
            hash_to_idx,
            scaled,
        })
    }

    pub fn collection(&self) -> &CollectionSet {
        &self.collection
    }

    pub fn scaled(&self) -> u64 {
        self.scaled
    }

    /// Query downsampled to the index resolution, so every query hash
    /// is within the indexed range.
    fn query_for_index(&self, query: &KmerMinHash) -> Result<KmerMinHash> {
        if query.scaled() == 0 {
            return Err(Error::ScaledRequired);
        }
        if query.scaled() < self.scaled {
            query.downsample_scaled(self.scaled)
        } else {
            Ok(query.clone())
        }
    }

    /// Tally per-dataset hits for every query hash.
    pub fn counter_for_query(&self, query: &KmerMinHash) -> SigCounter {
        query
            .iter_mins()
            .filter_map(|hash| self.hash_to_idx.get(hash))
            .flat_map(|datasets| datasets.ids())
            .collect()
    }

    fn minhash_for_dataset(&self, dataset_id: Idx) -> Result<KmerMinHash> {
        let sig = self.collection.sig_for_dataset(dataset_id)?;
        let data = sig.data()?;
        let Some(Sketch::MinHash(mh)) = data.get_sketch() else {
            return Err(Error::Internal {
                message: format!("no sketch for dataset {}", dataset_id),
            });
        };
        Ok(mh.clone())
    }
}

impl Index for RevIndex {
    fn len(&self) -> usize {
        self.collection.len()
    }

    fn signatures(&self) -> Result<Vec<SigStore>> {
        (0..self.collection.len() as Idx)
            .map(|i| self.collection.sig_for_dataset(i))
            .collect()
    }

    fn search(
        &self,
        query: &KmerMinHash,
        measure: SearchMeasure,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        let q_idx = self.query_for_index(query)?;
        let counter = self.counter_for_query(&q_idx);

        let mut matches = vec![];
        for (dataset_id, count) in counter.most_common_ordered() {
            if count == 0 {
                break;
            }
            let record = self.collection.record_for_dataset(dataset_id)?;
            let against = self.minhash_for_dataset(dataset_id)?;
            let score = measure.measure(query, &against)?;

            if score >= threshold && score > 0. {
                matches.push(SearchResult::new(
                    score,
                    record.name().clone(),
                    record.md5().clone(),
                    record.internal_location().to_string(),
                ));
            }
        }

        sort_matches(&mut matches);
        Ok(matches)
    }

    fn prefetch(&self, query: &KmerMinHash, threshold_bp: u64) -> Result<Vec<PrefetchResult>> {
        let q_idx = self.query_for_index(query)?;
        let counter = self.counter_for_query(&q_idx);

        let mut matches = vec![];
        for (dataset_id, count) in counter.most_common_ordered() {
            if count == 0 {
                break;
            }
            // the tally is an upper bound at index resolution; confirm
            // with the exact overlap at the common scaled
            let against = self.minhash_for_dataset(dataset_id)?;
            let (overlap, scaled, _q_ds, m_ds) = downsampled_overlap(query, &against)?;

            if overlap > 0 && overlap * scaled >= threshold_bp {
                let record = self.collection.record_for_dataset(dataset_id)?;
                matches.push(PrefetchResult {
                    name: record.name().clone(),
                    md5sum: record.md5().clone(),
                    location: record.internal_location().to_string(),
                    minhash: m_ds,
                    overlap,
                });
            }
        }

        Ok(matches)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::collection::Collection;
    use crate::encodings::HashFunctions;
    use crate::index::gather::{GatherParams, QueryInfo};
    use crate::signature::Signature;

    fn scaled_sig(name: &str, hashes: &[u64]) -> Signature {
        let mut mh = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        mh.add_many(hashes).unwrap();
        Signature::builder()
            .name(Some(name.into()))
            .signatures(vec![Sketch::MinHash(mh)])
            .build()
    }

    fn test_index() -> RevIndex {
        let collection = Collection::from_sigs(vec![
            scaled_sig("a", &[1, 2, 3, 4]),
            scaled_sig("b", &[3, 4, 5, 6]),
            scaled_sig("c", &[100, 101]),
        ])
        .unwrap();
        RevIndex::from_collection(collection.try_into().unwrap()).unwrap()
    }

    #[test]
    fn counter_tally() {
        let index = test_index();

        let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        query.add_many(&[3, 4, 5]).unwrap();

        let counter = index.counter_for_query(&query);
        let common = counter.most_common_ordered();
        // b shares 3 hashes, a shares 2
        assert_eq!(common[0], (1, 3));
        assert_eq!(common[1], (0, 2));
    }

    #[test]
    fn num_collection_rejected() {
        let mut mh = KmerMinHash::with_num(10, 21, HashFunctions::Murmur64Dna, 42, false);
        mh.add_many(&[1, 2, 3]).unwrap();
        let sig = Signature::builder()
            .name(Some("n".into()))
            .signatures(vec![Sketch::MinHash(mh)])
            .build();

        let collection = Collection::from_sigs(vec![sig]).unwrap();
        let result = RevIndex::from_collection(collection.try_into().unwrap());
        assert!(matches!(result, Err(Error::ScaledRequired)));
    }

    #[test]
    fn search_agrees_with_linear() {
        use crate::index::linear::LinearIndex;

        let sigs = vec![
            scaled_sig("a", &[1, 2, 3, 4]),
            scaled_sig("b", &[3, 4, 5, 6]),
            scaled_sig("c", &[100, 101]),
        ];
        let rev = test_index();
        let linear = {
            let collection = Collection::from_sigs(sigs).unwrap();
            LinearIndex::from_collection(collection.try_into().unwrap())
        };

        let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        query.add_many(&[1, 2, 3, 4, 5]).unwrap();

        for measure in [
            SearchMeasure::Jaccard,
            SearchMeasure::Containment,
            SearchMeasure::MaxContainment,
        ] {
            let mut a: Vec<String> = rev
                .search(&query, measure, 0.1)
                .unwrap()
                .iter()
                .map(|m| m.name().clone())
                .collect();
            let mut b: Vec<String> = linear
                .search(&query, measure, 0.1)
                .unwrap()
                .iter()
                .map(|m| m.name().clone())
                .collect();
            a.sort();
            b.sort();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn gather_through_counters() {
        let index = test_index();

        let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        query.add_many(&[1, 2, 3, 4, 100, 101]).unwrap();

        let params = GatherParams::builder().threshold_bp(0).build();
        let info = QueryInfo::from_minhash(&query);
        let results = index.gather(&query, &params, &info).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name(), "a");
        assert_eq!(results[1].name(), "c");
    }
}
