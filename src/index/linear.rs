//! Linear index: scan every signature in a collection.
//!
//! The baseline index. Search and prefetch iterate the whole
//! collection, loading one signature at a time, so resident memory
//! stays at the query plus a single candidate.

use log::info;

use crate::collection::{CollectionSet, Idx};
use crate::index::prefetch::{downsampled_overlap, PrefetchResult};
use crate::index::search::{sort_matches, SearchMeasure, SearchResult};
use crate::index::Index;
use crate::manifest::Manifest;
use crate::prelude::*;
use crate::selection::Selection;
use crate::sketch::minhash::KmerMinHash;
use crate::sketch::Sketch;
use crate::storage::SigStore;
use crate::{Error, Result};

pub struct LinearIndex {
    collection: CollectionSet,
}

impl LinearIndex {
    pub fn from_collection(collection: CollectionSet) -> Self {
        Self { collection }
    }

    pub fn collection(&self) -> &CollectionSet {
        &self.collection
    }

    pub fn manifest(&self) -> Manifest {
        self.collection.manifest().clone()
    }

    pub fn sig_for_dataset(&self, dataset_id: Idx) -> Result<SigStore> {
        self.collection.sig_for_dataset(dataset_id)
    }

    /// Stream signatures one at a time, in manifest order.
    pub fn signatures_iter(&self) -> impl Iterator<Item = Result<SigStore>> + '_ {
        (0..self.collection.len() as Idx).map(move |i| self.collection.sig_for_dataset(i))
    }

    fn minhash_for_dataset(&self, dataset_id: Idx) -> Result<(SigStore, KmerMinHash)> {
        let sig = self.collection.sig_for_dataset(dataset_id)?;
        let mh = {
            let data = sig.data()?;
            let Some(Sketch::MinHash(mh)) = data.get_sketch() else {
                return Err(Error::Internal {
                    message: format!("no sketch for dataset {}", dataset_id),
                });
            };
            mh.clone()
        };
        Ok((sig, mh))
    }
}

impl Select for LinearIndex {
    fn select(self, selection: &Selection) -> Result<Self> {
        let collection = self.collection.select(selection)?;
        Ok(Self { collection })
    }
}

impl Index for LinearIndex {
    fn len(&self) -> usize {
        self.collection.len()
    }

    fn signatures(&self) -> Result<Vec<SigStore>> {
        self.signatures_iter().collect()
    }

    fn search(
        &self,
        query: &KmerMinHash,
        measure: SearchMeasure,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        let mut matches = vec![];

        for (dataset_id, record) in self.collection.iter() {
            if dataset_id % 1000 == 0 && dataset_id > 0 {
                info!("processed {} reference sigs", dataset_id);
            }

            let (_sig, against) = self.minhash_for_dataset(dataset_id)?;
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
        if query.scaled() == 0 {
            return Err(Error::ScaledRequired);
        }

        let mut matches = vec![];
        for (dataset_id, record) in self.collection.iter() {
            let (_sig, against) = self.minhash_for_dataset(dataset_id)?;
            let (overlap, scaled, _q_ds, m_ds) = downsampled_overlap(query, &against)?;

            if overlap > 0 && overlap * scaled >= threshold_bp {
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
