//! Standalone manifest index: a catalog over other containers.
//!
//! The manifest's `internal_location` entries point at signature files
//! on disk, or at members of zip collections using the `zipfile::member`
//! form. Search is a linear scan with per-row lazy load; referenced zip
//! archives are opened once and cached.

use std::collections::HashMap;
use std::sync::RwLock;

use camino::{Utf8Path, Utf8PathBuf};

use crate::index::prefetch::{downsampled_overlap, PrefetchResult};
use crate::index::search::{sort_matches, SearchMeasure, SearchResult};
use crate::index::Index;
use crate::manifest::{Manifest, Record};
use crate::prelude::*;
use crate::selection::Selection;
use crate::sketch::minhash::KmerMinHash;
use crate::sketch::Sketch;
use crate::storage::{InnerStorage, SigStore, ZipStorage};
use crate::{Error, Result};

pub struct StandaloneManifestIndex {
    manifest: Manifest,
    base_dir: Utf8PathBuf,
    // zip containers referenced by rows, opened on demand
    zips: RwLock<HashMap<String, InnerStorage>>,
}

impl StandaloneManifestIndex {
    pub fn new(manifest: Manifest, base_dir: Utf8PathBuf) -> Self {
        StandaloneManifestIndex {
            manifest,
            base_dir,
            zips: RwLock::new(HashMap::new()),
        }
    }

    /// Load a manifest CSV; relative row locations resolve against the
    /// manifest's own directory.
    pub fn from_path<P: AsRef<Utf8Path>>(path: P) -> Result<Self> {
        let manifest = Manifest::from_path(path.as_ref().as_std_path())?;
        let base_dir = path
            .as_ref()
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| ".".into());
        Ok(Self::new(manifest, base_dir))
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn resolve(&self, location: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from(location);
        if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        }
    }

    fn zip_storage(&self, zip_path: &str) -> Result<InnerStorage> {
        if let Some(storage) = self.zips.read().unwrap().get(zip_path) {
            return Ok(storage.clone());
        }

        let resolved = self.resolve(zip_path);
        let storage = InnerStorage::new(ZipStorage::from_file(resolved.as_str())?);
        self.zips
            .write()
            .unwrap()
            .insert(zip_path.to_string(), storage.clone());
        Ok(storage)
    }

    /// Load the signature a row points at, narrowed to the sketch the
    /// row describes.
    pub fn sig_for_record(&self, record: &Record) -> Result<SigStore> {
        let location = record.internal_location().as_str();

        let sigs = if let Some((zip_path, member)) = location.split_once("::") {
            let storage = self.zip_storage(zip_path)?;
            let raw = storage.load(member)?;
            Signature::from_reader(&raw[..])?
        } else {
            Signature::from_path(self.resolve(location).as_std_path())?
        };

        let selection = Selection::from_record(record)?;
        let mut chosen = None;
        for sig in sigs {
            let sig = sig.select(&selection)?;
            if sig.size() == 1 {
                chosen = Some(sig);
                break;
            }
        }

        let sig = chosen.ok_or_else(|| Error::Internal {
            message: format!("no sketch matching manifest row at {}", location),
        })?;

        Ok(SigStore::builder()
            .filename(location)
            .name(sig.name())
            .data(sig)
            .build())
    }

    fn minhash_for_record(&self, record: &Record) -> Result<KmerMinHash> {
        let sig = self.sig_for_record(record)?;
        let data = sig.data()?;
        let Some(Sketch::MinHash(mh)) = data.get_sketch() else {
            return Err(Error::Internal {
                message: format!(
                    "no sketch behind manifest row at {}",
                    record.internal_location()
                ),
            });
        };
        Ok(mh.clone())
    }
}

impl Index for StandaloneManifestIndex {
    fn len(&self) -> usize {
        self.manifest.len()
    }

    fn signatures(&self) -> Result<Vec<SigStore>> {
        self.manifest
            .iter()
            .map(|record| self.sig_for_record(record))
            .collect()
    }

    fn search(
        &self,
        query: &KmerMinHash,
        measure: SearchMeasure,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        let mut matches = vec![];

        for record in self.manifest.iter() {
            let against = self.minhash_for_record(record)?;
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
        for record in self.manifest.iter() {
            let against = self.minhash_for_record(record)?;
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
