//! # Collections: manifest + storage
//!
//! A collection pairs a manifest (what is in here) with a storage (how
//! to get the bytes). Selection narrows the manifest without touching
//! the storage; signatures are only deserialized on demand.

use std::ops::{Deref, DerefMut};

use camino::Utf8Path as Path;
use log::{debug, info};

use crate::manifest::{Manifest, Record};
use crate::prelude::*;
use crate::selection::Selection;
use crate::signature::Signature;
use crate::storage::{FSStorage, InnerStorage, MemStorage, SigStore, ZipStorage};
use crate::{Error, Result};

/// Dataset index inside a collection.
pub type Idx = u32;

/// Standard location of the manifest inside zip collections.
pub const MANIFEST_LOCATION: &str = "SOURMASH-MANIFEST.csv";

pub struct Collection {
    manifest: Manifest,
    storage: InnerStorage,
}

/// A collection whose sketches are all compatible (same ksize, moltype
/// and capacity mode). SBTs and inverted indices require this.
pub struct CollectionSet {
    collection: Collection,
}

impl Deref for CollectionSet {
    type Target = Collection;

    fn deref(&self) -> &Self::Target {
        &self.collection
    }
}

impl DerefMut for CollectionSet {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.collection
    }
}

impl TryFrom<Collection> for CollectionSet {
    type Error = Error;

    fn try_from(collection: Collection) -> Result<Self> {
        let first = if let Some(first) = collection.manifest.first() {
            first
        } else {
            // an empty collection is trivially consistent
            return Ok(Self { collection });
        };

        collection
            .manifest
            .iter()
            .skip(1)
            .try_for_each(|c| first.check_compatible(c))?;

        Ok(Self { collection })
    }
}

impl CollectionSet {
    pub fn into_inner(self) -> Collection {
        self.collection
    }

    /// The common template of every sketch in this collection.
    pub fn template_record(&self) -> Result<&Record> {
        self.manifest.first().ok_or(Error::EmptyCollection)
    }
}

impl Select for CollectionSet {
    fn select(self, selection: &Selection) -> Result<Self> {
        self.into_inner().select(selection)?.try_into()
    }
}

impl Collection {
    pub fn new(manifest: Manifest, storage: InnerStorage) -> Self {
        Self { manifest, storage }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Idx, &Record)> {
        self.manifest.iter().enumerate().map(|(i, r)| (i as Idx, r))
    }

    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.len() == 0
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn storage(&self) -> &InnerStorage {
        &self.storage
    }

    /// Open a zip collection. The manifest is read from its standard
    /// location, or synthesized by scanning `.sig`/`.sig.gz` entries
    /// when absent.
    pub fn from_zipfile<P: AsRef<Path>>(zipfile: P) -> Result<Self> {
        let storage = ZipStorage::from_file(zipfile.as_ref().as_str())?;

        let manifest = match storage.load(MANIFEST_LOCATION) {
            Ok(bytes) => Manifest::from_reader(bytes.as_slice())?,
            Err(_) => {
                info!(
                    "no manifest in {}; synthesizing from archive entries",
                    zipfile.as_ref()
                );
                let mut records = vec![];
                for entry in storage.filenames() {
                    if !(entry.ends_with(".sig") || entry.ends_with(".sig.gz")) {
                        continue;
                    }
                    let raw = storage.load(&entry)?;
                    for sig in Signature::from_reader(raw.as_slice())? {
                        records.extend(Record::from_sig(&sig, &entry));
                    }
                }
                records.into()
            }
        };

        Ok(Self {
            manifest,
            storage: InnerStorage::new(storage),
        })
    }

    /// Build an in-memory collection from signatures.
    pub fn from_sigs(sigs: Vec<Signature>) -> Result<Self> {
        let storage = MemStorage::new();

        let mut records = vec![];
        for (i, sig) in sigs.into_iter().enumerate() {
            let path = format!("{}", i);
            let mut sig_records = Record::from_sig(&sig, &path);
            let path = storage.save_sig(&path, &sig)?;
            sig_records.iter_mut().for_each(|rec| {
                rec.set_internal_location(path.clone().into());
            });
            records.extend(sig_records);
        }

        Ok(Self {
            manifest: records.into(),
            storage: InnerStorage::new(storage),
        })
    }

    /// Build a collection from signature files on disk; locations stay
    /// as the given paths.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut records = vec![];
        for path in paths {
            let sigs = Signature::from_path(path.as_ref().as_std_path())?;
            for sig in sigs {
                records.extend(Record::from_sig(&sig, path.as_ref().as_str()));
            }
        }

        Ok(Self {
            manifest: records.into(),
            storage: InnerStorage::new(
                FSStorage::builder()
                    .fullpath("".into())
                    .subdir("".into())
                    .build(),
            ),
        })
    }

    /// Scan a directory (recursively) for signature files.
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut sig_paths = vec![];
        let mut pending = vec![dir.as_ref().as_std_path().to_path_buf()];

        while let Some(current) = pending.pop() {
            for entry in std::fs::read_dir(&current)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if name.ends_with(".sig") || name.ends_with(".sig.gz") {
                        sig_paths.push(path);
                    }
                }
            }
        }
        sig_paths.sort();
        debug!("found {} signature files under {}", sig_paths.len(), dir.as_ref());

        let utf8_paths: Vec<camino::Utf8PathBuf> = sig_paths
            .into_iter()
            .filter_map(|p| camino::Utf8PathBuf::from_path_buf(p).ok())
            .collect();

        Collection::from_paths(&utf8_paths)
    }

    /// Persist the collection as a directory of signature files plus a
    /// manifest. Collections are write-once: the target layout is
    /// created fresh and never updated in place.
    pub fn save_to_directory<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let out = FSStorage::new(dir.as_ref().as_str(), "");

        let mut new_records = vec![];
        for (idx, _record) in self.iter() {
            let sig = self.sig_for_dataset(idx)?;
            let location = format!("signatures/{}.sig", sig.md5sum());

            let mut buffer = vec![];
            sig.data()?.to_writer(&mut buffer)?;
            out.save(&location, &buffer)?;

            let mut recs = Record::from_sig(sig.data()?, &location);
            new_records.append(&mut recs);
        }

        let manifest: Manifest = new_records.into();
        let mut buffer = vec![];
        manifest.to_writer(&mut buffer)?;
        out.save(MANIFEST_LOCATION, &buffer)?;

        Ok(())
    }

    pub fn record_for_dataset(&self, dataset_id: Idx) -> Result<&Record> {
        self.manifest
            .get(dataset_id as usize)
            .ok_or_else(|| Error::Internal {
                message: format!("dataset {} out of bounds", dataset_id),
            })
    }

    /// Load the signature behind a manifest row, narrowed down to the
    /// single sketch the row describes.
    pub fn sig_for_dataset(&self, dataset_id: Idx) -> Result<SigStore> {
        let record = self.record_for_dataset(dataset_id)?;
        let match_path = record.internal_location().as_str();

        let selection = Selection::from_record(record)?;
        let sig = self.storage.load_sig(match_path)?;
        let mut sig: Signature = sig.into();
        sig = sig.select(&selection)?;

        if sig.size() != 1 {
            return Err(Error::Internal {
                message: format!(
                    "expected one sketch for {} after selection, found {}",
                    match_path,
                    sig.size()
                ),
            });
        }

        Ok(SigStore::builder()
            .filename(match_path)
            .name(sig.name())
            .storage(Some(self.storage.clone()))
            .data(sig)
            .build())
    }

    /// Stream every signature with its location hint, one at a time.
    pub fn signatures_with_location(&self) -> impl Iterator<Item = Result<(SigStore, String)>> + '_ {
        self.iter().map(move |(idx, record)| {
            let sig = self.sig_for_dataset(idx)?;
            Ok((sig, record.internal_location().to_string()))
        })
    }

    /// Stream every signature, one at a time.
    pub fn signatures(&self) -> impl Iterator<Item = Result<SigStore>> + '_ {
        self.iter().map(move |(idx, _)| self.sig_for_dataset(idx))
    }
}

impl Select for Collection {
    fn select(mut self, selection: &Selection) -> Result<Self> {
        self.manifest = self.manifest.select(selection)?;
        Ok(self)
    }
}
