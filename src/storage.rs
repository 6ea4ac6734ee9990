//! # Storage backends for collections
//!
//! Anything that can hold named blobs of bytes: a directory on disk, an
//! in-memory map, or a read-only (memory-mapped) zip archive. Signature
//! handles loaded from a storage are lazy: bytes are only parsed when
//! the signature is actually needed.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsStr;
use std::fs::{DirBuilder, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use once_cell::sync::OnceCell;
use thiserror::Error as ThisError;
use typed_builder::TypedBuilder;

use crate::prelude::*;
use crate::signature::Signature;
use crate::Error;

/// An abstraction for any place where we can store data.
pub trait Storage {
    /// Save bytes into path.
    fn save(&self, path: &str, content: &[u8]) -> Result<String, Error>;

    /// Load bytes from path.
    fn load(&self, path: &str) -> Result<Vec<u8>, Error>;

    /// Args for initializing a new Storage.
    fn args(&self) -> StorageArgs;
}

#[derive(Debug, ThisError)]
pub enum StorageError {
    #[error("path can't be empty")]
    EmptyPathError,

    #[error("path not found: {0}")]
    PathNotFoundError(String),

    #[error("error reading data from {0}")]
    DataReadError(String),

    #[error("storage is read-only: {0}")]
    ReadOnly(String),
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum StorageArgs {
    FSStorage { path: String },
}

#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct StorageInfo {
    pub backend: String,
    pub args: StorageArgs,
}

/// Shared, cloneable handle over a concrete storage.
#[derive(Clone)]
pub struct InnerStorage(Arc<Mutex<dyn Storage + Send + Sync>>);

impl InnerStorage {
    pub fn new(inner: impl Storage + Send + Sync + 'static) -> InnerStorage {
        InnerStorage(Arc::new(Mutex::new(inner)))
    }

    /// Load and parse a signature file from this storage. Multi-record
    /// files return their first signature.
    pub fn load_sig(&self, path: &str) -> Result<SigStore, Error> {
        let raw = self.load(path)?;
        let mut sigs = Signature::from_reader(&raw[..])?;
        if sigs.is_empty() {
            return Err(StorageError::DataReadError(path.into()).into());
        }
        let sig = sigs.swap_remove(0);

        Ok(SigStore::builder()
            .filename(path)
            .name(sig.name())
            .storage(Some(self.clone()))
            .data(sig)
            .build())
    }
}

impl Storage for InnerStorage {
    fn save(&self, path: &str, content: &[u8]) -> Result<String, Error> {
        self.0.lock().unwrap().save(path, content)
    }

    fn load(&self, path: &str) -> Result<Vec<u8>, Error> {
        self.0.lock().unwrap().load(path)
    }

    fn args(&self) -> StorageArgs {
        self.0.lock().unwrap().args()
    }
}

impl From<&StorageArgs> for FSStorage {
    fn from(other: &StorageArgs) -> FSStorage {
        match other {
            StorageArgs::FSStorage { path } => {
                let mut fullpath = PathBuf::new();
                fullpath.push(".");
                fullpath.push(path);

                FSStorage {
                    fullpath,
                    subdir: path.clone(),
                }
            }
        }
    }
}

/// Store files locally into a directory.
#[derive(TypedBuilder, Debug, Clone, Default)]
pub struct FSStorage {
    /// absolute path for the directory where data is saved.
    fullpath: PathBuf,
    subdir: String,
}

impl FSStorage {
    pub fn new(location: &str, subdir: &str) -> FSStorage {
        let mut fullpath = PathBuf::new();
        fullpath.push(location);
        fullpath.push(subdir);

        FSStorage {
            fullpath,
            subdir: subdir.into(),
        }
    }

    pub fn set_base(&mut self, location: &str) {
        let mut fullpath = PathBuf::new();
        fullpath.push(location);
        fullpath.push(&self.subdir);
        self.fullpath = fullpath;
    }
}

impl Storage for FSStorage {
    fn save(&self, path: &str, content: &[u8]) -> Result<String, Error> {
        if path.is_empty() {
            return Err(StorageError::EmptyPathError.into());
        }

        let fpath = self.fullpath.join(path);
        DirBuilder::new()
            .recursive(true)
            .create(fpath.parent().unwrap())?;

        let file = File::create(&fpath)?;
        let mut buf_writer = BufWriter::new(file);
        buf_writer.write_all(content)?;
        Ok(path.into())
    }

    fn load(&self, path: &str) -> Result<Vec<u8>, Error> {
        let path = self.fullpath.join(path);
        let file = File::open(path)?;
        let mut buf_reader = BufReader::new(file);
        let mut contents = Vec::new();
        buf_reader.read_to_end(&mut contents)?;
        Ok(contents)
    }

    fn args(&self) -> StorageArgs {
        StorageArgs::FSStorage {
            path: self.subdir.clone(),
        }
    }
}

/// Keep serialized signatures in memory; used for collections built
/// directly from in-memory signatures.
#[derive(Clone, Default)]
pub struct MemStorage {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemStorage {
    pub fn new() -> MemStorage {
        Default::default()
    }

    pub fn save_sig(&self, path: &str, sig: &Signature) -> Result<String, Error> {
        let mut buffer = vec![];
        sig.to_writer(&mut buffer)?;
        self.save(path, &buffer)
    }
}

impl Storage for MemStorage {
    fn save(&self, path: &str, content: &[u8]) -> Result<String, Error> {
        self.data
            .write()
            .unwrap()
            .insert(path.into(), content.into());
        Ok(path.into())
    }

    fn load(&self, path: &str) -> Result<Vec<u8>, Error> {
        self.data
            .read()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::PathNotFoundError(path.into()).into())
    }

    fn args(&self) -> StorageArgs {
        unimplemented!("in-memory storages are not persistable")
    }
}

type Metadata<'a> = BTreeMap<&'a OsStr, &'a piz::read::FileMetadata<'a>>;

/// Read-only zip archive, memory-mapped.
#[ouroboros::self_referencing]
pub struct ZipStorage {
    mapping: memmap2::Mmap,

    #[borrows(mapping)]
    #[covariant]
    archive: piz::ZipArchive<'this>,

    subdir: Option<String>,
    path: Option<String>,

    #[borrows(archive)]
    #[covariant]
    metadata: Metadata<'this>,
}

fn lookup<'a, P: AsRef<Path>>(
    metadata: &'a Metadata,
    path: P,
) -> Result<&'a piz::read::FileMetadata<'a>, Error> {
    let path = path.as_ref();
    metadata
        .get(&path.as_os_str())
        .ok_or_else(|| StorageError::PathNotFoundError(path.to_string_lossy().into()).into())
        .map(|entry| *entry)
}

fn find_subdirs<'a>(archive: &'a piz::ZipArchive<'a>) -> Option<String> {
    let subdirs: Vec<_> = archive
        .entries()
        .iter()
        .filter(|entry| entry.is_dir())
        .collect();
    if subdirs.len() == 1 {
        Some(subdirs[0].path.as_str().into())
    } else {
        None
    }
}

impl Storage for ZipStorage {
    fn save(&self, path: &str, _content: &[u8]) -> Result<String, Error> {
        Err(StorageError::ReadOnly(path.into()).into())
    }

    fn load(&self, path: &str) -> Result<Vec<u8>, Error> {
        let metadata = self.borrow_metadata();

        let entry = lookup(metadata, path).or_else(|_| {
            if let Some(subdir) = self.borrow_subdir() {
                lookup(metadata, subdir.to_owned() + path)
                    .map_err(|_| StorageError::PathNotFoundError(path.into()))
            } else {
                Err(StorageError::PathNotFoundError(path.into()))
            }
        })?;

        let mut reader = BufReader::new(
            self.borrow_archive()
                .read(entry)
                .map_err(|_| StorageError::DataReadError(path.into()))?,
        );
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents)?;

        Ok(contents)
    }

    fn args(&self) -> StorageArgs {
        unimplemented!("zip storages are read-only")
    }
}

impl ZipStorage {
    pub fn from_file(location: &str) -> Result<Self, Error> {
        let zip_file = File::open(location)?;
        let mapping = unsafe { memmap2::Mmap::map(&zip_file)? };

        let mut storage = ZipStorageBuilder {
            mapping,
            archive_builder: |mapping: &memmap2::Mmap| {
                piz::ZipArchive::new(mapping).expect("error opening zip archive")
            },
            metadata_builder: |archive: &piz::ZipArchive| {
                archive
                    .entries()
                    .iter()
                    .map(|entry| (entry.path.as_os_str(), entry))
                    .collect()
            },
            subdir: None,
            path: Some(location.to_owned()),
        }
        .build();

        let subdir = find_subdirs(storage.borrow_archive());
        storage.with_mut(|fields| *fields.subdir = subdir);

        Ok(storage)
    }

    pub fn path(&self) -> Option<String> {
        self.borrow_path().clone()
    }

    pub fn subdir(&self) -> Option<String> {
        self.borrow_subdir().clone()
    }

    pub fn filenames(&self) -> Vec<String> {
        self.borrow_archive()
            .entries()
            .iter()
            .filter(|entry| !entry.is_dir())
            .map(|entry| entry.path.as_str().into())
            .collect()
    }
}

/// A signature handle inside a collection: knows its name and location
/// up front, loads (and keeps) the signature itself on first use.
#[derive(TypedBuilder, Default, Clone)]
pub struct SigStore {
    #[builder(setter(into))]
    filename: String,

    #[builder(setter(into))]
    name: String,

    #[builder(default)]
    storage: Option<InnerStorage>,

    #[builder(setter(into), default)]
    data: OnceCell<Signature>,
}

impl SigStore {
    pub fn name(&self) -> String {
        self.name.clone()
    }

    /// Location of this signature inside its storage.
    pub fn filename(&self) -> String {
        self.filename.clone()
    }
}

impl std::fmt::Debug for SigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SigStore [filename: {}, name: {}]",
            self.filename, self.name
        )
    }
}

impl ReadData<Signature> for SigStore {
    fn data(&self) -> Result<&Signature, Error> {
        if let Some(sig) = self.data.get() {
            Ok(sig)
        } else if let Some(storage) = &self.storage {
            let sig = self.data.get_or_try_init(|| -> Result<Signature, Error> {
                let raw = storage.load(&self.filename)?;
                let mut sigs = Signature::from_reader(&raw[..])?;
                if sigs.is_empty() {
                    return Err(StorageError::DataReadError(self.filename.clone()).into());
                }
                Ok(sigs.swap_remove(0))
            })?;

            Ok(sig)
        } else {
            Err(StorageError::DataReadError(self.filename.clone()).into())
        }
    }
}

impl From<SigStore> for Signature {
    fn from(other: SigStore) -> Signature {
        other
            .data
            .get()
            .expect("signature not loaded yet")
            .to_owned()
    }
}

impl Deref for SigStore {
    type Target = Signature;

    fn deref(&self) -> &Signature {
        self.data.get().expect("signature not loaded yet")
    }
}

impl From<Signature> for SigStore {
    fn from(other: Signature) -> SigStore {
        let name = other.name();
        let filename = other.filename();

        SigStore::builder()
            .name(name)
            .filename(filename)
            .data(other)
            .storage(None)
            .build()
    }
}
