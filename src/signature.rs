//! # Signatures: named bundles of sketches
//!
//! A signature wraps one or more sketches of the same dataset with its
//! metadata, and is the unit of (de)serialization and exchange.

use core::iter::FusedIterator;

use std::fs::File;
use std::io;
use std::path::Path;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::encodings::{aa_to_dayhoff, aa_to_hp, revcomp, to_aa, HashFunctions, VALID};
use crate::prelude::*;
use crate::selection::{Select, Selection};
use crate::sketch::minhash::KmerMinHash;
use crate::sketch::Sketch;
use crate::Error;
use crate::HashIntoType;

/// Behavior shared by anything that can accumulate k-mer hashes.
pub trait SigsTrait {
    fn size(&self) -> usize;
    fn to_vec(&self) -> Vec<u64>;
    fn ksize(&self) -> usize;
    fn seed(&self) -> u64;
    fn hash_function(&self) -> HashFunctions;
    fn add_hash(&mut self, hash: HashIntoType);
    fn check_compatible(&self, other: &Self) -> Result<(), Error>;

    fn add_sequence(&mut self, seq: &[u8], force: bool) -> Result<(), Error> {
        let hashes = SeqToHashes::new(
            seq,
            self.ksize(),
            force,
            false,
            self.hash_function(),
            self.seed(),
        );

        for hash in hashes {
            self.add_hash(hash?);
        }

        Ok(())
    }

    fn add_protein(&mut self, seq: &[u8]) -> Result<(), Error> {
        let hashes = SeqToHashes::new(
            seq,
            self.ksize(),
            false,
            true,
            self.hash_function(),
            self.seed(),
        );

        for hash in hashes {
            self.add_hash(hash?);
        }

        Ok(())
    }
}

impl SigsTrait for Sketch {
    fn size(&self) -> usize {
        match *self {
            Sketch::MinHash(ref mh) => mh.size(),
        }
    }

    fn to_vec(&self) -> Vec<u64> {
        match *self {
            Sketch::MinHash(ref mh) => mh.to_vec(),
        }
    }

    fn ksize(&self) -> usize {
        match *self {
            Sketch::MinHash(ref mh) => mh.ksize(),
        }
    }

    fn seed(&self) -> u64 {
        match *self {
            Sketch::MinHash(ref mh) => mh.seed(),
        }
    }

    fn hash_function(&self) -> HashFunctions {
        match *self {
            Sketch::MinHash(ref mh) => mh.hash_function(),
        }
    }

    fn add_hash(&mut self, hash: HashIntoType) {
        match *self {
            Sketch::MinHash(ref mut mh) => mh.add_hash(hash),
        }
    }

    fn check_compatible(&self, other: &Self) -> Result<(), Error> {
        match *self {
            Sketch::MinHash(ref mh) => match other {
                Sketch::MinHash(ref ot) => mh.check_compatible(ot),
            },
        }
    }

    fn add_sequence(&mut self, seq: &[u8], force: bool) -> Result<(), Error> {
        match *self {
            Sketch::MinHash(ref mut mh) => mh.add_sequence(seq, force),
        }
    }

    fn add_protein(&mut self, seq: &[u8]) -> Result<(), Error> {
        match *self {
            Sketch::MinHash(ref mut mh) => mh.add_protein(seq),
        }
    }
}

enum HashState {
    // canonical k-mers over the validated DNA window
    Dna {
        rc: Vec<u8>,
        kmer_index: usize,
        max_index: usize,
        checked: usize,
    },
    // protein input, residues already re-encoded
    Protein {
        encoded: Vec<u8>,
        kmer_index: usize,
    },
    // DNA translated in six frames; hashes precomputed
    Translated {
        hashes: std::vec::IntoIter<u64>,
    },
}

/// Iterator turning a sequence into the hashes a sketch would admit:
/// the moltype-appropriate encoding, canonicalization and murmur hash
/// for every k-length window.
///
/// `ksize` is in the sketch's own alphabet; for protein-family hash
/// functions fed DNA, the window over the DNA is `3·ksize` and all six
/// reading frames are emitted.
pub struct SeqToHashes {
    sequence: Vec<u8>,
    ksize: usize,
    force: bool,
    seed: u64,
    state: HashState,
}

impl SeqToHashes {
    pub fn new(
        seq: &[u8],
        ksize: usize,
        force: bool,
        is_protein: bool,
        hash_function: HashFunctions,
        seed: u64,
    ) -> SeqToHashes {
        // DNA is accepted case-insensitively, and U reads as T.
        let mut sequence = seq.to_ascii_uppercase();
        if !is_protein {
            for b in sequence.iter_mut() {
                if *b == b'U' {
                    *b = b'T';
                }
            }
        }

        let state = if is_protein {
            let encoded: Vec<u8> = if hash_function.dayhoff() {
                sequence.iter().cloned().map(aa_to_dayhoff).collect()
            } else if hash_function.hp() {
                sequence.iter().cloned().map(aa_to_hp).collect()
            } else {
                sequence.clone()
            };
            HashState::Protein {
                encoded,
                kmer_index: 0,
            }
        } else if hash_function.dna() {
            let max_index = if sequence.len() >= ksize {
                sequence.len() - ksize + 1
            } else {
                0
            };
            HashState::Dna {
                rc: revcomp(&sequence),
                kmer_index: 0,
                max_index,
                checked: 0,
            }
        } else {
            // six-frame translation; every frame's windows at once
            let mut hashes = vec![];
            if sequence.len() >= 3 * ksize {
                let rc = revcomp(&sequence);
                for frame in 0..3 {
                    for strand in [&sequence, &rc] {
                        let aa = to_aa(
                            &strand[frame..],
                            hash_function.dayhoff(),
                            hash_function.hp(),
                        )
                        .expect("translation cannot fail on whole codons");
                        hashes.extend(aa.windows(ksize).map(|n| crate::_hash_murmur(n, seed)));
                    }
                }
            }
            HashState::Translated {
                hashes: hashes.into_iter(),
            }
        };

        SeqToHashes {
            sequence,
            ksize,
            force,
            seed,
            state,
        }
    }
}

impl Iterator for SeqToHashes {
    type Item = Result<u64, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.state {
            HashState::Dna {
                rc,
                kmer_index,
                max_index,
                checked,
            } => {
                let len = self.sequence.len();
                'window: while *kmer_index < *max_index {
                    let i = *kmer_index;
                    let kmer = &self.sequence[i..i + self.ksize];

                    for j in usize::max(i, *checked)..i + self.ksize {
                        if !VALID[self.sequence[j] as usize] {
                            if !self.force {
                                return Some(Err(Error::InvalidDNA {
                                    message: String::from_utf8_lossy(kmer).into(),
                                }));
                            }
                            // skip this window, re-examine from the next
                            *kmer_index += 1;
                            continue 'window;
                        }
                        *checked = j + 1;
                    }

                    // moving the k-mer window forward over the sequence
                    // corresponds to a window moving backwards over the
                    // reverse complement
                    let krc = &rc[len - self.ksize - i..len - i];
                    let hash = crate::_hash_murmur(std::cmp::min(kmer, krc), self.seed);
                    *kmer_index += 1;
                    return Some(Ok(hash));
                }
                None
            }
            HashState::Protein {
                encoded,
                kmer_index,
            } => {
                if encoded.len() < self.ksize || *kmer_index + self.ksize > encoded.len() {
                    return None;
                }
                let aa_kmer = &encoded[*kmer_index..*kmer_index + self.ksize];
                let hash = crate::_hash_murmur(aa_kmer, self.seed);
                *kmer_index += 1;
                Some(Ok(hash))
            }
            HashState::Translated { hashes } => hashes.next().map(Ok),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, TypedBuilder)]
pub struct Signature {
    #[serde(default = "default_class")]
    #[builder(default = default_class())]
    class: String,

    #[serde(default)]
    #[builder(default)]
    email: String,

    #[builder(setter(into), default = "0.murmur64".to_string())]
    hash_function: String,

    #[builder(default)]
    filename: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub(crate) name: Option<String>,

    #[serde(default = "default_license")]
    #[builder(default = default_license())]
    license: String,

    pub(crate) signatures: Vec<Sketch>,

    #[serde(default = "default_version")]
    #[builder(default = default_version())]
    version: f64,
}

fn default_class() -> String {
    "sourmash_signature".to_string()
}

fn default_license() -> String {
    "CC0".to_string()
}

fn default_version() -> f64 {
    0.4
}

impl Signature {
    /// Display name: the explicit name, the source filename, or the
    /// content digest, in that order.
    pub fn name(&self) -> String {
        if let Some(name) = &self.name {
            name.clone()
        } else if let Some(filename) = &self.filename {
            filename.clone()
        } else {
            self.md5sum()
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = Some(name.into())
    }

    pub fn filename(&self) -> String {
        if let Some(filename) = &self.filename {
            filename.clone()
        } else {
            "".into()
        }
    }

    pub fn set_filename(&mut self, name: &str) {
        self.filename = Some(name.into())
    }

    pub fn size(&self) -> usize {
        self.signatures.len()
    }

    pub fn sketches(&self) -> Vec<Sketch> {
        self.signatures.clone()
    }

    pub fn reset_sketches(&mut self) {
        self.signatures = vec![];
    }

    pub fn push(&mut self, sketch: Sketch) {
        self.signatures.push(sketch);
    }

    pub fn license(&self) -> String {
        self.license.clone()
    }

    pub fn class(&self) -> String {
        self.class.clone()
    }

    pub fn hash_function(&self) -> String {
        self.hash_function.clone()
    }

    pub fn email(&self) -> String {
        self.email.clone()
    }

    pub fn md5sum(&self) -> String {
        if self.signatures.len() == 1 {
            match &self.signatures[0] {
                Sketch::MinHash(mh) => mh.md5sum(),
            }
        } else {
            // no canonical digest for a multi-sketch signature;
            // select down to one sketch first
            panic!("multiple sketches found; run select first")
        }
    }

    /// The first sketch compatible with the given template.
    pub fn select_sketch(&self, template: &Sketch) -> Option<&Sketch> {
        let Sketch::MinHash(template) = template;
        self.signatures.iter().find(|sk| {
            let Sketch::MinHash(mh) = sk;
            mh.check_compatible(template).is_ok()
        })
    }

    /// The single sketch in this signature, if there is exactly one.
    pub fn get_sketch(&self) -> Option<&Sketch> {
        if self.signatures.len() != 1 {
            if self.signatures.len() > 1 {
                todo!("Multiple sketches found! Please run select first.");
            }
            return None;
        }
        self.signatures.first()
    }

    /// The single MinHash in this signature, if there is exactly one.
    pub fn minhash(&self) -> Option<&KmerMinHash> {
        if self.signatures.len() != 1 {
            if self.signatures.len() > 1 {
                todo!("Multiple sketches found! Please run select first.");
            }
            return None;
        }
        self.signatures.iter().find_map(|sk| {
            let Sketch::MinHash(mh) = sk;
            Some(mh)
        })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Signature>, Error> {
        let mut reader = io::BufReader::new(File::open(path)?);
        Signature::from_reader(&mut reader)
    }

    /// Read a JSON signature file, transparently decompressing gzip
    /// (detected from magic bytes, not the file name).
    pub fn from_reader<R>(rdr: R) -> Result<Vec<Signature>, Error>
    where
        R: io::Read,
    {
        let (rdr, _format) = niffler::get_reader(Box::new(rdr))?;

        let sigs: Vec<Signature> = serde_json::from_reader(rdr)?;
        Ok(sigs)
    }

    /// Load signatures and flatten them so each result holds exactly one
    /// sketch, keeping only sketches matching the requested ksize and
    /// moltype.
    pub fn load_signatures<R>(
        buf: R,
        ksize: Option<usize>,
        moltype: Option<HashFunctions>,
    ) -> Result<Vec<Signature>, Error>
    where
        R: io::Read,
    {
        let orig_sigs = Signature::from_reader(buf)?;

        let flattened = orig_sigs.into_iter().flat_map(|sig| {
            sig.signatures
                .iter()
                .map(|sketch| {
                    let mut new_sig = sig.clone();
                    new_sig.signatures = vec![sketch.clone()];
                    new_sig
                })
                .collect::<Vec<Signature>>()
        });

        let filtered = flattened.filter(|sig| {
            let Sketch::MinHash(mh) = &sig.signatures[0];
            if let Some(k) = ksize {
                if k != mh.ksize() {
                    return false;
                }
            }
            if let Some(hf) = &moltype {
                if mh.hash_function() != *hf {
                    return false;
                }
            }
            true
        });

        Ok(filtered.collect())
    }

    pub fn add_sequence(&mut self, seq: &[u8], force: bool) -> Result<(), Error> {
        #[cfg(feature = "parallel")]
        {
            self.signatures
                .par_iter_mut()
                .try_for_each(|sketch| sketch.add_sequence(seq, force))?;
        }

        #[cfg(not(feature = "parallel"))]
        {
            for sketch in self.signatures.iter_mut() {
                sketch.add_sequence(seq, force)?;
            }
        }

        Ok(())
    }

    pub fn add_protein(&mut self, seq: &[u8]) -> Result<(), Error> {
        #[cfg(feature = "parallel")]
        {
            self.signatures
                .par_iter_mut()
                .try_for_each(|sketch| sketch.add_protein(seq))?;
        }

        #[cfg(not(feature = "parallel"))]
        {
            for sketch in self.signatures.iter_mut() {
                sketch.add_protein(seq)?;
            }
        }

        Ok(())
    }

    pub fn iter(&self) -> Iter<'_> {
        let length = self.signatures.len();
        Iter {
            iter: self.signatures.iter(),
            length,
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_> {
        let length = self.signatures.len();
        IterMut {
            iter: self.signatures.iter_mut(),
            length,
        }
    }
}

pub struct Iter<'a> {
    iter: std::slice::Iter<'a, Sketch>,
    length: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Sketch;

    fn next(&mut self) -> Option<&'a Sketch> {
        if self.length == 0 {
            None
        } else {
            self.length -= 1;
            self.iter.next()
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.length, Some(self.length))
    }
}

impl FusedIterator for Iter<'_> {}

impl ExactSizeIterator for Iter<'_> {
    fn len(&self) -> usize {
        self.length
    }
}

pub struct IterMut<'a> {
    iter: std::slice::IterMut<'a, Sketch>,
    length: usize,
}

impl<'a> IntoIterator for &'a mut Signature {
    type Item = &'a mut Sketch;
    type IntoIter = IterMut<'a>;

    fn into_iter(self) -> IterMut<'a> {
        self.iter_mut()
    }
}

impl<'a> Iterator for IterMut<'a> {
    type Item = &'a mut Sketch;

    fn next(&mut self) -> Option<&'a mut Sketch> {
        if self.length == 0 {
            None
        } else {
            self.length -= 1;
            self.iter.next()
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.length, Some(self.length))
    }
}

impl ToWriter for Signature {
    fn to_writer<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: io::Write,
    {
        serde_json::to_writer(writer, &vec![&self])?;
        Ok(())
    }
}

/// Write several signatures into one JSON array.
pub fn save_signatures<W: io::Write>(sigs: &[&Signature], mut writer: W) -> Result<(), Error> {
    serde_json::to_writer(&mut writer, &sigs)?;
    Ok(())
}

impl Select for Signature {
    fn select(mut self, selection: &Selection) -> Result<Self, Error> {
        self.signatures.retain(|s| {
            let Sketch::MinHash(mh) = s;
            let mut valid = true;
            if let Some(ksize) = selection.ksize() {
                valid = valid && mh.ksize() as u32 == ksize;
            }
            if let Some(moltype) = selection.moltype() {
                valid = valid && mh.hash_function() == moltype;
            }
            if let Some(abund) = selection.abund() {
                valid = valid && mh.track_abundance() == abund;
            }
            if let Some(num) = selection.num() {
                valid = valid && mh.num() == num;
            }
            if let Some(scaled) = selection.scaled() {
                // num sketches cannot serve a scaled request, and a
                // sketch can only be downsampled, never re-inflated
                valid = valid && mh.scaled() != 0 && mh.scaled() <= scaled as u64;
            }
            valid
        });

        if let Some(sel_scaled) = selection.scaled() {
            for sketch in self.signatures.iter_mut() {
                let Sketch::MinHash(mh) = sketch;
                if mh.scaled() < sel_scaled as u64 {
                    *sketch = Sketch::MinHash(mh.downsample_scaled(sel_scaled as u64)?);
                }
            }
        }
        Ok(self)
    }
}

impl Default for Signature {
    fn default() -> Signature {
        Signature {
            class: default_class(),
            email: "".to_string(),
            hash_function: "0.murmur64".to_string(),
            license: default_license(),
            filename: None,
            name: None,
            signatures: Vec::<Sketch>::new(),
            version: default_version(),
        }
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Signature) -> bool {
        let metadata = self.class == other.class
            && self.email == other.email
            && self.hash_function == other.hash_function
            && self.filename == other.filename
            && self.name == other.name;

        if let (Some(Sketch::MinHash(mh)), Some(Sketch::MinHash(other_mh))) =
            (self.signatures.first(), other.signatures.first())
        {
            return metadata && (mh == other_mh);
        }
        metadata
    }
}
