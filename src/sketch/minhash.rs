use std::cmp::Ordering;
use std::f64::consts::PI;
use std::fmt::Write;
use std::sync::Mutex;

use serde::de::Deserializer;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::_hash_murmur;
use crate::ani_utils::ani_from_containment;
use crate::encodings::HashFunctions;
use crate::signature::SigsTrait;
use crate::Error;

/// The largest hash admitted by a sketch with the given scaled value.
/// Zero means "no cut-off" (num mode).
pub fn max_hash_for_scaled(scaled: u64) -> u64 {
    match scaled {
        0 => 0,
        1 => u64::MAX,
        _ => (u64::MAX as f64 / scaled as f64) as u64,
    }
}

pub fn scaled_for_max_hash(max_hash: u64) -> u64 {
    match max_hash {
        0 => 0,
        _ => u64::MAX / max_hash,
    }
}

/// A MinHash sketch of the k-mer content of a sequence.
///
/// Operates in exactly one of two capacity modes:
///
/// - **num**: keep the `num` numerically smallest hashes seen
///   (`max_hash == 0`);
/// - **scaled**: keep every hash at or below `max_hash`
///   (`num == 0`), where `max_hash` encodes the scaled fraction.
///
/// Hashes are kept sorted in `mins`; when abundance tracking is on,
/// `abunds` is index-aligned with `mins`.
#[derive(Debug, TypedBuilder)]
pub struct KmerMinHash {
    num: u32,
    ksize: u32,

    #[builder(setter(into), default = HashFunctions::Murmur64Dna)]
    hash_function: HashFunctions,

    #[builder(default = 42u64)]
    seed: u64,

    #[builder(default = 0u64)]
    max_hash: u64,

    #[builder(default)]
    mins: Vec<u64>,

    #[builder(default)]
    abunds: Option<Vec<u64>>,

    #[builder(default)]
    md5sum: Mutex<Option<String>>,
}

impl Clone for KmerMinHash {
    fn clone(&self) -> Self {
        KmerMinHash {
            num: self.num,
            ksize: self.ksize,
            hash_function: self.hash_function,
            seed: self.seed,
            max_hash: self.max_hash,
            mins: self.mins.clone(),
            abunds: self.abunds.clone(),
            md5sum: Mutex::new(Some(self.md5sum())),
        }
    }
}

impl PartialEq for KmerMinHash {
    fn eq(&self, other: &KmerMinHash) -> bool {
        self.md5sum() == other.md5sum()
    }
}

impl KmerMinHash {
    pub fn new(
        num: u32,
        ksize: u32,
        hash_function: HashFunctions,
        seed: u64,
        max_hash: u64,
        track_abundance: bool,
    ) -> KmerMinHash {
        let mins = if num > 0 {
            Vec::with_capacity(num as usize)
        } else {
            Vec::with_capacity(1000)
        };

        let abunds = if track_abundance {
            Some(Vec::with_capacity(mins.capacity()))
        } else {
            None
        };

        KmerMinHash {
            num,
            ksize,
            hash_function,
            seed,
            max_hash,
            mins,
            abunds,
            md5sum: Mutex::new(None),
        }
    }

    /// A scaled (fractional) sketch: keeps every hash below the cut-off.
    pub fn with_scaled(
        scaled: u64,
        ksize: u32,
        hash_function: HashFunctions,
        seed: u64,
        track_abundance: bool,
    ) -> KmerMinHash {
        KmerMinHash::new(
            0,
            ksize,
            hash_function,
            seed,
            max_hash_for_scaled(scaled),
            track_abundance,
        )
    }

    /// A bounded sketch: keeps the `num` smallest hashes.
    pub fn with_num(
        num: u32,
        ksize: u32,
        hash_function: HashFunctions,
        seed: u64,
        track_abundance: bool,
    ) -> KmerMinHash {
        KmerMinHash::new(num, ksize, hash_function, seed, 0, track_abundance)
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn max_hash(&self) -> u64 {
        self.max_hash
    }

    pub fn scaled(&self) -> u64 {
        scaled_for_max_hash(self.max_hash)
    }

    pub fn is_protein(&self) -> bool {
        self.hash_function.protein()
    }

    fn is_dna(&self) -> bool {
        self.hash_function.dna()
    }

    pub fn dayhoff(&self) -> bool {
        self.hash_function.dayhoff()
    }

    pub fn hp(&self) -> bool {
        self.hash_function.hp()
    }

    pub fn is_empty(&self) -> bool {
        self.mins.is_empty()
    }

    pub fn clear(&mut self) {
        self.mins.clear();
        if let Some(ref mut abunds) = self.abunds {
            abunds.clear();
        }
        self.reset_md5sum();
    }

    pub fn track_abundance(&self) -> bool {
        self.abunds.is_some()
    }

    pub fn enable_abundance(&mut self) -> Result<(), Error> {
        if !self.mins.is_empty() {
            return Err(Error::NonEmptyMinHash {
                message: "track_abundance=True".into(),
            });
        }

        self.abunds = Some(vec![]);
        Ok(())
    }

    pub fn disable_abundance(&mut self) {
        self.abunds = None;
        self.reset_md5sum();
    }

    pub fn set_hash_function(&mut self, h: HashFunctions) -> Result<(), Error> {
        if self.hash_function == h {
            return Ok(());
        }

        if !self.is_empty() {
            return Err(Error::NonEmptyMinHash {
                message: "hash_function".into(),
            });
        }

        self.hash_function = h;
        Ok(())
    }

    fn reset_md5sum(&self) {
        let mut cached = self.md5sum.lock().unwrap();
        *cached = None;
    }

    /// Content digest over the sketch parameters (ksize, moltype, seed,
    /// num, scaled) and the sorted hashes, plus abundances when tracked.
    /// Cached until the sketch is mutated.
    pub fn md5sum(&self) -> String {
        let mut cached = self.md5sum.lock().unwrap();
        if cached.is_none() {
            let mut buffer = String::with_capacity(20);
            let mut md5_ctx = md5::Context::new();

            write!(
                &mut buffer,
                "{} {} {} {} {}",
                self.ksize,
                self.hash_function,
                self.seed,
                self.num,
                self.scaled()
            )
            .unwrap();
            md5_ctx.consume(&buffer);
            buffer.clear();

            for x in &self.mins {
                write!(&mut buffer, " {}", x).unwrap();
                md5_ctx.consume(&buffer);
                buffer.clear();
            }
            if let Some(abunds) = &self.abunds {
                for a in abunds {
                    write!(&mut buffer, " a{}", a).unwrap();
                    md5_ctx.consume(&buffer);
                    buffer.clear();
                }
            }
            *cached = Some(format!("{:x}", md5_ctx.compute()));
        }
        cached.clone().unwrap()
    }

    pub fn add_hash(&mut self, hash: u64) {
        self.add_hash_with_abundance(hash, 1);
    }

    pub fn add_hash_with_abundance(&mut self, hash: u64, abundance: u64) {
        if self.max_hash != 0 && hash > self.max_hash {
            // scaled sketch, over the cut-off
            return;
        }

        if self.num == 0 && self.max_hash == 0 {
            // neither num nor scaled: nothing is ever admitted
            return;
        }

        if abundance == 0 {
            return;
        }

        match self.mins.binary_search(&hash) {
            Ok(pos) => {
                // already present, bump the count
                if let Some(ref mut abunds) = self.abunds {
                    abunds[pos] = abunds[pos].saturating_add(abundance);
                    self.reset_md5sum();
                }
            }
            Err(pos) => {
                if self.num != 0 {
                    if self.mins.len() as u32 >= self.num {
                        if pos == self.mins.len() {
                            // larger than the current maximum: rejected
                            return;
                        }
                        // evict the current maximum to make room
                        self.mins.pop();
                        if let Some(ref mut abunds) = self.abunds {
                            abunds.pop();
                        }
                    }
                }
                self.mins.insert(pos, hash);
                if let Some(ref mut abunds) = self.abunds {
                    abunds.insert(pos, abundance);
                }
                self.reset_md5sum();
            }
        }
    }

    /// Overwrite (rather than accumulate) the abundance of a hash.
    pub fn set_hash_with_abundance(&mut self, hash: u64, abundance: u64) {
        if let Ok(pos) = self.mins.binary_search(&hash) {
            if let Some(ref mut abunds) = self.abunds {
                abunds[pos] = abundance;
                self.reset_md5sum();
            }
        } else {
            self.add_hash_with_abundance(hash, abundance);
        }
    }

    pub fn add_word(&mut self, word: &[u8]) {
        let hash = _hash_murmur(word, self.seed);
        self.add_hash(hash);
    }

    pub fn remove_hash(&mut self, hash: u64) {
        if let Ok(pos) = self.mins.binary_search(&hash) {
            self.mins.remove(pos);
            if let Some(ref mut abunds) = self.abunds {
                abunds.remove(pos);
            }
            self.reset_md5sum();
        }
    }

    pub fn remove_many(&mut self, hashes: &[u64]) -> Result<(), Error> {
        for h in hashes {
            self.remove_hash(*h);
        }
        Ok(())
    }

    /// Remove every hash present in `other`.
    pub fn remove_from(&mut self, other: &KmerMinHash) -> Result<(), Error> {
        self.check_compatible(other)?;
        self.remove_many(&other.mins)
    }

    pub fn add_many(&mut self, hashes: &[u64]) -> Result<(), Error> {
        for h in hashes {
            self.add_hash(*h);
        }
        Ok(())
    }

    pub fn add_many_with_abund(&mut self, hashes: &[(u64, u64)]) -> Result<(), Error> {
        for (h, a) in hashes {
            self.add_hash_with_abundance(*h, *a);
        }
        Ok(())
    }

    pub fn add_from(&mut self, other: &KmerMinHash) -> Result<(), Error> {
        for h in &other.mins {
            self.add_hash(*h);
        }
        Ok(())
    }

    /// In-place union. Abundances are summed where both operands track
    /// them; in num mode the result keeps the `num` smallest hashes of
    /// the union.
    pub fn merge(&mut self, other: &KmerMinHash) -> Result<(), Error> {
        self.check_compatible(other)?;

        let mut merged = Vec::with_capacity(self.mins.len() + other.mins.len());
        let mut merged_abunds = self
            .abunds
            .as_ref()
            .map(|_| Vec::with_capacity(merged.capacity()));

        let (mut i, mut j) = (0, 0);
        while i < self.mins.len() && j < other.mins.len() {
            match self.mins[i].cmp(&other.mins[j]) {
                Ordering::Less => {
                    merged.push(self.mins[i]);
                    if let Some(ref mut ma) = merged_abunds {
                        ma.push(self.abund_at(i));
                    }
                    i += 1;
                }
                Ordering::Greater => {
                    merged.push(other.mins[j]);
                    if let Some(ref mut ma) = merged_abunds {
                        ma.push(other.abund_at(j));
                    }
                    j += 1;
                }
                Ordering::Equal => {
                    merged.push(self.mins[i]);
                    if let Some(ref mut ma) = merged_abunds {
                        ma.push(self.abund_at(i).saturating_add(other.abund_at(j)));
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        for x in i..self.mins.len() {
            merged.push(self.mins[x]);
            if let Some(ref mut ma) = merged_abunds {
                ma.push(self.abund_at(x));
            }
        }
        for x in j..other.mins.len() {
            merged.push(other.mins[x]);
            if let Some(ref mut ma) = merged_abunds {
                ma.push(other.abund_at(x));
            }
        }

        if self.num != 0 && merged.len() > self.num as usize {
            merged.truncate(self.num as usize);
            if let Some(ref mut ma) = merged_abunds {
                ma.truncate(self.num as usize);
            }
        }

        self.mins = merged;
        self.abunds = merged_abunds;
        self.reset_md5sum();
        Ok(())
    }

    // abundance at position, 1 when not tracking
    fn abund_at(&self, pos: usize) -> u64 {
        match &self.abunds {
            Some(abunds) => abunds[pos],
            None => 1,
        }
    }

    /// Number of hashes in common, optionally downsampling the finer
    /// scaled sketch to make the pair comparable.
    pub fn count_common(&self, other: &KmerMinHash, downsample: bool) -> Result<u64, Error> {
        if downsample && self.max_hash != other.max_hash {
            let (coarse, fine) = if self.max_hash != 0 && self.max_hash < other.max_hash {
                (self, other)
            } else {
                (other, self)
            };
            let fine = fine.downsample_max_hash(coarse.max_hash)?;
            coarse.count_common(&fine, false)
        } else {
            self.check_compatible(other)?;
            Ok(intersection_count(&self.mins, &other.mins))
        }
    }

    /// Intersection size and union size over the restricted hash set.
    /// In num mode both are computed within the `num` smallest hashes
    /// of the union.
    pub fn intersection_size(&self, other: &KmerMinHash) -> Result<(u64, u64), Error> {
        self.check_compatible(other)?;

        if self.num == 0 {
            Ok(isect_union_counts(&self.mins, &other.mins))
        } else {
            let mut combined = self.clone();
            combined.merge(other)?;
            match combined.mins.last() {
                None => Ok((0, 0)),
                Some(&limit) => {
                    let common = self
                        .mins
                        .iter()
                        .take_while(|&&h| h <= limit)
                        .filter(|h| other.mins.binary_search(h).is_ok())
                        .count();
                    Ok((common as u64, combined.mins.len() as u64))
                }
            }
        }
    }

    /// The hashes common to both sketches, plus the union size.
    pub fn intersection(&self, other: &KmerMinHash) -> Result<(Vec<u64>, u64), Error> {
        self.check_compatible(other)?;
        let (_, union) = self.intersection_size(other)?;
        let common: Vec<u64> = self
            .mins
            .iter()
            .filter(|h| other.mins.binary_search(h).is_ok())
            .cloned()
            .collect();
        Ok((common, union))
    }

    /// Jaccard similarity, ignoring abundances. Zero when the union is
    /// empty.
    pub fn jaccard(&self, other: &KmerMinHash) -> Result<f64, Error> {
        let (common, union) = self.intersection_size(other)?;
        Ok(common as f64 / u64::max(1, union) as f64)
    }

    /// Fraction of this sketch contained in `other`; zero when empty.
    /// Scaled sketches of different resolution are downsampled to the
    /// coarser one first.
    pub fn contained_by(&self, other: &KmerMinHash) -> Result<f64, Error> {
        if self.max_hash != other.max_hash && self.max_hash != 0 && other.max_hash != 0 {
            if self.max_hash > other.max_hash {
                let ds = self.downsample_max_hash(other.max_hash)?;
                return ds.contained_by(other);
            } else {
                let ds = other.downsample_max_hash(self.max_hash)?;
                return self.contained_by(&ds);
            }
        }

        self.check_compatible(other)?;
        if self.mins.is_empty() {
            return Ok(0.0);
        }
        let common = intersection_count(&self.mins, &other.mins);
        Ok(common as f64 / self.mins.len() as f64)
    }

    /// Containment relative to the smaller of the two sketches.
    pub fn max_containment(&self, other: &KmerMinHash) -> Result<f64, Error> {
        if self.size() <= other.size() {
            self.contained_by(other)
        } else {
            other.contained_by(self)
        }
    }

    /// Estimated number of shared k-mers; scaled sketches only.
    pub fn intersection_size_estimate(&self, other: &KmerMinHash) -> Result<u64, Error> {
        if self.max_hash == 0 || other.max_hash == 0 {
            return Err(Error::ScaledRequired);
        }
        let common = self.count_common(other, true)?;
        let scaled = u64::max(self.scaled(), other.scaled());
        Ok(common * scaled)
    }

    /// ANI point estimate from containment: `c^(1/ksize)`. Scaled
    /// sketches only.
    pub fn containment_ani(&self, other: &KmerMinHash) -> Result<f64, Error> {
        if self.max_hash == 0 || other.max_hash == 0 {
            return Err(Error::ScaledRequired);
        }
        let containment = self.contained_by(other)?;
        Ok(ani_from_containment(containment, self.ksize as f64))
    }

    /// Cosine-derived angular similarity over abundance vectors:
    /// `1 - 2·acos(cos_sim)/π`. Both operands must track abundance.
    pub fn angular_similarity(&self, other: &KmerMinHash) -> Result<f64, Error> {
        self.check_compatible(other)?;

        let (abunds, other_abunds) = match (&self.abunds, &other.abunds) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(Error::NeedsAbundance),
        };

        let a_sq: u64 = abunds.iter().map(|a| a * a).sum();
        let b_sq: u64 = other_abunds.iter().map(|a| a * a).sum();

        let mut prod = 0u64;
        let (mut i, mut j) = (0, 0);
        while i < self.mins.len() && j < other.mins.len() {
            match self.mins[i].cmp(&other.mins[j]) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    prod += abunds[i] * other_abunds[j];
                    i += 1;
                    j += 1;
                }
            }
        }

        let norm_a = (a_sq as f64).sqrt();
        let norm_b = (b_sq as f64).sqrt();
        if norm_a == 0. || norm_b == 0. {
            return Ok(0.0);
        }

        let cos_sim = f64::min(prod as f64 / (norm_a * norm_b), 1.);
        let distance = 2. * cos_sim.acos() / PI;
        Ok(1. - distance)
    }

    /// Similarity dispatcher: angular when both operands track abundance
    /// and it is not ignored, Jaccard otherwise.
    pub fn similarity(
        &self,
        other: &KmerMinHash,
        ignore_abundance: bool,
        downsample: bool,
    ) -> Result<f64, Error> {
        if downsample && self.max_hash != other.max_hash {
            let (coarse, fine) = if self.max_hash != 0 && self.max_hash < other.max_hash {
                (self, other)
            } else {
                (other, self)
            };
            let fine = fine.downsample_max_hash(coarse.max_hash)?;
            coarse.similarity(&fine, ignore_abundance, false)
        } else if ignore_abundance || self.abunds.is_none() || other.abunds.is_none() {
            self.jaccard(other)
        } else {
            self.angular_similarity(other)
        }
    }

    /// A copy downsampled to the given cut-off. Fails when the target is
    /// finer than the current resolution.
    pub fn downsample_max_hash(&self, max_hash: u64) -> Result<KmerMinHash, Error> {
        if self.max_hash == 0 {
            return Err(Error::ScaledRequired);
        }
        if max_hash > self.max_hash {
            return Err(Error::InvalidDownsampleScaled {
                current: self.scaled(),
                requested: scaled_for_max_hash(max_hash),
            });
        }

        let mut new_mh = KmerMinHash::new(
            self.num,
            self.ksize,
            self.hash_function,
            self.seed,
            max_hash,
            self.abunds.is_some(),
        );
        if self.abunds.is_some() {
            new_mh.add_many_with_abund(&self.to_vec_abunds())?;
        } else {
            new_mh.add_many(&self.mins)?;
        }
        Ok(new_mh)
    }

    pub fn downsample_scaled(&self, scaled: u64) -> Result<KmerMinHash, Error> {
        self.downsample_max_hash(max_hash_for_scaled(scaled))
    }

    /// Downsample to a bounded sketch of `num` hashes. In num mode the
    /// target must not exceed the current bound; a scaled sketch is
    /// converted by keeping its `num` smallest hashes and must have at
    /// least that many.
    pub fn downsample_num(&self, num: u32) -> Result<KmerMinHash, Error> {
        if self.num != 0 && num > self.num {
            return Err(Error::InvalidDownsampleNum {
                current: self.num,
                requested: num,
            });
        }
        if self.num == 0 && self.mins.len() < num as usize {
            return Err(Error::InvalidDownsampleNum {
                current: self.mins.len() as u32,
                requested: num,
            });
        }

        let mut new_mh = KmerMinHash::new(
            num,
            self.ksize,
            self.hash_function,
            self.seed,
            0,
            self.abunds.is_some(),
        );
        if self.abunds.is_some() {
            new_mh.add_many_with_abund(&self.to_vec_abunds())?;
        } else {
            new_mh.add_many(&self.mins)?;
        }
        Ok(new_mh)
    }

    /// A copy with abundances stripped.
    pub fn flatten(&self) -> KmerMinHash {
        let mut flat = self.clone();
        flat.disable_abundance();
        flat
    }

    /// New sketch holding the intersection; abundances are dropped.
    pub fn intersect(&self, other: &KmerMinHash) -> Result<KmerMinHash, Error> {
        self.check_compatible(other)?;
        let mut result = KmerMinHash::new(
            self.num,
            self.ksize,
            self.hash_function,
            self.seed,
            self.max_hash,
            false,
        );
        let (common, _) = self.intersection(other)?;
        result.add_many(&common)?;
        Ok(result)
    }

    /// New sketch holding `self \ other`. The receiver must not track
    /// abundance; flatten first.
    pub fn subtract(&self, other: &KmerMinHash) -> Result<KmerMinHash, Error> {
        if self.abunds.is_some() {
            return Err(Error::SubtractFromAbundance);
        }
        self.check_compatible(other)?;

        let mut result = KmerMinHash::new(
            self.num,
            self.ksize,
            self.hash_function,
            self.seed,
            self.max_hash,
            false,
        );
        let remaining: Vec<u64> = self
            .mins
            .iter()
            .filter(|h| other.mins.binary_search(h).is_err())
            .cloned()
            .collect();
        result.add_many(&remaining)?;
        Ok(result)
    }

    pub fn mins(&self) -> Vec<u64> {
        self.mins.clone()
    }

    pub fn iter_mins(&self) -> impl Iterator<Item = &u64> {
        self.mins.iter()
    }

    pub fn abunds(&self) -> Option<Vec<u64>> {
        self.abunds.clone()
    }

    pub fn to_vec_abunds(&self) -> Vec<(u64, u64)> {
        if let Some(abunds) = &self.abunds {
            self.mins
                .iter()
                .cloned()
                .zip(abunds.iter().cloned())
                .collect()
        } else {
            self.mins
                .iter()
                .cloned()
                .zip(std::iter::repeat(1))
                .collect()
        }
    }

    /// Total abundance; equals the sketch size when not tracking.
    pub fn sum_abunds(&self) -> u64 {
        match &self.abunds {
            Some(abunds) => abunds.iter().sum(),
            None => self.mins.len() as u64,
        }
    }

    /// For each hash of `hashes` present in this sketch, its abundance
    /// here (1 when not tracking). `hashes` must be sorted.
    pub fn abundances_for(&self, hashes: &[u64]) -> Vec<u64> {
        hashes
            .iter()
            .filter_map(|h| self.mins.binary_search(h).ok())
            .map(|pos| self.abund_at(pos))
            .collect()
    }
}

impl SigsTrait for KmerMinHash {
    fn size(&self) -> usize {
        self.mins.len()
    }

    fn to_vec(&self) -> Vec<u64> {
        self.mins.clone()
    }

    fn ksize(&self) -> usize {
        self.ksize as usize
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn hash_function(&self) -> HashFunctions {
        self.hash_function
    }

    fn add_hash(&mut self, hash: u64) {
        self.add_hash(hash)
    }

    fn check_compatible(&self, other: &KmerMinHash) -> Result<(), Error> {
        if self.ksize != other.ksize {
            return Err(Error::MismatchKSizes);
        }
        if self.hash_function != other.hash_function {
            return Err(Error::MismatchMoltype);
        }
        if self.max_hash != other.max_hash {
            return Err(Error::MismatchScaled);
        }
        if self.seed != other.seed {
            return Err(Error::MismatchSeed);
        }
        Ok(())
    }
}

#[inline]
fn intersection_count(a: &[u64], b: &[u64]) -> u64 {
    let (mut i, mut j) = (0, 0);
    let mut common = 0;
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => {
                common += 1;
                i += 1;
                j += 1;
            }
        }
    }
    common
}

#[inline]
fn isect_union_counts(a: &[u64], b: &[u64]) -> (u64, u64) {
    let common = intersection_count(a, b);
    let union = a.len() as u64 + b.len() as u64 - common;
    (common, union)
}

impl Serialize for KmerMinHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let n_fields = match &self.abunds {
            Some(_) => 8,
            _ => 7,
        };

        let mut partial = serializer.serialize_struct("KmerMinHash", n_fields)?;
        partial.serialize_field("num", &self.num)?;
        partial.serialize_field("ksize", &self.ksize)?;
        partial.serialize_field("seed", &self.seed)?;
        partial.serialize_field("max_hash", &self.max_hash)?;
        partial.serialize_field("mins", &self.mins)?;
        partial.serialize_field("md5sum", &self.md5sum())?;

        if let Some(abunds) = &self.abunds {
            partial.serialize_field("abundances", abunds)?;
        }

        partial.serialize_field("molecule", &self.hash_function.to_string())?;

        partial.end()
    }
}

impl<'de> Deserialize<'de> for KmerMinHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TempSig {
            num: u32,
            ksize: u32,
            #[serde(default = "default_seed")]
            seed: u64,
            max_hash: u64,
            mins: Vec<u64>,
            abundances: Option<Vec<u64>>,
            molecule: String,
        }

        fn default_seed() -> u64 {
            42
        }

        let tmpsig = TempSig::deserialize(deserializer)?;

        let num = if tmpsig.max_hash != 0 { 0 } else { tmpsig.num };
        let hash_function = HashFunctions::try_from(tmpsig.molecule.as_str())
            .map_err(serde::de::Error::custom)?;

        // Old writers produced unordered mins; sort on the way in so the
        // sorted-vec invariant holds for everything downstream.
        let (mins, abunds) = if let Some(abunds) = tmpsig.abundances {
            let mut values: Vec<(u64, u64)> = tmpsig
                .mins
                .into_iter()
                .zip(abunds.into_iter())
                .collect();
            values.sort_unstable();
            let mins = values.iter().map(|(v, _)| *v).collect();
            let abunds = values.iter().map(|(_, a)| *a).collect();
            (mins, Some(abunds))
        } else {
            let mut mins = tmpsig.mins;
            mins.sort_unstable();
            (mins, None)
        };

        // The digest is content-derived; recompute lazily rather than
        // trusting the serialized value.
        Ok(KmerMinHash {
            num,
            ksize: tmpsig.ksize,
            seed: tmpsig.seed,
            max_hash: tmpsig.max_hash,
            md5sum: Mutex::new(None),
            mins,
            abunds,
            hash_function,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scaled_cutoff_roundtrip() {
        assert_eq!(max_hash_for_scaled(0), 0);
        assert_eq!(max_hash_for_scaled(1), u64::MAX);
        assert_eq!(scaled_for_max_hash(max_hash_for_scaled(100)), 100);
        assert_eq!(scaled_for_max_hash(max_hash_for_scaled(10000)), 10000);
    }

    #[test]
    fn num_eviction_keeps_smallest() {
        let mut mh = KmerMinHash::with_num(3, 21, HashFunctions::Murmur64Dna, 42, false);
        mh.add_many(&[10, 20, 30]).unwrap();
        mh.add_hash(5);
        assert_eq!(mh.mins(), vec![5, 10, 20]);

        // larger than the current maximum: rejected
        mh.add_hash(40);
        assert_eq!(mh.mins(), vec![5, 10, 20]);
    }

    #[test]
    fn num_tie_no_eviction() {
        let mut mh = KmerMinHash::with_num(2, 21, HashFunctions::Murmur64Dna, 42, true);
        mh.add_many(&[10, 20]).unwrap();
        // equal to the current maximum and already present: count bump only
        mh.add_hash(20);
        assert_eq!(mh.mins(), vec![10, 20]);
        assert_eq!(mh.abunds().unwrap(), vec![1, 2]);
    }

    #[test]
    fn set_abundance_overwrites() {
        let mut mh = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, true);
        mh.add_hash_with_abundance(7, 2);
        mh.add_hash_with_abundance(7, 2);
        assert_eq!(mh.abunds().unwrap(), vec![4]);

        mh.set_hash_with_abundance(7, 1);
        assert_eq!(mh.abunds().unwrap(), vec![1]);

        mh.set_hash_with_abundance(9, 3);
        assert_eq!(mh.mins(), vec![7, 9]);
        assert_eq!(mh.abunds().unwrap(), vec![1, 3]);
    }

    #[test]
    fn scaled_admission() {
        let mut mh = KmerMinHash::with_scaled(2, 21, HashFunctions::Murmur64Dna, 42, false);
        let cutoff = mh.max_hash();
        mh.add_hash(cutoff);
        mh.add_hash(cutoff + 1);
        assert_eq!(mh.size(), 1);
    }

    #[test]
    fn md5_insertion_order_independent() {
        let mut a = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        let mut b = a.clone();
        a.add_many(&[1, 2, 3]).unwrap();
        b.add_many(&[3, 1, 2]).unwrap();
        assert_eq!(a.md5sum(), b.md5sum());
    }

    #[test]
    fn md5_depends_on_parameters() {
        let mut a = KmerMinHash::with_scaled(100, 21, HashFunctions::Murmur64Dna, 42, false);
        let mut b = KmerMinHash::with_scaled(100, 31, HashFunctions::Murmur64Dna, 42, false);
        a.add_hash(1);
        b.add_hash(1);
        assert_ne!(a.md5sum(), b.md5sum());
    }

    #[test]
    fn incompatible_errors_name_the_attribute() {
        let a = KmerMinHash::with_scaled(100, 21, HashFunctions::Murmur64Dna, 42, false);
        let b = KmerMinHash::with_scaled(100, 31, HashFunctions::Murmur64Dna, 42, false);
        assert!(matches!(a.jaccard(&b), Err(Error::MismatchKSizes)));

        let c = KmerMinHash::with_scaled(100, 21, HashFunctions::Murmur64Protein, 42, false);
        assert!(matches!(a.jaccard(&c), Err(Error::MismatchMoltype)));

        let d = KmerMinHash::with_scaled(100, 21, HashFunctions::Murmur64Dna, 43, false);
        assert!(matches!(a.jaccard(&d), Err(Error::MismatchSeed)));

        let e = KmerMinHash::with_num(500, 21, HashFunctions::Murmur64Dna, 42, false);
        assert!(matches!(a.jaccard(&e), Err(Error::MismatchScaled)));
    }

    #[test]
    fn subtract_needs_flat() {
        let mut a = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, true);
        let mut b = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        a.add_many(&[1, 2, 3]).unwrap();
        b.add_many(&[2]).unwrap();

        assert!(matches!(
            a.subtract(&b),
            Err(Error::SubtractFromAbundance)
        ));
        let diff = a.flatten().subtract(&b).unwrap();
        assert_eq!(diff.mins(), vec![1, 3]);
    }

    #[test]
    fn angular_requires_abundance() {
        let mut a = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, true);
        let mut b = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        a.add_hash(1);
        b.add_hash(1);
        assert!(matches!(
            a.angular_similarity(&b),
            Err(Error::NeedsAbundance)
        ));
    }

    #[test]
    fn downsample_direction_checked() {
        let mut a = KmerMinHash::with_scaled(1000, 21, HashFunctions::Murmur64Dna, 42, false);
        a.add_hash(1);
        assert!(matches!(
            a.downsample_scaled(100),
            Err(Error::InvalidDownsampleScaled { .. })
        ));
        assert!(a.downsample_scaled(2000).is_ok());
    }
}
