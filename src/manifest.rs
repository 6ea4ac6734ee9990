//! # Manifests: sketch catalogs for fast selection
//!
//! A manifest is an ordered list of per-sketch metadata rows. It drives
//! selection and lazy loading: predicates run against rows, and only the
//! surviving sketches are ever deserialized.

use std::collections::HashMap;
use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::io::{Read, Write};
use std::ops::Deref;
use std::path::Path;

use camino::Utf8PathBuf as PathBuf;
use getset::{CopyGetters, Getters, Setters};
use itertools::Itertools;
use serde::{de, Deserialize, Serialize};

use crate::encodings::HashFunctions;
use crate::selection::{Select, Selection};
use crate::signature::{Signature, SigsTrait};
use crate::sketch::Sketch;
use crate::Result;

/// One row of a manifest: everything needed to decide whether a sketch
/// is wanted, without loading it.
#[derive(Debug, Serialize, Deserialize, Clone, CopyGetters, Getters, Setters, Eq)]
pub struct Record {
    #[getset(get = "pub", set = "pub")]
    internal_location: PathBuf,

    #[getset(get = "pub", set = "pub")]
    md5: String,

    md5short: String,

    #[getset(get_copy = "pub", set = "pub")]
    ksize: u32,

    moltype: String,

    #[getset(get_copy = "pub")]
    num: u32,

    #[getset(get_copy = "pub")]
    scaled: u64,

    #[getset(get_copy = "pub")]
    n_hashes: usize,

    #[getset(get_copy = "pub", set = "pub")]
    #[serde(serialize_with = "intbool", deserialize_with = "to_bool")]
    with_abundance: bool,

    #[getset(get = "pub", set = "pub")]
    name: String,

    #[getset(get = "pub", set = "pub")]
    filename: String,
}

fn intbool<S>(x: &bool, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    if *x {
        s.serialize_i32(1)
    } else {
        s.serialize_i32(0)
    }
}

fn to_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: de::Deserializer<'de>,
{
    match String::deserialize(deserializer)?
        .to_ascii_lowercase()
        .as_ref()
    {
        "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        other => Err(de::Error::invalid_value(
            de::Unexpected::Str(other),
            &"0/1, true/false are the only supported values",
        )),
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.ksize == other.ksize
            && self.moltype == other.moltype
            && self.num == other.num
            && self.scaled == other.scaled
            && self.with_abundance == other.with_abundance
    }
}

impl Record {
    /// One row per sketch in the signature, all pointing at `path`.
    pub fn from_sig(sig: &Signature, path: &str) -> Vec<Self> {
        sig.iter()
            .map(|sketch| {
                let Sketch::MinHash(mh) = sketch;
                let md5 = mh.md5sum();
                let md5short = md5[0..8].into();

                Self {
                    internal_location: path.into(),
                    md5,
                    md5short,
                    ksize: mh.ksize() as u32,
                    moltype: mh.hash_function().to_string(),
                    num: mh.num(),
                    scaled: mh.scaled(),
                    n_hashes: mh.size(),
                    with_abundance: mh.track_abundance(),
                    name: sig.name(),
                    filename: sig.filename(),
                }
            })
            .collect()
    }

    pub fn moltype(&self) -> Result<HashFunctions> {
        self.moltype.as_str().try_into()
    }

    pub fn md5short(&self) -> &str {
        &self.md5short
    }

    /// Rows describe compatible sketches when they agree on ksize,
    /// moltype and capacity mode.
    pub fn check_compatible(&self, other: &Record) -> Result<()> {
        use crate::Error;

        if self.ksize != other.ksize {
            return Err(Error::MismatchKSizes);
        }
        if self.moltype()? != other.moltype()? {
            return Err(Error::MismatchMoltype);
        }
        if (self.scaled == 0) != (other.scaled == 0) {
            return Err(Error::MismatchScaled);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct Manifest {
    records: Vec<Record>,
}

impl Manifest {
    pub fn from_reader<R: Read>(rdr: R) -> Result<Self> {
        let mut records = vec![];

        let mut rdr = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .from_reader(rdr);
        for result in rdr.deserialize() {
            let record: Record = result?;
            records.push(record);
        }
        Ok(Manifest { records })
    }

    /// Load a manifest CSV; gzip when the filename ends in `.gz`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        if path
            .as_ref()
            .extension()
            .map(|e| e == "gz")
            .unwrap_or(false)
        {
            let (rdr, _format) = niffler::get_reader(Box::new(file))?;
            Manifest::from_reader(rdr)
        } else {
            Manifest::from_reader(file)
        }
    }

    pub fn to_writer<W: Write>(&self, mut wtr: W) -> Result<()> {
        wtr.write_all(b"# SOURMASH-MANIFEST-VERSION: 1.0\n")?;

        let mut wtr = csv::Writer::from_writer(wtr);

        for record in &self.records {
            wtr.serialize(record)?;
        }

        Ok(())
    }

    pub fn internal_locations(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.internal_location.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// Rows grouped by their container location, so loads from the same
    /// file can be batched. Groups come out sorted by location.
    pub fn row_groups_by_internal_location(&self) -> Vec<(&str, Vec<&Record>)> {
        self.records
            .iter()
            .into_group_map_by(|r| r.internal_location.as_str())
            .into_iter()
            .sorted_by_key(|(loc, _)| *loc)
            .collect()
    }

    pub fn summarize(&self) -> Vec<RecordSummary> {
        let mut summary_map: HashMap<(u32, String, u32, u64, bool), RecordSummary> = HashMap::new();

        for record in self.iter() {
            let key = (
                record.ksize(),
                record.moltype.clone(),
                record.num,
                record.scaled,
                record.with_abundance(),
            );
            let entry = summary_map.entry(key).or_insert_with(|| RecordSummary {
                ksize: record.ksize(),
                moltype: record.moltype.clone(),
                num: record.num,
                scaled: record.scaled,
                with_abundance: record.with_abundance(),
                count: 0,
                total_n_hashes: 0,
            });

            entry.count += 1;
            entry.total_n_hashes += record.n_hashes;
        }

        summary_map.into_values().collect()
    }
}

impl Select for Manifest {
    fn select(self, selection: &Selection) -> Result<Self> {
        let rows = self.records.iter().filter(|row| {
            let mut valid = true;
            if let Some(ksize) = selection.ksize() {
                valid = valid && row.ksize == ksize;
            }
            if let Some(abund) = selection.abund() {
                valid = valid && row.with_abundance() == abund;
            }
            if let Some(moltype) = selection.moltype() {
                valid = valid && row.moltype().map(|m| m == moltype).unwrap_or(false);
            }
            if let Some(scaled) = selection.scaled() {
                // num sketches have scaled == 0 and cannot serve a
                // scaled request; finer sketches can be downsampled
                valid = valid && row.scaled != 0 && row.scaled <= scaled as u64;
            }
            if let Some(num) = selection.num() {
                valid = valid && row.num == num;
            }
            if let Some(picklist) = &selection.picklist() {
                valid = valid && picklist.matches_record(row);
            }
            valid
        });

        Ok(Manifest {
            records: rows.cloned().collect(),
        })
    }
}

impl From<Vec<Record>> for Manifest {
    fn from(records: Vec<Record>) -> Self {
        Manifest { records }
    }
}

impl Deref for Manifest {
    type Target = Vec<Record>;

    fn deref(&self) -> &Self::Target {
        &self.records
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct RecordSummary {
    ksize: u32,
    moltype: String,
    num: u32,
    scaled: u64,
    with_abundance: bool,
    count: usize,
    total_n_hashes: usize,
}

impl std::fmt::Display for RecordSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} sketches with {}, k={}, scaled={}  {} total hashes",
            self.count, self.moltype, self.ksize, self.scaled, self.total_n_hashes
        )
    }
}

pub fn write_summary(summaries: &[RecordSummary]) -> String {
    let mut output = String::new();
    writeln!(
        output,
        "num signatures: {}",
        summaries.iter().map(|s| s.count).sum::<usize>()
    )
    .unwrap();
    writeln!(
        output,
        "total hashes: {}",
        summaries.iter().map(|s| s.total_n_hashes).sum::<usize>()
    )
    .unwrap();
    output.push_str("summary of sketches:\n");
    for summary in summaries {
        writeln!(output, "   {}", summary).unwrap();
    }

    output
}
