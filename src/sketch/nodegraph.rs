//! Bloom-filter nodes for Sequence Bloom Trees.
//!
//! A nodegraph is a partitioned Bloom filter: one bit table per hash
//! function, each sized to a distinct odd prime. Hashes are admitted
//! with `count` and probed with `get`; false positives are possible,
//! false negatives are not.
//!
//! On disk a nodegraph is a little-endian framed dump of its tables
//! (magic `FMBF`, version 1), gzip-tolerant on read. The framing is
//! internal to this crate: filters only ever travel inside SBT
//! containers written by the same code.

use std::fs::File;
use std::io;
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fixedbitset::FixedBitSet;

use crate::prelude::*;
use crate::sketch::minhash::KmerMinHash;
use crate::Error;
use crate::HashIntoType;

const MAGIC: &[u8; 4] = b"FMBF";
const VERSION: u16 = 1;

#[derive(Debug, Default, Clone)]
pub struct Nodegraph {
    bs: Vec<FixedBitSet>,
    ksize: usize,
    unique_kmers: usize,
}

// unique_kmers is advisory: a bitwise union cannot maintain it, so
// equality is defined by the tables and ksize alone
impl PartialEq for Nodegraph {
    fn eq(&self, other: &Nodegraph) -> bool {
        self.ksize == other.ksize && self.bs == other.bs
    }
}

impl Update<Nodegraph> for Nodegraph {
    fn update(&self, other: &mut Nodegraph) -> Result<(), Error> {
        for (mine, theirs) in self.bs.iter().zip(other.bs.iter_mut()) {
            theirs.union_with(mine);
        }
        Ok(())
    }
}

impl Update<Nodegraph> for KmerMinHash {
    fn update(&self, other: &mut Nodegraph) -> Result<(), Error> {
        for h in self.iter_mins() {
            other.count(*h);
        }
        Ok(())
    }
}

/// Largest prime at or below `n`.
fn previous_prime(mut n: u64) -> u64 {
    if n <= 3 {
        return n.max(2);
    }
    if n % 2 == 0 {
        n -= 1;
    }
    while n > 3 && !primal_check::miller_rabin(n) {
        n -= 2;
    }
    n
}

impl Nodegraph {
    pub fn new(tablesizes: &[usize], ksize: usize) -> Nodegraph {
        let bs = tablesizes
            .iter()
            .map(|size| FixedBitSet::with_capacity(*size))
            .collect();

        Nodegraph {
            bs,
            ksize,
            unique_kmers: 0,
        }
    }

    /// Build with `n_tables` tables of distinct prime sizes at most
    /// `tablesize`.
    pub fn with_tables(tablesize: usize, n_tables: usize, ksize: usize) -> Nodegraph {
        let mut sizes = Vec::with_capacity(n_tables);
        let mut upper = u64::max(tablesize as u64, 4);

        while sizes.len() < n_tables {
            let prime = previous_prime(upper);
            sizes.push(prime as usize);
            if prime <= 2 {
                break;
            }
            upper = prime - 1;
        }

        Nodegraph::new(&sizes, ksize)
    }

    /// Size the filter so the false-positive rate at `num_elements`
    /// stays below `fp_rate`, using the standard Bloom sizing formulas.
    pub fn with_fp_rate(num_elements: usize, fp_rate: f64, ksize: usize) -> Nodegraph {
        let num_elements = usize::max(num_elements, 1);
        let ln2 = std::f64::consts::LN_2;

        let total_bits = -(num_elements as f64 * fp_rate.ln()) / (ln2 * ln2);
        let n_tables = usize::max(1, (total_bits / num_elements as f64 * ln2).round() as usize);
        let tablesize = usize::max(64, (total_bits / n_tables as f64).ceil() as usize);

        Nodegraph::with_tables(tablesize, n_tables, ksize)
    }

    /// Admit a hash; true when it was new.
    pub fn count(&mut self, hash: HashIntoType) -> bool {
        let mut is_new = false;
        for table in self.bs.iter_mut() {
            let bin = (hash % table.len() as u64) as usize;
            is_new |= !table.put(bin);
        }

        if is_new {
            self.unique_kmers += 1;
        }
        is_new
    }

    /// Probe for a hash: 1 when (probably) present, 0 when absent.
    pub fn get(&self, hash: HashIntoType) -> usize {
        let present = self
            .bs
            .iter()
            .all(|table| table.contains((hash % table.len() as u64) as usize));
        usize::from(present)
    }

    /// How many of the sketch's hashes probe positive.
    pub fn matches(&self, mh: &KmerMinHash) -> usize {
        mh.iter_mins().filter(|x| self.get(**x) == 1).count()
    }

    /// Occupancy of the first (largest) table.
    pub fn noccupied(&self) -> usize {
        self.bs.first().map(|t| t.count_ones(..)).unwrap_or(0)
    }

    pub fn expected_collisions(&self) -> f64 {
        let min_size = self.bs.iter().map(|x| x.len()).min().unwrap_or(1);
        let fp_one = self.noccupied() as f64 / min_size as f64;
        fp_one.powi(self.bs.len() as i32)
    }

    pub fn tablesize(&self) -> usize {
        self.bs.iter().map(|x| x.len()).sum()
    }

    pub fn tablesizes(&self) -> Vec<u64> {
        self.bs.iter().map(|x| x.len() as u64).collect()
    }

    pub fn ntables(&self) -> usize {
        self.bs.len()
    }

    pub fn ksize(&self) -> usize {
        self.ksize
    }

    pub fn unique_kmers(&self) -> usize {
        self.unique_kmers
    }

    pub fn similarity(&self, other: &Nodegraph) -> f64 {
        let intersection: usize = self
            .bs
            .iter()
            .zip(&other.bs)
            .map(|(bs, bs_other)| bs.intersection(bs_other).count())
            .sum();
        let union: usize = self
            .bs
            .iter()
            .zip(&other.bs)
            .map(|(bs, bs_other)| bs.union(bs_other).count())
            .sum();
        intersection as f64 / union as f64
    }

    pub fn containment(&self, other: &Nodegraph) -> f64 {
        let intersection: usize = self
            .bs
            .iter()
            .zip(&other.bs)
            .map(|(bs, bs_other)| bs.intersection(bs_other).count())
            .sum();
        let size: usize = self.bs.iter().map(|bs| bs.count_ones(..)).sum();
        if size == 0 {
            return 0.0;
        }
        intersection as f64 / size as f64
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        self.save_to_writer(&mut File::create(path)?)?;
        Ok(())
    }

    /// Framed dump: header (magic, version, ksize, unique k-mer count,
    /// table count) followed by each table as its bit capacity and raw
    /// 32-bit blocks. Everything little-endian.
    pub fn save_to_writer<W>(&self, wtr: &mut W) -> Result<(), Error>
    where
        W: io::Write,
    {
        wtr.write_all(MAGIC)?;
        wtr.write_u16::<LittleEndian>(VERSION)?;
        wtr.write_u32::<LittleEndian>(self.ksize as u32)?;
        wtr.write_u64::<LittleEndian>(self.unique_kmers as u64)?;
        wtr.write_u32::<LittleEndian>(self.bs.len() as u32)?;

        for table in &self.bs {
            let blocks = table.as_slice();
            wtr.write_u64::<LittleEndian>(table.len() as u64)?;
            wtr.write_u32::<LittleEndian>(blocks.len() as u32)?;
            for block in blocks {
                wtr.write_u32::<LittleEndian>(*block)?;
            }
        }
        Ok(())
    }

    pub fn from_reader<R>(rdr: R) -> Result<Nodegraph, Error>
    where
        R: io::Read,
    {
        let (mut rdr, _format) = niffler::get_reader(Box::new(rdr))?;

        let mut magic = [0u8; 4];
        rdr.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::Internal {
                message: format!("invalid bloom filter magic: {:02x?}", magic),
            });
        }

        let version = rdr.read_u16::<LittleEndian>()?;
        if version != VERSION {
            return Err(Error::Internal {
                message: format!("unsupported bloom filter version {}", version),
            });
        }

        let ksize = rdr.read_u32::<LittleEndian>()? as usize;
        let unique_kmers = rdr.read_u64::<LittleEndian>()? as usize;
        let n_tables = rdr.read_u32::<LittleEndian>()?;

        let mut bs = Vec::with_capacity(n_tables as usize);
        for _ in 0..n_tables {
            let bits = rdr.read_u64::<LittleEndian>()? as usize;
            let n_blocks = rdr.read_u32::<LittleEndian>()? as usize;
            if n_blocks != (bits + 31) / 32 {
                return Err(Error::Internal {
                    message: format!(
                        "bloom filter table claims {} bits in {} blocks",
                        bits, n_blocks
                    ),
                });
            }

            let mut blocks = vec![0u32; n_blocks];
            rdr.read_u32_into::<LittleEndian>(&mut blocks)?;
            bs.push(FixedBitSet::with_capacity_and_blocks(bits, blocks));
        }

        Ok(Nodegraph {
            bs,
            ksize,
            unique_kmers,
        })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Nodegraph, Error> {
        let mut reader = io::BufReader::new(File::open(path)?);
        Nodegraph::from_reader(&mut reader)
    }
}
