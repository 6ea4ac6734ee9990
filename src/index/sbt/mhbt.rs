//! Bloom-filter node plumbing for the SBT: the lazy [`Node`] handle,
//! the [`Factory`] that sizes fresh filters, and the update/bound
//! operations search relies on.

use std::collections::HashMap;
use std::io::Write;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::prelude::*;
use crate::signature::SigsTrait;
use crate::sketch::minhash::KmerMinHash;
use crate::sketch::nodegraph::Nodegraph;
use crate::sketch::Sketch;
use crate::storage::{InnerStorage, StorageError};
use crate::{Error, Result};

impl ToWriter for Nodegraph {
    fn to_writer<W>(&self, writer: &mut W) -> Result<()>
    where
        W: Write,
    {
        self.save_to_writer(writer)
    }
}

/// Recipe for building internal-node Bloom filters; the args are
/// recorded in the SBT descriptor so a loaded tree can rebuild
/// compatible nodes. Args are `(ksize, tablesize, n_tables)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum Factory {
    GraphFactory { args: (u64, f64, u64) },
}

impl Factory {
    /// Size filters for `num_elements` entries at the target
    /// false-positive rate (default policy: 1%).
    pub fn from_fp_rate(num_elements: usize, fp_rate: f64, ksize: u64) -> Factory {
        let probe = Nodegraph::with_fp_rate(num_elements, fp_rate, ksize as usize);
        Factory::GraphFactory {
            args: (
                ksize,
                probe.tablesizes().first().cloned().unwrap_or(64) as f64,
                probe.ntables() as u64,
            ),
        }
    }

    pub fn build(&self) -> Nodegraph {
        match self {
            Factory::GraphFactory { args: (k, t, n) } => {
                Nodegraph::with_tables(*t as usize, *n as usize, *k as usize)
            }
        }
    }
}

impl Default for Factory {
    fn default() -> Self {
        Factory::GraphFactory {
            args: (1, 100_000.0, 4),
        }
    }
}

/// An internal tree node: a Bloom filter over the union of all hashes
/// below it, loaded lazily from storage when absent.
#[derive(TypedBuilder, Default)]
pub struct Node {
    #[builder(setter(into))]
    pub(crate) filename: String,

    #[builder(setter(into))]
    pub(crate) name: String,

    #[builder(default)]
    pub(crate) metadata: HashMap<String, u64>,

    #[builder(default)]
    pub(crate) storage: Option<InnerStorage>,

    #[builder(setter(into), default)]
    pub(crate) data: OnceCell<Nodegraph>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Node [name={}, filename={}, metadata: {:?}, loaded: {}]",
            self.name,
            self.filename,
            self.metadata,
            self.data.get().is_some()
        )
    }
}

impl ReadData<Nodegraph> for Node {
    fn data(&self) -> Result<&Nodegraph> {
        if let Some(ng) = self.data.get() {
            Ok(ng)
        } else if let Some(storage) = &self.storage {
            self.data.get_or_try_init(|| {
                let raw = storage.load(&self.filename)?;
                Nodegraph::from_reader(&raw[..])
            })
        } else {
            Err(StorageError::DataReadError(self.filename.clone()).into())
        }
    }
}

impl Node {
    /// The smallest leaf size below this node; 1 when unknown.
    pub fn min_n_below(&self) -> u64 {
        u64::max(1, self.metadata.get("min_n_below").copied().unwrap_or(1))
    }

    /// How many of the query hashes probe positive in this filter.
    /// Overestimates the true overlap of any leaf below (Bloom false
    /// positives and unions only add), which is what makes it a safe
    /// pruning bound.
    pub fn overlap_bound(&self, query: &KmerMinHash) -> Result<u64> {
        Ok(self.data()?.matches(query) as u64)
    }

    /// Upper bound on the Jaccard similarity between the query and any
    /// leaf below this node.
    pub fn similarity_bound(&self, query: &KmerMinHash) -> Result<f64> {
        let matches = self.overlap_bound(query)?;
        Ok(matches as f64 / self.min_n_below() as f64)
    }

    /// Upper bound on the containment of the query in any leaf below.
    pub fn containment_bound(&self, query: &KmerMinHash) -> Result<f64> {
        if query.size() == 0 {
            return Ok(0.0);
        }
        let matches = self.overlap_bound(query)?;
        Ok(matches as f64 / query.size() as f64)
    }

    pub fn save(&self, path: &str) -> Result<String> {
        let storage = self.storage.as_ref().ok_or_else(|| Error::Internal {
            message: "node has no storage".into(),
        })?;
        let data = self.data.get().ok_or_else(|| Error::Internal {
            message: "node data not initialized".into(),
        })?;

        let mut buffer = Vec::new();
        data.to_writer(&mut buffer)?;
        storage.save(path, &buffer)
    }
}

impl Update<Node> for Signature {
    fn update(&self, parent: &mut Node) -> Result<()> {
        // make sure the filter is resident before mutating it
        parent.data()?;

        let Some(Sketch::MinHash(mh)) = self.get_sketch() else {
            return Err(Error::Internal {
                message: "signature without a sketch cannot update a node".into(),
            });
        };

        let ng = parent
            .data
            .get_mut()
            .expect("data was just initialized");
        for h in mh.iter_mins() {
            ng.count(*h);
        }

        let min_n_below = parent
            .metadata
            .entry("min_n_below".into())
            .or_insert(u64::MAX);
        *min_n_below = u64::min(mh.size() as u64, *min_n_below);
        if *min_n_below == 0 {
            *min_n_below = 1
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encodings::HashFunctions;

    fn sig_with(hashes: &[u64]) -> Signature {
        let mut mh = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        mh.add_many(hashes).unwrap();
        Signature::builder()
            .signatures(vec![Sketch::MinHash(mh)])
            .build()
    }

    fn fresh_node(factory: &Factory) -> Node {
        Node::builder()
            .filename("internal.0")
            .name("internal.0")
            .data(factory.build())
            .build()
    }

    #[test]
    fn update_tracks_min_n_below() {
        let factory = Factory::default();
        let mut node = fresh_node(&factory);

        sig_with(&[1, 2, 3, 4]).update(&mut node).unwrap();
        assert_eq!(node.min_n_below(), 4);

        sig_with(&[1, 2]).update(&mut node).unwrap();
        assert_eq!(node.min_n_below(), 2);
    }

    #[test]
    fn bounds_never_underestimate() {
        let factory = Factory::default();
        let mut node = fresh_node(&factory);
        sig_with(&[10, 20, 30]).update(&mut node).unwrap();

        let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        query.add_many(&[10, 20, 999]).unwrap();

        // true overlap with the single leaf is 2
        assert!(node.overlap_bound(&query).unwrap() >= 2);
        assert!(node.containment_bound(&query).unwrap() >= 2.0 / 3.0);
    }

    #[test]
    fn factory_fp_rate_args() {
        let factory = Factory::from_fp_rate(10_000, 0.01, 31);
        let Factory::GraphFactory { args: (k, t, n) } = factory;
        assert_eq!(k, 31);
        assert!(t > 1000.0);
        assert!(n >= 2);
    }
}
