//! # Indexing structures for fast similarity search
//!
//! An index organizes signatures for search. All variants answer the
//! same three questions — `search` (ranked matches above a similarity
//! threshold), `prefetch` (every match above an overlap threshold) and
//! `gather` (greedy min-set-cover decomposition) — and differ only in
//! how candidates are discovered and what they cost.

pub mod gather;
pub mod linear;
pub mod prefetch;
pub mod revindex;
pub mod sbt;
pub mod search;
pub mod standalone;

use enum_dispatch::enum_dispatch;

use crate::collection::Idx;
use crate::index::gather::{consume_query_by_gather, GatherParams, GatherResult, QueryInfo};
use crate::index::linear::LinearIndex;
use crate::index::prefetch::PrefetchResult;
use crate::index::revindex::RevIndex;
use crate::index::sbt::SBT;
use crate::index::search::{SearchMeasure, SearchResult};
use crate::index::standalone::StandaloneManifestIndex;
use crate::sketch::minhash::KmerMinHash;
use crate::storage::SigStore;
use crate::Result;

/// Tally of hits per dataset index.
pub type SigCounter = counter::Counter<Idx>;

/// The uniform contract over every index variant.
#[enum_dispatch]
pub trait Index {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize every signature. Streaming variants prefer
    /// per-variant iterators; this is the uniform (and possibly
    /// expensive) form.
    fn signatures(&self) -> Result<Vec<SigStore>>;

    /// Matches at or above `threshold` for the chosen measure, sorted
    /// descending; ties keep traversal order.
    fn search(
        &self,
        query: &KmerMinHash,
        measure: SearchMeasure,
        threshold: f64,
    ) -> Result<Vec<SearchResult>>;

    /// Every signature with estimated overlap (shared hashes × scaled)
    /// at or above `threshold_bp`. Scaled sketches only; output order
    /// is unspecified.
    fn prefetch(&self, query: &KmerMinHash, threshold_bp: u64) -> Result<Vec<PrefetchResult>>;

    /// Greedy min-set-cover decomposition of the query against this
    /// index. One shared engine runs over the prefetched candidates, so
    /// ordering and tie-breaking are identical across variants.
    fn gather(
        &self,
        query: &KmerMinHash,
        params: &GatherParams,
        query_info: &QueryInfo,
    ) -> Result<Vec<GatherResult>> {
        let candidates = self.prefetch(query, params.threshold_bp())?;
        consume_query_by_gather(query, query_info, candidates, params)
    }
}

/// The closed set of index variants, dispatching the shared contract.
#[enum_dispatch(Index)]
pub enum Database {
    Linear(LinearIndex),
    Sbt(SBT),
    Inverted(RevIndex),
    Standalone(StandaloneManifestIndex),
}
