use getset::{CopyGetters, Getters};
use serde::Serialize;

use crate::sketch::minhash::KmerMinHash;
use crate::Result;

/// Which measure a search thresholds and ranks by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMeasure {
    Jaccard,
    /// Fraction of the query contained in the match.
    Containment,
    /// Containment relative to the smaller of the two sketches.
    MaxContainment,
}

impl SearchMeasure {
    /// Compute this measure between query and match, downsampling
    /// scaled sketches as needed.
    pub fn measure(&self, query: &KmerMinHash, against: &KmerMinHash) -> Result<f64> {
        match self {
            SearchMeasure::Jaccard => query.similarity(against, true, true),
            SearchMeasure::Containment => query.contained_by(against),
            SearchMeasure::MaxContainment => query.max_containment(against),
        }
    }
}

/// One search match: the measure value plus enough metadata to report
/// or retrieve the signature.
#[derive(Debug, Clone, Serialize, Getters, CopyGetters)]
pub struct SearchResult {
    #[getset(get_copy = "pub")]
    similarity: f64,

    #[getset(get = "pub")]
    name: String,

    #[getset(get = "pub")]
    md5: String,

    #[getset(get = "pub")]
    location: String,
}

impl SearchResult {
    pub fn new(similarity: f64, name: String, md5: String, location: String) -> Self {
        SearchResult {
            similarity,
            name,
            md5,
            location,
        }
    }
}

/// Descending by measure; stable, so ties keep traversal order.
pub fn sort_matches(matches: &mut [SearchResult]) {
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
