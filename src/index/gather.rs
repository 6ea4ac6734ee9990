//! Gather: greedy min-set-cover decomposition of a query.
//!
//! Starting from the prefetched candidates, repeatedly pick the
//! reference with the largest overlap against the *remaining* query,
//! report it, subtract it, and re-filter the candidates. The original
//! query is never mutated; abundances are projected onto each match
//! for the weighted columns but removed hashes are tracked flat.

use std::io::Write;

use getset::{CopyGetters, Getters};
use log::{debug, trace};
use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::index::prefetch::PrefetchResult;
use crate::signature::{Signature, SigsTrait};
use crate::sketch::minhash::KmerMinHash;
use crate::{Error, Result};

/// Query metadata carried into report rows.
#[derive(Debug, Clone, Default)]
pub struct QueryInfo {
    pub name: String,
    pub filename: String,
    pub md5: String,
}

impl QueryInfo {
    pub fn from_sig(sig: &Signature) -> Self {
        QueryInfo {
            name: sig.name(),
            filename: sig.filename(),
            md5: sig.md5sum(),
        }
    }

    pub fn from_minhash(mh: &KmerMinHash) -> Self {
        QueryInfo {
            name: "".into(),
            filename: "".into(),
            md5: mh.md5sum(),
        }
    }
}

/// Gather knobs: the minimum overlap worth reporting, and an optional
/// coarser resolution to run at.
#[derive(Debug, Clone, TypedBuilder, CopyGetters)]
pub struct GatherParams {
    #[getset(get_copy = "pub")]
    #[builder(default = 50_000)]
    threshold_bp: u64,

    #[getset(get_copy = "pub")]
    #[builder(default)]
    scaled: Option<u64>,
}

impl Default for GatherParams {
    fn default() -> Self {
        GatherParams::builder().build()
    }
}

/// One gather round. Field order is the CSV column order.
#[derive(Debug, Clone, Serialize, Getters, CopyGetters)]
pub struct GatherResult {
    #[getset(get_copy = "pub")]
    intersect_bp: u64,

    #[getset(get_copy = "pub")]
    f_orig_query: f64,

    #[getset(get_copy = "pub")]
    f_match: f64,

    #[getset(get_copy = "pub")]
    f_unique_to_query: f64,

    #[getset(get_copy = "pub")]
    f_unique_weighted: f64,

    #[getset(get_copy = "pub")]
    average_abund: f64,

    #[getset(get_copy = "pub")]
    median_abund: f64,

    #[getset(get_copy = "pub")]
    std_abund: f64,

    #[getset(get = "pub")]
    name: String,

    #[getset(get = "pub")]
    filename: String,

    #[getset(get = "pub")]
    md5: String,

    #[getset(get_copy = "pub")]
    f_match_orig: f64,

    #[getset(get_copy = "pub")]
    unique_intersect_bp: u64,

    #[getset(get_copy = "pub")]
    gather_result_rank: usize,

    #[getset(get_copy = "pub")]
    remaining_bp: u64,

    #[getset(get = "pub")]
    query_filename: String,

    #[getset(get = "pub")]
    query_name: String,

    #[getset(get = "pub")]
    query_md5: String,

    #[getset(get_copy = "pub")]
    query_bp: u64,
}

struct Candidate {
    name: String,
    md5sum: String,
    location: String,
    minhash: KmerMinHash,
    overlap: u64,
}

/// Pick the best candidate: largest overlap, then largest sketch, then
/// lexicographically smallest name, then smallest md5 for determinism.
fn best_candidate(candidates: &[Candidate]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, c) in candidates.iter().enumerate() {
        let better = match best {
            None => true,
            Some(b) => {
                let b = &candidates[b];
                (
                    c.overlap,
                    c.minhash.size(),
                    std::cmp::Reverse(&c.name),
                    std::cmp::Reverse(&c.md5sum),
                ) > (
                    b.overlap,
                    b.minhash.size(),
                    std::cmp::Reverse(&b.name),
                    std::cmp::Reverse(&b.md5sum),
                )
            }
        };
        if better {
            best = Some(i);
        }
    }
    best
}

fn mean(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<u64>() as f64 / values.len() as f64
}

fn median(values: &mut [u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) as f64 / 2.0
    } else {
        values[mid] as f64
    }
}

// population standard deviation
fn std_dev(values: &[u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values
        .iter()
        .map(|v| {
            let d = *v as f64 - m;
            d * d
        })
        .sum::<f64>()
        / values.len() as f64;
    var.sqrt()
}

/// Execute the gather algorithm, greedy min-set-cover, by iteratively
/// removing the best match from the remaining query.
pub fn consume_query_by_gather(
    query: &KmerMinHash,
    query_info: &QueryInfo,
    candidates: Vec<PrefetchResult>,
    params: &GatherParams,
) -> Result<Vec<GatherResult>> {
    if query.scaled() == 0 {
        return Err(Error::ScaledRequired);
    }

    // everything runs at one resolution: the coarsest of the query, the
    // candidates, and the requested override
    let mut scaled = u64::max(query.scaled(), params.scaled().unwrap_or(0));
    for c in &candidates {
        scaled = u64::max(scaled, c.minhash.scaled());
    }

    let orig_query = if query.scaled() < scaled {
        query.downsample_scaled(scaled)?
    } else {
        query.clone()
    };
    let mut remaining = orig_query.flatten();

    let threshold_bp = params.threshold_bp();
    let mut candidates: Vec<Candidate> = candidates
        .into_iter()
        .map(|c| {
            let minhash = if c.minhash.scaled() < scaled {
                c.minhash.downsample_scaled(scaled)?
            } else {
                c.minhash
            };
            let overlap = remaining.count_common(&minhash, false)?;
            Ok(Candidate {
                name: c.name,
                md5sum: c.md5sum,
                location: c.location,
                minhash,
                overlap,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    candidates.retain(|c| c.overlap > 0 && c.overlap * scaled >= threshold_bp);

    let total_hashes = orig_query.size();
    if total_hashes == 0 {
        return Ok(vec![]);
    }
    let total_weighted = orig_query.sum_abunds();
    let track_abund = orig_query.track_abundance();

    debug!(
        "gather start: |query|={} candidates={} scaled={}",
        total_hashes,
        candidates.len(),
        scaled
    );

    let mut results = vec![];

    while let Some(best_pos) = best_candidate(&candidates) {
        let best = candidates.swap_remove(best_pos);
        if best.overlap == 0 || best.overlap * scaled < threshold_bp {
            break;
        }

        let unique_intersect = best.overlap;
        let intersect_orig = orig_query.count_common(&best.minhash, false)?;

        // hashes this match claims from the remaining query; abundance
        // stats are projected from the original query onto them
        let (claimed, _) = remaining.intersection(&best.minhash)?;
        let mut abunds = orig_query.abundances_for(&claimed);

        let f_unique_weighted = if track_abund {
            abunds.iter().sum::<u64>() as f64 / u64::max(1, total_weighted) as f64
        } else {
            unique_intersect as f64 / total_hashes as f64
        };
        let (average_abund, median_abund, std_abund) = if track_abund {
            (mean(&abunds), median(&mut abunds), std_dev(&abunds))
        } else {
            (0.0, 0.0, 0.0)
        };

        remaining.remove_from(&best.minhash)?;

        let result = GatherResult {
            intersect_bp: intersect_orig * scaled,
            f_orig_query: intersect_orig as f64 / total_hashes as f64,
            f_match: unique_intersect as f64 / best.minhash.size() as f64,
            f_unique_to_query: unique_intersect as f64 / total_hashes as f64,
            f_unique_weighted,
            average_abund,
            median_abund,
            std_abund,
            name: best.name.clone(),
            filename: best.location.clone(),
            md5: best.md5sum.clone(),
            f_match_orig: intersect_orig as f64 / best.minhash.size() as f64,
            unique_intersect_bp: unique_intersect * scaled,
            gather_result_rank: results.len(),
            remaining_bp: remaining.size() as u64 * scaled,
            query_filename: query_info.filename.clone(),
            query_name: query_info.name.clone(),
            query_md5: query_info.md5.clone(),
            query_bp: total_hashes as u64 * scaled,
        };
        trace!(
            "gather rank {}: {} f_unique={:.4}",
            result.gather_result_rank,
            result.name,
            result.f_unique_to_query
        );
        results.push(result);

        // recalculate remaining overlaps and drop exhausted candidates
        for c in candidates.iter_mut() {
            c.overlap = remaining.count_common(&c.minhash, false)?;
        }
        candidates.retain(|c| c.overlap > 0 && c.overlap * scaled >= threshold_bp);
    }

    debug!(
        "gather done: {} results, {} hashes unassigned",
        results.len(),
        remaining.size()
    );
    Ok(results)
}

/// Write the gather CSV report, one row per round.
pub fn write_gather_csv<W: Write>(results: &[GatherResult], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for result in results {
        wtr.serialize(result)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encodings::HashFunctions;

    fn scaled_mh(hashes: &[u64]) -> KmerMinHash {
        let mut mh = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, false);
        mh.add_many(hashes).unwrap();
        mh
    }

    fn candidate(name: &str, hashes: &[u64]) -> PrefetchResult {
        let mh = scaled_mh(hashes);
        PrefetchResult {
            name: name.into(),
            md5sum: mh.md5sum(),
            location: format!("{}.sig", name),
            minhash: mh,
            overlap: 0, // recomputed by the engine
        }
    }

    #[test]
    fn identity_decomposition() {
        let query = scaled_mh(&[1, 2, 3, 4, 5]);
        let info = QueryInfo::from_minhash(&query);
        let params = GatherParams::builder().threshold_bp(0).build();

        let results = consume_query_by_gather(
            &query,
            &info,
            vec![candidate("self", &[1, 2, 3, 4, 5])],
            &params,
        )
        .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].f_unique_to_query(), 1.0);
        assert_eq!(results[0].f_match_orig(), 1.0);
        assert_eq!(results[0].remaining_bp(), 0);
    }

    #[test]
    fn greedy_prefers_larger_overlap() {
        let query = scaled_mh(&[1, 2, 3, 4, 5, 6]);
        let info = QueryInfo::from_minhash(&query);
        let params = GatherParams::builder().threshold_bp(0).build();

        let results = consume_query_by_gather(
            &query,
            &info,
            vec![
                candidate("small", &[1, 2]),
                candidate("large", &[3, 4, 5, 6]),
            ],
            &params,
        )
        .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name(), "large");
        assert_eq!(results[1].name(), "small");
        // ranks are sequential and f_unique is non-increasing
        assert_eq!(results[0].gather_result_rank(), 0);
        assert!(results[0].f_unique_to_query() >= results[1].f_unique_to_query());
    }

    #[test]
    fn tie_breaks_by_size_then_name() {
        let query = scaled_mh(&[1, 2, 10, 11]);
        let info = QueryInfo::from_minhash(&query);
        let params = GatherParams::builder().threshold_bp(0).build();

        // both overlap 2; "bigger" has more total hashes
        let results = consume_query_by_gather(
            &query,
            &info,
            vec![
                candidate("zzz", &[1, 2]),
                candidate("bigger", &[10, 11, 100, 101]),
            ],
            &params,
        )
        .unwrap();
        assert_eq!(results[0].name(), "bigger");

        // equal overlap and size: lexicographically smaller name wins
        let query = scaled_mh(&[1, 2, 10, 11]);
        let results = consume_query_by_gather(
            &query,
            &info,
            vec![candidate("beta", &[10, 11]), candidate("alpha", &[1, 2])],
            &params,
        )
        .unwrap();
        assert_eq!(results[0].name(), "alpha");
    }

    #[test]
    fn threshold_stops_iteration() {
        let mut query_hashes: Vec<u64> = (1..=100).collect();
        query_hashes.sort_unstable();
        let query = scaled_mh(&query_hashes);
        let info = QueryInfo::from_minhash(&query);

        // scaled is 1, so threshold_bp of 10 needs overlap >= 10
        let params = GatherParams::builder().threshold_bp(10).build();

        let results = consume_query_by_gather(
            &query,
            &info,
            vec![
                candidate("big", &(1..=50).collect::<Vec<_>>()),
                candidate("tiny", &[98, 99]),
            ],
            &params,
        )
        .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name(), "big");
    }

    #[test]
    fn abundance_projection() {
        let mut query = KmerMinHash::with_scaled(1, 21, HashFunctions::Murmur64Dna, 42, true);
        // genome A hashes at 10x, genome B hashes at 1x
        for h in [1u64, 2, 3] {
            query.add_hash_with_abundance(h, 10);
        }
        for h in [4u64, 5, 6] {
            query.add_hash_with_abundance(h, 1);
        }
        let info = QueryInfo::from_minhash(&query);
        let params = GatherParams::builder().threshold_bp(0).build();

        let results = consume_query_by_gather(
            &query,
            &info,
            vec![candidate("a", &[1, 2, 3]), candidate("b", &[4, 5, 6])],
            &params,
        )
        .unwrap();

        assert_eq!(results.len(), 2);
        let a = results.iter().find(|r| r.name() == "a").unwrap();
        let b = results.iter().find(|r| r.name() == "b").unwrap();

        // 30 of 33 total abundance belongs to A
        assert!((a.f_unique_weighted() - 30.0 / 33.0).abs() < 1e-9);
        assert!((b.f_unique_weighted() - 3.0 / 33.0).abs() < 1e-9);
        assert_eq!(a.average_abund(), 10.0);
        assert_eq!(a.median_abund(), 10.0);
        assert_eq!(a.std_abund(), 0.0);

        // flat fractions are equal
        assert_eq!(a.f_unique_to_query(), b.f_unique_to_query());
    }

    #[test]
    fn gather_csv_columns() {
        let query = scaled_mh(&[1, 2, 3]);
        let info = QueryInfo {
            name: "metagenome".into(),
            filename: "meta.sig".into(),
            md5: "aaaa".into(),
        };
        let params = GatherParams::builder().threshold_bp(0).build();
        let results =
            consume_query_by_gather(&query, &info, vec![candidate("x", &[1, 2])], &params)
                .unwrap();

        let mut buffer = vec![];
        write_gather_csv(&results, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with(
            "intersect_bp,f_orig_query,f_match,f_unique_to_query,f_unique_weighted,\
             average_abund,median_abund,std_abund,name,filename,md5,f_match_orig,\
             unique_intersect_bp,gather_result_rank,remaining_bp,query_filename,\
             query_name,query_md5,query_bp"
        ));
    }
}
