//! Prefetch: collect *all* matches with enough overlap.
//!
//! Prefetch is the candidate-discovery half of gather, and a useful
//! report on its own: every reference sharing at least `threshold_bp`
//! estimated base pairs with the query, in no particular order.

use std::io::Write;

use serde::Serialize;

use crate::index::gather::QueryInfo;
use crate::signature::SigsTrait;
use crate::sketch::minhash::KmerMinHash;
use crate::{Error, Result};

/// Overlap information for one candidate match. The minhash kept here
/// is already downsampled to the common resolution with the query.
#[derive(Debug, Clone)]
pub struct PrefetchResult {
    pub name: String,
    pub md5sum: String,
    pub location: String,
    pub minhash: KmerMinHash,
    pub overlap: u64,
}

/// Mutually downsample query and match, returning the overlap, the
/// common scaled value, and the downsampled pair.
pub fn downsampled_overlap(
    query: &KmerMinHash,
    against: &KmerMinHash,
) -> Result<(u64, u64, KmerMinHash, KmerMinHash)> {
    if query.scaled() == 0 || against.scaled() == 0 {
        return Err(Error::ScaledRequired);
    }

    let scaled = u64::max(query.scaled(), against.scaled());
    let q_ds = if query.scaled() < scaled {
        query.downsample_scaled(scaled)?
    } else {
        query.clone()
    };
    let m_ds = if against.scaled() < scaled {
        against.downsample_scaled(scaled)?
    } else {
        against.clone()
    };

    let overlap = q_ds.count_common(&m_ds, false)?;
    Ok((overlap, scaled, q_ds, m_ds))
}

/// One row of the prefetch CSV report.
#[derive(Debug, Serialize)]
pub struct PrefetchRecord {
    intersect_bp: u64,
    jaccard: f64,
    max_containment: f64,
    f_query_match: f64,
    f_match_query: f64,
    match_filename: String,
    match_name: String,
    match_md5: String,
    match_bp: u64,
    query_filename: String,
    query_name: String,
    query_md5: String,
    query_bp: u64,
}

impl PrefetchRecord {
    pub fn from_match(
        query: &KmerMinHash,
        query_info: &QueryInfo,
        result: &PrefetchResult,
    ) -> Result<Self> {
        let (overlap, scaled, q_ds, m_ds) = downsampled_overlap(query, &result.minhash)?;

        let jaccard = q_ds.jaccard(&m_ds)?;
        let max_containment = q_ds.max_containment(&m_ds)?;
        let f_query_match = if q_ds.size() == 0 {
            0.
        } else {
            overlap as f64 / q_ds.size() as f64
        };
        let f_match_query = if m_ds.size() == 0 {
            0.
        } else {
            overlap as f64 / m_ds.size() as f64
        };

        Ok(PrefetchRecord {
            intersect_bp: overlap * scaled,
            jaccard,
            max_containment,
            f_query_match,
            f_match_query,
            match_filename: result.location.clone(),
            match_name: result.name.clone(),
            match_md5: result.md5sum.clone(),
            match_bp: m_ds.size() as u64 * scaled,
            query_filename: query_info.filename.clone(),
            query_name: query_info.name.clone(),
            query_md5: query_info.md5.clone(),
            query_bp: q_ds.size() as u64 * scaled,
        })
    }
}

/// Write the prefetch CSV report for a set of matches.
pub fn write_prefetch_csv<W: Write>(
    query: &KmerMinHash,
    query_info: &QueryInfo,
    matches: &[PrefetchResult],
    writer: W,
) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for m in matches {
        wtr.serialize(PrefetchRecord::from_match(query, query_info, m)?)?;
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

    #[test]
    fn overlap_basics() {
        let q = scaled_mh(&[1, 2, 3, 4]);
        let m = scaled_mh(&[3, 4, 5]);

        let (overlap, scaled, _, _) = downsampled_overlap(&q, &m).unwrap();
        assert_eq!(overlap, 2);
        assert_eq!(scaled, 1);
    }

    #[test]
    fn num_sketches_rejected() {
        let q = scaled_mh(&[1, 2]);
        let n = KmerMinHash::with_num(10, 21, HashFunctions::Murmur64Dna, 42, false);
        assert!(matches!(
            downsampled_overlap(&q, &n),
            Err(Error::ScaledRequired)
        ));
    }

    #[test]
    fn csv_header_order() {
        let q = scaled_mh(&[1, 2, 3]);
        let m = PrefetchResult {
            name: "ref".into(),
            md5sum: "beef".into(),
            location: "ref.sig".into(),
            minhash: scaled_mh(&[2, 3]),
            overlap: 2,
        };
        let info = QueryInfo {
            name: "query".into(),
            filename: "q.sig".into(),
            md5: "feed".into(),
        };

        let mut buffer = vec![];
        write_prefetch_csv(&q, &info, &[m], &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with(
            "intersect_bp,jaccard,max_containment,f_query_match,f_match_query,\
             match_filename,match_name,match_md5,match_bp,query_filename,\
             query_name,query_md5,query_bp"
        ));
        assert!(text.contains("ref.sig"));
    }
}
