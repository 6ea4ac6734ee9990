//! # Compute, compare and decompose k-mer sketches of biological sequences.
//!
//! fracmash turns nucleotide and protein sequences into compact
//! [MinHash][0] and FracMinHash sketches, compares sketches to each other
//! (similarity and containment), and decomposes metagenome sketches
//! against reference collections with a greedy min-set-cover (`gather`).
//!
//! [0]: https://en.wikipedia.org/wiki/MinHash
//!
//! Collections of signatures can be kept in memory, in directories or zip
//! archives, organized as Sequence Bloom Trees for pruned search, or
//! inverted into a hash-to-dataset index for streaming containment
//! queries. All of them answer the same `search`/`prefetch`/`gather`
//! operations.

pub mod errors;
pub use errors::FracmashError as Error;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude;

pub mod ani_utils;
pub mod cmd;
pub mod collection;
pub mod encodings;
pub mod index;
pub mod manifest;
pub mod picklist;
pub mod selection;
pub mod signature;
pub mod sketch;
pub mod storage;

use murmurhash3::murmurhash3_x64_128;

/// The hash type used everywhere: 64 bits, from the low word of
/// MurmurHash3 x64-128.
pub type HashIntoType = u64;

pub fn _hash_murmur(kmer: &[u8], seed: u64) -> u64 {
    murmurhash3_x64_128(kmer, seed).0
}
