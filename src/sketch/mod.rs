pub mod minhash;
pub mod nodegraph;

use serde::{Deserialize, Serialize};

use crate::sketch::minhash::KmerMinHash;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Sketch {
    MinHash(KmerMinHash),
}
