//! # Sketch construction parameters
//!
//! [`ComputeParameters`] bundles every knob for building sketches, with
//! the same defaults throughout the crate, and expands into a template
//! set of empty sketches (one per requested ksize × encoding).

use getset::{CopyGetters, Getters, Setters};
use typed_builder::TypedBuilder;

use crate::encodings::HashFunctions;
use crate::signature::Signature;
use crate::sketch::minhash::{max_hash_for_scaled, KmerMinHash};
use crate::sketch::Sketch;

impl Signature {
    /// Build a new [`Signature`] holding one empty sketch per parameter
    /// combination in `params`.
    pub fn from_params(params: &ComputeParameters) -> Signature {
        let template = build_template(params);

        Signature::builder()
            .hash_function("0.murmur64")
            .name(params.merge().clone())
            .filename(None)
            .signatures(template)
            .build()
    }
}

/// Parameters controlling sketch construction.
///
/// `ksizes` and the encoding flags (`dna`, `protein`, `dayhoff`, `hp`)
/// are combinational: every combination produces a sketch. `scaled`,
/// `num_hashes`, `seed` and `track_abundance` apply to all of them.
/// Exactly one of `scaled`/`num_hashes` should be nonzero; when `scaled`
/// is set it wins and `num` is forced to zero.
#[derive(TypedBuilder, CopyGetters, Getters, Setters)]
pub struct ComputeParameters {
    /// List of k-mer sizes to generate, in the sketch's own alphabet.
    #[getset(get = "pub", set = "pub")]
    #[builder(default = vec![21, 31, 51])]
    ksizes: Vec<u32>,

    /// Build nucleotide sketches.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = true)]
    dna: bool,

    /// Build protein sketches.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    protein: bool,

    /// Build Dayhoff-encoded sketches.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    dayhoff: bool,

    /// Build hydrophobic-polar-encoded sketches.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    hp: bool,

    /// Keep 1 in `scaled` of the input k-mers (0 = use `num_hashes`).
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = 0u64)]
    scaled: u64,

    /// Number of hashes for bounded sketches (ignored when `scaled` set).
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = 500u32)]
    num_hashes: u32,

    /// Seed for the murmur hash.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = 42u64)]
    seed: u64,

    /// Input sequences are protein; skip translation.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    input_is_protein: bool,

    /// Track k-mer multiplicities in the generated sketches.
    #[getset(get_copy = "pub", set = "pub")]
    #[builder(default = false)]
    track_abundance: bool,

    /// Name for signatures merged from several inputs.
    #[getset(get = "pub", set = "pub")]
    #[builder(default = None)]
    merge: Option<String>,

    /// Signature license. Only CC0 is supported.
    #[getset(get = "pub", set = "pub")]
    #[builder(default = "CC0".into())]
    license: String,
}

impl Default for ComputeParameters {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Expand parameters into empty sketches, one per ksize × encoding.
pub fn build_template(params: &ComputeParameters) -> Vec<Sketch> {
    let max_hash = max_hash_for_scaled(params.scaled);
    let num = if params.scaled > 0 {
        0
    } else {
        params.num_hashes
    };

    let encodings = [
        (params.protein, HashFunctions::Murmur64Protein),
        (params.dayhoff, HashFunctions::Murmur64Dayhoff),
        (params.hp, HashFunctions::Murmur64Hp),
        (params.dna, HashFunctions::Murmur64Dna),
    ];

    params
        .ksizes
        .iter()
        .flat_map(|k| {
            encodings
                .iter()
                .filter(|(enabled, _)| *enabled)
                .map(|(_, hash_function)| {
                    Sketch::MinHash(KmerMinHash::new(
                        num,
                        *k,
                        *hash_function,
                        params.seed,
                        max_hash,
                        params.track_abundance,
                    ))
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signature::SigsTrait;

    #[test]
    fn template_expansion() {
        let params = ComputeParameters::builder()
            .ksizes(vec![21, 31])
            .dna(true)
            .protein(true)
            .build();

        let template = build_template(&params);
        assert_eq!(template.len(), 4);
    }

    #[test]
    fn scaled_wins_over_num() {
        let params = ComputeParameters::builder().scaled(1000u64).build();
        let template = build_template(&params);

        let Sketch::MinHash(mh) = &template[0];
        assert_eq!(mh.num(), 0);
        assert_eq!(mh.scaled(), 1000);
    }

    #[test]
    fn default_ksizes() {
        let template = build_template(&ComputeParameters::default());
        let ksizes: Vec<_> = template.iter().map(|sk| sk.ksize()).collect();
        assert_eq!(ksizes, vec![21, 31, 51]);
    }
}
