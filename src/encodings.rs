use std::collections::HashMap;
use std::convert::TryFrom;
use std::str;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Which alphabet a sketch hashes over, and how residues are encoded
/// before hashing. All variants use the 64-bit murmur hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashFunctions {
    Murmur64Dna,
    Murmur64Protein,
    Murmur64Dayhoff,
    Murmur64Hp,
}

/// Accepted spellings for each encoding, lowercase; the first entry is
/// the canonical display form (except DNA, which displays uppercase).
const MOLTYPE_NAMES: [(&str, HashFunctions); 4] = [
    ("dna", HashFunctions::Murmur64Dna),
    ("protein", HashFunctions::Murmur64Protein),
    ("dayhoff", HashFunctions::Murmur64Dayhoff),
    ("hp", HashFunctions::Murmur64Hp),
];

impl HashFunctions {
    pub fn dna(&self) -> bool {
        matches!(self, HashFunctions::Murmur64Dna)
    }

    pub fn protein(&self) -> bool {
        matches!(self, HashFunctions::Murmur64Protein)
    }

    pub fn dayhoff(&self) -> bool {
        matches!(self, HashFunctions::Murmur64Dayhoff)
    }

    pub fn hp(&self) -> bool {
        matches!(self, HashFunctions::Murmur64Hp)
    }

    /// The moltype name as written in manifests and signature files.
    pub fn moltype(&self) -> &'static str {
        if self.dna() {
            // DNA is uppercase everywhere in the file formats
            "DNA"
        } else {
            MOLTYPE_NAMES
                .iter()
                .find(|(_, hf)| hf == self)
                .map(|(name, _)| *name)
                .expect("every variant has a registered name")
        }
    }
}

impl std::fmt::Display for HashFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.moltype())
    }
}

impl TryFrom<&str> for HashFunctions {
    type Error = Error;

    fn try_from(moltype: &str) -> Result<Self, Self::Error> {
        let lower = moltype.to_ascii_lowercase();
        MOLTYPE_NAMES
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, hf)| *hf)
            .ok_or_else(|| Error::InvalidHashFunction {
                function: moltype.into(),
            })
    }
}

const COMPLEMENT: [u8; 256] = {
    let mut lookup = [0; 256];
    lookup[b'A' as usize] = b'T';
    lookup[b'C' as usize] = b'G';
    lookup[b'G' as usize] = b'C';
    lookup[b'T' as usize] = b'A';
    lookup[b'N' as usize] = b'N';
    lookup
};

#[inline]
pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|nt| COMPLEMENT[*nt as usize])
        .collect()
}

pub const VALID: [bool; 256] = {
    let mut lookup = [false; 256];
    lookup[b'A' as usize] = true;
    lookup[b'C' as usize] = true;
    lookup[b'G' as usize] = true;
    lookup[b'T' as usize] = true;
    lookup
};

static CODONTABLE: Lazy<HashMap<&'static str, u8>> = Lazy::new(|| {
    [
        // F
        ("TTT", b'F'),
        ("TTC", b'F'),
        // L
        ("TTA", b'L'),
        ("TTG", b'L'),
        // S
        ("TCT", b'S'),
        ("TCC", b'S'),
        ("TCA", b'S'),
        ("TCG", b'S'),
        ("TCN", b'S'),
        // Y
        ("TAT", b'Y'),
        ("TAC", b'Y'),
        // *
        ("TAA", b'*'),
        ("TAG", b'*'),
        ("TGA", b'*'),
        // C
        ("TGT", b'C'),
        ("TGC", b'C'),
        // W
        ("TGG", b'W'),
        // L
        ("CTT", b'L'),
        ("CTC", b'L'),
        ("CTA", b'L'),
        ("CTG", b'L'),
        ("CTN", b'L'),
        // P
        ("CCT", b'P'),
        ("CCC", b'P'),
        ("CCA", b'P'),
        ("CCG", b'P'),
        ("CCN", b'P'),
        // H
        ("CAT", b'H'),
        ("CAC", b'H'),
        // Q
        ("CAA", b'Q'),
        ("CAG", b'Q'),
        // R
        ("CGT", b'R'),
        ("CGC", b'R'),
        ("CGA", b'R'),
        ("CGG", b'R'),
        ("CGN", b'R'),
        // I
        ("ATT", b'I'),
        ("ATC", b'I'),
        ("ATA", b'I'),
        // M
        ("ATG", b'M'),
        // T
        ("ACT", b'T'),
        ("ACC", b'T'),
        ("ACA", b'T'),
        ("ACG", b'T'),
        ("ACN", b'T'),
        // N
        ("AAT", b'N'),
        ("AAC", b'N'),
        // K
        ("AAA", b'K'),
        ("AAG", b'K'),
        // S
        ("AGT", b'S'),
        ("AGC", b'S'),
        // R
        ("AGA", b'R'),
        ("AGG", b'R'),
        // V
        ("GTT", b'V'),
        ("GTC", b'V'),
        ("GTA", b'V'),
        ("GTG", b'V'),
        ("GTN", b'V'),
        // A
        ("GCT", b'A'),
        ("GCC", b'A'),
        ("GCA", b'A'),
        ("GCG", b'A'),
        ("GCN", b'A'),
        // D
        ("GAT", b'D'),
        ("GAC", b'D'),
        // E
        ("GAA", b'E'),
        ("GAG", b'E'),
        // G
        ("GGT", b'G'),
        ("GGC", b'G'),
        ("GGA", b'G'),
        ("GGG", b'G'),
        ("GGN", b'G'),
    ]
    .iter()
    .cloned()
    .collect()
});

// Dayhoff table from
// Peris, P., López, D., & Campos, M. (2008).
// IgTM: An algorithm to predict transmembrane domains and topology in
// proteins. BMC Bioinformatics, 9(1), 1029–11.
// http://doi.org/10.1186/1471-2105-9-367
//
// | Amino acid    | Property              | Dayhoff |
// |---------------|-----------------------|---------|
// | C             | Sulfur polymerization | a       |
// | A, G, P, S, T | Small                 | b       |
// | D, E, N, Q    | Acid and amide        | c       |
// | H, K, R       | Basic                 | d       |
// | I, L, M, V    | Hydrophobic           | e       |
// | F, W, Y       | Aromatic              | f       |
static DAYHOFFTABLE: Lazy<HashMap<u8, u8>> = Lazy::new(|| {
    [
        (b'C', b'a'),
        (b'A', b'b'),
        (b'G', b'b'),
        (b'P', b'b'),
        (b'S', b'b'),
        (b'T', b'b'),
        (b'D', b'c'),
        (b'E', b'c'),
        (b'N', b'c'),
        (b'Q', b'c'),
        (b'H', b'd'),
        (b'K', b'd'),
        (b'R', b'd'),
        (b'I', b'e'),
        (b'L', b'e'),
        (b'M', b'e'),
        (b'V', b'e'),
        (b'F', b'f'),
        (b'W', b'f'),
        (b'Y', b'f'),
        // stop aa
        (b'*', b'*'),
    ]
    .iter()
    .cloned()
    .collect()
});

// HP hydrophobic/hydrophilic mapping
// From: Phillips, R., Kondev, J., Theriot, J. (2008).
// Physical Biology of the Cell. New York: Garland Science.
//
// | Amino acid                   | HP |
// |------------------------------|----|
// | A, F, G, I, L, M, P, V, W, Y | h  |
// | N, C, S, T, D, E, R, H, K, Q | p  |
static HPTABLE: Lazy<HashMap<u8, u8>> = Lazy::new(|| {
    [
        (b'A', b'h'),
        (b'F', b'h'),
        (b'G', b'h'),
        (b'I', b'h'),
        (b'L', b'h'),
        (b'M', b'h'),
        (b'P', b'h'),
        (b'V', b'h'),
        (b'W', b'h'),
        (b'Y', b'h'),
        (b'N', b'p'),
        (b'C', b'p'),
        (b'S', b'p'),
        (b'T', b'p'),
        (b'D', b'p'),
        (b'E', b'p'),
        (b'R', b'p'),
        (b'H', b'p'),
        (b'K', b'p'),
        (b'Q', b'p'),
        // stop aa
        (b'*', b'*'),
    ]
    .iter()
    .cloned()
    .collect()
});

#[inline]
pub fn translate_codon(codon: &[u8]) -> Result<u8, Error> {
    if codon.len() == 1 {
        return Ok(b'X');
    }

    if codon.len() == 2 {
        let mut v = codon.to_vec();
        v.push(b'N');
        match CODONTABLE.get(str::from_utf8(v.as_slice())?) {
            Some(aa) => return Ok(*aa),
            None => return Ok(b'X'),
        }
    }

    if codon.len() == 3 {
        match CODONTABLE.get(str::from_utf8(codon)?) {
            Some(aa) => return Ok(*aa),
            None => return Ok(b'X'),
        }
    }

    Err(Error::InvalidCodonLength {
        message: format!("{}", codon.len()),
    })
}

#[inline]
pub fn aa_to_dayhoff(aa: u8) -> u8 {
    match DAYHOFFTABLE.get(&aa) {
        Some(letter) => *letter,
        None => b'X',
    }
}

#[inline]
pub fn aa_to_hp(aa: u8) -> u8 {
    match HPTABLE.get(&aa) {
        Some(letter) => *letter,
        None => b'X',
    }
}

/// Translate a DNA sequence into amino acids, optionally re-encoding into
/// the dayhoff or hp alphabets. Trailing bases that do not fill a codon
/// are dropped.
#[inline]
pub fn to_aa(seq: &[u8], dayhoff: bool, hp: bool) -> Result<Vec<u8>, Error> {
    let mut converted: Vec<u8> = Vec::with_capacity(seq.len() / 3);

    for chunk in seq.chunks(3) {
        if chunk.len() < 3 {
            break;
        }

        let residue = translate_codon(chunk)?;
        if dayhoff {
            converted.push(aa_to_dayhoff(residue));
        } else if hp {
            converted.push(aa_to_hp(residue));
        } else {
            converted.push(residue);
        }
    }

    Ok(converted)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn moltype_roundtrip() {
        for name in ["DNA", "protein", "dayhoff", "hp"] {
            let hf = HashFunctions::try_from(name).unwrap();
            assert_eq!(hf.to_string(), name);
        }
        assert!(HashFunctions::try_from("rna2").is_err());
    }

    #[test]
    fn revcomp_palindrome() {
        assert_eq!(revcomp(b"GAATTC"), b"GAATTC");
        assert_eq!(revcomp(b"ACGT"), b"ACGT");
        assert_eq!(revcomp(b"AAA"), b"TTT");
    }

    #[test]
    fn translate_stop_and_unknown() {
        assert_eq!(translate_codon(b"TAA").unwrap(), b'*');
        assert_eq!(translate_codon(b"TAG").unwrap(), b'*');
        assert_eq!(translate_codon(b"NNN").unwrap(), b'X');
        assert!(translate_codon(b"ACGT").is_err());
    }

    #[test]
    fn dayhoff_classes() {
        assert_eq!(aa_to_dayhoff(b'C'), b'a');
        assert_eq!(aa_to_dayhoff(b'G'), b'b');
        assert_eq!(aa_to_dayhoff(b'*'), b'*');
        assert_eq!(aa_to_dayhoff(b'Z'), b'X');
    }

    #[test]
    fn hp_classes() {
        assert_eq!(aa_to_hp(b'L'), b'h');
        assert_eq!(aa_to_hp(b'K'), b'p');
        assert_eq!(aa_to_hp(b'*'), b'*');
        assert_eq!(aa_to_hp(b'U'), b'X');
    }
}
