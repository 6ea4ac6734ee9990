use thiserror::Error;

#[derive(Debug, Error)]
pub enum FracmashError {
    /// Raised for internal errors in the library. Should not happen.
    #[error("internal error: {message:?}")]
    Internal { message: String },

    #[error("must have same num: {n1} != {n2}")]
    MismatchNum { n1: u32, n2: u32 },

    #[error("different ksizes cannot be compared")]
    MismatchKSizes,

    #[error("sketches with different molecule types cannot be compared")]
    MismatchMoltype,

    #[error("mismatch in scaled; comparison fail")]
    MismatchScaled,

    #[error("mismatch in seed; comparison fail")]
    MismatchSeed,

    #[error("different signatures cannot be compared")]
    MismatchSignatureType,

    #[error("invalid downsample: cannot go from scaled {current} to {requested}")]
    InvalidDownsampleScaled { current: u64, requested: u64 },

    #[error("invalid downsample: cannot go from num {current} to {requested}")]
    InvalidDownsampleNum { current: u32, requested: u32 },

    #[error("abundance tracking is required on both operands")]
    NeedsAbundance,

    #[error("this operation requires scaled sketches")]
    ScaledRequired,

    #[error("cannot subtract from an abundance-tracking sketch; flatten first")]
    SubtractFromAbundance,

    #[error("invalid hash function: {function:?}")]
    InvalidHashFunction { function: String },

    #[error("can only set {message:?} if the MinHash is empty")]
    NonEmptyMinHash { message: String },

    #[error("invalid DNA character in input k-mer: {message}")]
    InvalidDNA { message: String },

    #[error("invalid protein character in input: {message}")]
    InvalidProt { message: String },

    #[error("codon is invalid length: {message}")]
    InvalidCodonLength { message: String },

    #[error("error while estimating ANI: {message}")]
    ANIEstimationError { message: String },

    #[error("invalid picklist column: {coltype:?}")]
    InvalidPicklistColumn { coltype: String },

    #[error("column {column:?} not present in picklist file {pickfile:?}")]
    NoSuchEntry { column: String, pickfile: String },

    #[error("corrupted SBT descriptor: {message}")]
    CorruptedSbt { message: String },

    #[error("collection is empty")]
    EmptyCollection,

    #[error(transparent)]
    StorageError(#[from] crate::storage::StorageError),

    #[error(transparent)]
    SerdeError(#[from] serde_json::error::Error),

    #[error(transparent)]
    CsvError(#[from] csv::Error),

    #[error(transparent)]
    NifflerError(#[from] niffler::Error),

    #[error(transparent)]
    Utf8Error(#[from] std::str::Utf8Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}
