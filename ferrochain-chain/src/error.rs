//! Error types for header (de)serialization and chain acceptance.

use thiserror::Error;

/// Failures while turning wire bytes into a [`crate::header::BlockHeader`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum HeaderError {
    #[error("header must be exactly {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// Rejection reasons returned by [`crate::store::HeaderChainStore::accept_block_header`].
///
/// These are caller-facing outcomes, not panics: the caller decides whether to
/// apply a misbehavior penalty, cache the header as an orphan, or ignore it.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AcceptError {
    /// We already have this hash, and it was previously marked invalid.
    #[error("duplicate of a known-invalid header")]
    DuplicateInvalid,
    /// The header claims to be genesis (prev-hash all zero) but doesn't match ours.
    #[error("bad genesis header")]
    BadGenesis,
    /// Header fails a context-free self-consistency check.
    #[error("header self-check failed: {0}")]
    TestFailure(&'static str),
    /// Parent hash is not present in the index; caller may offer this to the orphan cache.
    #[error("prev block not found")]
    PrevBlockNotFound,
    /// Parent is present but carries a failure flag.
    #[error("prev block is invalid")]
    BadPrevBlock,
    /// Header timestamp/difficulty fails the contextual check against its parent.
    #[error("contextual check failed: {0}")]
    ContextualCheckFailed(&'static str),
    /// Proof-of-work commitment does not satisfy the header's own `bits` target.
    #[error("proof of work invalid")]
    InvalidProofOfWork,
    /// Caller did not assert `min_pow_checked`, and the header batch's cumulative
    /// work looks too small to be worth spending acceptance effort on.
    #[error("too little chainwork")]
    TooLittleChainwork,
}

/// Errors surfaced by store-level operations other than acceptance.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum StoreError {
    #[error("unknown block hash")]
    UnknownHash,
    #[error("cannot reconsider: an ancestor is still failed")]
    AncestorStillFailed,
}
