//! Errors reported by the encoder.
//!
//! All failures are surfaced through the single [`Error`] enum; no operation
//! panics on caller input. Errors raised by the argument checks are returned
//! before any vector has been mutated.

/// The `Error` enum defines the possible errors that this crate can return.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// IllegalArgs: the (data, parity) configuration is out of range.
    ///
    /// `data` and `parity` must both be at least 1, and `data + parity`
    /// must stay below 256 so every vector index is a distinct GF(2^8)
    /// element.
    #[error("Illegal Arguments: data {0}, parity {1} (need data >= 1, parity >= 1, data+parity < 256)")]
    IllegalArgs(usize, usize),
    /// IllegalParity: XRS piggybacks parity onto parity, which needs at
    /// least two parity vectors. A single-parity code cannot be built.
    #[error("Illegal Parity: {0} parity vects, XRS requires at least 2")]
    IllegalParity(usize),
    /// BuildFailed: the Vandermonde encoding matrix could not be put into
    /// systematic form.
    #[error("Build Failed: vandermonde matrix is not invertible")]
    BuildFailed,
    /// SizeZero: vectors must carry at least one byte pair.
    #[error("Size Zero: vects are empty")]
    SizeZero,
    /// SizeOdd: every vector splits into two equal halves, so its byte
    /// length must be even.
    #[error("Size Odd: vect size {0} cannot be halved")]
    SizeOdd(usize),
    /// SizeMismatch: the vector count or a vector length disagrees with the
    /// rest of the stripe.
    #[error("Size Mismatch: expected {expected}, got {got}")]
    SizeMismatch { expected: usize, got: usize },
    /// NotEnoughShards: the survivor set cannot satisfy the requested
    /// reconstruction.
    #[error("Not Enough Shards: {has} survivors given, {need} required")]
    NotEnoughShards { has: usize, need: usize },
    /// ConflictingSets: a vector appears both as a survivor and as a
    /// reconstruction target.
    #[error("Conflicting Sets: vect {0} listed in both has and need_reconst")]
    ConflictingSets(usize),
    /// SingularMatrix: the survivor submatrix is not invertible. Unreachable
    /// for the Vandermonde and Cauchy constructions, reported defensively.
    #[error("Singular Matrix: survivor submatrix is not invertible")]
    SingularMatrix,
    /// IllegalIndex: a vector index is outside the valid range.
    #[error("Illegal Index: {0}")]
    IllegalIndex(usize),
}
