//! Error types for the redundancy core

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building redundancy descriptors or driving
/// the encode/rebuild/remove pipelines.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Missing or malformed configuration subtree
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    // =========================================================================
    // Symbolic Resolution Errors
    // =========================================================================
    /// Store name failed to resolve in the store registry
    #[error("Unknown store: {0}")]
    UnknownStore(String),

    /// Copy type string is not one of SINGLE / PARTNER / XOR
    #[error("Unknown copy type: {0}")]
    UnknownCopyType(String),

    /// Failure group name failed to resolve in the group registry
    #[error("Unknown failure group: {0}")]
    UnknownGroup(String),

    // =========================================================================
    // Erasure Library Errors
    // =========================================================================
    /// Erasure library refused to construct a scheme
    #[error("Scheme build failed: {0}")]
    SchemeBuildFailed(String),

    /// Filemap reports a file as incomplete, or the erasure add failed
    #[error("Invalid checkpoint file {path}: {reason}")]
    FileInvalid { path: String, reason: String },

    /// Erasure dispatch/wait/free returned error in ENCODE direction
    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    /// Erasure dispatch/wait/free returned error in REBUILD direction
    #[error("Rebuild failed: {0}")]
    RebuildFailed(String),

    /// Erasure dispatch/wait/free returned error in REMOVE direction
    #[error("Remove failed: {0}")]
    RemoveFailed(String),

    // =========================================================================
    // Collective Errors
    // =========================================================================
    /// At least one rank reported a failure and the reduction disabled the
    /// operation on every rank
    #[error("Consensus failure: {0}")]
    ConsensusFailure(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
