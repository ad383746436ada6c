//! Error types for bucketdb
//!
//! Provides a unified error type for all operations.

use std::fmt;

use thiserror::Error;

/// Result type alias using BucketDbError
pub type Result<T> = std::result::Result<T, BucketDbError>;

/// Which metered resource ran out during restore/extend preparation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    ReadBytes,
    WriteBytes,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::ReadBytes => write!(f, "read bytes"),
            ResourceKind::WriteBytes => write!(f, "write bytes"),
        }
    }
}

/// Unified error type for bucketdb operations
#[derive(Debug, Error)]
pub enum BucketDbError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt bucket data: {0}")]
    Corrupt(String),

    #[error("Bucket not found: {0}")]
    NotFound(String),

    #[error("Merge failed: {0}")]
    Merge(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Request Errors
    // -------------------------------------------------------------------------
    #[error("Invalid round {round}: last applied round is {last}")]
    InvalidRound { round: u32, last: u32 },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Resource limit exceeded: {kind} used {used}, limit {limit}")]
    ResourceLimitExceeded {
        kind: ResourceKind,
        used: u64,
        limit: u64,
    },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for BucketDbError {
    fn from(e: bincode::Error) -> Self {
        BucketDbError::Serialization(e.to_string())
    }
}
