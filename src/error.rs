// src/error.rs

//! Crate-wide error type
//!
//! Planning refusals and execution failures carry their own variants so the
//! CLI can map each terminal error to a single short sentence. Ambient
//! failures (I/O, database, parsing) are wrapped rather than stringified so
//! the source chain survives.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // --- Planning / preparation ---
    #[error("dependency resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("integrity check failed for '{0}'")]
    ChecksumMismatch(String),

    #[error("package '{0}' is already installed")]
    PackageAlreadyInstalled(String),

    #[error("package '{0}' is not installed")]
    PackageNotInstalled(String),

    #[error("dependency '{name}' is provided by multiple packages: {}", .providers.join(", "))]
    AmbiguousProvider {
        name: String,
        providers: Vec<String>,
    },

    #[error(
        "not enough free space on {}: {required} bytes required, {available} available",
        .path.display()
    )]
    NotEnoughSpace {
        path: PathBuf,
        required: u64,
        available: u64,
    },

    // --- Execution ---
    #[error("file conflict: {0}")]
    FileConflict(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("scriptlet failed: {0}")]
    ScriptletFailed(String),

    #[error("filesystem error: {0}")]
    FileSystemError(String),

    #[error("package '{package}' conflicts with installed package '{conflicts_with}'")]
    ConflictDetected {
        package: String,
        conflicts_with: String,
    },

    #[error("cannot remove '{package}': required by installed package '{required_by}'")]
    DependencyViolation {
        package: String,
        required_by: String,
    },

    // --- Ambient ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Parse(#[from] crate::metadata::ParseError),

    #[error("invalid version '{0}': non-numeric segment")]
    InvalidVersion(String),

    #[error("path traversal attempt: {0}")]
    PathTraversal(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("could not acquire the system lock: {0}")]
    LockContention(String),
}
