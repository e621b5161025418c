// src/error.rs

//! Error types for compose metadata operations
//!
//! Every fallible operation in the crate returns [`Result`]. Variants that
//! describe problems with more than one artifact carry the full list of
//! offenders so a caller can fix everything in one pass.

use std::fmt;
use thiserror::Error;

/// Identifies one artifact inside a document (used for error enumeration)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactRef {
    /// Variant UID the artifact is filed under
    pub variant: String,
    /// Architecture key the artifact is filed under
    pub arch: String,
    /// Local path or reference of the artifact
    pub path: String,
}

impl ArtifactRef {
    pub fn new(
        variant: impl Into<String>,
        arch: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            variant: variant.into(),
            arch: arch.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.variant, self.arch, self.path)
    }
}

/// One attachment rejected by the merge engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentIssue {
    /// Opaque identifier of the producing pipeline
    pub origin: String,
    /// Why the attachment cannot be merged
    pub reason: String,
}

impl fmt::Display for AttachmentIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.origin, self.reason)
    }
}

fn list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| format!("\n  - {i}"))
        .collect::<String>()
}

#[derive(Error, Debug)]
pub enum Error {
    // Structural
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    #[error("Unknown document type: expected '{expected}', found '{found}'")]
    UnknownDocumentType { expected: String, found: String },

    #[error("Unsupported metadata version: {0}")]
    UnsupportedVersion(String),

    #[error("Validation failed with {} violation(s):{}", .0.len(), list(.0))]
    ValidationError(Vec<String>),

    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),

    // Identity
    #[error("Duplicate artifact(s):{}", list(.0))]
    DuplicateArtifact(Vec<ArtifactRef>),

    #[error("Unknown variant: {0}")]
    UnknownVariant(String),

    // Conversion
    #[error("Remote artifact(s) without local_path hint:{}", list(.0))]
    MissingLocalPathHint(Vec<ArtifactRef>),

    #[error("Remote artifact(s) present and download not requested:{}", list(.0))]
    RemoteArtifactsPresent(Vec<ArtifactRef>),

    #[error("Missing file(s) for checksum computation:{}", list(.0))]
    MissingFile(Vec<ArtifactRef>),

    #[error("Recorded checksum or size disagrees with file content:{}", list(.0))]
    InconsistentArtifacts(Vec<ArtifactRef>),

    // Integrity
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    // Transport
    #[error("Transfer failed: {0}")]
    TransferError(String),

    #[error("Localization failed for {failed} of {total} artifact(s)")]
    LocalizationFailed { failed: usize, total: usize },

    #[error("Operation cancelled")]
    Cancelled,

    // Attachment
    #[error("Incompatible attachment(s):{}", list(.0))]
    AttachmentMismatch(Vec<AttachmentIssue>),

    // Plumbing
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ParseError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
