// src/lib.rs

//! Compose metadata library
//!
//! Reads, writes, converts and merges the JSON documents that describe a
//! distribution compose (compose info, RPM manifests, images, extra files).
//!
//! # Architecture
//!
//! - Two wire formats: legacy 1.x with plain relative paths, and
//!   distributed 2.0 where every artifact carries a location
//! - One in-memory model: version handling happens only at the wire edge
//! - Conversion: upgrade/downgrade with lossless round trips
//! - Localization: concurrent, verified fetching through a pluggable transfer
//! - Attachments: supplementary metadata merged into a read-only view

pub mod attachment;
pub mod config;
pub mod convert;
mod error;
pub mod hash;
pub mod localize;
pub mod location;
pub mod model;
pub mod progress;
pub mod transfer;
pub mod version;

pub use attachment::{Attachment, CompletionState, PipelineStatus, UnifiedView, merge};
pub use config::Config;
pub use convert::{BaseUrlMapper, IdentityMapper, UpgradeOptions, UrlMapper, downgrade, upgrade};
pub use error::{ArtifactRef, AttachmentIssue, Error, Result};
pub use hash::{Checksum, HashAlgorithm, Hasher};
pub use localize::{LocalizationReport, LocalizeOptions, Localizer};
pub use location::{FileEntry, Location, Reference};
pub use model::{Artifact, ArtifactKind, ArtifactPath, MetadataDocument, Variant};
pub use progress::{CallbackProgress, CliProgress, LogProgress, ProgressEvent, ProgressTracker, SilentProgress};
pub use transfer::{HttpTransfer, LocalTransfer, Transfer};
pub use version::{DocumentKind, SchemaVersion, WireRevision};
