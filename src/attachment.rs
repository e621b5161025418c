// src/attachment.rs

//! Supplementary metadata merged into a read-only unified view
//!
//! Pipelines that run after a compose is published (image builds, tests,
//! signing) ship their output as attachments instead of rewriting the
//! published document. [`merge`] checks every attachment against the base,
//! then either produces a [`UnifiedView`] or fails without applying
//! anything.
//!
//! Two payloads exist:
//! - artifact documents, whose artifacts are unioned with the base
//! - pipeline status records, kept in a per-pipeline status index

use crate::error::{ArtifactRef, AttachmentIssue, Error, Result};
use crate::model::{ArtifactKey, MetadataDocument};
use crate::version::{DocumentKind, SchemaVersion};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Artifact type tag of pipeline status attachments
pub const PIPELINE_STATUS_TYPE: &str = "pipeline-status";

/// Lifecycle of a pipeline as reported by the pipeline itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatusKind {
    InProgress,
    Complete,
    Failed,
}

impl PipelineStatusKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for PipelineStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// State as seen by a consumer at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    InProgress,
    Complete,
    Failed,
    /// Still in progress past `started_at + max_duration`
    TimeoutFailure,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimeoutFailure)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::TimeoutFailure => "timeout_failure",
        };
        f.write_str(s)
    }
}

/// One revision of a pipeline's status stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Unique per compose
    pub pipeline_id: String,
    pub status: PipelineStatusKind,
    /// Monotonically increasing per pipeline, starting at 1
    pub revision: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    /// Seconds after `started_at` before an unfinished pipeline counts as failed
    pub max_duration: u64,
}

impl PipelineStatus {
    /// First revision of a freshly started pipeline
    pub fn started(pipeline_id: &str, started_at: DateTime<Utc>, max_duration: u64) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            status: PipelineStatusKind::InProgress,
            revision: 1,
            started_at,
            completed_at: None,
            failed_at: None,
            max_duration,
        }
    }

    /// Next revision with a terminal status
    pub fn finish(&self, status: PipelineStatusKind, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.revision += 1;
        next.status = status;
        match status {
            PipelineStatusKind::Complete => next.completed_at = Some(at),
            PipelineStatusKind::Failed => next.failed_at = Some(at),
            PipelineStatusKind::InProgress => {}
        }
        next
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let status: Self = serde_json::from_str(s)?;
        let problems = status.problems();
        if problems.is_empty() {
            Ok(status)
        } else {
            Err(Error::ValidationError(problems))
        }
    }

    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.pipeline_id.trim().is_empty() {
            problems.push("pipeline_id must not be blank".to_string());
        }
        if self.revision == 0 {
            problems.push(format!("pipeline '{}': revision starts at 1", self.pipeline_id));
        }
        problems
    }

    /// Instant after which an unfinished pipeline is considered failed
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.max_duration).ok()?;
        self.started_at.checked_add_signed(TimeDelta::try_seconds(secs)?)
    }

    pub fn effective_state(&self, now: DateTime<Utc>) -> PipelineState {
        match self.status {
            PipelineStatusKind::Complete => PipelineState::Complete,
            PipelineStatusKind::Failed => PipelineState::Failed,
            PipelineStatusKind::InProgress => match self.deadline() {
                Some(deadline) if now > deadline => PipelineState::TimeoutFailure,
                _ => PipelineState::InProgress,
            },
        }
    }

    /// Latest timestamp the record carries
    fn latest_timestamp(&self) -> DateTime<Utc> {
        [self.completed_at, self.failed_at]
            .into_iter()
            .flatten()
            .fold(self.started_at, std::cmp::max)
    }

    /// Whether `self` should replace `current` in a status index
    fn supersedes(&self, current: &Self) -> bool {
        (self.revision, self.latest_timestamp()) > (current.revision, current.latest_timestamp())
    }
}

/// What an attachment carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentPayload {
    Document(Box<MetadataDocument>),
    PipelineStatus(PipelineStatus),
}

/// Supplementary metadata produced independently of the base document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Content tag, e.g. `images` or `pipeline-status`
    pub artifact_type: String,
    /// Compose id of the base this attachment belongs to
    pub compose_id: String,
    /// Opaque identifier of the producing pipeline
    pub origin: String,
    /// Declared schema version
    pub version: SchemaVersion,
    /// Whether the attachment may declare variants the base lacks
    pub permit_new_variants: bool,
    pub payload: AttachmentPayload,
}

impl Attachment {
    /// Wrap an artifact document; type, compose id and version come from it
    pub fn document(origin: &str, doc: MetadataDocument) -> Self {
        Self {
            artifact_type: doc.kind().payload_key().to_string(),
            compose_id: doc.compose().id.clone(),
            origin: origin.to_string(),
            version: doc.revision().version(),
            permit_new_variants: false,
            payload: AttachmentPayload::Document(Box::new(doc)),
        }
    }

    pub fn pipeline_status(origin: &str, compose_id: &str, version: SchemaVersion, status: PipelineStatus) -> Self {
        Self {
            artifact_type: PIPELINE_STATUS_TYPE.to_string(),
            compose_id: compose_id.to_string(),
            origin: origin.to_string(),
            version,
            permit_new_variants: false,
            payload: AttachmentPayload::PipelineStatus(status),
        }
    }

    pub fn permit_new_variants(mut self, permit: bool) -> Self {
        self.permit_new_variants = permit;
        self
    }

    /// Every reason this attachment cannot be merged into `base`
    fn problems(&self, base: &MetadataDocument) -> Vec<String> {
        let mut problems = Vec::new();
        if self.compose_id != base.compose().id {
            problems.push(format!(
                "compose id '{}' does not match base '{}'",
                self.compose_id,
                base.compose().id
            ));
        }
        let base_version = base.revision().version();
        if self.version.major != base_version.major {
            problems.push(format!(
                "schema version {} is incompatible with base version {}",
                self.version, base_version
            ));
        }

        match &self.payload {
            AttachmentPayload::PipelineStatus(status) => problems.extend(status.problems()),
            AttachmentPayload::Document(doc) => {
                if doc.kind() == DocumentKind::ComposeInfo || doc.kind() != base.kind() {
                    problems.push(format!(
                        "{} attachment cannot be merged into {}",
                        doc.kind(),
                        base.kind()
                    ));
                }
                if doc.compose().id != self.compose_id {
                    problems.push(format!(
                        "payload compose id '{}' differs from declared '{}'",
                        doc.compose().id,
                        self.compose_id
                    ));
                } else if self.compose_id == base.compose().id && !doc.compose().same_compose(base.compose()) {
                    problems.push(format!(
                        "compose {} is {} in the payload but {} in base",
                        self.compose_id,
                        doc.compose().date_type_respin(),
                        base.compose().date_type_respin()
                    ));
                }
                problems.extend(self.placement_problems(doc, base));
            }
        }
        problems
    }

    fn placement_problems(&self, doc: &MetadataDocument, base: &MetadataDocument) -> Vec<String> {
        let mut problems = Vec::new();
        let mut filed: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (variant, arch, _) in doc.artifacts() {
            let arches = filed.entry(variant).or_default();
            if !arches.contains(&arch) {
                arches.push(arch);
            }
        }
        for (variant, arches) in filed {
            let Some(declared) = base.variant(variant) else {
                if !self.permit_new_variants {
                    problems.push(format!("variant '{variant}' does not exist in base"));
                }
                continue;
            };
            for arch in arches {
                if !declared.has_arch(arch) {
                    problems.push(format!("arch '{arch}' of variant '{variant}' does not exist in base"));
                }
            }
        }
        problems
    }
}

/// Verdict of [`UnifiedView::completion_state`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionState {
    /// Every expected pipeline reached a terminal state
    Complete {
        /// Pipelines that failed or timed out
        degraded: Vec<String>,
    },
    /// Some expected pipelines are missing or still running
    Pending { waiting: Vec<String> },
    /// No manifest given: current state of every known pipeline
    Snapshot(BTreeMap<String, PipelineState>),
}

impl CompletionState {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Complete { degraded } if !degraded.is_empty())
    }
}

/// Base document plus every accepted attachment
#[derive(Debug, Clone)]
pub struct UnifiedView {
    base: MetadataDocument,
    merged: MetadataDocument,
    origins: BTreeMap<ArtifactKey, String>,
    statuses: BTreeMap<String, PipelineStatus>,
}

impl UnifiedView {
    /// The base document, untouched
    pub fn base(&self) -> &MetadataDocument {
        &self.base
    }

    /// Base artifacts unioned with every attachment's artifacts
    pub fn document(&self) -> &MetadataDocument {
        &self.merged
    }

    /// Origin of an artifact contributed by an attachment (`None` for base artifacts)
    pub fn origin_of(&self, key: &ArtifactKey) -> Option<&str> {
        self.origins.get(key).map(String::as_str)
    }

    /// Contributed artifacts with their origins
    pub fn contributions(&self) -> impl Iterator<Item = (&ArtifactKey, &str)> {
        self.origins.iter().map(|(k, o)| (k, o.as_str()))
    }

    /// Highest revision per pipeline
    pub fn statuses(&self) -> impl Iterator<Item = &PipelineStatus> {
        self.statuses.values()
    }

    pub fn status(&self, pipeline_id: &str) -> Option<&PipelineStatus> {
        self.statuses.get(pipeline_id)
    }

    /// Whether the expected pipelines are done, as of `now`
    ///
    /// Failed and timed out pipelines count as done but are listed as
    /// degraded. Without a manifest the current states are returned as a
    /// snapshot with no verdict.
    pub fn completion_state(&self, expected: Option<&[String]>, now: DateTime<Utc>) -> CompletionState {
        let Some(expected) = expected else {
            return CompletionState::Snapshot(
                self.statuses
                    .iter()
                    .map(|(id, s)| (id.clone(), s.effective_state(now)))
                    .collect(),
            );
        };

        let mut waiting = Vec::new();
        let mut degraded = Vec::new();
        for id in expected {
            match self.statuses.get(id).map(|s| s.effective_state(now)) {
                Some(state) if state.is_failure() => degraded.push(id.clone()),
                Some(state) if state.is_terminal() => {}
                _ => waiting.push(id.clone()),
            }
        }

        if waiting.is_empty() {
            CompletionState::Complete { degraded }
        } else {
            CompletionState::Pending { waiting }
        }
    }
}

/// Merge attachments into a unified view of `base`
///
/// Every attachment is checked first; any incompatible attachment fails the
/// merge with [`Error::AttachmentMismatch`] listing all of them. Artifact
/// identities are then re-checked across the base and every attachment
/// together, failing with [`Error::DuplicateArtifact`] on any collision.
/// `base` is never modified.
pub fn merge(base: &MetadataDocument, attachments: &[Attachment]) -> Result<UnifiedView> {
    let issues: Vec<AttachmentIssue> = attachments
        .iter()
        .flat_map(|a| {
            a.problems(base).into_iter().map(|reason| AttachmentIssue {
                origin: a.origin.clone(),
                reason,
            })
        })
        .collect();
    if !issues.is_empty() {
        warn!("Rejecting {} attachment issue(s) for {}", issues.len(), base.compose());
        return Err(Error::AttachmentMismatch(issues));
    }

    let mut merged = base.clone();
    let mut origins = BTreeMap::new();
    let mut statuses: BTreeMap<String, PipelineStatus> = BTreeMap::new();
    let mut duplicates: Vec<ArtifactRef> = Vec::new();

    for attachment in attachments {
        match &attachment.payload {
            AttachmentPayload::PipelineStatus(status) => {
                let replace = statuses
                    .get(&status.pipeline_id)
                    .is_none_or(|current| status.supersedes(current));
                if replace {
                    statuses.insert(status.pipeline_id.clone(), status.clone());
                }
            }
            AttachmentPayload::Document(doc) => {
                for variant in doc.variants() {
                    if !merged.has_variant(&variant.uid) {
                        debug!("{} adds variant {}", attachment.origin, variant.uid);
                        merged.declare_variant(variant.clone())?;
                    }
                }
                for (variant, arch, artifact) in doc.artifacts() {
                    let key = artifact.key(variant, arch);
                    match merged.add_artifact(variant, arch, artifact.clone()) {
                        Ok(()) => {
                            origins.insert(key, attachment.origin.clone());
                        }
                        Err(Error::DuplicateArtifact(refs)) => duplicates.extend(refs),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    if !duplicates.is_empty() {
        return Err(Error::DuplicateArtifact(duplicates));
    }

    info!(
        "Merged {} attachment(s) into {}: {} contributed artifact(s), {} pipeline(s)",
        attachments.len(),
        base.compose(),
        origins.len(),
        statuses.len()
    );
    Ok(UnifiedView {
        base: base.clone(),
        merged,
        origins,
        statuses,
    })
}
