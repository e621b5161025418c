// src/convert.rs

//! Conversion between legacy (v1) and distributed (v2) documents
//!
//! Upgrading turns every plain relative path into a [`Location`] whose
//! reference comes from a [`UrlMapper`] and whose `local_path` keeps the
//! original path verbatim. Downgrading projects every location back onto
//! its `local_path`. Downgrading an upgraded document reproduces the
//! legacy document when both are written at the latest v1 revision.
//!
//! Failures enumerate every offending artifact instead of stopping at the
//! first one.

use crate::error::{ArtifactRef, Error, Result};
use crate::hash::{self, Checksum, HashAlgorithm};
use crate::localize::{LocalizationReport, Localizer};
use crate::location::Location;
use crate::model::artifact::primary_checksum;
use crate::model::document::EntryMut;
use crate::model::{Artifact, ArtifactKind, ArtifactPath, MetadataDocument};
use crate::version::WireRevision;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Chooses the reference of an upgraded artifact
pub trait UrlMapper {
    fn map(&self, local_path: &str, variant: &str, arch: &str, kind: ArtifactKind) -> Result<String>;
}

/// Keeps the local path as a relative reference
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMapper;

impl UrlMapper for IdentityMapper {
    fn map(&self, local_path: &str, _variant: &str, _arch: &str, _kind: ArtifactKind) -> Result<String> {
        Ok(local_path.to_string())
    }
}

/// Prefixes every local path with a base URL
#[derive(Debug, Clone)]
pub struct BaseUrlMapper {
    base: String,
}

impl BaseUrlMapper {
    pub fn new(base: &str) -> Result<Self> {
        let parsed = url::Url::parse(base)
            .map_err(|e| Error::ConfigError(format!("invalid base URL '{base}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::ConfigError(format!(
                "base URL must be http or https, got '{base}'"
            )));
        }
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
        })
    }
}

impl UrlMapper for BaseUrlMapper {
    fn map(&self, local_path: &str, _variant: &str, _arch: &str, _kind: ArtifactKind) -> Result<String> {
        Ok(format!("{}/{}", self.base, local_path))
    }
}

impl<F> UrlMapper for F
where
    F: Fn(&str, &str, &str, ArtifactKind) -> Result<String>,
{
    fn map(&self, local_path: &str, variant: &str, arch: &str, kind: ArtifactKind) -> Result<String> {
        self(local_path, variant, arch, kind)
    }
}

/// How to upgrade a legacy document
pub struct UpgradeOptions<'a> {
    pub mapper: &'a dyn UrlMapper,
    /// Hash every file under `compose_root` instead of trusting the record
    pub compute_checksums: bool,
    /// Directory the legacy relative paths resolve under
    pub compose_root: &'a Path,
}

impl Default for UpgradeOptions<'_> {
    fn default() -> Self {
        Self {
            mapper: &IdentityMapper,
            compute_checksums: false,
            compose_root: Path::new("."),
        }
    }
}

/// Values computed from one file on disk
struct Computed {
    sha256: Checksum,
    size: u64,
    consistent: bool,
}

/// Upgrade a legacy document to the distributed format
///
/// Size and checksum come from the legacy record when it has them. With
/// `compute_checksums` every file is hashed: missing files fail with
/// [`Error::MissingFile`], and a recorded size or checksum that disagrees
/// with the file fails with [`Error::InconsistentArtifacts`]. Computed values
/// fill in what the record lacks.
///
/// A document that is already distributed is returned unchanged.
pub fn upgrade(doc: &MetadataDocument, options: &UpgradeOptions<'_>) -> Result<MetadataDocument> {
    if doc.revision().is_v2() {
        debug!("{} is already {}, nothing to upgrade", doc.kind(), doc.revision());
        return Ok(doc.clone());
    }
    info!(
        "Upgrading {} of {} from {} to {}",
        doc.kind(),
        doc.compose(),
        doc.revision(),
        WireRevision::LATEST
    );

    if options.compute_checksums {
        let missing: Vec<ArtifactRef> = doc
            .entries()
            .into_iter()
            .filter(|e| e.kind.is_file())
            .filter(|e| {
                e.path
                    .local_path()
                    .is_none_or(|p| !options.compose_root.join(p).is_file())
            })
            .map(|e| e.artifact_ref())
            .collect();
        if !missing.is_empty() {
            return Err(Error::MissingFile(missing));
        }
    }

    let mut out = doc.clone();
    let mut inconsistent = Vec::new();
    for (context, mut entry) in out.entries_mut() {
        let ArtifactPath::Local(path) = entry.path() else {
            continue;
        };
        let path = path.clone();
        let url = options
            .mapper
            .map(&path, &context.variant, &context.arch, context.kind)?;

        let (size, checksum, legacy) = match entry.artifact() {
            None => (None, None, None),
            Some(artifact) => {
                let legacy = artifact.legacy_checksums().cloned();
                let mut size = artifact.recorded_size();
                let mut checksum = legacy.as_ref().and_then(primary_checksum);
                if options.compute_checksums {
                    let computed = compute(artifact, &options.compose_root.join(&path))?;
                    if !computed.consistent {
                        inconsistent.push(context.artifact_ref(entry.path()));
                    }
                    size = size.or(Some(computed.size));
                    checksum = checksum.or(Some(computed.sha256));
                }
                (size, checksum, legacy)
            }
        };

        let location = Location::builder(&url)
            .local_path(path.as_str())
            .size_opt(size)
            .checksum_opt(checksum)
            .build()?;
        entry.relocate(ArtifactPath::Distributed(location));
        if let Some(legacy) = legacy {
            restore_legacy_checksums(&mut entry, legacy);
        }
    }

    if !inconsistent.is_empty() {
        return Err(Error::InconsistentArtifacts(inconsistent));
    }

    let out = out.with_revision(WireRevision::LATEST);
    out.validate()?;
    info!("Upgraded {} artifact(s)", out.artifact_count());
    Ok(out)
}

/// Hash a file with SHA-256 plus every computable recorded algorithm
fn compute(artifact: &Artifact, file: &Path) -> Result<Computed> {
    let recorded = artifact.recorded_checksums();
    let mut algorithms = vec![HashAlgorithm::Sha256];
    for sum in &recorded {
        if let Ok(alg) = sum.algorithm()
            && !algorithms.contains(&alg)
        {
            algorithms.push(alg);
        }
    }

    let (sums, size) = hash::compute_file_with(file, &algorithms)?;
    let size_ok = artifact.recorded_size().is_none_or(|s| s == size);
    let sums_ok = recorded.iter().all(|expected| {
        sums.iter()
            .find(|actual| actual.algorithm_name() == expected.algorithm_name())
            .is_none_or(|actual| expected.matches(actual))
    });
    if !(size_ok && sums_ok) {
        debug!("{} does not match its recorded size or checksums", file.display());
    }

    let sha256 = sums
        .into_iter()
        .next()
        .ok_or_else(|| Error::IoError(format!("no checksum computed for {}", file.display())))?;
    Ok(Computed {
        sha256,
        size,
        consistent: size_ok && sums_ok,
    })
}

/// Put back the legacy map verbatim (relocation normalizes hex case)
fn restore_legacy_checksums(entry: &mut EntryMut<'_>, legacy: BTreeMap<String, String>) {
    let EntryMut::Artifact(artifact) = entry else {
        return;
    };
    let sums = match artifact {
        Artifact::Image(image) => &mut image.checksums,
        Artifact::ExtraFile(extra) => &mut extra.checksums,
        Artifact::Rpm(_) => return,
    };
    sums.extend(legacy);
}

/// Downgrade a distributed document to the legacy format
///
/// Remote files cannot be downgraded without fetching them and fail with
/// [`Error::RemoteArtifactsPresent`], hinted or not; use
/// [`downgrade_with_download`] to localize them first. Any other location
/// still needs a `local_path` ([`Error::MissingLocalPathHint`] otherwise).
pub fn downgrade(doc: &MetadataDocument) -> Result<MetadataDocument> {
    project_local(doc, true)
}

/// Localize every remote artifact under `output_root`, then downgrade
///
/// Any artifact that fails to localize fails the whole downgrade with
/// [`Error::LocalizationFailed`]; the per-artifact reasons are logged by
/// the localizer.
pub async fn downgrade_with_download(
    doc: &MetadataDocument,
    localizer: &Localizer,
    output_root: &Path,
) -> Result<(MetadataDocument, LocalizationReport)> {
    if doc.revision().is_v1() {
        return Ok((doc.clone(), LocalizationReport::default()));
    }
    check_hints(doc)?;

    let report = localizer.localize(doc, output_root).await?;
    if !report.is_success() {
        return Err(Error::LocalizationFailed {
            failed: report.failed(),
            total: report.total(),
        });
    }
    let out = project_local(doc, false)?;
    Ok((out, report))
}

fn check_hints(doc: &MetadataDocument) -> Result<()> {
    let missing: Vec<ArtifactRef> = doc
        .entries()
        .into_iter()
        .filter(|e| e.path.location().is_some_and(|l| l.resolve_local_path().is_none()))
        .map(|e| e.artifact_ref())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::MissingLocalPathHint(missing))
    }
}

fn project_local(doc: &MetadataDocument, reject_remote: bool) -> Result<MetadataDocument> {
    if doc.revision().is_v1() {
        debug!("{} is already {}, nothing to downgrade", doc.kind(), doc.revision());
        return Ok(doc.clone());
    }

    if reject_remote {
        let remote: Vec<ArtifactRef> = doc
            .entries()
            .into_iter()
            .filter(|e| {
                e.path
                    .location()
                    .is_some_and(|l| l.is_remote() && (e.kind.is_file() || l.has_contents()))
            })
            .map(|e| e.artifact_ref())
            .collect();
        if !remote.is_empty() {
            return Err(Error::RemoteArtifactsPresent(remote));
        }
    }
    check_hints(doc)?;

    info!(
        "Downgrading {} of {} from {} to {}",
        doc.kind(),
        doc.compose(),
        doc.revision(),
        WireRevision::LATEST_V1
    );
    let mut out = doc.clone();
    for (_, mut entry) in out.entries_mut() {
        if let Some(local) = entry.path().local_path().map(str::to_string) {
            entry.relocate(ArtifactPath::Local(local));
        }
    }
    out.rebuild_index()?;

    let out = out.with_revision(WireRevision::LATEST_V1);
    out.validate()?;
    Ok(out)
}
