// src/localize.rs

//! Materialize a distributed document into a local compose layout
//!
//! Every file-bearing location is fetched through the injected
//! [`Transfer`], streamed into a temporary file next to its destination
//! while being hashed, verified against the recorded size and checksum, and
//! only then renamed to `output_root/<local_path>`. A corrupt or partial
//! download never appears at its final path.
//!
//! Bundles (OCI references with `contents`) are fetched once as an OCI
//! image-layout tar archive; each listed file is extracted from
//! `blobs/sha256/<hex>` and verified on its own. The bundle's own checksum
//! is the image digest and is not compared against the archive bytes.
//!
//! Variant path sets without contents are directories and are not fetched.

use crate::error::{ArtifactRef, Error, Result};
use crate::hash::{self, Hasher, STREAM_BUFFER_SIZE};
use crate::location::{FileEntry, Location};
use crate::model::{ArtifactKind, ArtifactPath, MetadataDocument};
use crate::progress::{ProgressEvent, ProgressTracker, SilentProgress};
use crate::transfer::Transfer;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default number of concurrent transfers
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default per-attempt timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay between attempts in milliseconds
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

const TEMP_PREFIX: &str = ".composemd-";

/// Tunables for one localization run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalizeOptions {
    /// Maximum transfers in flight
    pub concurrency: usize,
    /// Timeout of a single attempt
    pub timeout: Duration,
    /// Retries after the first attempt (transport errors and timeouts only)
    pub max_retries: u32,
    /// Base delay, multiplied by the attempt number
    pub retry_delay: Duration,
    /// Keep files already present at their destination when they verify
    pub skip_existing: bool,
}

impl Default for LocalizeOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            skip_existing: false,
        }
    }
}

/// Why one artifact could not be localized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferFailure {
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("transfer failed after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },

    #[error("timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("{} bundle file(s) failed: {}", .0.len(), .0.join("; "))]
    Bundle(Vec<String>),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("cancelled")]
    Cancelled,
}

/// Why an artifact was not fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A verified copy already sits at the destination
    AlreadyPresent,
    /// Legacy local path, nothing to fetch
    NotDistributed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactOutcome {
    Succeeded { bytes: u64 },
    Skipped(SkipReason),
    Failed(TransferFailure),
}

/// Result slot of one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactResult {
    pub artifact: ArtifactRef,
    pub outcome: ArtifactOutcome,
}

/// Summary of a localization run, sorted by artifact
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalizationReport {
    pub results: Vec<ArtifactResult>,
}

impl LocalizationReport {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ArtifactOutcome::Succeeded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ArtifactOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ArtifactOutcome::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.results
            .iter()
            .map(|r| match r.outcome {
                ArtifactOutcome::Succeeded { bytes } => bytes,
                _ => 0,
            })
            .sum()
    }

    /// Failed artifacts with their reasons
    pub fn failures(&self) -> impl Iterator<Item = (&ArtifactRef, &TransferFailure)> {
        self.results.iter().filter_map(|r| match &r.outcome {
            ArtifactOutcome::Failed(f) => Some((&r.artifact, f)),
            _ => None,
        })
    }

    pub fn outcome_of(&self, path: &str) -> Option<&ArtifactOutcome> {
        self.results
            .iter()
            .find(|r| r.artifact.path == path)
            .map(|r| &r.outcome)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} skipped, {} failed ({} bytes)",
            self.succeeded(),
            self.skipped(),
            self.failed(),
            self.bytes_transferred()
        )
    }

    fn count(&self, pred: impl Fn(&ArtifactOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// One unit of work: a single file or a bundle
#[derive(Debug, Clone)]
struct Job {
    artifact: ArtifactRef,
    location: Location,
    /// File path, or directory for bundles
    destination: PathBuf,
}

impl Job {
    fn is_bundle(&self) -> bool {
        self.location.has_contents()
    }
}

/// Outcome of a single attempt
enum AttemptError {
    Transport(String),
    Timeout,
    Cancelled,
    Fatal(TransferFailure),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }

    fn into_failure(self, attempts: u32) -> TransferFailure {
        match self {
            Self::Transport(message) => TransferFailure::Transport { attempts, message },
            Self::Timeout => TransferFailure::Timeout { attempts },
            Self::Cancelled => TransferFailure::Cancelled,
            Self::Fatal(failure) => failure,
        }
    }
}

fn io_failure(context: &str, e: impl std::fmt::Display) -> AttemptError {
    AttemptError::Fatal(TransferFailure::Io(format!("{context}: {e}")))
}

/// Drives the transfers of one or more localization runs
pub struct Localizer {
    transfer: Arc<dyn Transfer>,
    options: LocalizeOptions,
    progress: Arc<dyn ProgressTracker>,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
}

impl Localizer {
    pub fn new(transfer: Arc<dyn Transfer>) -> Self {
        Self::with_options(transfer, LocalizeOptions::default())
    }

    pub fn with_options(transfer: Arc<dyn Transfer>, options: LocalizeOptions) -> Self {
        let permits = options.concurrency.max(1);
        Self {
            transfer,
            options,
            progress: Arc::new(SilentProgress),
            cancel: CancellationToken::new(),
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    pub fn options(&self) -> &LocalizeOptions {
        &self.options
    }

    /// Token that cancels every run of this localizer
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fetch and verify every artifact of `doc` under `output_root`
    ///
    /// Fails up front with [`Error::MissingLocalPathHint`] when any
    /// location has no local path, and with [`Error::Cancelled`] when the
    /// run was cancelled. Per-artifact failures are reported, not raised.
    pub async fn localize(&self, doc: &MetadataDocument, output_root: &Path) -> Result<LocalizationReport> {
        let (jobs, mut results, mut aliases) = plan(doc, output_root)?;
        info!(
            "Localizing {} artifact(s) of {} into {} ({} concurrent)",
            jobs.len(),
            doc.compose(),
            output_root.display(),
            self.options.concurrency
        );
        let total = jobs.len() as u64;
        self.progress.report(ProgressEvent::Started { total });

        let settled = AtomicU64::new(0);
        let settled = &settled;
        let finished: Vec<(Job, ArtifactOutcome)> = stream::iter(jobs)
            .map(|job| async move {
                let outcome = self.run_job(&job).await;
                self.progress.report(ProgressEvent::Position {
                    current: settled.fetch_add(1, Ordering::Relaxed) + 1,
                    total,
                    artifact: job.artifact.path.clone(),
                });
                (job, outcome)
            })
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        if self.cancel.is_cancelled() {
            self.progress.report(ProgressEvent::Failed("cancelled".to_string()));
            return Err(Error::Cancelled);
        }

        for (job, outcome) in finished {
            for (artifact, location) in aliases.remove(&job.destination).unwrap_or_default() {
                let outcome = self.verify_alias(&job, &outcome, location).await;
                if let ArtifactOutcome::Failed(failure) = &outcome {
                    warn!("Failed to localize {}: {}", artifact, failure);
                }
                results.push(ArtifactResult { artifact, outcome });
            }
            if let ArtifactOutcome::Failed(failure) = &outcome {
                warn!("Failed to localize {}: {}", job.artifact, failure);
            }
            results.push(ArtifactResult {
                artifact: job.artifact,
                outcome,
            });
        }
        results.sort_by(|a, b| a.artifact.cmp(&b.artifact));

        let report = LocalizationReport { results };
        if report.is_success() {
            self.progress.report(ProgressEvent::Finished(report.summary()));
        } else {
            self.progress.report(ProgressEvent::Failed(report.summary()));
        }
        info!("Localization finished: {}", report.summary());
        Ok(report)
    }

    async fn run_job(&self, job: &Job) -> ArtifactOutcome {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return ArtifactOutcome::Failed(TransferFailure::Cancelled);
        };

        if self.options.skip_existing && self.already_present(job).await {
            debug!("Keeping verified {}", job.destination.display());
            return ArtifactOutcome::Skipped(SkipReason::AlreadyPresent);
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if self.cancel.is_cancelled() {
                return ArtifactOutcome::Failed(TransferFailure::Cancelled);
            }
            debug!("Fetching {} (attempt {})", job.location, attempt);

            let result = tokio::select! {
                _ = self.cancel.cancelled() => Err(AttemptError::Cancelled),
                r = tokio::time::timeout(self.options.timeout, self.attempt(job)) => {
                    r.unwrap_or(Err(AttemptError::Timeout))
                }
            };

            match result {
                Ok(bytes) => return ArtifactOutcome::Succeeded { bytes },
                Err(e) if e.is_retryable() && attempt <= self.options.max_retries => {
                    let delay = self.options.retry_delay * attempt;
                    warn!(
                        "Attempt {} for {} failed, retrying in {:?}",
                        attempt, job.artifact, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return ArtifactOutcome::Failed(e.into_failure(attempt)),
            }
        }
    }

    async fn attempt(&self, job: &Job) -> std::result::Result<u64, AttemptError> {
        if job.is_bundle() {
            self.fetch_bundle(&job.location, &job.destination).await
        } else {
            self.fetch_file(&job.location, &job.destination).await
        }
    }

    /// Stream one file into a temp file beside `dest`, verify, then rename
    async fn fetch_file(&self, location: &Location, dest: &Path) -> std::result::Result<u64, AttemptError> {
        let algorithm = match location.checksum() {
            Some(c) => c.algorithm().map_err(|_| {
                AttemptError::Fatal(TransferFailure::UnsupportedAlgorithm(c.algorithm_name().to_string()))
            })?,
            None => hash::HashAlgorithm::default(),
        };

        let parent = dest.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_failure(&format!("create {}", parent.display()), e))?;
        let tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(parent)
            .map_err(|e| io_failure("create temp file", e))?;
        let std_file = tmp.reopen().map_err(|e| io_failure("open temp file", e))?;
        let mut file = tokio::fs::File::from_std(std_file);

        let mut stream = self
            .transfer
            .fetch(location)
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;

        let mut hasher = Hasher::new(algorithm);
        let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
        loop {
            let n = stream
                .read(&mut buffer)
                .await
                .map_err(|e| AttemptError::Transport(e.to_string()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            file.write_all(&buffer[..n])
                .await
                .map_err(|e| io_failure("write temp file", e))?;
        }
        file.flush().await.map_err(|e| io_failure("flush temp file", e))?;
        file.sync_all().await.map_err(|e| io_failure("sync temp file", e))?;
        drop(file);

        let size = hasher.len();
        let actual = hasher.finalize();
        check_integrity(location.size(), location.checksum(), size, &actual)
            .map_err(AttemptError::Fatal)?;

        tmp.persist(dest)
            .map_err(|e| io_failure(&format!("rename to {}", dest.display()), e.error))?;
        debug!("Localized {} ({} bytes)", dest.display(), size);
        Ok(size)
    }

    /// Fetch a bundle archive once and extract every listed file
    async fn fetch_bundle(&self, location: &Location, dest_dir: &Path) -> std::result::Result<u64, AttemptError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| io_failure(&format!("create {}", dest_dir.display()), e))?;
        let archive = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(dest_dir)
            .map_err(|e| io_failure("create temp file", e))?;
        let mut file = tokio::fs::File::from_std(
            archive.reopen().map_err(|e| io_failure("open temp file", e))?,
        );

        let mut stream = self
            .transfer
            .fetch(location)
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;
        tokio::io::copy(&mut stream, &mut file)
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;
        file.flush().await.map_err(|e| io_failure("flush temp file", e))?;
        drop(file);

        let contents = location.contents().to_vec();
        let dest = dest_dir.to_path_buf();
        let (bytes, failures) = tokio::task::spawn_blocking(move || {
            let outcome = extract_layers(archive.path(), &contents, &dest);
            drop(archive);
            outcome
        })
        .await
        .map_err(|e| io_failure("bundle extraction task", e))?
        .map_err(|e| io_failure("read bundle", e))?;

        if failures.is_empty() {
            Ok(bytes)
        } else {
            Err(AttemptError::Fatal(TransferFailure::Bundle(failures)))
        }
    }

    /// Check an artifact sharing `job`'s destination against what the job
    /// left there
    async fn verify_alias(&self, job: &Job, outcome: &ArtifactOutcome, location: Location) -> ArtifactOutcome {
        if matches!(outcome, ArtifactOutcome::Failed(_)) || location == job.location {
            return outcome.clone();
        }
        let destination = job.destination.clone();
        let verified = tokio::task::spawn_blocking(move || verify_at(&location, &destination)).await;
        match verified {
            Ok(Ok(())) => outcome.clone(),
            Ok(Err(failure)) => ArtifactOutcome::Failed(failure),
            Err(e) => ArtifactOutcome::Failed(TransferFailure::Io(format!("alias verification task: {e}"))),
        }
    }

    async fn already_present(&self, job: &Job) -> bool {
        let job = job.clone();
        tokio::task::spawn_blocking(move || {
            if job.is_bundle() {
                job.location
                    .contents()
                    .iter()
                    .all(|entry| verify_existing(&job.destination.join(entry.file()), Some(entry.size()), Some(entry.checksum())))
            } else {
                verify_existing(&job.destination, job.location.size(), job.location.checksum())
            }
        })
        .await
        .unwrap_or(false)
    }
}

fn check_integrity(
    expected_size: Option<u64>,
    expected_checksum: Option<&hash::Checksum>,
    size: u64,
    actual: &hash::Checksum,
) -> std::result::Result<(), TransferFailure> {
    if let Some(expected) = expected_size
        && expected != size
    {
        return Err(TransferFailure::SizeMismatch {
            expected,
            actual: size,
        });
    }
    if let Some(expected) = expected_checksum
        && !expected.matches(actual)
    {
        return Err(TransferFailure::ChecksumMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn verify_existing(path: &Path, size: Option<u64>, checksum: Option<&hash::Checksum>) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() || size.is_some_and(|s| s != meta.len()) {
        return false;
    }
    match checksum {
        Some(expected) => hash::verify_file(expected, path).unwrap_or(false),
        None => true,
    }
}

/// Check the file or extracted bundle at `path` against a location
fn verify_at(location: &Location, path: &Path) -> std::result::Result<(), TransferFailure> {
    if location.has_contents() {
        let failures: Vec<String> = location
            .contents()
            .iter()
            .filter(|e| !verify_existing(&path.join(e.file()), Some(e.size()), Some(e.checksum())))
            .map(|e| format!("{}: does not match the extracted file", e.file()))
            .collect();
        return if failures.is_empty() {
            Ok(())
        } else {
            Err(TransferFailure::Bundle(failures))
        };
    }

    let algorithm = match location.checksum() {
        Some(c) => c
            .algorithm()
            .map_err(|_| TransferFailure::UnsupportedAlgorithm(c.algorithm_name().to_string()))?,
        None => hash::HashAlgorithm::default(),
    };
    let mut file = File::open(path).map_err(|e| TransferFailure::Io(format!("open {}: {e}", path.display())))?;
    let (actual, size) = hash::hash_reader(algorithm, &mut file)
        .map_err(|e| TransferFailure::Io(format!("read {}: {e}", path.display())))?;
    check_integrity(location.size(), location.checksum(), size, &actual)
}

/// Extract and verify the listed files from an OCI image-layout archive
///
/// Returns the bytes written and one message per failed file.
fn extract_layers(archive: &Path, contents: &[FileEntry], dest_dir: &Path) -> std::io::Result<(u64, Vec<String>)> {
    let mut wanted: HashMap<&str, Vec<&FileEntry>> = HashMap::new();
    for entry in contents {
        wanted.entry(entry.layer_hex()).or_default().push(entry);
    }

    let mut failures = Vec::new();
    let mut written = 0u64;
    let mut found: Vec<&str> = Vec::new();

    let mut tar = tar::Archive::new(File::open(archive)?);
    for item in tar.entries()? {
        let mut item = item?;
        let path = item.path()?.into_owned();
        let path = path.strip_prefix(".").unwrap_or(&path);
        let Ok(hex) = path.strip_prefix("blobs/sha256") else {
            continue;
        };
        let Some(hex) = hex.to_str() else { continue };
        let Some((layer, entries)) = wanted.get_key_value(hex) else {
            continue;
        };
        found.push(*layer);

        let mut first: Option<PathBuf> = None;
        for entry in entries {
            let target = match safe_join(dest_dir, entry.file()) {
                Ok(t) => t,
                Err(reason) => {
                    failures.push(format!("{}: {reason}", entry.file()));
                    continue;
                }
            };
            let result = match &first {
                None => write_verified(&mut item, entry, &target),
                Some(source) => File::open(source)
                    .map_err(|e| e.to_string())
                    .and_then(|mut f| write_verified(&mut f, entry, &target)),
            };
            match result {
                Ok(n) => {
                    written += n;
                    first.get_or_insert(target);
                }
                Err(reason) => failures.push(format!("{}: {reason}", entry.file())),
            }
        }
    }

    for (layer, entries) in &wanted {
        if !found.contains(layer) {
            failures.extend(
                entries
                    .iter()
                    .map(|e| format!("{}: layer {} not found in bundle", e.file(), e.layer_digest())),
            );
        }
    }
    failures.sort();
    Ok((written, failures))
}

/// Join a relative path, refusing to leave `root`
fn safe_join(root: &Path, file: &str) -> std::result::Result<PathBuf, String> {
    let relative = Path::new(file);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(format!("'{file}' escapes {}", root.display()));
    }
    Ok(root.join(relative))
}

fn write_verified<R: Read>(reader: &mut R, entry: &FileEntry, target: &Path) -> std::result::Result<u64, String> {
    let algorithm = entry.checksum().algorithm().map_err(|e| e.to_string())?;
    let parent = target.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)
        .map_err(|e| e.to_string())?;

    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buffer).map_err(|e| e.to_string())?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        tmp.write_all(&buffer[..n]).map_err(|e| e.to_string())?;
    }
    tmp.as_file().sync_all().map_err(|e| e.to_string())?;

    let size = hasher.len();
    let actual = hasher.finalize();
    check_integrity(Some(entry.size()), Some(entry.checksum()), size, &actual).map_err(|e| e.to_string())?;
    tmp.persist(target).map_err(|e| e.error.to_string())?;
    Ok(size)
}

type Aliases = HashMap<PathBuf, Vec<(ArtifactRef, Location)>>;
type Plan = (Vec<Job>, Vec<ArtifactResult>, Aliases);

/// Turn a document into jobs, immediate results, and aliases (artifacts
/// sharing a destination with a job)
fn plan(doc: &MetadataDocument, output_root: &Path) -> Result<Plan> {
    let mut jobs: Vec<Job> = Vec::new();
    let mut claimed: HashSet<PathBuf> = HashSet::new();
    let mut results = Vec::new();
    let mut aliases = Aliases::new();
    let mut missing = Vec::new();

    for entry in doc.entries() {
        let artifact = entry.artifact_ref();
        let location = match entry.path {
            ArtifactPath::Local(_) => {
                if entry.kind.is_file() {
                    results.push(ArtifactResult {
                        artifact,
                        outcome: ArtifactOutcome::Skipped(SkipReason::NotDistributed),
                    });
                }
                continue;
            }
            ArtifactPath::Distributed(location) => location,
        };
        if entry.kind == ArtifactKind::VariantPath && !location.has_contents() {
            continue;
        }

        let Some(local) = location.resolve_local_path() else {
            missing.push(artifact);
            continue;
        };
        let destination = safe_join(output_root, local).map_err(Error::InvalidLocation)?;

        if !claimed.insert(destination.clone()) {
            aliases.entry(destination).or_default().push((artifact, location.clone()));
            continue;
        }
        jobs.push(Job {
            artifact,
            location: location.clone(),
            destination,
        });
    }

    if !missing.is_empty() {
        return Err(Error::MissingLocalPathHint(missing));
    }
    Ok((jobs, results, aliases))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::hash::{HashAlgorithm, hash_bytes};
    use crate::transfer::ByteStream;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Serves bytes by URL; fails the first `failures` fetches of each URL
    #[derive(Default)]
    struct MemoryTransfer {
        objects: HashMap<String, Vec<u8>>,
        failures: u32,
        delay: Option<Duration>,
        calls: Mutex<HashMap<String, u32>>,
        total_calls: AtomicU32,
    }

    impl MemoryTransfer {
        fn with(mut self, url: &str, body: &[u8]) -> Self {
            self.objects.insert(url.to_string(), body.to_vec());
            self
        }
    }

    #[async_trait]
    impl Transfer for MemoryTransfer {
        async fn fetch(&self, location: &Location) -> Result<ByteStream> {
            self.total_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let url = location.url();
            let seen = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(url.clone()).or_default();
                *n += 1;
                *n
            };
            if seen <= self.failures {
                return Err(Error::TransferError(format!("connection reset fetching {url}")));
            }
            let body = self
                .objects
                .get(&url)
                .cloned()
                .ok_or_else(|| Error::TransferError(format!("404 {url}")))?;
            Ok(Box::pin(std::io::Cursor::new(body)))
        }

        async fn exists(&self, location: &Location) -> bool {
            self.objects.contains_key(&location.url())
        }

        fn name(&self) -> &str {
            "memory"
        }
    }

    fn sha(body: &[u8]) -> String {
        hash_bytes(HashAlgorithm::Sha256, body).to_string()
    }

    fn extra_files_doc(files: &[(&str, &[u8])]) -> MetadataDocument {
        let entries: Vec<_> = files
            .iter()
            .map(|(name, body)| {
                json!({
                    "file": name,
                    "location": {
                        "url": format!("https://cdn.example.com/Server/x86_64/os/{name}"),
                        "size": body.len(),
                        "checksum": sha(body),
                        "local_path": format!("Server/x86_64/os/{name}")
                    }
                })
            })
            .collect();
        MetadataDocument::from_value(&json!({
            "header": {"type": "productmd.extra_files", "version": "2.0"},
            "payload": {
                "compose": {"id": "Fedora-39-20231102.0", "type": "production", "date": "20231102", "respin": 0},
                "extra_files": {"Server": {"x86_64": entries}}
            }
        }))
        .unwrap()
    }

    fn fast_options() -> LocalizeOptions {
        LocalizeOptions {
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|n| n.starts_with(TEMP_PREFIX))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_localize_writes_verified_files() {
        let doc = extra_files_doc(&[("GPL", b"gpl text"), ("EULA", b"eula text")]);
        let transfer = MemoryTransfer::default()
            .with("https://cdn.example.com/Server/x86_64/os/GPL", b"gpl text")
            .with("https://cdn.example.com/Server/x86_64/os/EULA", b"eula text");
        let out = tempfile::tempdir().unwrap();

        let report = Localizer::with_options(Arc::new(transfer), fast_options())
            .localize(&doc, out.path())
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.bytes_transferred(), 17);
        assert_eq!(fs::read(out.path().join("Server/x86_64/os/GPL")).unwrap(), b"gpl text");
        assert_eq!(fs::read(out.path().join("Server/x86_64/os/EULA")).unwrap(), b"eula text");
    }

    #[tokio::test]
    async fn test_corrupt_artifact_never_reaches_destination() {
        let doc = extra_files_doc(&[("GPL", b"gpl text"), ("EULA", b"eula text")]);
        let transfer = MemoryTransfer::default()
            .with("https://cdn.example.com/Server/x86_64/os/GPL", b"gpl text")
            .with("https://cdn.example.com/Server/x86_64/os/EULA", b"eula TEXT");
        let out = tempfile::tempdir().unwrap();

        let report = Localizer::with_options(Arc::new(transfer), fast_options())
            .localize(&doc, out.path())
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.outcome_of("Server/x86_64/os/EULA"),
            Some(ArtifactOutcome::Failed(TransferFailure::ChecksumMismatch { .. }))
        ));
        let dir = out.path().join("Server/x86_64/os");
        assert!(!dir.join("EULA").exists());
        assert!(leftovers(&dir).is_empty());
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let doc = extra_files_doc(&[("GPL", b"gpl text")]);
        let transfer = Arc::new(MemoryTransfer {
            failures: 2,
            ..MemoryTransfer::default().with("https://cdn.example.com/Server/x86_64/os/GPL", b"gpl text")
        });
        let out = tempfile::tempdir().unwrap();

        let report = Localizer::with_options(transfer.clone(), fast_options())
            .localize(&doc, out.path())
            .await
            .unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(transfer.total_calls.load(Ordering::SeqCst), 3);

        let stubborn = Arc::new(MemoryTransfer {
            failures: 10,
            ..MemoryTransfer::default()
        });
        let options = LocalizeOptions {
            max_retries: 1,
            ..fast_options()
        };
        let report = Localizer::with_options(stubborn, options)
            .localize(&doc, out.path())
            .await
            .unwrap();
        assert!(matches!(
            report.outcome_of("Server/x86_64/os/GPL"),
            Some(ArtifactOutcome::Failed(TransferFailure::Transport { attempts: 2, .. }))
        ));
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let doc = extra_files_doc(&[("GPL", b"gpl text")]);
        let transfer = MemoryTransfer {
            delay: Some(Duration::from_secs(30)),
            ..MemoryTransfer::default()
        };
        let options = LocalizeOptions {
            timeout: Duration::from_millis(20),
            max_retries: 0,
            ..fast_options()
        };
        let out = tempfile::tempdir().unwrap();
        let report = Localizer::with_options(Arc::new(transfer), options)
            .localize(&doc, out.path())
            .await
            .unwrap();
        assert!(matches!(
            report.outcome_of("Server/x86_64/os/GPL"),
            Some(ArtifactOutcome::Failed(TransferFailure::Timeout { attempts: 1 }))
        ));
    }

    #[tokio::test]
    async fn test_skip_existing_keeps_verified_files() {
        let doc = extra_files_doc(&[("GPL", b"gpl text")]);
        let out = tempfile::tempdir().unwrap();
        fs::create_dir_all(out.path().join("Server/x86_64/os")).unwrap();
        fs::write(out.path().join("Server/x86_64/os/GPL"), b"gpl text").unwrap();

        let transfer = Arc::new(MemoryTransfer::default());
        let options = LocalizeOptions {
            skip_existing: true,
            ..fast_options()
        };
        let report = Localizer::with_options(transfer.clone(), options)
            .localize(&doc, out.path())
            .await
            .unwrap();
        assert_eq!(report.skipped(), 1);
        assert_eq!(transfer.total_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_hint_fails_before_any_transfer() {
        let doc = MetadataDocument::from_value(&json!({
            "header": {"type": "productmd.extra_files", "version": "2.0"},
            "payload": {
                "compose": {"id": "Fedora-39-20231102.0", "type": "production", "date": "20231102", "respin": 0},
                "extra_files": {"Server": {"x86_64": [
                    {"file": "GPL", "location": {"url": "https://cdn.example.com/GPL", "size": 1, "checksum": sha(b"x")}}
                ]}}
            }
        }))
        .unwrap();
        let transfer = Arc::new(MemoryTransfer::default());
        let out = tempfile::tempdir().unwrap();
        let err = Localizer::new(transfer.clone()).localize(&doc, out.path()).await.unwrap_err();
        assert!(matches!(err, Error::MissingLocalPathHint(refs) if refs.len() == 1));
        assert_eq!(transfer.total_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run() {
        let doc = extra_files_doc(&[("GPL", b"gpl text")]);
        let transfer = MemoryTransfer::default().with("https://cdn.example.com/Server/x86_64/os/GPL", b"gpl text");
        let localizer = Localizer::with_options(Arc::new(transfer), fast_options());
        localizer.cancellation_token().cancel();

        let out = tempfile::tempdir().unwrap();
        assert!(matches!(localizer.localize(&doc, out.path()).await, Err(Error::Cancelled)));
        assert!(!out.path().join("Server/x86_64/os/GPL").exists());
    }

    fn layout_tar(blobs: &[&[u8]]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for blob in blobs {
            let hex = hash_bytes(HashAlgorithm::Sha256, blob).digest().to_string();
            let mut header = tar::Header::new_gnu();
            header.set_size(blob.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("blobs/sha256/{hex}"), *blob)
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn bundle_doc(url: &str, files: &[(&str, &[u8])]) -> MetadataDocument {
        let contents: Vec<_> = files
            .iter()
            .map(|(file, body)| {
                json!({"file": file, "size": body.len(), "checksum": sha(body), "layer_digest": sha(body)})
            })
            .collect();
        MetadataDocument::from_value(&json!({
            "header": {"type": "productmd.composeinfo", "version": "2.0"},
            "payload": {
                "compose": {"id": "Fedora-39-20231102.0", "type": "production", "date": "20231102", "respin": 0},
                "release": {"name": "Fedora", "short": "Fedora", "version": "39", "type": "ga", "internal": false},
                "variants": {"Server": {
                    "id": "Server", "uid": "Server", "name": "Fedora Server", "type": "variant",
                    "arches": ["x86_64"],
                    "paths": {
                        "os_tree": {"x86_64": {
                            "url": url,
                            "local_path": "Server/x86_64/os",
                            "contents": contents
                        }},
                        "repository": {"x86_64": {"url": "Server/x86_64/os", "local_path": "Server/x86_64/os"}}
                    }
                }}
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_bundle_extracts_each_layer() {
        let url = format!("oci://quay.io/fedora/boot-files:39@sha256:{}", "a".repeat(64));
        let vmlinuz: &[u8] = b"kernel bytes";
        let initrd: &[u8] = b"initrd bytes";
        let doc = bundle_doc(&url, &[("images/pxeboot/vmlinuz", vmlinuz), ("images/pxeboot/initrd.img", initrd)]);
        let transfer = MemoryTransfer::default().with(&url, &layout_tar(&[vmlinuz, initrd]));
        let out = tempfile::tempdir().unwrap();

        let report = Localizer::with_options(Arc::new(transfer), fast_options())
            .localize(&doc, out.path())
            .await
            .unwrap();

        // one bundle, the plain repository directory is not fetched
        assert_eq!(report.total(), 1);
        assert_eq!(report.succeeded(), 1, "{report:?}");
        let tree = out.path().join("Server/x86_64/os/images/pxeboot");
        assert_eq!(fs::read(tree.join("vmlinuz")).unwrap(), vmlinuz);
        assert_eq!(fs::read(tree.join("initrd.img")).unwrap(), initrd);
        assert!(leftovers(&out.path().join("Server/x86_64/os")).is_empty());
    }

    #[tokio::test]
    async fn test_bundle_reports_missing_and_corrupt_layers() {
        let url = format!("oci://quay.io/fedora/boot-files:39@sha256:{}", "b".repeat(64));
        let vmlinuz: &[u8] = b"kernel bytes";
        let doc = bundle_doc(&url, &[("images/pxeboot/vmlinuz", vmlinuz), ("images/pxeboot/initrd.img", b"initrd")]);
        // archive lacks the initrd layer entirely
        let transfer = MemoryTransfer::default().with(&url, &layout_tar(&[vmlinuz]));
        let out = tempfile::tempdir().unwrap();

        let report = Localizer::with_options(Arc::new(transfer), fast_options())
            .localize(&doc, out.path())
            .await
            .unwrap();
        match report.outcome_of("Server/x86_64/os") {
            Some(ArtifactOutcome::Failed(TransferFailure::Bundle(failures))) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].contains("initrd.img"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!out.path().join("Server/x86_64/os/images/pxeboot/initrd.img").exists());
    }

    /// One upstream file listed under two arches, both landing on the
    /// same local path
    fn shared_file_doc(aarch64_body: &[u8], x86_64_body: &[u8]) -> MetadataDocument {
        let entry = |body: &[u8]| {
            json!([{
                "file": "GPL",
                "location": {
                    "url": "https://cdn.example.com/source/GPL",
                    "size": body.len(),
                    "checksum": sha(body),
                    "local_path": "source/GPL"
                }
            }])
        };
        MetadataDocument::from_value(&json!({
            "header": {"type": "productmd.extra_files", "version": "2.0"},
            "payload": {
                "compose": {"id": "Fedora-39-20231102.0", "type": "production", "date": "20231102", "respin": 0},
                "extra_files": {"Server": {
                    "aarch64": entry(aarch64_body),
                    "x86_64": entry(x86_64_body)
                }}
            }
        }))
        .unwrap()
    }

    fn outcome_for<'a>(report: &'a LocalizationReport, arch: &str) -> &'a ArtifactOutcome {
        &report.results.iter().find(|r| r.artifact.arch == arch).unwrap().outcome
    }

    #[tokio::test]
    async fn test_shared_destination_fetched_once() {
        let doc = shared_file_doc(b"gpl text", b"gpl text");
        let transfer = Arc::new(MemoryTransfer::default().with("https://cdn.example.com/source/GPL", b"gpl text"));
        let out = tempfile::tempdir().unwrap();

        let report = Localizer::with_options(transfer.clone(), fast_options())
            .localize(&doc, out.path())
            .await
            .unwrap();
        assert_eq!(report.total(), 2);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(transfer.total_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disagreeing_alias_is_verified_on_its_own() {
        // same size, different content: only the checksum can tell them apart
        let doc = shared_file_doc(b"gpl text", b"GPL TEXT");
        let transfer = MemoryTransfer::default().with("https://cdn.example.com/source/GPL", b"gpl text");
        let out = tempfile::tempdir().unwrap();

        let report = Localizer::with_options(Arc::new(transfer), fast_options())
            .localize(&doc, out.path())
            .await
            .unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(matches!(outcome_for(&report, "aarch64"), ArtifactOutcome::Succeeded { bytes: 8 }));
        assert!(matches!(
            outcome_for(&report, "x86_64"),
            ArtifactOutcome::Failed(TransferFailure::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_path_cannot_escape_output_root() {
        let raw = json!({
            "header": {"type": "productmd.extra_files", "version": "2.0"},
            "payload": {
                "compose": {"id": "Fedora-39-20231102.0", "type": "production", "date": "20231102", "respin": 0},
                "extra_files": {"Server": {"x86_64": [{
                    "file": "x",
                    "location": {"url": "https://cdn.example.com/x", "size": 1, "checksum": sha(b"x"), "local_path": "../x"}
                }]}}
            }
        });
        assert!(MetadataDocument::from_value(&raw).is_err());

        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("a/b");
        let doc = extra_files_doc(&[("GPL", b"gpl text")]);
        let destination = plan(&doc, &out).unwrap().0.remove(0).destination;
        assert!(destination.starts_with(&out));
    }

    #[test]
    fn test_safe_join_rejects_escape() {
        let root = Path::new("/out");
        assert_eq!(safe_join(root, "images/vmlinuz").unwrap(), root.join("images/vmlinuz"));
        assert!(safe_join(root, "../etc/passwd").is_err());
    }
}
