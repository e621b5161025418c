// src/commands.rs
//! Command handlers for the composemd CLI

use anyhow::{Context, Result, anyhow, bail};
use clap::CommandFactory;
use clap_complete::Shell;
use composemd::attachment::{self, Attachment, CompletionState, PipelineStatus, UnifiedView};
use composemd::config::Config;
use composemd::convert::{self, BaseUrlMapper, IdentityMapper, UpgradeOptions, UrlMapper};
use composemd::localize::{LocalizationReport, Localizer};
use composemd::progress::{CliProgress, LogProgress, ProgressTracker};
use composemd::transfer::{HttpTransfer, LocalTransfer, Transfer};
use composemd::version::{self, WireRevision};
use composemd::MetadataDocument;
use std::future::Future;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cli::Cli;

/// Progress bar on a terminal, log lines otherwise
fn progress_sink(operation: &str) -> Arc<dyn ProgressTracker> {
    if std::io::stderr().is_terminal() {
        Arc::new(CliProgress::new(operation))
    } else {
        Arc::new(LogProgress::new(operation))
    }
}

/// Load the configuration file, or defaults when none was given
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let config = Config::load(path)?;
            debug!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Write a document to `output`, or to stdout when there is none
fn write_document(
    doc: &MetadataDocument,
    output: Option<&Path>,
    version: Option<WireRevision>,
) -> Result<()> {
    match output {
        Some(path) => {
            doc.save(path, version)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} to {}", doc.kind(), path.display());
        }
        None => println!("{}", doc.to_json(version)?),
    }
    Ok(())
}

fn load_document(path: &Path) -> Result<MetadataDocument> {
    MetadataDocument::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Pick the transfer for a run
///
/// Mirrors select the filesystem transfer rooted at `compose_root`;
/// otherwise artifacts are fetched over HTTP.
fn build_transfer(
    mirrors: &[String],
    base_url: Option<&str>,
    compose_root: &Path,
) -> Result<Arc<dyn Transfer>> {
    if mirrors.is_empty() {
        let mut http = HttpTransfer::new()?;
        if let Some(base) = base_url {
            http = http.with_base_url(base)?;
        }
        return Ok(Arc::new(http));
    }

    let mut local = LocalTransfer::new(compose_root);
    for mirror in mirrors {
        let (prefix, dir) = mirror
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid mirror '{mirror}', expected PREFIX=DIR"))?;
        debug!("Mirroring {} from {}", prefix, dir);
        local = local.with_mirror(prefix, dir);
    }
    Ok(Arc::new(local))
}

/// Run a localization future to completion, cancelling it on Ctrl-C
fn run_cancellable<F, T>(localizer: &Localizer, fut: F) -> Result<T>
where
    F: Future<Output = composemd::Result<T>>,
{
    let rt = tokio::runtime::Runtime::new()?;
    let token = localizer.cancellation_token();
    rt.block_on(async move {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling transfers");
                token.cancel();
            }
        });
        fut.await.map_err(anyhow::Error::from)
    })
}

fn print_report(report: &LocalizationReport) {
    for (artifact, failure) in report.failures() {
        eprintln!("  FAILED {artifact}: {failure}");
    }
    println!("{}", report.summary());
}

pub fn cmd_upgrade(
    config: &Config,
    input: &Path,
    output: Option<&Path>,
    base_url: Option<&str>,
    compute_checksums: bool,
    compose_root: &Path,
) -> Result<()> {
    let doc = load_document(input)?;
    let base_url = base_url.or(config.upgrade.base_url.as_deref());

    let base_mapper;
    let mapper: &dyn UrlMapper = match base_url {
        Some(base) => {
            base_mapper = BaseUrlMapper::new(base)?;
            &base_mapper
        }
        None => &IdentityMapper,
    };
    let options = UpgradeOptions {
        mapper,
        compute_checksums: compute_checksums || config.upgrade.compute_checksums,
        compose_root,
    };

    info!("Upgrading {} ({}) from {}", doc.kind(), doc.revision(), input.display());
    let upgraded = convert::upgrade(&doc, &options)?;
    write_document(&upgraded, output, None)
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_downgrade(
    config: &Config,
    input: &Path,
    output: Option<&Path>,
    download: bool,
    output_root: &Path,
    mirrors: &[String],
    base_url: Option<&str>,
    compose_root: &Path,
) -> Result<()> {
    let doc = load_document(input)?;
    info!("Downgrading {} ({}) from {}", doc.kind(), doc.revision(), input.display());

    if !download {
        let legacy = convert::downgrade(&doc)?;
        return write_document(&legacy, output, Some(WireRevision::LATEST_V1));
    }

    let transfer = build_transfer(mirrors, base_url, compose_root)?;
    let localizer =
        Localizer::with_options(transfer, config.localize_options()).with_progress(progress_sink("Localizing"));
    let (legacy, report) = run_cancellable(
        &localizer,
        convert::downgrade_with_download(&doc, &localizer, output_root),
    )?;
    print_report(&report);
    write_document(&legacy, output, Some(WireRevision::LATEST_V1))
}

pub fn cmd_validate(files: &[PathBuf]) -> Result<()> {
    let mut failed = 0;
    for path in files {
        match MetadataDocument::load(path).and_then(|doc| doc.validate().map(|()| doc)) {
            Ok(doc) => println!(
                "{}: OK ({} {}, {} artifacts)",
                path.display(),
                doc.kind(),
                doc.revision(),
                doc.artifact_count()
            ),
            Err(e) => {
                failed += 1;
                println!("{}: FAILED\n{e}", path.display());
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} document(s) failed validation", files.len());
    }
    Ok(())
}

pub fn cmd_detect(files: &[PathBuf]) -> Result<()> {
    for path in files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let raw: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("{} is not JSON", path.display()))?;
        let header = version::detect_header(&raw)
            .with_context(|| format!("Failed to detect {}", path.display()))?;
        let format = if header.version.is_v2() { "distributed" } else { "legacy" };
        println!("{}: {} {} ({format})", path.display(), header.kind, header.version);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_localize(
    config: &Config,
    input: &Path,
    output_root: &Path,
    concurrency: Option<usize>,
    skip_existing: bool,
    base_url: Option<&str>,
    mirrors: &[String],
    compose_root: &Path,
) -> Result<()> {
    let doc = load_document(input)?;

    let mut options = config.localize_options();
    if let Some(n) = concurrency {
        if n == 0 {
            bail!("--concurrency must be at least 1");
        }
        options.concurrency = n;
    }
    options.skip_existing |= skip_existing;

    let transfer = build_transfer(mirrors, base_url, compose_root)?;
    info!(
        "Localizing {} into {} via {} ({} in flight)",
        input.display(),
        output_root.display(),
        transfer.name(),
        options.concurrency
    );
    let localizer = Localizer::with_options(transfer, options).with_progress(progress_sink("Localizing"));
    let report = run_cancellable(&localizer, localizer.localize(&doc, output_root))?;

    print_report(&report);
    if !report.is_success() {
        bail!(
            "Localization failed for {} of {} artifact(s)",
            report.failed(),
            report.total()
        );
    }
    Ok(())
}

/// Split `ORIGIN=PATH`; a bare path uses its file stem as origin
fn parse_attach_arg(arg: &str) -> (String, PathBuf) {
    match arg.split_once('=') {
        Some((origin, path)) if !origin.is_empty() => (origin.to_string(), PathBuf::from(path)),
        _ => {
            let path = PathBuf::from(arg);
            let origin = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| arg.to_string());
            (origin, path)
        }
    }
}

fn load_status_attachments(base: &MetadataDocument, paths: &[PathBuf]) -> Result<Vec<Attachment>> {
    paths
        .iter()
        .map(|path| {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let status = PipelineStatus::from_json(&text)
                .with_context(|| format!("Invalid pipeline status {}", path.display()))?;
            let origin = status.pipeline_id.clone();
            Ok(Attachment::pipeline_status(
                &origin,
                &base.compose().id,
                base.revision().version(),
                status,
            ))
        })
        .collect()
}

fn print_completion(view: &UnifiedView, expect: &[String]) -> CompletionState {
    let expected = (!expect.is_empty()).then_some(expect);
    let state = view.completion_state(expected, chrono::Utc::now());
    match &state {
        CompletionState::Complete { degraded } if degraded.is_empty() => {
            println!("Complete: all {} pipeline(s) finished", expect.len());
        }
        CompletionState::Complete { degraded } => {
            println!("Complete (degraded): {}", degraded.join(", "));
        }
        CompletionState::Pending { waiting } => {
            println!("Pending: waiting for {}", waiting.join(", "));
        }
        CompletionState::Snapshot(states) => {
            if states.is_empty() {
                println!("No pipeline status recorded");
            }
            for (id, s) in states {
                println!("  {id}: {s}");
            }
        }
    }
    state
}

pub fn cmd_merge(
    base: &Path,
    attach: &[String],
    status: &[PathBuf],
    permit_new_variants: bool,
    output: Option<&Path>,
    expect: &[String],
) -> Result<()> {
    let base_doc = load_document(base)?;

    let mut attachments = Vec::new();
    for arg in attach {
        let (origin, path) = parse_attach_arg(arg);
        let doc = load_document(&path)?;
        attachments.push(Attachment::document(&origin, doc).permit_new_variants(permit_new_variants));
    }
    attachments.extend(load_status_attachments(&base_doc, status)?);

    let view = attachment::merge(&base_doc, &attachments)?;
    for (key, origin) in view.contributions() {
        debug!("{key} contributed by {origin}");
    }
    eprintln!(
        "Merged {} attachment(s): {} artifact(s) in the unified view",
        attachments.len(),
        view.document().artifact_count()
    );
    if !status.is_empty() || !expect.is_empty() {
        print_completion(&view, expect);
    }
    write_document(view.document(), output, None)
}

pub fn cmd_status(base: &Path, status: &[PathBuf], expect: &[String]) -> Result<()> {
    let base_doc = load_document(base)?;
    let attachments = load_status_attachments(&base_doc, status)?;
    let view = attachment::merge(&base_doc, &attachments)?;

    println!("Compose {}", base_doc.compose());
    for s in view.statuses() {
        debug!("{} revision {} ({})", s.pipeline_id, s.revision, s.status);
    }
    let state = print_completion(&view, expect);
    if !expect.is_empty() && !state.is_complete() {
        bail!("Compose is still waiting for pipelines");
    }
    Ok(())
}

pub fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "composemd", &mut std::io::stdout());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attach_arg() {
        assert_eq!(
            parse_attach_arg("image-build=out/images.json"),
            ("image-build".to_string(), PathBuf::from("out/images.json"))
        );
        assert_eq!(
            parse_attach_arg("out/images.json"),
            ("images".to_string(), PathBuf::from("out/images.json"))
        );
    }

    #[test]
    fn test_build_transfer() {
        let root = Path::new("/srv/compose");
        let local = build_transfer(&["https://cdn.example.com=/mirror".to_string()], None, root).unwrap();
        assert_eq!(local.name(), "local");
        let http = build_transfer(&[], Some("https://cdn.example.com/compose"), root).unwrap();
        assert_eq!(http.name(), "http");
        assert!(build_transfer(&["no-separator".to_string()], None, root).is_err());
    }
}
