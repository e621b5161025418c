// src/progress.rs

//! Progress reporting for localization runs
//!
//! A run announces its size with [`ProgressEvent::Started`], then emits one
//! [`ProgressEvent::Position`] per artifact as it settles (fetched, skipped
//! or failed), and ends with [`ProgressEvent::Finished`] or
//! [`ProgressEvent::Failed`]. Sinks:
//! - `CliProgress`: an indicatif bar for interactive terminals
//! - `LogProgress`: tracing lines for redirected output and CI logs
//! - `CallbackProgress`: hands every event to a closure
//! - `SilentProgress`: drops everything

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// One step of a localization run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started { total: u64 },
    /// `artifact` settled; `current` of `total` are done
    Position { current: u64, total: u64, artifact: String },
    Finished(String),
    Failed(String),
}

/// Receives progress events from concurrent workers
pub trait ProgressTracker: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressTracker for SilentProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Writes progress through `tracing`, once per tenth of the run
#[derive(Debug)]
pub struct LogProgress {
    operation: String,
    /// Position of the last logged line
    logged: AtomicU64,
}

impl LogProgress {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            logged: AtomicU64::new(0),
        }
    }

    fn step(total: u64) -> u64 {
        (total / 10).max(1)
    }
}

impl ProgressTracker for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { total } => {
                self.logged.store(0, Ordering::Relaxed);
                info!("{}: {} artifact(s)", self.operation, total);
            }
            ProgressEvent::Position { current, total, .. } => {
                let last = self.logged.load(Ordering::Relaxed);
                if (current == total || current >= last + Self::step(total))
                    && self
                        .logged
                        .compare_exchange(last, current, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                {
                    info!("{}: {}/{} ({}%)", self.operation, current, total, current * 100 / total.max(1));
                }
            }
            ProgressEvent::Finished(summary) => info!("{}: {}", self.operation, summary),
            ProgressEvent::Failed(summary) => warn!("{}: {}", self.operation, summary),
        }
    }
}

/// Hands every event to a closure
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressTracker for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        (self.callback)(event);
    }
}

/// Terminal progress bar
pub struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    pub fn new(operation: &str) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .expect("Invalid progress bar template")
                .progress_chars("#>-"),
        );
        bar.set_message(operation.to_string());
        Self { bar }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }
}

impl ProgressTracker for CliProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { total } => self.bar.set_length(total),
            ProgressEvent::Position { current, artifact, .. } => {
                self.bar.set_position(current);
                self.bar.set_message(artifact);
            }
            ProgressEvent::Finished(summary) => self.bar.finish_with_message(summary),
            ProgressEvent::Failed(summary) => self.bar.abandon_with_message(summary),
        }
    }
}
