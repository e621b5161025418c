// src/cli.rs
//! CLI definitions for the composemd tool
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "composemd")]
#[command(author = "composemd Contributors")]
#[command(version)]
#[command(about = "Convert, localize and merge compose metadata documents", long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upgrade a legacy (1.x) document to the distributed (2.0) format
    Upgrade {
        /// Legacy metadata document
        input: PathBuf,

        /// Where to write the upgraded document (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Prefix for artifact URLs (relative references when omitted)
        #[arg(long)]
        base_url: Option<String>,

        /// Hash every artifact file instead of trusting recorded values
        #[arg(long)]
        compute_checksums: bool,

        /// Directory the legacy relative paths resolve under
        #[arg(long, default_value = ".")]
        compose_root: PathBuf,
    },

    /// Downgrade a distributed (2.0) document to the legacy format
    Downgrade {
        /// Distributed metadata document
        input: PathBuf,

        /// Where to write the legacy document (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Fetch remote artifacts before downgrading
        #[arg(long)]
        download: bool,

        /// Directory remote artifacts are localized under
        #[arg(long, default_value = ".")]
        output_root: PathBuf,

        /// Serve URLs starting with PREFIX from DIR (PREFIX=DIR)
        #[arg(long, value_name = "PREFIX=DIR")]
        mirror: Vec<String>,

        /// Base URL relative references resolve against over HTTP
        #[arg(long)]
        base_url: Option<String>,

        /// Directory relative references resolve under when mirrors are used
        #[arg(long, default_value = ".")]
        compose_root: PathBuf,
    },

    /// Validate metadata documents
    Validate {
        /// Documents to validate
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the declared type and schema version of documents
    Detect {
        /// Documents to inspect
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Fetch and verify every distributed artifact of a document
    Localize {
        /// Distributed metadata document
        input: PathBuf,

        /// Directory artifacts are written under
        #[arg(long, default_value = ".")]
        output_root: PathBuf,

        /// Transfers in flight (overrides the configuration file)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Keep files that already match their recorded checksum
        #[arg(long)]
        skip_existing: bool,

        /// Base URL relative references resolve against over HTTP
        #[arg(long)]
        base_url: Option<String>,

        /// Serve URLs starting with PREFIX from DIR (PREFIX=DIR)
        #[arg(long, value_name = "PREFIX=DIR")]
        mirror: Vec<String>,

        /// Directory relative references resolve under when mirrors are used
        #[arg(long, default_value = ".")]
        compose_root: PathBuf,
    },

    /// Merge attachments into a unified view of a base document
    Merge {
        /// Base metadata document
        base: PathBuf,

        /// Artifact document attachment (ORIGIN=PATH or PATH)
        #[arg(long, value_name = "ORIGIN=PATH")]
        attach: Vec<String>,

        /// Pipeline status record (JSON file)
        #[arg(long, value_name = "PATH")]
        status: Vec<PathBuf>,

        /// Allow attachments to declare variants the base lacks
        #[arg(long)]
        permit_new_variants: bool,

        /// Where to write the merged document (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pipelines the compose waits for
        #[arg(long, value_name = "PIPELINE")]
        expect: Vec<String>,
    },

    /// Report pipeline completion for a compose
    Status {
        /// Base metadata document
        base: PathBuf,

        /// Pipeline status record (JSON file)
        #[arg(long, value_name = "PATH")]
        status: Vec<PathBuf>,

        /// Pipelines the compose waits for (snapshot when omitted)
        #[arg(long, value_name = "PIPELINE")]
        expect: Vec<String>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
