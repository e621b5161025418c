// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Upgrade {
            input,
            output,
            base_url,
            compute_checksums,
            compose_root,
        }) => commands::cmd_upgrade(
            &config,
            &input,
            output.as_deref(),
            base_url.as_deref(),
            compute_checksums,
            &compose_root,
        ),

        Some(Commands::Downgrade {
            input,
            output,
            download,
            output_root,
            mirror,
            base_url,
            compose_root,
        }) => commands::cmd_downgrade(
            &config,
            &input,
            output.as_deref(),
            download,
            &output_root,
            &mirror,
            base_url.as_deref(),
            &compose_root,
        ),

        Some(Commands::Validate { files }) => commands::cmd_validate(&files),

        Some(Commands::Detect { files }) => commands::cmd_detect(&files),

        Some(Commands::Localize {
            input,
            output_root,
            concurrency,
            skip_existing,
            base_url,
            mirror,
            compose_root,
        }) => commands::cmd_localize(
            &config,
            &input,
            &output_root,
            concurrency,
            skip_existing,
            base_url.as_deref(),
            &mirror,
            &compose_root,
        ),

        Some(Commands::Merge {
            base,
            attach,
            status,
            permit_new_variants,
            output,
            expect,
        }) => commands::cmd_merge(
            &base,
            &attach,
            &status,
            permit_new_variants,
            output.as_deref(),
            &expect,
        ),

        Some(Commands::Status {
            base,
            status,
            expect,
        }) => commands::cmd_status(&base, &status, &expect),

        Some(Commands::Completions { shell }) => commands::cmd_completions(shell),

        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
