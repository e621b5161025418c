// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: where the resulting document goes
fn output_arg() -> Arg {
    Arg::new("output")
        .short('o')
        .long("output")
        .value_name("PATH")
        .help("Where to write the document (stdout when omitted)")
}

/// Common argument: local mirrors for remote URLs
fn mirror_arg() -> Arg {
    Arg::new("mirror")
        .long("mirror")
        .value_name("PREFIX=DIR")
        .action(ArgAction::Append)
        .help("Serve URLs starting with PREFIX from DIR")
}

fn base_url_arg() -> Arg {
    Arg::new("base_url")
        .long("base-url")
        .value_name("URL")
        .help("Prefix for artifact URLs")
}

fn compose_root_arg() -> Arg {
    Arg::new("compose_root")
        .long("compose-root")
        .value_name("DIR")
        .default_value(".")
        .help("Directory relative paths resolve under")
}

fn output_root_arg() -> Arg {
    Arg::new("output_root")
        .long("output-root")
        .value_name("DIR")
        .default_value(".")
        .help("Directory artifacts are localized under")
}

fn status_arg() -> Arg {
    Arg::new("status")
        .long("status")
        .value_name("PATH")
        .action(ArgAction::Append)
        .help("Pipeline status record (JSON file)")
}

fn expect_arg() -> Arg {
    Arg::new("expect")
        .long("expect")
        .value_name("PIPELINE")
        .action(ArgAction::Append)
        .help("Pipelines the compose waits for")
}

fn build_cli() -> Command {
    Command::new("composemd")
        .version(env!("CARGO_PKG_VERSION"))
        .author("composemd Contributors")
        .about("Convert, localize and merge compose metadata documents")
        .subcommand_required(false)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Enable debug logging"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Path to a TOML configuration file"),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Upgrade a legacy (1.x) document to the distributed (2.0) format")
                .arg(Arg::new("input").required(true).help("Legacy metadata document"))
                .arg(output_arg())
                .arg(base_url_arg())
                .arg(
                    Arg::new("compute_checksums")
                        .long("compute-checksums")
                        .action(ArgAction::SetTrue)
                        .help("Hash every artifact file instead of trusting recorded values"),
                )
                .arg(compose_root_arg()),
        )
        .subcommand(
            Command::new("downgrade")
                .about("Downgrade a distributed (2.0) document to the legacy format")
                .arg(Arg::new("input").required(true).help("Distributed metadata document"))
                .arg(output_arg())
                .arg(
                    Arg::new("download")
                        .long("download")
                        .action(ArgAction::SetTrue)
                        .help("Fetch remote artifacts before downgrading"),
                )
                .arg(output_root_arg())
                .arg(mirror_arg())
                .arg(base_url_arg())
                .arg(compose_root_arg()),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate metadata documents")
                .arg(Arg::new("files").required(true).num_args(1..).help("Documents to validate")),
        )
        .subcommand(
            Command::new("detect")
                .about("Print the declared type and schema version of documents")
                .arg(Arg::new("files").required(true).num_args(1..).help("Documents to inspect")),
        )
        .subcommand(
            Command::new("localize")
                .about("Fetch and verify every distributed artifact of a document")
                .arg(Arg::new("input").required(true).help("Distributed metadata document"))
                .arg(output_root_arg())
                .arg(
                    Arg::new("concurrency")
                        .short('j')
                        .long("concurrency")
                        .value_name("N")
                        .help("Transfers in flight"),
                )
                .arg(
                    Arg::new("skip_existing")
                        .long("skip-existing")
                        .action(ArgAction::SetTrue)
                        .help("Keep files that already match their recorded checksum"),
                )
                .arg(base_url_arg())
                .arg(mirror_arg())
                .arg(compose_root_arg()),
        )
        .subcommand(
            Command::new("merge")
                .about("Merge attachments into a unified view of a base document")
                .arg(Arg::new("base").required(true).help("Base metadata document"))
                .arg(
                    Arg::new("attach")
                        .long("attach")
                        .value_name("ORIGIN=PATH")
                        .action(ArgAction::Append)
                        .help("Artifact document attachment"),
                )
                .arg(status_arg())
                .arg(
                    Arg::new("permit_new_variants")
                        .long("permit-new-variants")
                        .action(ArgAction::SetTrue)
                        .help("Allow attachments to declare variants the base lacks"),
                )
                .arg(output_arg())
                .arg(expect_arg()),
        )
        .subcommand(
            Command::new("status")
                .about("Report pipeline completion for a compose")
                .arg(Arg::new("base").required(true).help("Base metadata document"))
                .arg(status_arg())
                .arg(expect_arg()),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(Arg::new("shell").required(true).help("Shell to generate completions for")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory - use CARGO_MANIFEST_DIR which is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("composemd.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
