//! Variant pipeline worker main executable

pub mod common;
pub mod conf;
pub mod err;
pub mod parallel;
pub mod reference;
pub mod run_info;
pub mod variants;

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Variant pipeline heavy lifting",
    long_about = "This tool resolves run information and merges VCF files region by region"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Run information related commands.
    RunInfo(RunInfo),
    /// Reference related commands.
    Reference(Reference),
    /// VCF related commands.
    Vcf(Vcf),
}

/// Parsing of "run-info *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct RunInfo {
    /// The sub command to run
    #[command(subcommand)]
    command: RunInfoCommands,
}

/// Enum supporting the parsing of "run-info *" sub commands.
#[derive(Debug, Subcommand)]
enum RunInfoCommands {
    Resolve(run_info::Args),
}

/// Parsing of "reference *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Reference {
    /// The sub command to run
    #[command(subcommand)]
    command: ReferenceCommands,
}

/// Enum supporting the parsing of "reference *" sub commands.
#[derive(Debug, Subcommand)]
enum ReferenceCommands {
    Regions(reference::Args),
}

/// Parsing of "vcf *" sub commands.
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
struct Vcf {
    /// The sub command to run
    #[command(subcommand)]
    command: VcfCommands,
}

/// Enum supporting the parsing of "vcf *" sub commands.
#[derive(Debug, Subcommand)]
enum VcfCommands {
    Combine(variants::combine::Args),
    Exclude(variants::exclude::Args),
}

/// Exit code for a failed run; known errors get their own code.
fn failure_code(e: &anyhow::Error) -> ExitCode {
    match e.downcast_ref::<err::Error>() {
        Some(e) => ExitCode::from(e.exit_code()),
        None => ExitCode::FAILURE,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    let result = tracing::subscriber::with_default(collector, || {
        tracing::info!("variant-pipeline-worker {}", common::worker_version());
        match &cli.command {
            Commands::RunInfo(run_info) => match &run_info.command {
                RunInfoCommands::Resolve(args) => run_info::run(&cli.common, args)?,
            },
            Commands::Reference(reference) => match &reference.command {
                ReferenceCommands::Regions(args) => reference::run(&cli.common, args)?,
            },
            Commands::Vcf(vcf) => match &vcf.command {
                VcfCommands::Combine(args) => {
                    variants::combine::run(&cli.common, args)?;
                }
                VcfCommands::Exclude(args) => {
                    variants::exclude::run(&cli.common, args)?;
                }
            },
        }

        Ok::<(), anyhow::Error>(())
    });

    match result {
        Ok(()) => {
            let _ = term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")));
            ExitCode::SUCCESS
        }
        Err(e) => {
            let _ = term.write_line(&format!("Error: {:#}", e));
            failure_code(&e)
        }
    }
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::{Cli, Commands, VcfCommands};

    #[test]
    fn parse_vcf_combine() {
        let cli = Cli::parse_from([
            "variant-pipeline-worker",
            "vcf",
            "combine",
            "--path-in",
            "a.vcf",
            "--path-in",
            "@list.txt",
            "--path-out",
            "out.vcf.gz",
            "--path-reference",
            "ref.fa",
            "--cores",
            "4",
        ]);
        match cli.command {
            Commands::Vcf(vcf) => match vcf.command {
                VcfCommands::Combine(args) => {
                    assert_eq!(vec!["a.vcf", "@list.txt"], args.path_in);
                    assert_eq!(Some(4), args.cores);
                }
                other => panic!("unexpected command {:?}", other),
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parse_vcf_exclude() {
        let cli = Cli::parse_from([
            "variant-pipeline-worker",
            "-v",
            "vcf",
            "exclude",
            "--path-in",
            "in.vcf",
            "--sample",
            "S1",
            "--sample",
            "S2",
            "--path-reference",
            "ref.fa",
        ]);
        match cli.command {
            Commands::Vcf(vcf) => match vcf.command {
                VcfCommands::Exclude(args) => {
                    assert_eq!(vec!["S1", "S2"], args.samples);
                    assert_eq!(None, args.path_out);
                }
                other => panic!("unexpected command {:?}", other),
            },
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn failure_code_follows_error_kind() {
        let e = anyhow::Error::from(crate::err::Error::Dispatch("x".into()));
        assert_eq!(
            format!("{:?}", std::process::ExitCode::from(5)),
            format!("{:?}", super::failure_code(&e))
        );
    }
}
