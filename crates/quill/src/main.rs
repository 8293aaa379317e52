use std::env;
use std::process::ExitCode;

use anstream::eprintln;
use anyhow::Result;
use clap::Parser;
use owo_colors::OwoColorize;
use tracing::debug;

use quill_build_backend::BuildBackend;
use quill_configuration::ConfigSettings;
use quill_fs::Simplified;

use crate::cli::{Cli, Commands};
use crate::commands::ExitStatus;

mod cli;
mod commands;

fn run() -> Result<ExitStatus> {
    let cli = Cli::parse();

    // Configure the `tracing` crate, which controls internal logging.
    quill_logging::setup_logging(match cli.global_args.verbose {
        0 => quill_logging::Level::Default,
        1 => quill_logging::Level::Verbose,
        2.. => quill_logging::Level::ExtraVerbose,
    })?;

    // Configure the `warn!` macros, which control user-facing warnings in the CLI.
    if !cli.global_args.quiet {
        quill_warnings::enable();
    }

    let source_tree = match cli.global_args.directory {
        Some(directory) => directory,
        None => env::current_dir()?,
    };
    let mut backend = BuildBackend::new(source_tree, env!("CARGO_PKG_VERSION"));
    if let Some(pyproject_toml) = cli.global_args.pyproject_toml {
        backend = backend.with_pyproject_toml(pyproject_toml);
    }
    debug!("Project root: {}", backend.source_tree().user_display());

    let config_settings = cli
        .global_args
        .config_setting
        .into_iter()
        .flatten()
        .collect::<ConfigSettings>();

    match cli.command {
        Commands::GetRequiresForBuildWheel | Commands::GetRequiresForBuildSdist => {
            commands::get_requires(&backend, &config_settings)
        }
        Commands::PrepareMetadataForBuildWheel { metadata_directory } => {
            commands::prepare_metadata_for_build_wheel(
                &backend,
                &metadata_directory,
                &config_settings,
            )
        }
        Commands::BuildWheel {
            wheel_directory,
            metadata_directory,
        } => commands::build_wheel(
            &backend,
            &wheel_directory,
            metadata_directory.as_deref(),
            &config_settings,
        ),
        Commands::BuildSdist { sdist_directory } => {
            commands::build_sdist(&backend, &sdist_directory, &config_settings)
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code.into(),
        Err(err) => {
            let mut causes = err.chain();
            if let Some(err) = causes.next() {
                eprintln!("{}: {}", "error".red().bold(), err);
            }
            for err in causes {
                eprintln!("  {}: {}", "Caused by".red().bold(), err);
            }
            ExitStatus::Error.into()
        }
    }
}
