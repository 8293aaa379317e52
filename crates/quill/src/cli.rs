use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use quill_configuration::ConfigSettingEntry;

/// A build backend for pure Python projects.
///
/// See [PEP 517](https://peps.python.org/pep-0517/) for the hooks and their parameters.
#[derive(Parser)]
#[command(name = "quill", author, version, about)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,

    #[command(flatten)]
    pub(crate) global_args: GlobalArgs,
}

#[derive(Args, Debug)]
pub(crate) struct GlobalArgs {
    /// The project root, which contains `pyproject.toml`.
    ///
    /// Defaults to the current directory. Output directories are still resolved against the
    /// current directory.
    #[arg(global = true, long)]
    pub(crate) directory: Option<PathBuf>,

    /// Read the project declarations from this file instead of `<directory>/pyproject.toml`.
    #[arg(global = true, long)]
    pub(crate) pyproject_toml: Option<PathBuf>,

    /// Do not print any output.
    #[arg(global = true, long, short, conflicts_with = "verbose")]
    pub(crate) quiet: bool,

    /// Use verbose output.
    ///
    /// Repeat for more output (`-vv`).
    #[arg(global = true, action = ArgAction::Count, long, short, conflicts_with = "quiet")]
    pub(crate) verbose: u8,

    /// Settings to pass to the backend, specified as `KEY=VALUE` pairs.
    #[arg(global = true, long, short = 'C', alias = "config-settings")]
    pub(crate) config_setting: Option<Vec<ConfigSettingEntry>>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// PEP 517 hook `get_requires_for_build_wheel`.
    GetRequiresForBuildWheel,
    /// PEP 517 hook `get_requires_for_build_sdist`.
    GetRequiresForBuildSdist,
    /// PEP 517 hook `prepare_metadata_for_build_wheel`.
    PrepareMetadataForBuildWheel { metadata_directory: PathBuf },
    /// PEP 517 hook `build_wheel`.
    BuildWheel {
        wheel_directory: PathBuf,
        #[arg(long)]
        metadata_directory: Option<PathBuf>,
    },
    /// PEP 517 hook `build_sdist`.
    BuildSdist { sdist_directory: PathBuf },
}
