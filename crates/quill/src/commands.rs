#![allow(clippy::print_stdout)]

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;

use quill_build_backend::BuildBackend;
use quill_configuration::ConfigSettings;

#[derive(Copy, Clone)]
pub(crate) enum ExitStatus {
    /// The command succeeded.
    Success,

    /// The command failed with an unexpected error.
    Error,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Success => Self::from(0),
            ExitStatus::Error => Self::from(2),
        }
    }
}

/// Print the build requirements, one per line.
///
/// Wheels and source distributions have the same requirements.
pub(crate) fn get_requires(
    backend: &BuildBackend,
    config_settings: &ConfigSettings,
) -> Result<ExitStatus> {
    for requirement in backend.get_build_requirements(config_settings)? {
        println!("{requirement}");
    }
    Ok(ExitStatus::Success)
}

pub(crate) fn prepare_metadata_for_build_wheel(
    backend: &BuildBackend,
    metadata_directory: &Path,
    config_settings: &ConfigSettings,
) -> Result<ExitStatus> {
    let dist_info_dir = backend.prepare_metadata(metadata_directory, config_settings)?;
    println!("{dist_info_dir}");
    Ok(ExitStatus::Success)
}

pub(crate) fn build_wheel(
    backend: &BuildBackend,
    wheel_directory: &Path,
    metadata_directory: Option<&Path>,
    config_settings: &ConfigSettings,
) -> Result<ExitStatus> {
    let filename = backend.build_wheel(wheel_directory, config_settings, metadata_directory)?;
    println!("{filename}");
    Ok(ExitStatus::Success)
}

pub(crate) fn build_sdist(
    backend: &BuildBackend,
    sdist_directory: &Path,
    config_settings: &ConfigSettings,
) -> Result<ExitStatus> {
    let filename = backend.build_sdist(sdist_directory, config_settings)?;
    println!("{filename}");
    Ok(ExitStatus::Success)
}
