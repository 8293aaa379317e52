use std::path::{Path, PathBuf};

use tracing::debug;

use quill_configuration::ConfigSettings;
use quill_distribution_filename::{SourceDistFilename, WheelFilename};
use quill_fs::Simplified;

use crate::source_dist::write_source_dist_to;
use crate::wheel::{write_metadata_to, write_wheel_to};
use crate::{Error, SourceTree};

/// The PEP 517 hooks for one project.
///
/// Each call reads `pyproject.toml` again and derives the metadata from scratch, there is no
/// state shared between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildBackend {
    /// The project root, which relative paths in `pyproject.toml` are resolved against.
    source_tree: PathBuf,
    /// The declaration file, usually `<source_tree>/pyproject.toml`.
    pyproject_toml: PathBuf,
    /// The version recorded as `Generator` in the `WHEEL` file.
    version: String,
}

impl BuildBackend {
    /// A backend for the project at `source_tree`, reading `<source_tree>/pyproject.toml`.
    pub fn new(source_tree: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        let source_tree = source_tree.into();
        Self {
            pyproject_toml: source_tree.join("pyproject.toml"),
            source_tree,
            version: version.into(),
        }
    }

    /// Read the declarations from a different file than `<source_tree>/pyproject.toml`.
    #[must_use]
    pub fn with_pyproject_toml(mut self, pyproject_toml: impl Into<PathBuf>) -> Self {
        self.pyproject_toml = pyproject_toml.into();
        self
    }

    pub fn source_tree(&self) -> &Path {
        &self.source_tree
    }

    fn read(&self, hook: &str, config_settings: &ConfigSettings) -> Result<SourceTree, Error> {
        debug!("Running `{hook}` for {}", self.source_tree.user_display());
        if !config_settings.is_empty() {
            debug!("Ignoring config settings: {config_settings:?}");
        }
        SourceTree::read(&self.source_tree, Some(&self.pyproject_toml))
    }

    /// PEP 517 `get_requires_for_build_wheel` and `get_requires_for_build_sdist`.
    ///
    /// Returns the dependencies declared in `project.dependencies`, in declaration order, for
    /// both wheels and source distributions.
    pub fn get_build_requirements(
        &self,
        config_settings: &ConfigSettings,
    ) -> Result<Vec<String>, Error> {
        let source_tree = self.read("get_requires_for_build", config_settings)?;
        Ok(source_tree.pyproject_toml.dependencies().to_vec())
    }

    /// PEP 517 `prepare_metadata_for_build_wheel`.
    ///
    /// Creates `<metadata_directory>/<name>-<version>.dist-info` with `METADATA`, `WHEEL` and, if
    /// declared, `entry_points.txt`, and returns the name of the dist-info directory. Fails if
    /// the dist-info directory already exists.
    pub fn prepare_metadata(
        &self,
        metadata_directory: &Path,
        config_settings: &ConfigSettings,
    ) -> Result<String, Error> {
        let source_tree = self.read("prepare_metadata_for_build_wheel", config_settings)?;
        write_metadata_to(&source_tree, metadata_directory, &self.version)
    }

    /// PEP 517 `build_wheel`.
    ///
    /// If `metadata_directory` is given, it must contain the result of an earlier
    /// [`BuildBackend::prepare_metadata`] call for the same declarations.
    pub fn build_wheel(
        &self,
        wheel_directory: &Path,
        config_settings: &ConfigSettings,
        metadata_directory: Option<&Path>,
    ) -> Result<WheelFilename, Error> {
        let source_tree = self.read("build_wheel", config_settings)?;
        write_wheel_to(
            &source_tree,
            wheel_directory,
            metadata_directory,
            &self.version,
        )
    }

    /// PEP 517 `build_sdist`.
    pub fn build_sdist(
        &self,
        sdist_directory: &Path,
        config_settings: &ConfigSettings,
    ) -> Result<SourceDistFilename, Error> {
        let source_tree = self.read("build_sdist", config_settings)?;
        write_source_dist_to(&source_tree, sdist_directory)
    }
}
