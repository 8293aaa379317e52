mod backend;
mod core_metadata;
mod entry_points;
mod metadata;
mod module;
mod settings;
mod source_dist;
mod wheel;

pub use backend::BuildBackend;
pub use metadata::{PyProjectToml, ValidationError, supports_legacy_python};
pub use settings::BuildBackendSettings;
pub use source_dist::{build_source_dist, list_source_dist};
pub use wheel::{build_wheel, list_wheel, metadata};

use std::fs::FileType;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use quill_distribution_filename::{SourceDistFilename, WheelFilename};
use quill_fs::Simplified;
use quill_normalize::IdentifierParseError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Invalid pyproject.toml")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid pyproject.toml")]
    Validation(#[from] ValidationError),
    #[error("Invalid module name: {0}")]
    InvalidModuleName(String, #[source] IdentifierParseError),
    #[error("Invalid glob expression in: `{field}`")]
    Glob {
        field: &'static str,
        #[source]
        source: globset::Error,
    },
    #[error("`pyproject.toml` must not be excluded from source distribution build")]
    PyprojectTomlExcluded,
    #[error("Failed to walk source tree: {}", root.user_display())]
    WalkDir {
        root: PathBuf,
        #[source]
        err: walkdir::Error,
    },
    #[error("Unsupported file type {:?}: {}", _1, _0.user_display())]
    UnsupportedFileType(PathBuf, FileType),
    #[error("Failed to write wheel zip archive")]
    Zip(#[from] zip::result::ZipError),
    #[error("Failed to write RECORD file")]
    Csv(#[from] csv::Error),
    #[error(
        "Expected a package directory `{name}/__init__.py` or a module file `{name}.py` in: {roots}"
    )]
    MissingModule { name: String, roots: String },
    #[error("Found the module twice, remove one of them: {} and {}", _0.user_display(), _1.user_display())]
    AmbiguousModule(PathBuf, PathBuf),
    /// Either an absolute path or a parent path through `..`.
    #[error("Module root must be inside the project: {}", _0.user_display())]
    InvalidModuleRoot(PathBuf),
    #[error("The file declared in `{field}` does not exist: {}", path.user_display())]
    MissingSourceFile { field: &'static str, path: PathBuf },
    #[error("Refusing to overwrite existing output: {}", _0.user_display())]
    DestinationExists(PathBuf),
    #[error("Inconsistent metadata between prepare and build step: {0}")]
    InconsistentSteps(&'static str),
    #[error("Failed to write to {}", _0.user_display())]
    TarWrite(PathBuf, #[source] io::Error),
}

/// Dispatcher between writing to a directory, writing to a zip, writing to a `.tar.gz` and
/// listing files.
///
/// All paths are string types instead of path types since wheels are portable between platforms.
///
/// Contract: You must call close before dropping to obtain a valid output (dropping is fine in the
/// error case).
trait DirectoryWriter {
    /// Add a file with the given content.
    ///
    /// Files added through the method are considered generated when listing included files.
    fn write_bytes(&mut self, path: &str, bytes: &[u8]) -> Result<(), Error>;

    /// Add a local file.
    fn write_file(&mut self, path: &str, file: &Path) -> Result<(), Error>;

    /// Add a directory entry. Only source distributions record directories, the other writers
    /// create parent directories as needed.
    fn write_directory(&mut self, _directory: &str) -> Result<(), Error> {
        Ok(())
    }

    /// Write the `RECORD` file and if applicable, the central directory, and move the archive
    /// into place.
    fn close(self, dist_info_dir: &str) -> Result<(), Error>;
}

/// Name of the file in the archive and path outside, if it wasn't generated.
pub type FileList = Vec<(String, Option<PathBuf>)>;

/// A dummy writer to collect the file names that would be included in a build.
pub(crate) struct ListWriter<'a> {
    files: &'a mut FileList,
}

impl<'a> ListWriter<'a> {
    pub(crate) fn new(files: &'a mut FileList) -> Self {
        Self { files }
    }
}

impl DirectoryWriter for ListWriter<'_> {
    fn write_bytes(&mut self, path: &str, _bytes: &[u8]) -> Result<(), Error> {
        self.files.push((path.to_string(), None));
        Ok(())
    }

    fn write_file(&mut self, path: &str, file: &Path) -> Result<(), Error> {
        self.files.push((path.to_string(), Some(file.to_path_buf())));
        Ok(())
    }

    fn close(self, _dist_info_dir: &str) -> Result<(), Error> {
        Ok(())
    }
}

/// A project to build: its root directory and the declarations read from `pyproject.toml`.
#[derive(Debug)]
pub(crate) struct SourceTree {
    /// The project root; paths in `pyproject.toml` are relative to it.
    pub(crate) root: PathBuf,
    /// The location the declarations were read from.
    pub(crate) pyproject_path: PathBuf,
    pub(crate) pyproject_toml: PyProjectToml,
}

impl SourceTree {
    /// Read and parse the declarations, by default from `<root>/pyproject.toml`.
    pub(crate) fn read(root: &Path, pyproject_path: Option<&Path>) -> Result<Self, Error> {
        let pyproject_path = pyproject_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.join("pyproject.toml"));
        let contents = fs_err::read_to_string(&pyproject_path)?;
        let pyproject_toml = PyProjectToml::parse(&contents)?;
        Ok(Self {
            root: root.to_path_buf(),
            pyproject_path,
            pyproject_toml,
        })
    }

    /// The filename of a pure Python wheel, tagged for Python 2 too unless `requires-python`
    /// rules it out.
    pub(crate) fn wheel_filename(&self) -> WheelFilename {
        let python_tags = if self.pyproject_toml.supports_legacy_python() {
            vec!["py2".to_string(), "py3".to_string()]
        } else {
            vec!["py3".to_string()]
        };
        WheelFilename::new(
            self.pyproject_toml.name().clone(),
            self.pyproject_toml.version().clone(),
            python_tags,
            "none",
            "any",
        )
    }

    pub(crate) fn source_dist_filename(&self) -> SourceDistFilename {
        SourceDistFilename {
            name: self.pyproject_toml.name().clone(),
            version: self.pyproject_toml.version().clone(),
        }
    }
}

#[cfg(test)]
mod tests;
