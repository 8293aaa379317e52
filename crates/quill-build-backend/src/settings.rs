use std::path::PathBuf;

use serde::Deserialize;

use quill_normalize::Identifier;

/// Settings for the quill build backend, read from `[tool.quill]`.
///
/// Globs are matched against `/`-separated paths relative to the project root (source
/// distributions) or to the module root (wheels). A glob without a leading `/` matches at any
/// depth, e.g. `*.bin` excludes `data/large.bin`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BuildBackendSettings {
    /// The directory that contains the module directory or the single-file module.
    ///
    /// If unset, both the project root (flat layout) and `src` (src layout) are searched, and
    /// it is an error if the module exists in both.
    pub module_root: Option<PathBuf>,

    /// The name of the module, without the `.py` extension for single-file modules.
    ///
    /// The default module name is the package name with dots and dashes replaced by underscores.
    pub module_name: Option<Identifier>,

    /// Glob expressions which files and directories to additionally include in the source
    /// distribution.
    ///
    /// `pyproject.toml`, the module, the readme and the license files are always included.
    pub source_include: Vec<String>,

    /// If set to `false`, the default excludes aren't applied.
    ///
    /// Default excludes: `__pycache__`, `*.pyc`, and `*.pyo`.
    pub default_excludes: bool,

    /// Glob expressions which files and directories to exclude from the source distribution.
    pub source_exclude: Vec<String>,

    /// Glob expressions which files and directories to exclude from the wheel.
    pub wheel_exclude: Vec<String>,
}

impl Default for BuildBackendSettings {
    fn default() -> Self {
        Self {
            module_root: None,
            module_name: None,
            source_include: Vec::new(),
            default_excludes: true,
            source_exclude: Vec::new(),
            wheel_exclude: Vec::new(),
        }
    }
}
