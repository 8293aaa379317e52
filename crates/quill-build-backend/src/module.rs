use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use itertools::Itertools;
use tracing::{debug, trace};
use walkdir::WalkDir;

use quill_fs::Simplified;
use quill_normalize::Identifier;

use crate::{BuildBackendSettings, Error, PyProjectToml};

/// Files and directories that are never useful in a distribution.
pub(crate) const DEFAULT_EXCLUDES: &[&str] = &["__pycache__", "*.pyc", "*.pyo"];

/// The module a distribution ships, found below one of the candidate module roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ModuleLayout {
    /// A directory containing an `__init__.py`, shipped with everything below it.
    Package { src_root: PathBuf, name: Identifier },
    /// A single `<name>.py` file.
    SingleFile { src_root: PathBuf, name: Identifier },
}

impl ModuleLayout {
    /// Locate the module of the project.
    ///
    /// With an explicit `module-root`, only that directory is searched. Otherwise both the
    /// project root (flat layout) and `src` (src layout) are searched. Exactly one package
    /// directory or single-file module must be found across all searched roots.
    pub(crate) fn find(
        source_tree: &Path,
        pyproject_toml: &PyProjectToml,
        settings: &BuildBackendSettings,
    ) -> Result<Self, Error> {
        let name = if let Some(module_name) = &settings.module_name {
            module_name.clone()
        } else {
            // This name is always lowercase.
            let dist_info_name = pyproject_toml.name().as_dist_info_name();
            Identifier::from_str(&dist_info_name)
                .map_err(|err| Error::InvalidModuleName(dist_info_name.to_string(), err))?
        };

        let module_roots = if let Some(module_root) = &settings.module_root {
            vec![module_root.clone()]
        } else {
            vec![PathBuf::new(), PathBuf::from("src")]
        };

        let mut found = Vec::new();
        for module_root in &module_roots {
            // Check that even if a path contains `..`, we only include files below the project.
            if module_root.is_absolute()
                || !quill_fs::normalize_path(source_tree.join(module_root))
                    .starts_with(quill_fs::normalize_path(source_tree))
            {
                return Err(Error::InvalidModuleRoot(module_root.clone()));
            }
            let src_root = source_tree.join(quill_fs::normalize_path(module_root));
            trace!("Searching for `{name}` in {}", src_root.user_display());

            if src_root.join(name.as_str()).join("__init__.py").is_file() {
                found.push(Self::Package {
                    src_root: src_root.clone(),
                    name: name.clone(),
                });
            }
            if src_root.join(format!("{name}.py")).is_file() {
                found.push(Self::SingleFile {
                    src_root,
                    name: name.clone(),
                });
            }
        }

        match found.as_slice() {
            [] => Err(Error::MissingModule {
                name: name.to_string(),
                roots: module_roots
                    .iter()
                    .map(|root| {
                        if root.as_os_str().is_empty() {
                            "the project root".to_string()
                        } else {
                            format!("`{}`", root.portable_display())
                        }
                    })
                    .join(", "),
            }),
            [module] => {
                debug!("Module: {module}");
                Ok(module.clone())
            }
            [first, second, ..] => Err(Error::AmbiguousModule(first.path(), second.path())),
        }
    }

    /// The directory containing the module, which the wheel paths are relative to.
    pub(crate) fn src_root(&self) -> &Path {
        match self {
            Self::Package { src_root, .. } | Self::SingleFile { src_root, .. } => src_root,
        }
    }

    /// The path of the package directory or the module file.
    pub(crate) fn path(&self) -> PathBuf {
        match self {
            Self::Package { src_root, name } => src_root.join(name.as_str()),
            Self::SingleFile { src_root, name } => src_root.join(format!("{name}.py")),
        }
    }

    /// The files of the module relative to [`ModuleLayout::src_root`], i.e., at their install
    /// location, in file name order.
    pub(crate) fn files(&self, exclude_matcher: &GlobSet) -> Result<Vec<PathBuf>, Error> {
        match self {
            Self::Package { src_root, .. } => {
                walk_files(src_root, &self.path(), exclude_matcher)
            }
            Self::SingleFile { name, .. } => Ok(vec![PathBuf::from(format!("{name}.py"))]),
        }
    }
}

impl Display for ModuleLayout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Package { .. } => write!(f, "package {}", self.path().user_display()),
            Self::SingleFile { .. } => write!(f, "single file {}", self.path().user_display()),
        }
    }
}

/// Collect the regular files below `directory`, as paths relative to `base`.
///
/// Exclusions are matched against the path relative to `base`. Excluded directories are not
/// descended into.
pub(crate) fn walk_files(
    base: &Path,
    directory: &Path,
    exclude_matcher: &GlobSet,
) -> Result<Vec<PathBuf>, Error> {
    let mut files = Vec::new();
    for entry in WalkDir::new(directory)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let Ok(relative) = entry.path().strip_prefix(base) else {
                return false;
            };
            if exclude_matcher.is_match(relative) {
                trace!("Excluding: `{}`", relative.user_display());
                return false;
            }
            true
        })
    {
        let entry = entry.map_err(|err| Error::WalkDir {
            root: directory.to_path_buf(),
            err,
        })?;
        if entry.file_type().is_dir() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(base)
            .map_err(|_| Error::InvalidModuleRoot(entry.path().to_path_buf()))?;
        if !entry.file_type().is_file() {
            return Err(Error::UnsupportedFileType(
                relative.to_path_buf(),
                entry.file_type(),
            ));
        }
        files.push(relative.to_path_buf());
    }
    Ok(files)
}

/// Build the matcher for exclude globs.
///
/// Excludes are unanchored: `*.bin` matches at any depth, while `/build` only matches at the
/// root of the walk.
pub(crate) fn build_exclude_matcher(
    field: &'static str,
    default_excludes: bool,
    excludes: &[String],
) -> Result<GlobSet, Error> {
    let mut all_excludes: Vec<&str> = Vec::new();
    if default_excludes {
        all_excludes.extend(DEFAULT_EXCLUDES);
    }
    for exclude in excludes {
        // Avoid duplicate entries.
        if !all_excludes.contains(&exclude.as_str()) {
            all_excludes.push(exclude);
        }
    }
    debug!("Excludes for `{field}`: {all_excludes:?}");

    let globs = all_excludes.iter().map(|exclude| {
        if let Some(anchored) = exclude.strip_prefix('/') {
            anchored.to_string()
        } else {
            format!("**/{exclude}")
        }
    });
    build_glob_set(field, globs)
}

/// Build the matcher for include globs, which are anchored at the root of the walk.
pub(crate) fn build_include_matcher(
    field: &'static str,
    includes: &[String],
) -> Result<GlobSet, Error> {
    debug!("Includes for `{field}`: {includes:?}");
    build_glob_set(
        field,
        includes
            .iter()
            .map(|include| include.trim_start_matches('/').to_string()),
    )
}

/// Expand the PEP 639 `license-files` globs, which are relative to the project root.
///
/// Each glob must match at least one file. The matches are deduplicated and sorted by their
/// portable path.
pub(crate) fn find_license_files(root: &Path, globs: &[String]) -> Result<Vec<PathBuf>, Error> {
    let field = "project.license-files";
    if globs.is_empty() {
        return Ok(Vec::new());
    }

    let mut matchers = Vec::with_capacity(globs.len());
    for glob in globs {
        let matcher = GlobBuilder::new(glob)
            .literal_separator(true)
            .build()
            .map_err(|source| Error::Glob { field, source })?
            .compile_matcher();
        matchers.push(matcher);
    }

    // Without `**`, a match can't be deeper than the glob has components.
    let max_depth = if globs.iter().any(|glob| glob.contains("**")) {
        usize::MAX
    } else {
        globs
            .iter()
            .map(|glob| glob.split('/').count())
            .max()
            .unwrap_or_default()
    };

    let mut matched = vec![false; globs.len()];
    let mut license_files = BTreeMap::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .max_depth(max_depth)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| Error::WalkDir {
            root: root.to_path_buf(),
            err,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        for (matcher, matched) in matchers.iter().zip(matched.iter_mut()) {
            if matcher.is_match(relative) {
                *matched = true;
                license_files
                    .entry(relative.portable_display().to_string())
                    .or_insert_with(|| relative.to_path_buf());
            }
        }
    }

    if let Some((glob, _)) = globs.iter().zip(&matched).find(|(_, matched)| !**matched) {
        return Err(Error::MissingSourceFile {
            field,
            path: PathBuf::from(glob),
        });
    }
    trace!("License files: {:?}", license_files.keys());
    Ok(license_files.into_values().collect())
}

fn build_glob_set(
    field: &'static str,
    globs: impl IntoIterator<Item = String>,
) -> Result<GlobSet, Error> {
    let mut builder = GlobSetBuilder::new();
    for glob in globs {
        let glob = GlobBuilder::new(&glob)
            .literal_separator(true)
            .build()
            .map_err(|source| Error::Glob { field, source })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| Error::Glob { field, source })
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use fs_err::File;
    use indoc::{formatdoc, indoc};
    use insta::assert_snapshot;
    use tempfile::TempDir;

    use super::*;

    fn pyproject_toml(settings: &str) -> PyProjectToml {
        PyProjectToml::parse(&formatdoc! {r#"
            [project]
            name = "sample-lib"
            version = "1.0"

            [build-system]
            requires = ["quill>=0.1,<0.2"]
            build-backend = "quill"

            [tool.quill]
            {settings}
        "#})
        .unwrap()
    }

    fn touch(root: &Path, path: &str) {
        let path = root.join(path);
        fs_err::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(path).unwrap();
    }

    fn find(root: &Path, settings: &str) -> Result<ModuleLayout, Error> {
        let pyproject_toml = pyproject_toml(settings);
        ModuleLayout::find(root, &pyproject_toml, &pyproject_toml.settings())
    }

    #[test]
    fn flat_package() {
        let src = TempDir::new().unwrap();
        touch(src.path(), "sample_lib/__init__.py");
        let module = find(src.path(), "").unwrap();
        assert_eq!(
            module,
            ModuleLayout::Package {
                src_root: src.path().to_path_buf(),
                name: Identifier::from_str("sample_lib").unwrap(),
            }
        );
    }

    #[test]
    fn src_single_file() {
        let src = TempDir::new().unwrap();
        touch(src.path(), "src/sample_lib.py");
        let module = find(src.path(), "").unwrap();
        assert_eq!(module.src_root(), src.path().join("src"));
        assert_eq!(module.path(), src.path().join("src").join("sample_lib.py"));
        assert_eq!(
            module.files(&GlobSet::empty()).unwrap(),
            [PathBuf::from("sample_lib.py")]
        );
    }

    #[test]
    fn explicit_module_name_and_root() {
        let src = TempDir::new().unwrap();
        touch(src.path(), "python/Sample/__init__.py");
        // A flat module with the default name is ignored when the root is set.
        touch(src.path(), "sample_lib.py");
        let module = find(
            src.path(),
            indoc! {r#"
                module-root = "python"
                module-name = "Sample"
            "#},
        )
        .unwrap();
        assert_eq!(module.path(), src.path().join("python").join("Sample"));
    }

    #[test]
    fn missing() {
        let src = TempDir::new().unwrap();
        let err = find(src.path(), "").unwrap_err();
        assert_snapshot!(
            err.to_string(),
            @"Expected a package directory `sample_lib/__init__.py` or a module file `sample_lib.py` in: the project root, `src`"
        );
    }

    #[test]
    fn ambiguous() {
        let src = TempDir::new().unwrap();
        touch(src.path(), "sample_lib/__init__.py");
        touch(src.path(), "src/sample_lib.py");
        let err = find(src.path(), "").unwrap_err();
        assert!(matches!(err, Error::AmbiguousModule(_, _)), "{err}");
    }

    #[test]
    fn package_and_file_ambiguous() {
        let src = TempDir::new().unwrap();
        touch(src.path(), "sample_lib/__init__.py");
        touch(src.path(), "sample_lib.py");
        let err = find(src.path(), "").unwrap_err();
        assert!(matches!(err, Error::AmbiguousModule(_, _)), "{err}");
    }

    #[test]
    fn module_root_outside_project() {
        let src = TempDir::new().unwrap();
        let err = find(src.path(), r#"module-root = "../other""#).unwrap_err();
        assert_snapshot!(err.to_string(), @"Module root must be inside the project: ../other");
    }

    #[test]
    fn walk_with_excludes() {
        let src = TempDir::new().unwrap();
        touch(src.path(), "sample_lib/__init__.py");
        touch(src.path(), "sample_lib/core.py");
        touch(src.path(), "sample_lib/__pycache__/core.cpython-312.pyc");
        touch(src.path(), "sample_lib/data/table.bin");
        touch(src.path(), "sample_lib/data/table.csv");
        touch(src.path(), "sample_lib/legacy.pyc");

        let module = find(src.path(), "").unwrap();
        let exclude_matcher =
            build_exclude_matcher("tool.quill.wheel-exclude", true, &["*.bin".to_string()])
                .unwrap();
        let files = module
            .files(&exclude_matcher)
            .unwrap()
            .iter()
            .map(|path| path.portable_display().to_string())
            .join("\n");
        assert_snapshot!(files, @r"
        sample_lib/__init__.py
        sample_lib/core.py
        sample_lib/data/table.csv
        ");
    }

    #[test]
    fn anchored_exclude() {
        let matcher = build_exclude_matcher(
            "tool.quill.source-exclude",
            false,
            &["/build".to_string()],
        )
        .unwrap();
        assert!(matcher.is_match("build"));
        assert!(!matcher.is_match("sample_lib/build"));
    }
}
