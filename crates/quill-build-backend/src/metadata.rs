use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;
use tracing::debug;

use quill_fs::Simplified;
use quill_normalize::{PackageName, ProjectVersion};
use quill_warnings::warn_user_once;

use crate::core_metadata::CoreMetadata;
use crate::entry_points::write_entry_points;
use crate::module::find_license_files;
use crate::{BuildBackendSettings, Error};

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The allowed values of `charset` are unclear, we only support the default value (UTF-8).
    #[error(
        "Charsets other than UTF-8 are not supported. Please convert your README to UTF-8 and remove `project.readme.charset`."
    )]
    ReadmeCharset,
    #[error(
        "Unknown Readme extension `{0}`, can't determine content type. Please use a support extension (`.md`, `.rst`, `.txt`) or set the content type manually."
    )]
    UnknownExtension(String),
    #[error("Can't infer content type because `{}` does not have an extension. Please use a support extension (`.md`, `.rst`, `.txt`) or set the content type manually.", _0.user_display())]
    MissingExtension(PathBuf),
    #[error("Unsupported content type: `{0}`")]
    UnsupportedContentType(String),
    #[error("`project.description` must be a single line")]
    DescriptionNewlines,
    #[error("Dynamic metadata is not supported")]
    Dynamic,
    #[error(
        "When `project.license-files` is defined, `project.license` must be an SPDX expression string"
    )]
    MixedLicenseGenerations,
    #[error(
        "Entrypoint groups must consist of letters and numbers separated by dots, invalid group: `{0}`"
    )]
    InvalidGroup(String),
    #[error(
        "Entrypoint names must consist of letters, numbers, dots, underscores and dashes; invalid name: `{0}`"
    )]
    InvalidName(String),
    #[error("Use `project.scripts` instead of `project.entry-points.console_scripts`")]
    ReservedScripts,
    #[error("Use `project.gui-scripts` instead of `project.entry-points.gui_scripts`")]
    ReservedGuiScripts,
    #[error("`project.license` is not a valid SPDX expression: `{0}`")]
    InvalidSpdx(String, #[source] spdx::error::ParseError),
    #[error("`{field}` must be a relative path inside the project: `{}`", path.user_display())]
    PathOutsideProject { field: &'static str, path: PathBuf },
}

/// A `pyproject.toml` as specified in PEP 517, with the `[tool.quill]` settings.
#[derive(Deserialize, Debug, Clone)]
#[serde(
    rename_all = "kebab-case",
    expecting = "The project table needs to follow \
    https://packaging.python.org/en/latest/guides/writing-pyproject-toml"
)]
pub struct PyProjectToml {
    /// Project metadata
    project: Project,
    /// Build-related data
    build_system: BuildSystem,
    /// Tool-specific settings
    tool: Option<Tool>,
}

impl PyProjectToml {
    pub fn name(&self) -> &PackageName {
        &self.project.name
    }

    pub fn version(&self) -> &ProjectVersion {
        &self.project.version
    }

    pub fn parse(contents: &str) -> Result<Self, Error> {
        Ok(toml::from_str(contents)?)
    }

    /// The `[tool.quill]` settings, or the defaults if the table is absent.
    pub fn settings(&self) -> BuildBackendSettings {
        self.tool
            .as_ref()
            .and_then(|tool| tool.quill.clone())
            .unwrap_or_default()
    }

    /// Whether the wheel may be tagged for Python 2 in addition to Python 3.
    pub fn supports_legacy_python(&self) -> bool {
        supports_legacy_python(self.project.requires_python.as_deref())
    }

    /// The requirements of the project, in declaration order.
    pub fn dependencies(&self) -> &[String] {
        self.project.dependencies.as_deref().unwrap_or_default()
    }

    /// The readme path relative to the project root, if the readme is a file.
    pub(crate) fn readme(&self) -> Option<&Path> {
        match self.project.readme.as_ref()? {
            Readme::String(path) => Some(path),
            Readme::File { file, .. } => Some(file),
            Readme::Text { .. } => None,
        }
    }

    /// Files that must be shipped in the source distribution besides the module: the readme,
    /// a license file and the PEP 639 license files, with the field that declares them.
    pub(crate) fn auxiliary_files(
        &self,
        root: &Path,
    ) -> Result<Vec<(&'static str, PathBuf)>, Error> {
        let mut files = Vec::new();
        if let Some(readme) = self.readme() {
            let field = "project.readme";
            files.push((field, project_relative(field, readme)?));
        }
        if let Some(License::File { file }) = &self.project.license {
            let field = "project.license.file";
            files.push((field, project_relative(field, file)?));
        }
        for license_file in self.license_files(root)? {
            files.push(("project.license-files", license_file));
        }
        Ok(files)
    }

    /// The PEP 639 license files matched by the `license-files` globs, relative to the project
    /// root, sorted and without duplicates.
    pub(crate) fn license_files(&self, root: &Path) -> Result<Vec<PathBuf>, Error> {
        let Some(license_globs) = &self.project.license_files else {
            return Ok(Vec::new());
        };
        let field = "project.license-files";
        let globs = license_globs
            .iter()
            .map(|glob| {
                project_relative(field, Path::new(glob))
                    .map(|glob| glob.portable_display().to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;
        find_license_files(root, &globs)
    }

    /// Warn if the `[build-system]` table looks suspicious.
    ///
    /// Example of a valid table:
    ///
    /// ```toml
    /// [build-system]
    /// requires = ["quill>=0.1,<0.2"]
    /// build-backend = "quill"
    /// ```
    ///
    /// Returns whether all checks passed.
    pub fn check_build_system(&self) -> bool {
        if let Some(backend_path) = &self.build_system.backend_path {
            debug!("In-tree backend path: `{}`", backend_path.join(", "));
        }

        let mut passed = true;
        if self.build_system.build_backend.as_deref() != Some("quill") {
            warn_user_once!(
                r#"The value for `build_system.build-backend` should be `"quill"`, not `"{}"`"#,
                self.build_system.build_backend.clone().unwrap_or_default()
            );
            passed = false;
        }

        let quill_requirement = self
            .build_system
            .requires
            .iter()
            .find(|requirement| requirement_name(requirement) == Some("quill".to_string()));
        if quill_requirement.is_none() {
            warn_user_once!(
                "Expected a quill requirement in `build-system.requires`, found `{}`",
                self.build_system.requires.iter().join(", ")
            );
            passed = false;
        }

        passed
    }

    /// Validate and convert a `pyproject.toml` to core metadata.
    ///
    /// <https://packaging.python.org/en/latest/guides/writing-pyproject-toml/>
    /// <https://packaging.python.org/en/latest/specifications/pyproject-toml/>
    /// <https://packaging.python.org/en/latest/specifications/core-metadata/>
    pub(crate) fn to_metadata(&self, root: &Path) -> Result<CoreMetadata, Error> {
        let summary = if let Some(description) = &self.project.description {
            if description.contains('\n') {
                return Err(ValidationError::DescriptionNewlines.into());
            }
            Some(description.clone())
        } else {
            None
        };

        let supported_content_types = ["text/plain", "text/x-rst", "text/markdown"];
        let (description, description_content_type) = match &self.project.readme {
            Some(Readme::String(path)) => {
                let content = read_auxiliary_file(root, "project.readme", path)?;
                let content_type = match path.extension().and_then(OsStr::to_str) {
                    Some("txt") => "text/plain",
                    Some("rst") => "text/x-rst",
                    Some("md") => "text/markdown",
                    Some(unknown) => {
                        return Err(ValidationError::UnknownExtension(unknown.to_owned()).into());
                    }
                    None => return Err(ValidationError::MissingExtension(path.clone()).into()),
                }
                .to_string();
                (Some(content), Some(content_type))
            }
            Some(Readme::File {
                file,
                content_type,
                charset,
            }) => {
                if !supported_content_types.contains(&content_type.as_str()) {
                    return Err(
                        ValidationError::UnsupportedContentType(content_type.clone()).into(),
                    );
                }
                if charset.as_ref().is_some_and(|charset| charset != "UTF-8") {
                    return Err(ValidationError::ReadmeCharset.into());
                }
                let content = read_auxiliary_file(root, "project.readme", file)?;
                (Some(content), Some(content_type.clone()))
            }
            Some(Readme::Text {
                text,
                content_type,
                charset,
            }) => {
                if !supported_content_types.contains(&content_type.as_str()) {
                    return Err(
                        ValidationError::UnsupportedContentType(content_type.clone()).into(),
                    );
                }
                if charset.as_ref().is_some_and(|charset| charset != "UTF-8") {
                    return Err(ValidationError::ReadmeCharset.into());
                }
                (Some(text.clone()), Some(content_type.clone()))
            }
            None => (None, None),
        };

        if self
            .project
            .dynamic
            .as_ref()
            .is_some_and(|dynamic| !dynamic.is_empty())
        {
            return Err(ValidationError::Dynamic.into());
        }

        let (author, author_email) = contact_fields(self.project.authors.as_deref());
        let (maintainer, maintainer_email) = contact_fields(self.project.maintainers.as_deref());

        // Using PEP 639 bumps the METADATA version
        let metadata_version = if self.project.license_files.is_some()
            || matches!(self.project.license, Some(License::Spdx(_)))
        {
            debug!("Found PEP 639 license declarations, using METADATA 2.4");
            "2.4"
        } else {
            "2.3"
        };

        let (license, license_expression, license_files) = if self.project.license_files.is_some()
        {
            let license_expression = match &self.project.license {
                None => None,
                Some(License::Spdx(license_expression)) => Some(license_expression.clone()),
                Some(License::Text { .. } | License::File { .. }) => {
                    return Err(ValidationError::MixedLicenseGenerations.into());
                }
            };

            let license_files = self
                .license_files(root)?
                .iter()
                .map(|license_file| license_file.portable_display().to_string())
                .collect();

            (None, license_expression, license_files)
        } else {
            match &self.project.license {
                None => (None, None, Vec::new()),
                Some(License::Spdx(license_expression)) => {
                    (None, Some(license_expression.clone()), Vec::new())
                }
                Some(License::Text { text }) => (Some(text.clone()), None, Vec::new()),
                Some(License::File { file }) => {
                    let text = read_auxiliary_file(root, "project.license.file", file)?;
                    (Some(text), None, Vec::new())
                }
            }
        };

        // Check that the license expression is a valid SPDX identifier.
        if let Some(license_expression) = &license_expression {
            if let Err(err) = spdx::Expression::parse(license_expression) {
                return Err(ValidationError::InvalidSpdx(license_expression.clone(), err).into());
            }
        }

        let project_urls = self
            .project
            .urls
            .iter()
            .flatten()
            .map(|(key, value)| format!("{key}, {value}"))
            .collect();

        let mut requires_dist: Vec<String> = self.dependencies().to_vec();
        let mut provides_extras = Vec::new();
        for (extra, requirements) in self.project.optional_dependencies.iter().flatten() {
            requires_dist.extend(
                requirements
                    .iter()
                    .map(|requirement| requirement_with_extra(requirement, extra)),
            );
            provides_extras.push(extra.clone());
        }

        Ok(CoreMetadata {
            metadata_version: metadata_version.to_string(),
            name: self.project.name.to_string(),
            version: self.project.version.to_string(),
            summary,
            description,
            description_content_type,
            keywords: self
                .project
                .keywords
                .as_ref()
                .map(|keywords| keywords.join(",")),
            author,
            author_email,
            maintainer,
            maintainer_email,
            license,
            license_expression,
            license_files,
            classifiers: self.project.classifiers.clone().unwrap_or_default(),
            requires_dist,
            requires_python: self.project.requires_python.clone(),
            project_urls,
            provides_extras,
        })
    }

    /// Validate and convert the entrypoints in `pyproject.toml`, including console and GUI scripts,
    /// to an `entry_points.txt`.
    ///
    /// <https://packaging.python.org/en/latest/specifications/entry-points/>
    ///
    /// Returns `None` if no entrypoints were defined.
    pub(crate) fn to_entry_points(&self) -> Result<Option<String>, ValidationError> {
        if self.project.scripts.is_none()
            && self.project.gui_scripts.is_none()
            && self.project.entry_points.is_none()
        {
            return Ok(None);
        }

        let mut groups: Vec<(&str, &IndexMap<String, String>)> = Vec::new();
        if let Some(scripts) = &self.project.scripts {
            groups.push(("console_scripts", scripts));
        }
        if let Some(gui_scripts) = &self.project.gui_scripts {
            groups.push(("gui_scripts", gui_scripts));
        }
        for (group, entries) in self.project.entry_points.iter().flatten() {
            if group == "console_scripts" {
                return Err(ValidationError::ReservedScripts);
            }
            if group == "gui_scripts" {
                return Err(ValidationError::ReservedGuiScripts);
            }
            groups.push((group, entries));
        }

        for (group, entries) in &groups {
            validate_group(group, entries)?;
        }

        Ok(Some(write_entry_points(groups)))
    }
}

/// Whether a `requires-python` value leaves room for Python 2.
///
/// This is a prefix check on the raw string, not a version specifier evaluation: `3`, `>3` and
/// `>=3` rule out Python 2, every other value (including none) keeps it. For example,
/// `~=3.8` or `>= 3.8` are treated as Python 2 compatible.
pub fn supports_legacy_python(requires_python: Option<&str>) -> bool {
    let requires_python = requires_python.unwrap_or_default();
    !["3", ">3", ">=3"]
        .iter()
        .any(|prefix| requires_python.starts_with(prefix))
}

/// Check the group and entry names of an entry point group.
fn validate_group(group: &str, entries: &IndexMap<String, String>) -> Result<(), ValidationError> {
    if !group
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
        || !group
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '_')
    {
        return Err(ValidationError::InvalidGroup(group.to_string()));
    }

    for name in entries.keys() {
        // Stricter than the entry point format, we enforce the recommendation
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            return Err(ValidationError::InvalidName(name.to_string()));
        }
    }
    Ok(())
}

/// Attach an `extra` marker to a requirement, combining it with an existing marker.
fn requirement_with_extra(requirement: &str, extra: &str) -> String {
    if let Some((requirement, marker)) = requirement.split_once(';') {
        format!(
            "{} ; extra == \"{extra}\" and ({})",
            requirement.trim(),
            marker.trim()
        )
    } else {
        format!("{} ; extra == \"{extra}\"", requirement.trim())
    }
}

/// The normalized name of a PEP 508 requirement string, if it starts with a valid name.
fn requirement_name(requirement: &str) -> Option<String> {
    let end = requirement
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(requirement.len());
    PackageName::from_str(&requirement[..end])
        .ok()
        .map(|name| name.to_string())
}

/// Join the names and the emails of the contacts into the `Author`/`Maintainer` and
/// `Author-email`/`Maintainer-email` fields.
fn contact_fields(contacts: Option<&[Contact]>) -> (Option<String>, Option<String>) {
    let Some(contacts) = contacts else {
        return (None, None);
    };
    let names = contacts
        .iter()
        .filter_map(|contact| match contact {
            Contact::Name { name } => Some(name),
            Contact::Email { .. } => None,
            Contact::NameEmail { name, .. } => Some(name),
        })
        .join(", ");
    let emails = contacts
        .iter()
        .filter_map(|contact| match contact {
            Contact::Name { .. } => None,
            Contact::Email { email } => Some(email.clone()),
            Contact::NameEmail { name, email } => Some(format!("{name} <{email}>")),
        })
        .join(", ");
    (
        Some(names).filter(|names| !names.is_empty()),
        Some(emails).filter(|emails| !emails.is_empty()),
    )
}

/// Check that a path from `pyproject.toml` stays inside the project, and normalize it.
fn project_relative(field: &'static str, path: &Path) -> Result<PathBuf, ValidationError> {
    let normalized = quill_fs::normalize_path(path);
    if normalized.as_os_str().is_empty()
        || normalized
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        || path
            .components()
            .any(|component| component == Component::ParentDir)
    {
        return Err(ValidationError::PathOutsideProject {
            field,
            path: path.to_path_buf(),
        });
    }
    Ok(normalized)
}

/// Read a file that `pyproject.toml` refers to, such as the readme.
fn read_auxiliary_file(root: &Path, field: &'static str, path: &Path) -> Result<String, Error> {
    let path = project_relative(field, path)?;
    let absolute = root.join(&path);
    if !absolute.is_file() {
        return Err(Error::MissingSourceFile { field, path });
    }
    Ok(fs_err::read_to_string(absolute)?)
}

/// The `[project]` section of a pyproject.toml as specified in
/// <https://packaging.python.org/en/latest/specifications/pyproject-toml>.
///
/// Tables keep their declaration order, which carries through to the metadata and the
/// entry points.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
struct Project {
    /// The name of the project.
    name: PackageName,
    /// The version of the project, echoed verbatim.
    version: ProjectVersion,
    /// The summary description of the project in one line.
    description: Option<String>,
    /// The full description of the project (i.e. the README).
    readme: Option<Readme>,
    /// The Python version requirements of the project.
    requires_python: Option<String>,
    /// The license under which the project is distributed.
    ///
    /// Supports both the current standard and PEP 639.
    license: Option<License>,
    /// The paths to files containing licenses and other legal notices to be distributed with the
    /// project.
    license_files: Option<Vec<String>>,
    /// The people or organizations considered to be the "authors" of the project.
    authors: Option<Vec<Contact>>,
    /// The people or organizations considered to be the "maintainers" of the project.
    maintainers: Option<Vec<Contact>>,
    /// The keywords for the project.
    keywords: Option<Vec<String>>,
    /// Trove classifiers which apply to the project.
    classifiers: Option<Vec<String>>,
    /// A table of URLs where the key is the URL label and the value is the URL itself.
    urls: Option<IndexMap<String, String>>,
    /// The console entrypoints of the project.
    ///
    /// The key of the table is the name of the entry point and the value is the object reference.
    scripts: Option<IndexMap<String, String>>,
    /// The GUI entrypoints of the project.
    ///
    /// The key of the table is the name of the entry point and the value is the object reference.
    gui_scripts: Option<IndexMap<String, String>>,
    /// Entrypoints groups of the project.
    ///
    /// The key of the table is the name of the entry point and the value is the object reference.
    entry_points: Option<IndexMap<String, IndexMap<String, String>>>,
    /// The dependencies of the project, as PEP 508 strings.
    dependencies: Option<Vec<String>>,
    /// The optional dependencies of the project.
    optional_dependencies: Option<IndexMap<String, Vec<String>>>,
    /// Specifies which fields listed by PEP 621 were intentionally unspecified so another tool
    /// can/will provide such metadata dynamically.
    ///
    /// Not supported, an error if anything but the default empty list.
    dynamic: Option<Vec<String>>,
}

/// The optional `project.readme` key in a pyproject.toml as specified in
/// <https://packaging.python.org/en/latest/specifications/pyproject-toml/#readme>.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged, rename_all = "kebab-case")]
enum Readme {
    /// Relative path to the README.
    String(PathBuf),
    /// Relative path to the README.
    File {
        file: PathBuf,
        #[serde(rename = "content-type")]
        content_type: String,
        charset: Option<String>,
    },
    /// The full description of the project as inline value.
    Text {
        text: String,
        #[serde(rename = "content-type")]
        content_type: String,
        charset: Option<String>,
    },
}

/// The optional `project.license` key in a pyproject.toml as specified in
/// <https://packaging.python.org/en/latest/specifications/pyproject-toml/#license>.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum License {
    /// An SPDX Expression.
    Spdx(String),
    Text {
        /// The full text of the license.
        text: String,
    },
    File {
        /// The file containing the license text.
        file: PathBuf,
    },
}

/// A `project.authors` or `project.maintainers` entry as specified in
/// <https://packaging.python.org/en/latest/specifications/pyproject-toml/#authors-maintainers>.
///
/// The entry is derived from the email format of `John Doe <john.doe@example.net>`. You need to
/// provide at least name or email.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged, expecting = "a table with 'name' and/or 'email' keys")]
enum Contact {
    NameEmail { name: String, email: String },
    Name { name: String },
    Email { email: String },
}

/// The `[build-system]` section of a pyproject.toml as specified in PEP 517.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
struct BuildSystem {
    /// PEP 508 dependencies required to execute the build system.
    requires: Vec<String>,
    /// A string naming a Python object that will be used to perform the build.
    build_backend: Option<String>,
    /// <https://peps.python.org/pep-0517/#in-tree-build-backends>
    backend_path: Option<Vec<String>>,
}

/// The `[tool]` section; only our own table is read.
#[derive(Deserialize, Debug, Clone)]
struct Tool {
    quill: Option<BuildBackendSettings>,
}
