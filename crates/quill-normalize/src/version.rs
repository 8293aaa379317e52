use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// The version of a project, as declared.
///
/// Versions are not parsed or normalized: whatever the project declares is echoed into the
/// metadata and the filenames. We only reject values that can't be embedded in a filename, a
/// directory name or the `<name>-<version>` split of distribution filenames.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectVersion(Box<str>);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidVersionError {
    #[error("A version must not be empty")]
    Empty,
    #[error(
        "Invalid character `{invalid_char}` in version `{version}`, versions must not contain \
        whitespace, dashes, path separators or control characters"
    )]
    InvalidChar {
        invalid_char: char,
        version: Box<str>,
    },
}

impl ProjectVersion {
    pub fn new(version: impl Into<Box<str>>) -> Result<Self, InvalidVersionError> {
        let version = version.into();
        if version.is_empty() {
            return Err(InvalidVersionError::Empty);
        }
        if let Some(invalid_char) = version.chars().find(|c| {
            c.is_whitespace() || c.is_control() || matches!(c, '-' | '/' | '\\' | ':')
        }) {
            return Err(InvalidVersionError::InvalidChar {
                invalid_char,
                version,
            });
        }
        Ok(Self(version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ProjectVersion {
    type Err = InvalidVersionError;

    fn from_str(version: &str) -> Result<Self, Self::Err> {
        Self::new(version)
    }
}

impl Display for ProjectVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for ProjectVersion {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ProjectVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let version = String::deserialize(deserializer)?;
        Self::new(version).map_err(serde::de::Error::custom)
    }
}
