use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// The name of an importable Python module, such as `module-name` in `[tool.quill]`.
///
/// Letters and digits are Unicode-aware (`char::is_alphabetic`), names are not NFKC-normalized.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Identifier(Box<str>);

#[derive(Debug, Clone, Error)]
pub enum IdentifierParseError {
    #[error("A module name must not be empty")]
    Empty,
    #[error(
        "Not a valid module name: `{0}`. Module names consist of letters, digits and underscores and must not start with a digit."
    )]
    Invalid(Box<str>),
}

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Identifier {
    type Err = IdentifierParseError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return Err(IdentifierParseError::Empty);
        };
        let is_word = |c: char| c == '_' || c.is_alphanumeric();
        if first.is_numeric() || !is_word(first) || !chars.all(is_word) {
            return Err(IdentifierParseError::Invalid(name.into()));
        }
        Ok(Self(name.into()))
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Self::from_str(&name).map_err(serde::de::Error::custom)
    }
}
