use std::fmt::{Display, Formatter};

use quill_normalize::{PackageName, ProjectVersion};

/// The filename of a gzip-compressed source distribution, `<name>-<version>.tar.gz`.
///
/// The name is written in its dist-info form, i.e., with underscores instead of dashes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourceDistFilename {
    pub name: PackageName,
    pub version: ProjectVersion,
}

impl SourceDistFilename {
    /// The directory at the root of the archive, which contains all files.
    pub fn top_level_directory(&self) -> String {
        format!("{}-{}", self.name.as_dist_info_name(), self.version)
    }
}

impl Display for SourceDistFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.tar.gz", self.top_level_directory())
    }
}
