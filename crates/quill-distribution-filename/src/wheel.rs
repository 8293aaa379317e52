use std::fmt::{Display, Formatter};

use quill_normalize::{PackageName, ProjectVersion};

/// The filename of a wheel, `<name>-<version>-<python tag>-<abi tag>-<platform tag>.whl`.
///
/// Compressed tag sets such as `py2.py3` are stored as their individual tags.
///
/// See: <https://packaging.python.org/en/latest/specifications/binary-distribution-format/#file-name-convention>
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct WheelFilename {
    pub name: PackageName,
    pub version: ProjectVersion,
    python_tags: Vec<String>,
    abi_tag: String,
    platform_tag: String,
}

impl WheelFilename {
    /// Create a [`WheelFilename`] from its components.
    pub fn new(
        name: PackageName,
        version: ProjectVersion,
        python_tags: Vec<String>,
        abi_tag: impl Into<String>,
        platform_tag: impl Into<String>,
    ) -> Self {
        Self {
            name,
            version,
            python_tags,
            abi_tag: abi_tag.into(),
            platform_tag: platform_tag.into(),
        }
    }

    /// The expanded tags for the `WHEEL` file, one per combination of Python, ABI and platform
    /// tag, e.g. `py2-none-any` and `py3-none-any`.
    pub fn expanded_tags(&self) -> Vec<String> {
        self.python_tags
            .iter()
            .map(|python_tag| format!("{python_tag}-{}-{}", self.abi_tag, self.platform_tag))
            .collect()
    }

    /// The name of the `.dist-info` directory inside the wheel.
    pub fn dist_info_dir(&self) -> String {
        format!("{}-{}.dist-info", self.name.as_dist_info_name(), self.version)
    }

    /// The wheel filename without the extension.
    pub fn stem(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.name.as_dist_info_name(),
            self.version,
            self.python_tags.join("."),
            self.abi_tag,
            self.platform_tag
        )
    }
}

impl Display for WheelFilename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.whl", self.stem())
    }
}
