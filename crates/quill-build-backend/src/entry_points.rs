//! Writer for `entry_points.txt`.
//!
//! <https://packaging.python.org/en/latest/specifications/entry-points/#file-format>

use indexmap::IndexMap;

/// Render entry point groups in iteration order, one `[group]` section per group and one
/// `name = target` line per entry, with an empty line after each group.
///
/// Names and targets are written as given; validation happens when the groups are collected
/// from `pyproject.toml`.
pub(crate) fn write_entry_points<'a>(
    groups: impl IntoIterator<Item = (&'a str, &'a IndexMap<String, String>)>,
) -> String {
    let mut writer = String::new();
    for (group, entries) in groups {
        writer.push_str(&format!("[{group}]\n"));
        for (name, target) in entries {
            writer.push_str(&format!("{name} = {target}\n"));
        }
        writer.push('\n');
    }
    writer
}
