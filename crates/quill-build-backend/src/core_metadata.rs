use std::fmt::Display;

/// Python package core metadata, as written to `METADATA` and `PKG-INFO`.
///
/// All values are already validated and rendered; the struct only controls the field order and
/// the line format.
///
/// <https://packaging.python.org/en/latest/specifications/core-metadata/>
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CoreMetadata {
    pub(crate) metadata_version: String,
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) summary: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) description_content_type: Option<String>,
    pub(crate) keywords: Option<String>,
    pub(crate) author: Option<String>,
    pub(crate) author_email: Option<String>,
    pub(crate) maintainer: Option<String>,
    pub(crate) maintainer_email: Option<String>,
    pub(crate) license: Option<String>,
    pub(crate) license_expression: Option<String>,
    pub(crate) license_files: Vec<String>,
    pub(crate) classifiers: Vec<String>,
    pub(crate) requires_dist: Vec<String>,
    pub(crate) requires_python: Option<String>,
    pub(crate) project_urls: Vec<String>,
    pub(crate) provides_extras: Vec<String>,
}

impl CoreMetadata {
    /// Render the metadata as email-style headers.
    ///
    /// The header block is always terminated by an empty line, the description (if any) follows
    /// verbatim as the message body.
    pub(crate) fn core_metadata_format(&self) -> String {
        fn write_str(writer: &mut String, key: &str, value: impl Display) {
            let value = value.to_string();
            let mut lines = value.lines();
            if let Some(line) = lines.next() {
                writer.push_str(&format!("{key}: {line}\n"));
            } else {
                // The value is an empty string
                writer.push_str(&format!("{key}: \n"));
            }
            for line in lines {
                // Continuation lines are aligned with the value of the first line.
                writer.push_str(&format!("{}{}\n", " ".repeat(key.len() + 2), line));
            }
        }
        fn write_opt_str(writer: &mut String, key: &str, value: Option<&impl Display>) {
            if let Some(value) = value {
                write_str(writer, key, value);
            }
        }
        fn write_all(
            writer: &mut String,
            key: &str,
            values: impl IntoIterator<Item = impl Display>,
        ) {
            for value in values {
                write_str(writer, key, value);
            }
        }

        let mut writer = String::new();
        write_str(&mut writer, "Metadata-Version", &self.metadata_version);
        write_str(&mut writer, "Name", &self.name);
        write_str(&mut writer, "Version", &self.version);
        write_opt_str(&mut writer, "Summary", self.summary.as_ref());
        write_opt_str(&mut writer, "Keywords", self.keywords.as_ref());
        write_opt_str(&mut writer, "Author", self.author.as_ref());
        write_opt_str(&mut writer, "Author-email", self.author_email.as_ref());
        write_opt_str(&mut writer, "License", self.license.as_ref());
        write_opt_str(
            &mut writer,
            "License-Expression",
            self.license_expression.as_ref(),
        );
        write_all(&mut writer, "License-File", &self.license_files);
        write_all(&mut writer, "Classifier", &self.classifiers);
        write_all(&mut writer, "Requires-Dist", &self.requires_dist);
        write_opt_str(&mut writer, "Maintainer", self.maintainer.as_ref());
        write_opt_str(
            &mut writer,
            "Maintainer-email",
            self.maintainer_email.as_ref(),
        );
        write_opt_str(
            &mut writer,
            "Requires-Python",
            self.requires_python.as_ref(),
        );
        write_all(&mut writer, "Project-URL", &self.project_urls);
        write_all(&mut writer, "Provides-Extra", &self.provides_extras);
        write_opt_str(
            &mut writer,
            "Description-Content-Type",
            self.description_content_type.as_ref(),
        );

        writer.push('\n');
        if let Some(description) = &self.description {
            writer.push_str(description);
        }
        writer
    }
}
