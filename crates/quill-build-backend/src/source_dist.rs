use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use fs_err::File;
use tar::{EntryType, Header};
use tempfile::NamedTempFile;
use tracing::{debug, trace};
use walkdir::WalkDir;

use quill_distribution_filename::SourceDistFilename;
use quill_fs::Simplified;
use quill_warnings::warn_user_once;

use crate::module::{ModuleLayout, build_exclude_matcher, build_include_matcher, walk_files};
use crate::wheel::is_executable;
use crate::{DirectoryWriter, Error, FileList, ListWriter, SourceTree};

/// Build a source distribution from the source tree and place it in the output directory.
pub fn build_source_dist(
    source_tree: &Path,
    source_dist_directory: &Path,
) -> Result<SourceDistFilename, Error> {
    let source_tree = SourceTree::read(source_tree, None)?;
    write_source_dist_to(&source_tree, source_dist_directory)
}

/// List the files that would be included in a source distribution and their origin.
pub fn list_source_dist(source_tree: &Path) -> Result<(SourceDistFilename, FileList), Error> {
    let source_tree = SourceTree::read(source_tree, None)?;
    let filename = source_tree.source_dist_filename();
    let mut files = FileList::new();
    let writer = ListWriter::new(&mut files);
    write_source_dist(&source_tree, &filename, writer)?;
    Ok((filename, files))
}

pub(crate) fn write_source_dist_to(
    source_tree: &SourceTree,
    source_dist_directory: &Path,
) -> Result<SourceDistFilename, Error> {
    let filename = source_tree.source_dist_filename();
    let source_dist_path = source_dist_directory.join(filename.to_string());
    debug!("Writing source distribution at {}", source_dist_path.user_display());
    fs_err::create_dir_all(source_dist_directory)?;
    let writer = TarGzWriter::new(source_dist_path)?;
    write_source_dist(source_tree, &filename, writer)?;
    Ok(filename)
}

/// Collect the files of the source distribution, as a map from the `/`-separated path relative
/// to the project root to the file on disk.
///
/// The file set is `pyproject.toml`, the module, the readme and license files, and the files
/// matched by `source-include`, minus `source-exclude` and the default excludes.
fn source_dist_files(source_tree: &SourceTree) -> Result<BTreeMap<String, PathBuf>, Error> {
    let pyproject_toml = &source_tree.pyproject_toml;
    let settings = pyproject_toml.settings();
    let root = &source_tree.root;

    let exclude_matcher = build_exclude_matcher(
        "tool.quill.source-exclude",
        settings.default_excludes,
        &settings.source_exclude,
    )?;
    if exclude_matcher.is_match("pyproject.toml") {
        return Err(Error::PyprojectTomlExcluded);
    }

    let mut files = BTreeMap::new();
    // pyproject.toml is always included, even when it is read from another location.
    files.insert(
        "pyproject.toml".to_string(),
        source_tree.pyproject_path.clone(),
    );

    // The module.
    let module = ModuleLayout::find(root, pyproject_toml, &settings)?;
    let module_files = match &module {
        ModuleLayout::Package { .. } => walk_files(root, &module.path(), &exclude_matcher)?,
        ModuleLayout::SingleFile { .. } => {
            vec![quill_fs::relative_to(module.path(), root)?]
        }
    };
    for relative in module_files {
        let path = relative.portable_display().to_string();
        files.insert(path, root.join(relative));
    }

    // The readme and the license files. Those are included even if they match an exclude.
    for (field, relative) in pyproject_toml.auxiliary_files(root)? {
        let path = root.join(&relative);
        if !path.is_file() {
            return Err(Error::MissingSourceFile {
                field,
                path: relative,
            });
        }
        trace!("Including auxiliary file: `{}`", relative.user_display());
        files.insert(relative.portable_display().to_string(), path);
    }

    // Additional includes.
    if !settings.source_include.is_empty() {
        let include_matcher =
            build_include_matcher("tool.quill.source-include", &settings.source_include)?;
        let mut files_visited = 0;
        for entry in WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let Ok(relative) = entry.path().strip_prefix(root) else {
                    return false;
                };
                // Don't descend into excluded directories such as `__pycache__`.
                !exclude_matcher.is_match(relative)
            })
        {
            let entry = entry.map_err(|err| Error::WalkDir {
                root: root.to_path_buf(),
                err,
            })?;

            files_visited += 1;
            if files_visited > 10000 {
                warn_user_once!(
                    "Visited more than 10,000 files for source distribution build. \
                    Consider using more constrained includes or more excludes."
                );
            }

            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            // A matched directory includes all files below it.
            if !relative
                .ancestors()
                .any(|ancestor| include_matcher.is_match(ancestor))
            {
                trace!("Not included: `{}`", relative.user_display());
                continue;
            }
            trace!("Including: `{}`", relative.user_display());
            files.insert(
                relative.portable_display().to_string(),
                entry.path().to_path_buf(),
            );
        }
        debug!("Visited {files_visited} files for source dist build");
    }

    Ok(files)
}

/// Shared implementation for building and listing a source distribution.
fn write_source_dist(
    source_tree: &SourceTree,
    filename: &SourceDistFilename,
    mut writer: impl DirectoryWriter,
) -> Result<(), Error> {
    source_tree.pyproject_toml.check_build_system();

    let top_level = filename.top_level_directory();
    let metadata = source_tree
        .pyproject_toml
        .to_metadata(&source_tree.root)?
        .core_metadata_format();

    let files = source_dist_files(source_tree)?;

    debug!("Adding content files to source distribution");
    writer.write_directory(&top_level)?;
    writer.write_bytes(&format!("{top_level}/PKG-INFO"), metadata.as_bytes())?;

    // Directories are written before the files they contain, each one once.
    let mut directories = BTreeSet::new();
    for (relative, path) in &files {
        let ancestors: Vec<&Path> = Path::new(relative)
            .ancestors()
            .skip(1)
            .filter(|ancestor| !ancestor.as_os_str().is_empty())
            .collect();
        for directory in ancestors.into_iter().rev() {
            let directory = directory.portable_display().to_string();
            if directories.insert(directory.clone()) {
                writer.write_directory(&format!("{top_level}/{directory}"))?;
            }
        }
        debug!("Including {relative}");
        writer.write_file(&format!("{top_level}/{relative}"), path)?;
    }

    writer.close(&top_level)?;

    Ok(())
}

/// Writer for a gzip-compressed tar archive.
///
/// The archive is written to a temporary file next to the target, which is moved into place on
/// [`DirectoryWriter::close`], replacing any previous source distribution.
struct TarGzWriter {
    path: PathBuf,
    tar: tar::Builder<GzEncoder<NamedTempFile>>,
}

impl TarGzWriter {
    fn new(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Source distribution path must have a parent: {}",
                    path.user_display()
                ),
            )
        })?;
        let file = quill_fs::tempfile_in(parent)?;
        let enc = GzEncoder::new(file, Compression::default());
        let tar = tar::Builder::new(enc);
        Ok(Self { path, tar })
    }
}

impl DirectoryWriter for TarGzWriter {
    fn write_bytes(&mut self, path: &str, bytes: &[u8]) -> Result<(), Error> {
        let mut header = Header::new_gnu();
        header.set_size(bytes.len() as u64);
        // Reasonable default to avoid 0o000 permissions, the user's umask will be applied on
        // unpacking.
        header.set_mode(0o644);
        self.tar
            .append_data(&mut header, path, Cursor::new(bytes))
            .map_err(|err| Error::TarWrite(self.path.clone(), err))?;
        Ok(())
    }

    fn write_file(&mut self, path: &str, file: &Path) -> Result<(), Error> {
        let metadata = fs_err::metadata(file)?;
        let mut header = Header::new_gnu();
        // Set reasonable defaults to avoid 0o000 permissions, while avoiding adding the exact
        // filesystem permissions to the archive for reproducibility. Where applicable, the
        // operating system filters the stored permission by the user's umask when unpacking.
        if is_executable(file)? {
            header.set_mode(0o755);
        } else {
            header.set_mode(0o644);
        }
        header.set_size(metadata.len());
        let reader = BufReader::new(File::open(file)?);
        self.tar
            .append_data(&mut header, path, reader)
            .map_err(|err| Error::TarWrite(self.path.clone(), err))?;
        Ok(())
    }

    fn write_directory(&mut self, directory: &str) -> Result<(), Error> {
        let mut header = Header::new_gnu();
        // Directories are always executable, which means they can be listed.
        header.set_mode(0o755);
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        self.tar
            .append_data(&mut header, directory, io::empty())
            .map_err(|err| Error::TarWrite(self.path.clone(), err))?;
        Ok(())
    }

    fn close(self, _dist_info_dir: &str) -> Result<(), Error> {
        let temp_file = self
            .tar
            .into_inner()
            .and_then(GzEncoder::finish)
            .map_err(|err| Error::TarWrite(self.path.clone(), err))?;
        quill_fs::persist(temp_file, &self.path)?;
        Ok(())
    }
}
