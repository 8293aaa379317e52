use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use fs_err::File;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, trace};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use quill_distribution_filename::WheelFilename;
use quill_fs::Simplified;

use crate::module::{ModuleLayout, build_exclude_matcher};
use crate::{DirectoryWriter, Error, FileList, ListWriter, SourceTree};

/// Build a wheel from the source tree and place it in the output directory.
pub fn build_wheel(
    source_tree: &Path,
    wheel_dir: &Path,
    metadata_directory: Option<&Path>,
    quill_version: &str,
) -> Result<WheelFilename, Error> {
    let source_tree = SourceTree::read(source_tree, None)?;
    write_wheel_to(&source_tree, wheel_dir, metadata_directory, quill_version)
}

/// List the files that would be included in a wheel and their origin.
pub fn list_wheel(
    source_tree: &Path,
    quill_version: &str,
) -> Result<(WheelFilename, FileList), Error> {
    let source_tree = SourceTree::read(source_tree, None)?;
    let filename = source_tree.wheel_filename();
    let mut files = FileList::new();
    let writer = ListWriter::new(&mut files);
    write_wheel(&source_tree, &filename, writer, quill_version)?;
    Ok((filename, files))
}

/// Write the dist-info directory to the output directory without building the wheel.
///
/// Returns the name of the dist-info directory.
pub fn metadata(
    source_tree: &Path,
    metadata_directory: &Path,
    quill_version: &str,
) -> Result<String, Error> {
    let source_tree = SourceTree::read(source_tree, None)?;
    write_metadata_to(&source_tree, metadata_directory, quill_version)
}

pub(crate) fn write_wheel_to(
    source_tree: &SourceTree,
    wheel_dir: &Path,
    metadata_directory: Option<&Path>,
    quill_version: &str,
) -> Result<WheelFilename, Error> {
    let filename = source_tree.wheel_filename();
    check_metadata_directory(source_tree, &filename, metadata_directory, quill_version)?;

    let wheel_path = wheel_dir.join(filename.to_string());
    debug!("Writing wheel at {}", wheel_path.user_display());
    if wheel_path.exists() {
        return Err(Error::DestinationExists(wheel_path));
    }

    fs_err::create_dir_all(wheel_dir)?;
    let writer = ZipDirectoryWriter::new_wheel(wheel_path)?;
    write_wheel(source_tree, &filename, writer, quill_version)?;
    Ok(filename)
}

pub(crate) fn write_metadata_to(
    source_tree: &SourceTree,
    metadata_directory: &Path,
    quill_version: &str,
) -> Result<String, Error> {
    let filename = source_tree.wheel_filename();
    let dist_info_dir = filename.dist_info_dir();
    let dist_info_path = metadata_directory.join(&dist_info_dir);
    debug!("Writing metadata files to {}", dist_info_path.user_display());

    fs_err::create_dir_all(metadata_directory)?;
    match fs_err::create_dir(&dist_info_path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            return Err(Error::DestinationExists(dist_info_path));
        }
        Err(err) => return Err(err.into()),
    }

    let mut writer = FilesystemWriter::new(metadata_directory);
    let result = write_dist_info(&mut writer, source_tree, &filename, quill_version)
        .and_then(|dist_info_dir| writer.close(&dist_info_dir));
    if let Err(err) = result {
        // Don't leave a partial dist-info directory behind.
        if let Err(cleanup_err) = fs_err::remove_dir_all(&dist_info_path) {
            debug!("Failed to remove partial metadata directory: {cleanup_err}");
        }
        return Err(err);
    }

    Ok(dist_info_dir)
}

/// Shared implementation for building and listing a wheel.
fn write_wheel(
    source_tree: &SourceTree,
    filename: &WheelFilename,
    mut writer: impl DirectoryWriter,
    quill_version: &str,
) -> Result<(), Error> {
    source_tree.pyproject_toml.check_build_system();
    let settings = source_tree.pyproject_toml.settings();

    let module = ModuleLayout::find(&source_tree.root, &source_tree.pyproject_toml, &settings)?;
    let exclude_matcher = build_exclude_matcher(
        "tool.quill.wheel-exclude",
        settings.default_excludes,
        &settings.wheel_exclude,
    )?;

    debug!("Adding content files to wheel");
    for relative in module.files(&exclude_matcher)? {
        let path = relative.portable_display().to_string();
        trace!("Including {path}");
        writer.write_file(&path, &module.src_root().join(&relative))?;
    }

    debug!("Adding metadata files to wheel");
    let dist_info_dir = write_dist_info(&mut writer, source_tree, filename, quill_version)?;
    writer.close(&dist_info_dir)?;

    Ok(())
}

/// Add `METADATA`, `WHEEL`, `entry_points.txt` and the license files to the dist-info
/// directory.
///
/// Both the metadata preparation and the wheel build go through this function, so the files are
/// identical between the two.
///
/// Returns the name of the dist-info directory.
pub(crate) fn write_dist_info(
    writer: &mut impl DirectoryWriter,
    source_tree: &SourceTree,
    filename: &WheelFilename,
    quill_version: &str,
) -> Result<String, Error> {
    let dist_info_dir = filename.dist_info_dir();

    let metadata = source_tree
        .pyproject_toml
        .to_metadata(&source_tree.root)?
        .core_metadata_format();
    writer.write_bytes(&format!("{dist_info_dir}/METADATA"), metadata.as_bytes())?;

    let wheel_info = wheel_info(filename, quill_version);
    writer.write_bytes(&format!("{dist_info_dir}/WHEEL"), wheel_info.as_bytes())?;

    if let Some(entry_points) = source_tree.pyproject_toml.to_entry_points()? {
        writer.write_bytes(
            &format!("{dist_info_dir}/entry_points.txt"),
            entry_points.as_bytes(),
        )?;
    }

    // PEP 639 license files, at the same relative path as in the project.
    for license_file in source_tree.pyproject_toml.license_files(&source_tree.root)? {
        let license_path = source_tree.root.join(&license_file);
        writer.write_file(
            &format!(
                "{dist_info_dir}/licenses/{}",
                license_file.portable_display()
            ),
            &license_path,
        )?;
    }

    Ok(dist_info_dir)
}

/// The content of the `WHEEL` file.
///
/// <https://packaging.python.org/en/latest/specifications/binary-distribution-format/#the-dist-info-directory>
pub(crate) fn wheel_info(filename: &WheelFilename, quill_version: &str) -> String {
    let mut wheel_info = vec![
        ("Wheel-Version", "1.0".to_string()),
        ("Generator", format!("quill {quill_version}")),
        ("Root-Is-Purelib", "true".to_string()),
    ];
    for tag in filename.expanded_tags() {
        wheel_info.push(("Tag", tag));
    }
    wheel_info
        .into_iter()
        .map(|(key, value)| format!("{key}: {value}\n"))
        .collect()
}

/// PEP 517 requires that the metadata directory from the prepare metadata call is identical to the
/// build wheel call. This method performs a prudence check that `METADATA`, `WHEEL` and
/// `entry_points.txt` match.
fn check_metadata_directory(
    source_tree: &SourceTree,
    filename: &WheelFilename,
    metadata_directory: Option<&Path>,
    quill_version: &str,
) -> Result<(), Error> {
    let Some(metadata_directory) = metadata_directory else {
        return Ok(());
    };

    debug!(
        "Checking metadata directory {}",
        metadata_directory.user_display()
    );

    // Frontends pass either the directory given to the prepare call or the dist-info directory
    // inside of it.
    let dist_info_dir = filename.dist_info_dir();
    let metadata_directory = if metadata_directory.ends_with(&dist_info_dir) {
        metadata_directory.to_path_buf()
    } else {
        metadata_directory.join(&dist_info_dir)
    };

    // `METADATA` is a mandatory file.
    let current = source_tree
        .pyproject_toml
        .to_metadata(&source_tree.root)?
        .core_metadata_format();
    let previous = fs_err::read_to_string(metadata_directory.join("METADATA"))?;
    if previous != current {
        return Err(Error::InconsistentSteps("METADATA"));
    }

    let previous = fs_err::read_to_string(metadata_directory.join("WHEEL"))?;
    if previous != wheel_info(filename, quill_version) {
        return Err(Error::InconsistentSteps("WHEEL"));
    }

    // `entry_points.txt` is not written if it would be empty.
    let entrypoints_path = metadata_directory.join("entry_points.txt");
    match source_tree.pyproject_toml.to_entry_points()? {
        None => {
            if entrypoints_path.is_file() {
                return Err(Error::InconsistentSteps("entry_points.txt"));
            }
        }
        Some(entrypoints) => {
            if !entrypoints_path.is_file()
                || fs_err::read_to_string(&entrypoints_path)? != entrypoints
            {
                return Err(Error::InconsistentSteps("entry_points.txt"));
            }
        }
    }

    Ok(())
}

/// A `RECORD` line: the path, the urlsafe-base64-nopad SHA-256 digest and the size in bytes.
///
/// <https://packaging.python.org/en/latest/specifications/recording-installed-packages/#the-record-file>
#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordEntry {
    path: String,
    hash: String,
    size: u64,
}

/// Copy `reader` to `writer`, hashing the content on the way.
fn write_hashed(
    path: &str,
    reader: &mut dyn Read,
    writer: &mut dyn Write,
) -> Result<RecordEntry, io::Error> {
    let mut hasher = Sha256::new();
    let mut size = 0;
    let mut buffer = vec![0; 8 * 1024];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        writer.write_all(&buffer[..read])?;
        size += read as u64;
    }
    Ok(RecordEntry {
        path: path.to_string(),
        hash: BASE64_URL_SAFE_NO_PAD.encode(hasher.finalize()),
        size,
    })
}

/// Write the `RECORD` file, with the line for `RECORD` itself last and without hash and size.
fn write_record(
    writer: &mut dyn Write,
    dist_info_dir: &str,
    record: Vec<RecordEntry>,
) -> Result<(), Error> {
    let mut record_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .escape(b'"')
        .from_writer(writer);
    for entry in record {
        record_writer.write_record(&[
            entry.path,
            format!("sha256={}", entry.hash),
            entry.size.to_string(),
        ])?;
    }

    // We can't compute the hash or size for RECORD without modifying it at the same time.
    record_writer.write_record(&[
        format!("{dist_info_dir}/RECORD"),
        String::new(),
        String::new(),
    ])?;
    record_writer.flush()?;
    Ok(())
}

/// Zip archive (wheel) writer.
///
/// The archive is written to a temporary file next to the target, which is moved into place on
/// [`DirectoryWriter::close`].
struct ZipDirectoryWriter {
    writer: ZipWriter<BufWriter<NamedTempFile>>,
    compression: CompressionMethod,
    /// The entries in the `RECORD` file.
    record: Vec<RecordEntry>,
    /// The final location of the wheel.
    target: PathBuf,
}

impl ZipDirectoryWriter {
    /// A wheel writer with deflate compression.
    fn new_wheel(target: PathBuf) -> Result<Self, Error> {
        let parent = target.parent().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Wheel path must have a parent: {}", target.user_display()),
            )
        })?;
        let temp_file = quill_fs::tempfile_in(parent)?;
        Ok(Self {
            writer: ZipWriter::new(BufWriter::new(temp_file)),
            compression: CompressionMethod::Deflated,
            record: Vec::new(),
            target,
        })
    }

    /// Fixed timestamps and normalized permissions keep the archive reproducible.
    fn options(&self, executable_bit: bool) -> SimpleFileOptions {
        // Set reasonable defaults to avoid 0o000 permissions, while avoiding adding the exact
        // filesystem permissions to the archive for reproducibility. Where applicable, the
        // operating system filters the stored permission by the user's umask when unpacking.
        let permissions = if executable_bit { 0o755 } else { 0o644 };
        SimpleFileOptions::default()
            .compression_method(self.compression)
            .last_modified_time(DateTime::default())
            .unix_permissions(permissions)
    }

    /// Add a file with the given name and return a writer for it.
    fn new_writer<'slf>(
        &'slf mut self,
        path: &str,
        executable_bit: bool,
    ) -> Result<Box<dyn Write + 'slf>, Error> {
        let options = self.options(executable_bit);
        self.writer.start_file(path, options)?;
        Ok(Box::new(&mut self.writer))
    }
}

impl DirectoryWriter for ZipDirectoryWriter {
    fn write_bytes(&mut self, path: &str, bytes: &[u8]) -> Result<(), Error> {
        trace!("Adding {}", path);
        let options = self.options(false);
        self.writer.start_file(path, options)?;
        self.writer.write_all(bytes)?;

        let hash = BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(bytes));
        self.record.push(RecordEntry {
            path: path.to_string(),
            hash,
            size: bytes.len() as u64,
        });

        Ok(())
    }

    fn write_file(&mut self, path: &str, file: &Path) -> Result<(), Error> {
        trace!("Adding {} from {}", path, file.user_display());
        let mut reader = BufReader::new(File::open(file)?);
        let mut writer = self.new_writer(path, is_executable(file)?)?;
        let record = write_hashed(path, &mut reader, &mut writer)?;
        drop(writer);
        self.record.push(record);
        Ok(())
    }

    fn close(mut self, dist_info_dir: &str) -> Result<(), Error> {
        let record_path = format!("{dist_info_dir}/RECORD");
        trace!("Adding {record_path}");
        let record = std::mem::take(&mut self.record);
        write_record(&mut self.new_writer(&record_path, false)?, dist_info_dir, record)?;

        trace!("Adding central directory");
        let temp_file = self
            .writer
            .finish()?
            .into_inner()
            .map_err(|err| Error::Io(err.into_error()))?;

        // Never replace an existing wheel, even if it appeared while we were building.
        quill_fs::persist_noclobber(temp_file, &self.target).map_err(|err| {
            if err.kind() == io::ErrorKind::AlreadyExists {
                Error::DestinationExists(self.target.clone())
            } else {
                Error::Io(err)
            }
        })
    }
}

/// Whether the file has the executable bit set.
pub(crate) fn is_executable(file: &Path) -> Result<bool, Error> {
    // Preserve the executable bit, especially for scripts
    #[cfg(unix)]
    let executable_bit = {
        use std::os::unix::fs::PermissionsExt;
        fs_err::metadata(file)?.permissions().mode() & 0o111 != 0
    };
    // Windows has no executable bit
    #[cfg(not(unix))]
    let executable_bit = {
        let _ = file;
        false
    };
    Ok(executable_bit)
}

/// Write the dist-info files directly into a directory, for the metadata preparation step.
///
/// No `RECORD` file is written.
struct FilesystemWriter {
    /// The metadata directory that the file paths are relative to.
    root: PathBuf,
}

impl FilesystemWriter {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_owned(),
        }
    }

    fn create_parent(&self, path: &str) -> Result<PathBuf, Error> {
        let path = self.root.join(path);
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        Ok(path)
    }
}

impl DirectoryWriter for FilesystemWriter {
    fn write_bytes(&mut self, path: &str, bytes: &[u8]) -> Result<(), Error> {
        trace!("Adding {}", path);
        let path = self.create_parent(path)?;
        Ok(fs_err::write(path, bytes)?)
    }

    fn write_file(&mut self, path: &str, file: &Path) -> Result<(), Error> {
        trace!("Adding {} from {}", path, file.user_display());
        let path = self.create_parent(path)?;
        fs_err::copy(file, path)?;
        Ok(())
    }

    fn close(self, _dist_info_dir: &str) -> Result<(), Error> {
        Ok(())
    }
}
