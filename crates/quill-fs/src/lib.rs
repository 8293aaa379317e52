use std::io;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::trace;

pub use crate::path::*;

mod path;

/// Return a [`NamedTempFile`] in the specified directory.
///
/// Sets the permissions of the temporary file to `0o666`, to match the non-temporary file default.
/// ([`NamedTempfile`] defaults to `0o600`.)
#[cfg(unix)]
pub fn tempfile_in(path: &Path) -> io::Result<NamedTempFile> {
    use std::os::unix::fs::PermissionsExt;
    tempfile::Builder::new()
        .permissions(std::fs::Permissions::from_mode(0o666))
        .tempfile_in(path)
}

/// Return a [`NamedTempFile`] in the specified directory.
#[cfg(not(unix))]
pub fn tempfile_in(path: &Path) -> io::Result<NamedTempFile> {
    tempfile::Builder::new().tempfile_in(path)
}

/// Move a finished temporary file to `path`, replacing any existing file.
pub fn persist(temp_file: NamedTempFile, path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    trace!("Persisting temporary file to {}", path.user_display());
    temp_file.persist(path).map_err(|err| {
        io::Error::new(
            err.error.kind(),
            format!(
                "Failed to persist temporary file to {}: {}",
                path.user_display(),
                err.error
            ),
        )
    })?;
    Ok(())
}

/// Move a finished temporary file to `path`, failing with [`io::ErrorKind::AlreadyExists`] if
/// the path exists. The temporary file is removed on failure.
pub fn persist_noclobber(temp_file: NamedTempFile, path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    trace!(
        "Persisting temporary file to {} without replacing",
        path.user_display()
    );
    temp_file.persist_noclobber(path).map_err(|err| {
        io::Error::new(
            err.error.kind(),
            format!(
                "Failed to persist temporary file to {}: {}",
                path.user_display(),
                err.error
            ),
        )
    })?;
    Ok(())
}
