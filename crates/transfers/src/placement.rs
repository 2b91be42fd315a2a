//! File placement
//!
//! Publishes a staged download at its destination. An existing file is
//! replaced in one rename; a missing parent directory is created first. When
//! the staging area lives on another filesystem the content is copied into a
//! temporary file next to the destination and renamed over it, so readers
//! never observe a half-written destination.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::core::{FileOperation, FilesystemError};

pub type Result<T> = std::result::Result<T, FilesystemError>;

/// Move `staged` to `destination` and return the resulting path
///
/// If the parent of `destination` exists but is not a directory, nothing is
/// touched and [`FilesystemError::NotADirectory`] is returned.
pub fn place(staged: &Path, destination: &Path) -> Result<PathBuf> {
    if fs::symlink_metadata(destination).is_ok() {
        debug!("Replacing existing file at {}", destination.display());
        install(staged, destination, FileOperation::Replace)?;
        return Ok(destination.to_path_buf());
    }

    if let Some(parent) = parent_dir(destination) {
        match fs::metadata(parent) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                return Err(FilesystemError::NotADirectory {
                    path: parent.to_path_buf(),
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Creating directory {}", parent.display());
                fs::create_dir_all(parent)
                    .map_err(|e| FilesystemError::io(parent, FileOperation::CreateDir, e))?;
            }
            Err(e) => return Err(FilesystemError::io(parent, FileOperation::Metadata, e)),
        }
    }

    install(staged, destination, FileOperation::Move)?;
    Ok(destination.to_path_buf())
}

/// `None` for bare file names, which live in the working directory
fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|parent| !parent.as_os_str().is_empty())
}

fn install(staged: &Path, destination: &Path, operation: FileOperation) -> Result<()> {
    match fs::rename(staged, destination) {
        Ok(()) => {
            debug!("Renamed {} to {}", staged.display(), destination.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            debug!("Staging area is on another device, copying into {}", destination.display());
            copy_then_rename(staged, destination)
        }
        Err(e) => Err(FilesystemError::io(destination, operation, e)),
    }
}

fn copy_then_rename(staged: &Path, destination: &Path) -> Result<()> {
    let directory = parent_dir(destination).unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(directory)
        .map_err(|e| FilesystemError::io(directory, FileOperation::Create, e))?;

    let mut source = fs::File::open(staged)
        .map_err(|e| FilesystemError::io(staged, FileOperation::Read, e))?;
    io::copy(&mut source, temp.as_file_mut())
        .map_err(|e| FilesystemError::io(temp.path(), FileOperation::Write, e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| FilesystemError::io(temp.path(), FileOperation::Write, e))?;

    // On failure the temporary file is removed when `temp` drops
    temp.persist(destination)
        .map_err(|e| FilesystemError::io(destination, FileOperation::Replace, e.error))?;

    fs::remove_file(staged).map_err(|e| FilesystemError::io(staged, FileOperation::Delete, e))?;
    Ok(())
}
