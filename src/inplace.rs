//! In-place editing.
//!
//! Output goes to a temporary file created next to the target, so the
//! final rename never crosses a filesystem. On success the original is
//! optionally renamed to a backup, then the temp file replaces it and the
//! original permissions are restored. On error the temp file is dropped and
//! the original stays untouched.
//!
//! A symlink target is replaced by a regular file unless the caller asked
//! to follow symlinks, in which case the link is resolved first and the
//! file it points at is rewritten.

use crate::error::{Result, SedError};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug)]
pub struct InPlaceTarget {
    resolved: PathBuf,
    temp: NamedTempFile,
}

impl InPlaceTarget {
    pub fn begin(path: &Path, follow_symlinks: bool) -> Result<InPlaceTarget> {
        let resolved = if follow_symlinks {
            fs::canonicalize(path).map_err(|e| in_place_err(path, &e))?
        } else {
            path.to_path_buf()
        };
        let dir = resolved.parent().filter(|p| !p.as_os_str().is_empty());
        let temp = NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))
            .map_err(|e| in_place_err(&resolved, &e))?;
        Ok(InPlaceTarget { resolved, temp })
    }

    /// Handle the engine writes through; dropping it leaves the temp file
    /// owned by this target.
    pub fn writer(&self) -> Result<File> {
        self.temp
            .as_file()
            .try_clone()
            .map_err(|e| in_place_err(&self.resolved, &e))
    }

    /// Replace the original, keeping a backup first when a suffix is
    /// configured. Permissions carry over from the original file.
    pub fn commit(self, backup_suffix: Option<&str>) -> Result<()> {
        let permissions = fs::metadata(&self.resolved)
            .map(|m| m.permissions())
            .ok();
        if let Some(suffix) = backup_suffix {
            let backup = backup_path(&self.resolved, suffix);
            fs::rename(&self.resolved, &backup)
                .map_err(|e| in_place_err(&self.resolved, &e))?;
        }
        let path = self.resolved;
        self.temp
            .persist(&path)
            .map_err(|e| in_place_err(&path, &e.error))?;
        if let Some(permissions) = permissions {
            fs::set_permissions(&path, permissions).map_err(|e| in_place_err(&path, &e))?;
        }
        Ok(())
    }
}

/// Backup name for `-i SUFFIX`: each `*` in the suffix stands for the file
/// name, otherwise the suffix is appended.
fn backup_path(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let backup_name = if suffix.contains('*') {
        suffix.replace('*', &name)
    } else {
        format!("{name}{suffix}")
    };
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(backup_name),
        _ => PathBuf::from(backup_name),
    }
}

fn in_place_err(path: &Path, err: &std::io::Error) -> SedError {
    SedError::InPlace {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
