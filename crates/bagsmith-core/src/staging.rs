//! Private staging area for a build.
//!
//! Everything a build writes lands below a `TempDir` in the staging root. The
//! package itself is assembled in a `package/` subdirectory so that it gets
//! normal directory permissions and can be renamed out in one step. Dropping
//! the `Staging` removes whatever is left, on every exit path.

use crate::CoreError;
use bagsmith_store::{collect_files, StoreError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

const STAGING_PREFIX: &str = ".bagsmith-staging-";

pub struct Staging {
    dir: TempDir,
    package: PathBuf,
}

impl Staging {
    /// Create a staging directory under `staging_root`, resolving a relative
    /// root against the current directory first.
    pub fn create(staging_root: &Path) -> Result<Self, CoreError> {
        let root = std::path::absolute(staging_root).map_err(|e| staging_error(staging_root, &e))?;
        fs::create_dir_all(&root).map_err(|e| staging_error(&root, &e))?;
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&root)
            .map_err(|e| staging_error(&root, &e))?;
        let package = dir.path().join("package");
        fs::create_dir(&package).map_err(|e| staging_error(&package, &e))?;
        debug!("staging in {}", dir.path().display());
        Ok(Self { dir, package })
    }

    /// Directory the package is assembled in.
    #[inline]
    pub fn package_dir(&self) -> &Path {
        &self.package
    }

    #[inline]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn staging_error(path: &Path, e: &io::Error) -> CoreError {
    CoreError::StagingFailed(format!("{}: {e}", path.display()))
}

/// Copy the tree at `src` into `dest` (which must exist).
///
/// Directories are recreated and files copied in sorted order. Symlinks are
/// replaced by the content they point to; a dangling link is
/// `UnreadablePayload`. Returns the number of files copied.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<usize, CoreError> {
    create_dirs(src, src, dest)?;
    let files = collect_files(src, src)?;
    for rel in &files {
        let from = src.join(rel);
        let to = dest.join(rel);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| staging_error(parent, &e))?;
        }
        fs::copy(&from, &to).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound && from.symlink_metadata().is_ok() {
                CoreError::Store(StoreError::UnreadablePayload {
                    path: from.display().to_string(),
                    reason: "symlink target does not exist".to_owned(),
                })
            } else {
                staging_error(&from, &e)
            }
        })?;
    }
    debug!("copied {} files from {}", files.len(), src.display());
    Ok(files.len())
}

/// Recreate real (non-symlink) directories, including empty ones.
fn create_dirs(base: &Path, current: &Path, dest: &Path) -> Result<(), CoreError> {
    let mut entries = fs::read_dir(current)
        .map_err(|e| staging_error(current, &e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| staging_error(current, &e))?;
    entries.sort_by_key(fs::DirEntry::file_name);
    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| staging_error(&path, &e))?;
        if file_type.is_dir() {
            let rel = path.strip_prefix(base).map_err(|e| CoreError::StagingFailed(e.to_string()))?;
            let target = dest.join(rel);
            fs::create_dir_all(&target).map_err(|e| staging_error(&target, &e))?;
            create_dirs(base, &path, dest)?;
        }
    }
    Ok(())
}
