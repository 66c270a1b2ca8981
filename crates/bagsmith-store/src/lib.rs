//! Checksum manifests and on-disk package handling for bagsmith.
//!
//! This crate provides the storage layer: the streaming multi-algorithm
//! checksum engine (`compute_manifests`), manifest text I/O (`Manifest`),
//! `PackageLayout` for the fixed file names of a package, `Package` for
//! discovering an existing package on disk, fixity verification
//! (`verify_package`), and deterministic tar serialization.

pub mod checksum;
pub mod integrity;
pub mod layout;
pub mod manifest;
pub mod package;
pub mod serialize;

pub use checksum::{
    collect_files, compute_manifests, compute_manifests_named, hash_file, payload_oxum,
    FileDigests, Oxum,
};
pub use integrity::{verify_package, IntegrityFailure, IntegrityReport};
pub use layout::{
    is_reserved_tag_file, PackageLayout, BAGIT_TXT, BAGIT_VERSION, BAG_INFO_TXT, FETCH_TXT,
    TAG_FILE_ENCODING,
};
pub use manifest::{decode_path, encode_path, Manifest};
pub use package::Package;
pub use serialize::{detect_serialization, pack_package, unpack_package, Serialization};

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// On Linux with ext4 `data=ordered` (the default), renames are usually
/// durable without an explicit dir fsync, but POSIX does not guarantee this.
/// Calling `fsync()` on the parent directory makes the rename durable on
/// all filesystems and mount configurations.
pub fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Write `content` to `dest` through a synced temp file in the same directory.
pub fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::InvalidPackage(format!("no parent for {}", dest.display())))?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    UnsupportedAlgorithm(#[from] bagsmith_schema::UnsupportedAlgorithm),
    #[error("unreadable payload file '{path}': {reason}")]
    UnreadablePayload { path: String, reason: String },
    #[error("malformed manifest '{file}' line {line}: {reason}")]
    MalformedManifest {
        file: String,
        line: usize,
        reason: String,
    },
    #[error("bag-info error: {0}")]
    BagInfo(#[from] bagsmith_schema::BagInfoError),
    #[error("invalid package: {0}")]
    InvalidPackage(String),
    #[error("unsupported serialization: {0}")]
    UnsupportedSerialization(String),
}
