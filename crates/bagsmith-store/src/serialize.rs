use crate::{fsync_dir, StoreError};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Serialized forms a package may arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    Tar,
    TarGzip,
    Zip,
    SevenZip,
}

impl Serialization {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Tar => "application/tar",
            Self::TarGzip => "application/tar+gzip",
            Self::Zip => "application/zip",
            Self::SevenZip => "application/x-7z-compressed",
        }
    }

    /// Whether the archive can be unpacked for inspection.
    pub fn can_unpack(self) -> bool {
        matches!(self, Self::Tar)
    }
}

/// Guess the serialization of a file from its name.
pub fn detect_serialization(path: &Path) -> Option<Serialization> {
    let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(Serialization::TarGzip)
    } else if name.ends_with(".tar") {
        Some(Serialization::Tar)
    } else if name.ends_with(".zip") {
        Some(Serialization::Zip)
    } else if name.ends_with(".7z") {
        Some(Serialization::SevenZip)
    } else {
        None
    }
}

/// Write a deterministic tar archive of the package at `root` to `dest`.
///
/// All entries live below a single top-level directory named after `root`.
///
/// Determinism guarantees:
/// - Entries sorted lexicographically by relative path
/// - All timestamps set to 0 (Unix epoch)
/// - All ownership set to 0:0 (root:root)
/// - Permissions preserved as-is from source
pub fn pack_package(root: &Path, dest: &Path) -> Result<(), StoreError> {
    let base = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| StoreError::InvalidPackage(format!("no name for {}", root.display())))?;
    if dest.exists() {
        return Err(StoreError::InvalidPackage(format!(
            "'{}' already exists",
            dest.display()
        )));
    }
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::InvalidPackage(format!("no parent for {}", dest.display())))?;

    let mut entries = collect_entries(root, root)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let tmp = NamedTempFile::new_in(dir)?;
    let mut ar = tar::Builder::new(BufWriter::new(tmp.reopen()?));
    ar.follow_symlinks(false);
    append_dir(&mut ar, &base, root)?;

    for (rel_path, full_path) in &entries {
        let name = format!("{base}/{rel_path}");
        let ft = match full_path.symlink_metadata() {
            Ok(m) => m.file_type(),
            Err(e) => {
                warn!("skipping {rel_path}: metadata error: {e}");
                continue;
            }
        };

        if ft.is_file() {
            append_file(&mut ar, &name, full_path)?;
        } else if ft.is_dir() {
            append_dir(&mut ar, &name, full_path)?;
        } else if ft.is_symlink() {
            append_symlink(&mut ar, &name, full_path)?;
        } else {
            warn!("skipping unsupported file type: {rel_path}");
        }
    }

    let mut writer = ar.into_inner()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    debug!("serialized {} entries to {}", entries.len(), dest.display());
    Ok(())
}

/// Extract a tar archive into `target_dir` and return the package root inside it.
///
/// The archive must hold exactly one top-level directory.
pub fn unpack_package(archive: &Path, target_dir: &Path) -> Result<PathBuf, StoreError> {
    fs::create_dir_all(target_dir)?;
    let mut ar = tar::Archive::new(File::open(archive)?);
    ar.set_preserve_permissions(true);
    ar.set_preserve_mtime(false);
    ar.set_unpack_xattrs(false);
    ar.unpack(target_dir)?;

    let mut roots = Vec::new();
    for entry in fs::read_dir(target_dir)? {
        roots.push(entry?.path());
    }
    match roots.as_slice() {
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Err(StoreError::InvalidPackage(format!(
            "'{}' must contain exactly one top-level directory",
            archive.display()
        ))),
    }
}

/// Recursively collect (relative_path, full_path) pairs from a directory tree.
fn collect_entries(root: &Path, current: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let mut result = Vec::new();
    if !current.exists() {
        return Ok(result);
    }
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let full = entry.path();
        let rel = crate::checksum::relative_slash_path(root, &full)?;

        let meta = full.symlink_metadata()?;
        if meta.is_dir() {
            result.push((rel.clone(), full.clone()));
            result.extend(collect_entries(root, &full)?);
        } else {
            result.push((rel, full));
        }
    }
    Ok(result)
}

fn make_header(full_path: &Path, entry_type: tar::EntryType) -> Result<tar::Header, StoreError> {
    let meta = full_path.symlink_metadata()?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(meta.permissions().mode());
    Ok(header)
}

fn append_file<W: Write>(
    ar: &mut tar::Builder<W>,
    name: &str,
    full_path: &Path,
) -> Result<(), StoreError> {
    let file = File::open(full_path)?;
    let size = file.metadata()?.len();
    let mut header = make_header(full_path, tar::EntryType::Regular)?;
    header.set_size(size);
    header.set_cksum();
    ar.append_data(&mut header, name, file)?;
    Ok(())
}

fn append_dir<W: Write>(
    ar: &mut tar::Builder<W>,
    name: &str,
    full_path: &Path,
) -> Result<(), StoreError> {
    let mut header = make_header(full_path, tar::EntryType::Directory)?;
    header.set_size(0);
    header.set_cksum();
    let path = if name.ends_with('/') {
        name.to_owned()
    } else {
        format!("{name}/")
    };
    ar.append_data(&mut header, &path, &[] as &[u8])?;
    Ok(())
}

fn append_symlink<W: Write>(
    ar: &mut tar::Builder<W>,
    name: &str,
    full_path: &Path,
) -> Result<(), StoreError> {
    let target = fs::read_link(full_path)?;
    let mut header = make_header(full_path, tar::EntryType::Symlink)?;
    header.set_size(0);
    header.set_cksum();
    ar.append_link(&mut header, name, &target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_package(parent: &Path) -> PathBuf {
        let root = parent.join("pkg");
        fs::create_dir_all(root.join("data/sub")).unwrap();
        fs::write(root.join("bagit.txt"), b"BagIt-Version: 1.0\n").unwrap();
        fs::write(root.join("data/sub/a.txt"), b"hello").unwrap();
        fs::write(root.join("data/b.txt"), b"world").unwrap();
        root
    }

    #[test]
    fn pack_is_deterministic() {
        let src = tempfile::tempdir().unwrap();
        let root = sample_package(src.path());
        let out = tempfile::tempdir().unwrap();
        pack_package(&root, &out.path().join("a.tar")).unwrap();
        // Touch a file to change its mtime; the archive must not change.
        fs::write(root.join("data/b.txt"), b"world").unwrap();
        pack_package(&root, &out.path().join("b.tar")).unwrap();
        assert_eq!(
            fs::read(out.path().join("a.tar")).unwrap(),
            fs::read(out.path().join("b.tar")).unwrap()
        );
    }

    #[test]
    fn pack_refuses_existing_destination() {
        let src = tempfile::tempdir().unwrap();
        let root = sample_package(src.path());
        let dest = src.path().join("pkg.tar");
        fs::write(&dest, b"x").unwrap();
        assert!(pack_package(&root, &dest).is_err());
        assert_eq!(fs::read(&dest).unwrap(), b"x");
    }

    #[test]
    fn unpack_restores_tree() {
        let src = tempfile::tempdir().unwrap();
        let root = sample_package(src.path());
        let archive = src.path().join("pkg.tar");
        pack_package(&root, &archive).unwrap();

        let target = tempfile::tempdir().unwrap();
        let unpacked = unpack_package(&archive, target.path()).unwrap();
        assert_eq!(unpacked.file_name().unwrap(), "pkg");
        assert_eq!(fs::read(unpacked.join("data/sub/a.txt")).unwrap(), b"hello");
        assert_eq!(fs::read(unpacked.join("bagit.txt")).unwrap(), b"BagIt-Version: 1.0\n");
    }

    #[test]
    fn detects_serialization_by_name() {
        assert_eq!(
            detect_serialization(Path::new("x/pkg.tar")),
            Some(Serialization::Tar)
        );
        assert_eq!(
            detect_serialization(Path::new("pkg.TGZ")),
            Some(Serialization::TarGzip)
        );
        assert_eq!(
            detect_serialization(Path::new("pkg.zip")),
            Some(Serialization::Zip)
        );
        assert_eq!(detect_serialization(Path::new("pkg")), None);
        assert_eq!(Serialization::Zip.content_type(), "application/zip");
        assert!(Serialization::Tar.can_unpack());
        assert!(!Serialization::SevenZip.can_unpack());
    }
}
