//! Streaming digest computation over file trees.
//!
//! Each file is read exactly once; every requested algorithm is fed from the
//! same buffer. Files are hashed in parallel, but results land in sorted maps
//! so output never depends on scheduling.

use crate::manifest::Manifest;
use crate::StoreError;
use bagsmith_schema::ChecksumAlgorithm;
use md5::Md5;
use rayon::prelude::*;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const READ_BUFFER: usize = 64 * 1024;

enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Self::Md5(Md5::new()),
            ChecksumAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Digests of a single file, one per requested algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    pub size: u64,
    pub digests: BTreeMap<ChecksumAlgorithm, String>,
}

/// `Payload-Oxum`: total octets and number of files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Oxum {
    pub octets: u64,
    pub streams: u64,
}

impl fmt::Display for Oxum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.octets, self.streams)
    }
}

impl Oxum {
    pub fn parse(value: &str) -> Option<Self> {
        let (octets, streams) = value.trim().split_once('.')?;
        Some(Self {
            octets: octets.parse().ok()?,
            streams: streams.parse().ok()?,
        })
    }
}

fn hash_reader(
    mut reader: impl Read,
    algorithms: &[ChecksumAlgorithm],
) -> io::Result<FileDigests> {
    let mut hashers: Vec<(ChecksumAlgorithm, Hasher)> =
        algorithms.iter().map(|a| (*a, Hasher::new(*a))).collect();
    let mut buf = vec![0u8; READ_BUFFER];
    let mut size = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        size += n as u64;
        for (_, h) in &mut hashers {
            h.update(&buf[..n]);
        }
    }
    Ok(FileDigests {
        size,
        digests: hashers
            .into_iter()
            .map(|(a, h)| (a, h.finalize_hex()))
            .collect(),
    })
}

/// Hash one file with every algorithm. Symlinks are followed; a dangling link
/// or any read failure is reported as `UnreadablePayload`.
pub fn hash_file(path: &Path, algorithms: &[ChecksumAlgorithm]) -> Result<FileDigests, StoreError> {
    let unreadable = |e: io::Error| StoreError::UnreadablePayload {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    let file = File::open(path).map_err(unreadable)?;
    hash_reader(file, algorithms).map_err(unreadable)
}

fn check_relative(rel: &str) -> Result<(), StoreError> {
    let path = Path::new(rel);
    let escapes = path.is_absolute()
        || rel.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(StoreError::UnreadablePayload {
            path: rel.to_owned(),
            reason: "path is not a plain relative path".to_owned(),
        });
    }
    Ok(())
}

/// Compute one manifest per algorithm over `files` (relative to `root`).
///
/// The whole file list is checked before any hashing starts.
pub fn compute_manifests(
    root: &Path,
    files: &[String],
    algorithms: &[ChecksumAlgorithm],
) -> Result<BTreeMap<ChecksumAlgorithm, Manifest>, StoreError> {
    for rel in files {
        check_relative(rel)?;
    }
    debug!(
        "hashing {} files under {} with {:?}",
        files.len(),
        root.display(),
        algorithms
    );

    let hashed: Vec<(&String, FileDigests)> = files
        .par_iter()
        .map(|rel| hash_file(&root.join(rel), algorithms).map(|d| (rel, d)))
        .collect::<Result<_, _>>()?;

    let mut manifests: BTreeMap<ChecksumAlgorithm, Manifest> = algorithms
        .iter()
        .map(|a| (*a, Manifest::new(a.as_str())))
        .collect();
    for (rel, digests) in hashed {
        for (alg, hex) in digests.digests {
            if let Some(m) = manifests.get_mut(&alg) {
                m.insert(rel.clone(), hex);
            }
        }
    }
    Ok(manifests)
}

/// Like [`compute_manifests`], but takes algorithm names and rejects any
/// unsupported name before touching the filesystem.
pub fn compute_manifests_named<S: AsRef<str>>(
    root: &Path,
    files: &[String],
    algorithms: &[S],
) -> Result<BTreeMap<ChecksumAlgorithm, Manifest>, StoreError> {
    let parsed = ChecksumAlgorithm::parse_list(algorithms)?;
    compute_manifests(root, files, &parsed)
}

/// Sum of sizes and count of `files`, following symlinks.
pub fn payload_oxum(root: &Path, files: &[String]) -> Result<Oxum, StoreError> {
    let mut oxum = Oxum::default();
    for rel in files {
        let meta = fs::metadata(root.join(rel)).map_err(|e| StoreError::UnreadablePayload {
            path: rel.clone(),
            reason: e.to_string(),
        })?;
        oxum.octets += meta.len();
        oxum.streams += 1;
    }
    Ok(oxum)
}

/// Recursively list regular files below `dir`, as `/`-separated paths
/// relative to `base`, sorted. Symlinks are followed; dangling links are
/// listed so that hashing reports them.
pub fn collect_files(base: &Path, dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut result = Vec::new();
    if dir.exists() {
        walk(base, dir, &mut result)?;
    }
    result.sort();
    Ok(result)
}

fn walk(base: &Path, current: &Path, out: &mut Vec<String>) -> Result<(), StoreError> {
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let full: PathBuf = entry.path();
        let rel = relative_slash_path(base, &full)?;
        // fs::metadata follows symlinks; a dangling link fails and is kept as a file.
        match fs::metadata(&full) {
            Ok(meta) if meta.is_dir() => {
                if entry.file_type()?.is_symlink() && is_ancestor_link(&full)? {
                    return Err(StoreError::UnreadablePayload {
                        path: rel,
                        reason: "symlink cycle".to_owned(),
                    });
                }
                walk(base, &full, out)?;
            }
            _ => out.push(rel),
        }
    }
    Ok(())
}

fn is_ancestor_link(link: &Path) -> Result<bool, StoreError> {
    let target = fs::canonicalize(link)?;
    let parent = link
        .parent()
        .map(fs::canonicalize)
        .transpose()?
        .unwrap_or_default();
    Ok(parent.starts_with(&target))
}

pub(crate) fn relative_slash_path(base: &Path, full: &Path) -> Result<String, StoreError> {
    let rel = full
        .strip_prefix(base)
        .map_err(|e| StoreError::Io(io::Error::other(format!("path strip: {e}"))))?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
