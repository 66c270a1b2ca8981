use bagsmith_schema::{manifest_algorithm, tag_manifest_algorithm, ChecksumAlgorithm, PAYLOAD_DIR};
use std::path::{Path, PathBuf};

pub const BAGIT_TXT: &str = "bagit.txt";
pub const BAG_INFO_TXT: &str = "bag-info.txt";
pub const FETCH_TXT: &str = "fetch.txt";
/// Version written into `bagit.txt` of every built package.
pub const BAGIT_VERSION: &str = "1.0";
pub const TAG_FILE_ENCODING: &str = "UTF-8";

/// Fixed file names of a package rooted at some directory.
///
/// ```text
/// <root>/
///   bagit.txt
///   bag-info.txt
///   manifest-<alg>.txt
///   tagmanifest-<alg>.txt
///   data/...
///   meta/...
/// ```
#[derive(Debug, Clone)]
pub struct PackageLayout {
    root: PathBuf,
}

impl PackageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn payload_dir(&self) -> PathBuf {
        self.root.join(PAYLOAD_DIR)
    }

    #[inline]
    pub fn bagit_txt(&self) -> PathBuf {
        self.root.join(BAGIT_TXT)
    }

    #[inline]
    pub fn bag_info_txt(&self) -> PathBuf {
        self.root.join(BAG_INFO_TXT)
    }

    #[inline]
    pub fn fetch_txt(&self) -> PathBuf {
        self.root.join(FETCH_TXT)
    }

    #[inline]
    pub fn manifest_path(&self, algorithm: ChecksumAlgorithm) -> PathBuf {
        self.root.join(algorithm.manifest_file_name())
    }

    #[inline]
    pub fn tag_manifest_path(&self, algorithm: ChecksumAlgorithm) -> PathBuf {
        self.root.join(algorithm.tag_manifest_file_name())
    }

    /// Content of `bagit.txt` for packages built by this crate.
    pub fn bagit_declaration() -> String {
        format!("BagIt-Version: {BAGIT_VERSION}\nTag-File-Character-Encoding: {TAG_FILE_ENCODING}\n")
    }
}

/// Whether `rel` is one of the files every package may carry without a
/// profile listing it: the declaration, bag-info, fetch list, and manifests.
pub fn is_reserved_tag_file(rel: &str) -> bool {
    matches!(rel, BAGIT_TXT | BAG_INFO_TXT | FETCH_TXT)
        || manifest_algorithm(rel).is_some()
        || tag_manifest_algorithm(rel).is_some()
}
