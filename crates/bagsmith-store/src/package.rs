use crate::checksum::{collect_files, relative_slash_path};
use crate::layout::PackageLayout;
use crate::manifest::Manifest;
use crate::StoreError;
use bagsmith_schema::{manifest_algorithm, tag_manifest_algorithm, BagInfo, PAYLOAD_DIR};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// A package as found on disk.
///
/// Discovery is lenient: missing `bagit.txt` or `bag-info.txt` are recorded as
/// absent rather than rejected, so validation can report them as findings.
#[derive(Debug, Clone)]
pub struct Package {
    layout: PackageLayout,
    pub version: Option<String>,
    pub encoding: Option<String>,
    pub bag_info: BagInfo,
    /// Payload manifests keyed by algorithm name.
    pub manifests: BTreeMap<String, Manifest>,
    pub tag_manifests: BTreeMap<String, Manifest>,
    /// Files below `data/`, as `data/...` paths, sorted.
    pub payload_files: Vec<String>,
    /// Every other file, sorted.
    pub tag_files: Vec<String>,
    pub has_fetch: bool,
}

impl Package {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(StoreError::InvalidPackage(format!(
                "'{}' is not a directory",
                root.display()
            )));
        }
        let layout = PackageLayout::new(root);

        let (version, encoding) = if layout.bagit_txt().is_file() {
            let declaration = BagInfo::read(&layout.bagit_txt())?;
            (
                declaration.first("BagIt-Version").map(str::to_owned),
                declaration
                    .first("Tag-File-Character-Encoding")
                    .map(str::to_owned),
            )
        } else {
            (None, None)
        };

        let bag_info = if layout.bag_info_txt().is_file() {
            BagInfo::read(&layout.bag_info_txt())?
        } else {
            BagInfo::new()
        };

        let mut manifests = BTreeMap::new();
        let mut tag_manifests = BTreeMap::new();
        let mut top_level: Vec<String> = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let name = relative_slash_path(root, &path)?;
            if let Some(alg) = manifest_algorithm(&name) {
                manifests.insert(alg.to_ascii_lowercase(), Manifest::read(&path)?);
            } else if let Some(alg) = tag_manifest_algorithm(&name) {
                tag_manifests.insert(alg.to_ascii_lowercase(), Manifest::read(&path)?);
            }
            top_level.push(name);
        }

        let payload_files = collect_files(root, &layout.payload_dir())?;

        let mut tag_files = top_level;
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() && entry.file_name() != PAYLOAD_DIR {
                tag_files.extend(collect_files(root, &path)?);
            }
        }
        tag_files.sort();

        let has_fetch = layout.fetch_txt().is_file();
        debug!(
            "discovered package {}: {} payload files, {} tag files, manifests {:?}",
            root.display(),
            payload_files.len(),
            tag_files.len(),
            manifests.keys().collect::<Vec<_>>()
        );

        Ok(Self {
            layout,
            version,
            encoding,
            bag_info,
            manifests,
            tag_manifests,
            payload_files,
            tag_files,
            has_fetch,
        })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    #[inline]
    pub fn layout(&self) -> &PackageLayout {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_package(root: &Path) {
        fs::create_dir_all(root.join("data/sub")).unwrap();
        fs::create_dir_all(root.join("meta")).unwrap();
        fs::write(root.join("data/sub/a.txt"), b"a").unwrap();
        fs::write(root.join("meta/source_metadata.xml"), b"<x/>").unwrap();
        fs::write(root.join("bagit.txt"), PackageLayout::bagit_declaration()).unwrap();
        fs::write(root.join("bag-info.txt"), "DC-Title: t\nPayload-Oxum: 1.1\n").unwrap();
        fs::write(root.join("manifest-sha384.txt"), "ab  data/sub/a.txt\n").unwrap();
        fs::write(root.join("tagmanifest-md5.txt"), "cd  bagit.txt\n").unwrap();
    }

    #[test]
    fn discovers_all_parts() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path());
        let pkg = Package::open(dir.path()).unwrap();
        assert_eq!(pkg.version.as_deref(), Some("1.0"));
        assert_eq!(pkg.encoding.as_deref(), Some("UTF-8"));
        assert_eq!(pkg.bag_info.first("DC-Title"), Some("t"));
        assert_eq!(pkg.manifests.keys().collect::<Vec<_>>(), vec!["sha384"]);
        assert_eq!(pkg.tag_manifests.keys().collect::<Vec<_>>(), vec!["md5"]);
        assert_eq!(pkg.payload_files, vec!["data/sub/a.txt"]);
        assert_eq!(
            pkg.tag_files,
            vec![
                "bag-info.txt",
                "bagit.txt",
                "manifest-sha384.txt",
                "meta/source_metadata.xml",
                "tagmanifest-md5.txt"
            ]
        );
        assert!(!pkg.has_fetch);
    }

    #[test]
    fn missing_declaration_is_recorded_not_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        let pkg = Package::open(dir.path()).unwrap();
        assert!(pkg.version.is_none());
        assert!(pkg.bag_info.is_empty());
        assert!(pkg.manifests.is_empty());
    }

    #[test]
    fn non_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pkg.txt");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            Package::open(&file),
            Err(StoreError::InvalidPackage(_))
        ));
    }

    #[test]
    fn detects_fetch_file() {
        let dir = tempfile::tempdir().unwrap();
        write_package(dir.path());
        fs::write(dir.path().join("fetch.txt"), "http://x 1 data/y\n").unwrap();
        assert!(Package::open(dir.path()).unwrap().has_fetch);
    }
}
