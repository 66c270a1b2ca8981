use crate::checksum::{compute_manifests, payload_oxum, Oxum};
use crate::package::Package;
use crate::StoreError;
use bagsmith_schema::{ChecksumAlgorithm, PAYLOAD_OXUM};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::warn;

#[derive(Debug, Default, Serialize)]
pub struct IntegrityReport {
    pub manifests_checked: usize,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: Vec<IntegrityFailure>,
    /// Manifests whose algorithm cannot be computed here.
    pub skipped_algorithms: Vec<String>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct IntegrityFailure {
    pub path: String,
    pub reason: String,
}

/// Full fixity check of a discovered package: completeness of every payload
/// manifest, existence and digests of every listed file, and `Payload-Oxum`.
pub fn verify_package(package: &Package) -> Result<IntegrityReport, StoreError> {
    let mut report = IntegrityReport::default();
    let root = package.root();

    if package.manifests.is_empty() {
        report.failed.push(IntegrityFailure {
            path: String::new(),
            reason: "package has no payload manifest".to_owned(),
        });
    }

    let payload: BTreeSet<&str> = package.payload_files.iter().map(String::as_str).collect();
    let present: BTreeSet<&str> = payload
        .iter()
        .copied()
        .chain(package.tag_files.iter().map(String::as_str))
        .collect();

    for (kind, manifests) in [("manifest", &package.manifests), ("tagmanifest", &package.tag_manifests)] {
        for (name, manifest) in manifests {
            let file = format!("{kind}-{name}.txt");
            let Ok(algorithm) = name.parse::<ChecksumAlgorithm>() else {
                warn!("cannot verify {file}: unsupported algorithm");
                report.skipped_algorithms.push(name.clone());
                continue;
            };
            report.manifests_checked += 1;

            if kind == "manifest" {
                for path in &payload {
                    if !manifest.contains(path) {
                        report.failed.push(IntegrityFailure {
                            path: (*path).to_owned(),
                            reason: format!("payload file not listed in {file}"),
                        });
                    }
                }
            }

            let mut listed = Vec::new();
            for path in manifest.paths() {
                if present.contains(path) {
                    listed.push(path.to_owned());
                } else {
                    report.failed.push(IntegrityFailure {
                        path: path.to_owned(),
                        reason: format!("listed in {file} but missing"),
                    });
                }
            }

            let computed = compute_manifests(root, &listed, &[algorithm])?;
            let Some(actual) = computed.get(&algorithm) else {
                continue;
            };
            for path in &listed {
                report.files_checked += 1;
                let expected = manifest.get(path).unwrap_or_default();
                match actual.get(path) {
                    Some(digest) if digest.eq_ignore_ascii_case(expected) => report.passed += 1,
                    Some(digest) => report.failed.push(IntegrityFailure {
                        path: path.clone(),
                        reason: format!("{name} mismatch: expected {expected}, got {digest}"),
                    }),
                    None => report.failed.push(IntegrityFailure {
                        path: path.clone(),
                        reason: format!("{name} digest not computed"),
                    }),
                }
            }
        }
    }

    if let Some(declared) = package.bag_info.first(PAYLOAD_OXUM) {
        let actual = payload_oxum(root, &package.payload_files)?;
        match Oxum::parse(declared) {
            Some(oxum) if oxum == actual => {}
            Some(_) => report.failed.push(IntegrityFailure {
                path: PAYLOAD_OXUM.to_owned(),
                reason: format!("declared {declared}, actual {actual}"),
            }),
            None => report.failed.push(IntegrityFailure {
                path: PAYLOAD_OXUM.to_owned(),
                reason: format!("malformed value '{declared}'"),
            }),
        }
    }

    report.failed.sort();
    report.failed.dedup();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::collect_files;
    use crate::layout::PackageLayout;
    use std::fs;
    use std::path::Path;

    fn build_package(root: &Path) {
        fs::create_dir_all(root.join("data")).unwrap();
        fs::write(root.join("data/a.txt"), b"abc").unwrap();
        fs::write(root.join("data/b.txt"), b"defg").unwrap();
        fs::write(root.join("bagit.txt"), PackageLayout::bagit_declaration()).unwrap();
        fs::write(root.join("bag-info.txt"), "Payload-Oxum: 7.2\n").unwrap();
        let files = collect_files(root, &root.join("data")).unwrap();
        let m = compute_manifests(root, &files, &[ChecksumAlgorithm::Sha256]).unwrap();
        fs::write(
            root.join("manifest-sha256.txt"),
            m[&ChecksumAlgorithm::Sha256].to_text(),
        )
        .unwrap();
        let tags = vec!["bag-info.txt".to_owned(), "bagit.txt".to_owned(), "manifest-sha256.txt".to_owned()];
        let t = compute_manifests(root, &tags, &[ChecksumAlgorithm::Md5]).unwrap();
        fs::write(
            root.join("tagmanifest-md5.txt"),
            t[&ChecksumAlgorithm::Md5].to_text(),
        )
        .unwrap();
    }

    #[test]
    fn intact_package_passes() {
        let dir = tempfile::tempdir().unwrap();
        build_package(dir.path());
        let report = verify_package(&Package::open(dir.path()).unwrap()).unwrap();
        assert!(report.is_ok(), "{:?}", report.failed);
        assert_eq!(report.manifests_checked, 2);
        assert_eq!(report.files_checked, 5);
        assert_eq!(report.passed, 5);
    }

    #[test]
    fn corrupted_payload_detected() {
        let dir = tempfile::tempdir().unwrap();
        build_package(dir.path());
        fs::write(dir.path().join("data/a.txt"), b"abd").unwrap();
        let report = verify_package(&Package::open(dir.path()).unwrap()).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "data/a.txt");
        assert!(report.failed[0].reason.contains("mismatch"));
    }

    #[test]
    fn unlisted_and_missing_files_detected() {
        let dir = tempfile::tempdir().unwrap();
        build_package(dir.path());
        fs::write(dir.path().join("data/extra.txt"), b"").unwrap();
        fs::remove_file(dir.path().join("data/b.txt")).unwrap();
        let report = verify_package(&Package::open(dir.path()).unwrap()).unwrap();
        let paths: Vec<&str> = report.failed.iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"data/extra.txt"));
        assert!(paths.contains(&"data/b.txt"));
        // Oxum is still 7.2 but the payload is now 3.2.
        assert!(paths.contains(&"Payload-Oxum"));
    }

    #[test]
    fn unknown_algorithm_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        build_package(dir.path());
        fs::write(dir.path().join("manifest-sha384.txt"), "aa  data/a.txt\n").unwrap();
        let report = verify_package(&Package::open(dir.path()).unwrap()).unwrap();
        assert_eq!(report.skipped_algorithms, vec!["sha384"]);
        // The tag manifest does not cover the new manifest; that is not a failure.
        assert!(report.is_ok(), "{:?}", report.failed);
    }

    #[test]
    fn package_without_manifest_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        let report = verify_package(&Package::open(dir.path()).unwrap()).unwrap();
        assert!(!report.is_ok());
    }
}
