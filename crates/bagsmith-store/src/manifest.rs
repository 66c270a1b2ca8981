use crate::StoreError;
use bagsmith_schema::{manifest_algorithm, tag_manifest_algorithm};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// A checksum manifest: relative path to lower-case hex digest.
///
/// The algorithm is kept as a name because manifests read from foreign
/// packages may use algorithms that cannot be computed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub algorithm: String,
    pub entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, path: impl Into<String>, digest: impl Into<String>) {
        self.entries.insert(path.into(), digest.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `digest  path` lines sorted by path.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (path, digest) in &self.entries {
            out.push_str(digest);
            out.push_str("  ");
            out.push_str(&encode_path(path));
            out.push('\n');
        }
        out
    }

    pub fn parse(algorithm: &str, file: &str, text: &str) -> Result<Self, StoreError> {
        let mut manifest = Self::new(algorithm.to_ascii_lowercase());
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let malformed = |reason: &str| StoreError::MalformedManifest {
                file: file.to_owned(),
                line: idx + 1,
                reason: reason.to_owned(),
            };
            let Some((digest, rest)) = line.split_once([' ', '\t']) else {
                return Err(malformed("expected '<digest> <path>'"));
            };
            // `*` marks binary mode in sha*sum output.
            let path = rest.trim_start_matches([' ', '\t']);
            let path = path.strip_prefix('*').unwrap_or(path);
            if path.is_empty() {
                return Err(malformed("missing path"));
            }
            let path = decode_path(path);
            if manifest.entries.contains_key(&path) {
                return Err(malformed("duplicate path"));
            }
            manifest.insert(path, digest.to_ascii_lowercase());
        }
        Ok(manifest)
    }

    /// Read a `manifest-<alg>.txt` or `tagmanifest-<alg>.txt` file.
    pub fn read(path: &Path) -> Result<Self, StoreError> {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let algorithm = manifest_algorithm(&file)
            .or_else(|| tag_manifest_algorithm(&file))
            .ok_or_else(|| StoreError::InvalidPackage(format!("not a manifest: {file}")))?
            .to_owned();
        let text = fs::read_to_string(path)?;
        Self::parse(&algorithm, &file, &text)
    }
}

/// Percent-encode the characters that cannot appear literally in a manifest line.
pub fn encode_path(path: &str) -> String {
    path.replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

pub fn decode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        let decoded = match tail.get(..3) {
            Some(s) if s.eq_ignore_ascii_case("%25") => Some('%'),
            Some(s) if s.eq_ignore_ascii_case("%0D") => Some('\r'),
            Some(s) if s.eq_ignore_ascii_case("%0A") => Some('\n'),
            _ => None,
        };
        if let Some(c) = decoded {
            out.push(c);
            rest = &tail[3..];
        } else {
            out.push('%');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
