use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported checksum algorithm: '{0}' (expected one of md5, sha1, sha256, sha512)")]
pub struct UnsupportedAlgorithm(pub String);

/// The closed set of digest algorithms a package can be manifested with.
///
/// Ordering follows digest strength, which is also the order manifests are
/// written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    pub const ALL: [Self; 4] = [Self::Md5, Self::Sha1, Self::Sha256, Self::Sha512];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Width of the lower-case hex digest.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    pub fn manifest_file_name(self) -> String {
        format!("manifest-{}.txt", self.as_str())
    }

    pub fn tag_manifest_file_name(self) -> String {
        format!("tagmanifest-{}.txt", self.as_str())
    }

    /// Parse a whole list of algorithm names, failing on the first unknown one.
    ///
    /// The result is sorted and free of duplicates, so callers can use it to
    /// drive deterministic output.
    pub fn parse_list<I, S>(names: I) -> Result<Vec<Self>, UnsupportedAlgorithm>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed = names
            .into_iter()
            .map(|n| n.as_ref().parse())
            .collect::<Result<Vec<Self>, _>>()?;
        parsed.sort();
        parsed.dedup();
        Ok(parsed)
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = UnsupportedAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            _ => Err(UnsupportedAlgorithm(s.to_owned())),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract the algorithm name from a `manifest-<alg>.txt` file name.
pub fn manifest_algorithm(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix("manifest-")
        .and_then(|rest| rest.strip_suffix(".txt"))
        .filter(|alg| !alg.is_empty())
}

/// Extract the algorithm name from a `tagmanifest-<alg>.txt` file name.
pub fn tag_manifest_algorithm(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix("tagmanifest-")
        .and_then(|rest| rest.strip_suffix(".txt"))
        .filter(|alg| !alg.is_empty())
}
