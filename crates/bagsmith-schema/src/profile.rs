//! BagIt profile documents (JSON), as published by archives to describe what
//! a conforming package must look like.
//!
//! The document is only a serde model; [`RuleSet`](crate::RuleSet) is the
//! compiled form the validator works with.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to read profile: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse profile: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid pattern for '{subject}': {source}")]
    InvalidPattern {
        subject: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializationPolicy {
    Forbidden,
    #[default]
    Optional,
    Required,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInfo {
    #[serde(rename = "BagIt-Profile-Identifier", default)]
    pub identifier: Option<String>,
    #[serde(rename = "Version", default)]
    pub version: Option<String>,
    #[serde(rename = "Source-Organization", default)]
    pub source_organization: Option<String>,
    #[serde(rename = "External-Description", default)]
    pub external_description: Option<String>,
}

/// Constraints on one `bag-info.txt` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSpec {
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_true")]
    pub repeatable: bool,
    #[serde(default)]
    pub values: Option<Vec<String>>,
    /// Archives publish the value pattern here; it must match the whole value.
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
}

impl Default for TagSpec {
    fn default() -> Self {
        Self {
            required: false,
            repeatable: true,
            values: None,
            description: None,
            regex: None,
        }
    }
}

impl TagSpec {
    /// The value pattern, `regex` taking precedence over `description`.
    pub fn pattern(&self) -> Option<&str> {
        self.regex.as_deref().or(self.description.as_deref())
    }
}

/// Entry of `Payload-Folders-Allowed`: a literal folder or `{"regex": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FolderSpec {
    Literal(String),
    Regex { regex: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDocument {
    #[serde(rename = "BagIt-Profile-Info", default)]
    pub info: ProfileInfo,
    #[serde(rename = "Bag-Info", default)]
    pub bag_info: BTreeMap<String, TagSpec>,
    #[serde(rename = "Bag-Info-Closed", default)]
    pub bag_info_closed: bool,
    #[serde(rename = "Manifests-Required", default)]
    pub manifests_required: Vec<String>,
    #[serde(rename = "Manifests-Allowed", default)]
    pub manifests_allowed: Option<Vec<String>>,
    #[serde(rename = "Tag-Manifests-Required", default)]
    pub tag_manifests_required: Vec<String>,
    #[serde(rename = "Tag-Manifests-Allowed", default)]
    pub tag_manifests_allowed: Option<Vec<String>>,
    #[serde(rename = "Tag-Files-Required", default)]
    pub tag_files_required: Vec<String>,
    #[serde(rename = "Tag-Files-Allowed", default)]
    pub tag_files_allowed: Option<Vec<String>>,
    #[serde(rename = "Allow-Fetch.txt", default = "default_true")]
    pub allow_fetch: bool,
    #[serde(rename = "Serialization", default)]
    pub serialization: SerializationPolicy,
    #[serde(rename = "Accept-Serialization", default)]
    pub accept_serialization: Vec<String>,
    #[serde(rename = "Accept-BagIt-Version", default)]
    pub accept_bagit_version: Vec<String>,
    #[serde(rename = "Payload-Required", default)]
    pub payload_required: bool,
    #[serde(rename = "Payload-Folders-Allowed", default)]
    pub payload_folders_allowed: Option<Vec<FolderSpec>>,
    #[serde(rename = "Payload-Folders-Required", default)]
    pub payload_folders_required: Vec<String>,
}

fn default_true() -> bool {
    true
}

pub fn parse_profile_str(input: &str) -> Result<ProfileDocument, ProfileError> {
    Ok(serde_json::from_str(input)?)
}

pub fn parse_profile_file(path: impl AsRef<Path>) -> Result<ProfileDocument, ProfileError> {
    let content = fs::read_to_string(path)?;
    parse_profile_str(&content)
}
