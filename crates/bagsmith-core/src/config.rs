//! Service configuration (`bagsmith.toml`).

use crate::builder::BuilderConfig;
use crate::validator::ValidationOptions;
use crate::CoreError;
use bagsmith_mapping::{MappingRegistry, ResolutionPolicy, DEFAULT_MAPPING_TIMEOUT};
use bagsmith_remote::{FetchConfig, DEFAULT_FETCH_MAX_BYTES, DEFAULT_FETCH_TIMEOUT_SECS};
use bagsmith_schema::{ChecksumAlgorithm, DEFAULT_SOURCE_METADATA};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "bagsmith.toml";

pub const ENV_ALLOW_UNTRUSTED: &str = "BAGSMITH_ALLOW_UNTRUSTED_MAPPERS";
pub const ENV_MANIFESTS: &str = "BAGSMITH_MANIFESTS";
pub const ENV_TAG_MANIFESTS: &str = "BAGSMITH_TAG_MANIFESTS";
pub const ENV_DEFAULT_PROFILE: &str = "BAGSMITH_DEFAULT_PROFILE";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub build: BuildSection,
    pub mapping: MappingSection,
    pub validation: ValidationSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSection {
    pub manifests: Vec<String>,
    pub tag_manifests: Vec<String>,
    /// Defaults to the destination's parent directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_root: Option<PathBuf>,
    pub source_metadata: String,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            manifests: vec!["sha256".to_owned(), "sha512".to_owned()],
            tag_manifests: vec!["sha256".to_owned(), "sha512".to_owned()],
            staging_root: None,
            source_metadata: DEFAULT_SOURCE_METADATA.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MappingSection {
    pub allow_untrusted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension_dir: Option<PathBuf>,
    pub timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_max_bytes: u64,
    pub script_budget: u64,
}

impl Default for MappingSection {
    fn default() -> Self {
        Self {
            allow_untrusted: false,
            extension_dir: None,
            timeout_secs: DEFAULT_MAPPING_TIMEOUT.as_secs(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            fetch_max_bytes: DEFAULT_FETCH_MAX_BYTES,
            script_budget: bagsmith_mapping::script::DEFAULT_SCRIPT_BUDGET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
    pub tag_case_sensitive: bool,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            default_profile: None,
            tag_case_sensitive: true,
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, CoreError> {
        toml::from_str(input).map_err(|e| CoreError::Config(format!("invalid configuration: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
        debug!("loaded configuration from {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Load `explicit` if given, else `./bagsmith.toml` if it exists, else
    /// the defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, CoreError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let local = Path::new(CONFIG_FILE_NAME);
                if local.is_file() {
                    Self::load(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply `BAGSMITH_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_ALLOW_UNTRUSTED) {
            self.mapping.allow_untrusted = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(CoreError::Config(format!(
                        "{ENV_ALLOW_UNTRUSTED}: expected a boolean, got '{other}'"
                    )))
                }
            };
        }
        if let Some(value) = lookup(ENV_MANIFESTS) {
            self.build.manifests = split_list(&value);
        }
        if let Some(value) = lookup(ENV_TAG_MANIFESTS) {
            self.build.tag_manifests = split_list(&value);
        }
        if let Some(value) = lookup(ENV_DEFAULT_PROFILE) {
            self.validation.default_profile = Some(value).filter(|v| !v.trim().is_empty());
        }
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_process_env(&mut self) -> Result<(), CoreError> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Reject algorithm lists the builder would refuse.
    pub fn check(&self) -> Result<(), CoreError> {
        if ChecksumAlgorithm::parse_list(&self.build.manifests)?.is_empty() {
            return Err(CoreError::NoPayloadAlgorithm);
        }
        ChecksumAlgorithm::parse_list(&self.build.tag_manifests)?;
        Ok(())
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig::default()
            .with_timeout(Duration::from_secs(self.mapping.fetch_timeout_secs))
            .with_max_bytes(self.mapping.fetch_max_bytes)
    }

    pub fn resolution_policy(&self) -> ResolutionPolicy {
        ResolutionPolicy {
            allow_untrusted: self.mapping.allow_untrusted,
            script_budget: self.mapping.script_budget,
            fetch: self.fetch_config(),
        }
    }

    /// Registry with the built-in mappers and the extension directory, if
    /// configured.
    pub fn build_registry(&self) -> Result<MappingRegistry, CoreError> {
        let mut registry = MappingRegistry::with_builtins(self.resolution_policy())?;
        if let Some(dir) = &self.mapping.extension_dir {
            registry.load_extension_dir(dir)?;
        }
        Ok(registry)
    }

    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            staging_root: self.build.staging_root.clone(),
            mapping_timeout: Duration::from_secs(self.mapping.timeout_secs),
            source_metadata: self.build.source_metadata.clone(),
        }
    }

    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions {
            tag_case_insensitive: !self.validation.tag_case_sensitive,
            ..ValidationOptions::default()
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
