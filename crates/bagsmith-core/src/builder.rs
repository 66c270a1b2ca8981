//! Package builder.
//!
//! A build validates the whole request, resolves the mapper, assembles the
//! package in a private staging directory, and publishes it with a single
//! rename. Every failure before the rename leaves nothing at the destination.

use crate::cancel::{CancelToken, PublishLock};
use crate::staging::{copy_tree, Staging};
use crate::validator::{validate, ValidationOptions, ValidationReport};
use crate::CoreError;
use bagsmith_mapping::{
    MappingError, MappingRegistry, PluginDescriptor, PluginSpec, DEFAULT_MAPPING_TIMEOUT,
};
use bagsmith_schema::{
    is_valid_tag_name, tag_manifest_algorithm, BagInfo, ChecksumAlgorithm, Entity, RuleSet, BAGGING_DATE,
    DEFAULT_SOURCE_METADATA, META_DIR, PAYLOAD_DIR, PAYLOAD_OXUM,
};
use bagsmith_store::{
    collect_files, compute_manifests, fsync_dir, pack_package, payload_oxum, write_atomic,
    Manifest, Oxum, Package, PackageLayout,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tags the builder writes itself; mapper output for them is discarded.
const RESERVED_TAGS: [&str; 2] = [PAYLOAD_OXUM, BAGGING_DATE];

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Where staging directories are created. Defaults to the destination's
    /// parent so that publishing is a same-filesystem rename.
    pub staging_root: Option<PathBuf>,
    pub mapping_timeout: Duration,
    /// File name of the source-metadata document inside the entity's `meta/`.
    pub source_metadata: String,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            staging_root: None,
            mapping_timeout: DEFAULT_MAPPING_TIMEOUT,
            source_metadata: DEFAULT_SOURCE_METADATA.to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub entity: PathBuf,
    pub destination: PathBuf,
    pub plugin: PluginSpec,
    pub manifests: Vec<String>,
    pub tag_manifests: Vec<String>,
    /// Written as `Bagging-Date` when set. Left out by default so that
    /// identical input yields byte-identical packages.
    pub bagging_date: Option<String>,
}

impl BuildRequest {
    pub fn new(entity: impl Into<PathBuf>, destination: impl Into<PathBuf>, plugin: PluginSpec) -> Self {
        Self {
            entity: entity.into(),
            destination: destination.into(),
            plugin,
            manifests: vec!["sha256".to_owned(), "sha512".to_owned()],
            tag_manifests: vec!["sha256".to_owned(), "sha512".to_owned()],
            bagging_date: None,
        }
    }

    #[must_use]
    pub fn with_manifests<S: Into<String>>(mut self, algorithms: impl IntoIterator<Item = S>) -> Self {
        self.manifests = algorithms.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_tag_manifests<S: Into<String>>(mut self, algorithms: impl IntoIterator<Item = S>) -> Self {
        self.tag_manifests = algorithms.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_bagging_date(mut self, date: impl Into<String>) -> Self {
        self.bagging_date = Some(date.into());
        self
    }
}

/// Summary of a published package.
#[derive(Debug, Clone, Serialize)]
pub struct BuiltPackage {
    pub path: PathBuf,
    pub payload_oxum: String,
    pub payload_files: usize,
    pub manifests: Vec<String>,
    pub tag_manifests: Vec<String>,
    pub plugin: PluginDescriptor,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub package: BuiltPackage,
    pub validation: ValidationReport,
}

/// Builds packages. Holds only immutable configuration and the shared
/// registry, so one builder serves concurrent builds.
pub struct Builder {
    registry: Arc<MappingRegistry>,
    config: BuilderConfig,
}

impl Builder {
    pub fn new(registry: Arc<MappingRegistry>, config: BuilderConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    #[allow(clippy::too_many_lines)]
    pub fn build(&self, request: &BuildRequest, cancel: &CancelToken) -> Result<BuiltPackage, CoreError> {
        info!(
            "building {} from {}",
            request.destination.display(),
            request.entity.display()
        );

        // Request validation: nothing below touches the filesystem until all
        // of it has passed.
        let payload_algorithms = ChecksumAlgorithm::parse_list(&request.manifests)?;
        if payload_algorithms.is_empty() {
            return Err(CoreError::NoPayloadAlgorithm);
        }
        let tag_algorithms = ChecksumAlgorithm::parse_list(&request.tag_manifests)?;
        let mapper = self.registry.resolve(&request.plugin)?;
        let entity = Entity::open(&request.entity)?.with_source_metadata_name(&self.config.source_metadata);
        let destination = std::path::absolute(&request.destination)?;
        if destination.symlink_metadata().is_ok() {
            return Err(CoreError::DestinationConflict(destination));
        }
        let parent = destination
            .parent()
            .ok_or_else(|| CoreError::Config(format!("destination {} has no parent", destination.display())))?
            .to_path_buf();
        cancel.check()?;

        fs::create_dir_all(&parent).map_err(|e| CoreError::StagingFailed(format!("{}: {e}", parent.display())))?;
        let staging_root = self.config.staging_root.clone().unwrap_or_else(|| parent.clone());
        let staging = Staging::create(&staging_root)?;
        let root = staging.package_dir();
        let layout = PackageLayout::new(root);

        let payload_dir = layout.payload_dir();
        fs::create_dir(&payload_dir).map_err(|e| CoreError::StagingFailed(format!("{}: {e}", payload_dir.display())))?;
        copy_tree(&entity.payload_dir(), &payload_dir)?;
        if let Some(meta) = entity.meta_dir() {
            let target = root.join(META_DIR);
            fs::create_dir(&target).map_err(|e| CoreError::StagingFailed(format!("{}: {e}", target.display())))?;
            copy_tree(&meta, &target)?;
        }
        cancel.check()?;

        let plugin = mapper.descriptor().clone();
        let source_metadata = entity.read_source_metadata()?;
        debug!("invoking mapper '{}' ({})", plugin.name, plugin.strategy);
        let mapped = mapper
            .invoke(source_metadata, self.config.mapping_timeout)
            .map_err(|source| CoreError::MappingFailed {
                plugin: plugin.name.to_string(),
                source,
            })?;
        cancel.check()?;

        let payload_files = collect_files(root, &payload_dir)?;
        let oxum = payload_oxum(root, &payload_files)?;
        let bag_info = compose_bag_info(mapped, oxum, request.bagging_date.as_deref()).map_err(|source| {
            CoreError::MappingFailed {
                plugin: plugin.name.to_string(),
                source,
            }
        })?;
        write_atomic(&layout.bagit_txt(), PackageLayout::bagit_declaration().as_bytes())?;
        write_atomic(&layout.bag_info_txt(), bag_info.to_text().as_bytes())?;

        let manifests = compute_manifests(root, &payload_files, &payload_algorithms)?;
        check_manifests(&manifests, &payload_files)?;
        for (algorithm, manifest) in &manifests {
            write_atomic(&layout.manifest_path(*algorithm), manifest.to_text().as_bytes())?;
        }
        debug!("wrote {} payload manifests over {} files", manifests.len(), payload_files.len());
        cancel.check()?;

        if !tag_algorithms.is_empty() {
            let tag_files = list_tag_files(root)?;
            let tag_manifests = compute_manifests(root, &tag_files, &tag_algorithms)?;
            for (algorithm, manifest) in &tag_manifests {
                write_atomic(&layout.tag_manifest_path(*algorithm), manifest.to_text().as_bytes())?;
            }
            debug!("wrote {} tag manifests over {} tag files", tag_manifests.len(), tag_files.len());
        }
        cancel.check()?;

        publish(root, &destination)?;
        drop(staging);
        info!("published {} ({oxum})", destination.display());

        Ok(BuiltPackage {
            path: destination,
            payload_oxum: oxum.to_string(),
            payload_files: payload_files.len(),
            manifests: payload_algorithms.iter().map(|a| a.as_str().to_owned()).collect(),
            tag_manifests: tag_algorithms.iter().map(|a| a.as_str().to_owned()).collect(),
            plugin,
        })
    }

    /// Build, then validate the published package against `rules`.
    ///
    /// The profile is loaded by the caller up front so that a bad profile
    /// fails before anything is built.
    pub fn build_and_validate(
        &self,
        request: &BuildRequest,
        cancel: &CancelToken,
        rules: &RuleSet,
        options: &ValidationOptions,
    ) -> Result<BuildReport, CoreError> {
        let package = self.build(request, cancel)?;
        let discovered = Package::open(&package.path)?;
        let validation = validate(rules, &discovered, None, options);
        Ok(BuildReport { package, validation })
    }
}

/// Mapper output, minus reserved tags, then `Payload-Oxum` and the optional
/// `Bagging-Date`. Every strategy ends here, so tag names are checked here.
fn compose_bag_info(
    mut mapped: BagInfo,
    oxum: Oxum,
    bagging_date: Option<&str>,
) -> Result<BagInfo, MappingError> {
    if let Some(key) = mapped.keys().find(|k| !is_valid_tag_name(k)) {
        return Err(MappingError::InvalidTag { key: key.to_owned() });
    }
    let reserved: Vec<String> = mapped
        .keys()
        .filter(|key| RESERVED_TAGS.iter().any(|r| r.eq_ignore_ascii_case(key)))
        .map(str::to_owned)
        .collect();
    for key in reserved {
        warn!("mapper produced reserved tag '{key}'; dropping it");
        mapped.remove(&key);
    }
    mapped.push(PAYLOAD_OXUM, oxum.to_string());
    if let Some(date) = bagging_date {
        mapped.push(BAGGING_DATE, date);
    }
    Ok(mapped)
}

/// Every payload manifest must list every payload file exactly once.
fn check_manifests(
    manifests: &BTreeMap<ChecksumAlgorithm, Manifest>,
    payload_files: &[String],
) -> Result<(), CoreError> {
    for (algorithm, manifest) in manifests {
        let complete = manifest.len() == payload_files.len()
            && payload_files.iter().all(|f| manifest.contains(f));
        if !complete {
            return Err(CoreError::InvariantViolation(format!(
                "{algorithm} manifest has {} entries for {} payload files",
                manifest.len(),
                payload_files.len()
            )));
        }
    }
    Ok(())
}

/// Files outside `data/`, excluding tag manifests.
fn list_tag_files(root: &Path) -> Result<Vec<String>, CoreError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if path.is_dir() {
            if name != PAYLOAD_DIR {
                files.extend(collect_files(root, &path)?);
            }
        } else if tag_manifest_algorithm(&name).is_none() {
            files.push(name);
        }
    }
    files.sort();
    Ok(files)
}

fn publish(staged: &Path, destination: &Path) -> Result<(), CoreError> {
    let parent = destination
        .parent()
        .ok_or_else(|| CoreError::Config(format!("destination {} has no parent", destination.display())))?;
    let _lock = PublishLock::acquire(parent)?;
    if destination.symlink_metadata().is_ok() {
        return Err(CoreError::DestinationConflict(destination.to_path_buf()));
    }
    fs::rename(staged, destination).map_err(|source| {
        if source.kind() == io::ErrorKind::AlreadyExists {
            CoreError::DestinationConflict(destination.to_path_buf())
        } else {
            CoreError::PublishFailed {
                dest: destination.to_path_buf(),
                source,
            }
        }
    })?;
    fsync_dir(parent)?;
    Ok(())
}

/// Write `<package>.tar`, a deterministic uncompressed archive of a built
/// package.
pub fn serialize_package(package: &Path) -> Result<PathBuf, CoreError> {
    let mut name = package.as_os_str().to_owned();
    name.push(".tar");
    let archive = PathBuf::from(name);
    if archive.symlink_metadata().is_ok() {
        return Err(CoreError::DestinationConflict(archive));
    }
    pack_package(package, &archive)?;
    info!("serialized {} to {}", package.display(), archive.display());
    Ok(archive)
}

/// Today's date in the form written to `Bagging-Date`.
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}
