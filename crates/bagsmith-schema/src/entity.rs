use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Payload directory name, both in an entity and in a built package.
pub const PAYLOAD_DIR: &str = "data";
/// Directory of an entity whose files become tag files of the package.
pub const META_DIR: &str = "meta";
pub const DEFAULT_SOURCE_METADATA: &str = "source_metadata.xml";

#[derive(Debug, Error)]
pub enum EntityError {
    #[error("entity not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("entity '{}' has no 'data' directory", .0.display())]
    MissingPayloadDir(PathBuf),
    #[error("unexpected entry '{}' at entity top level (only 'data/' and 'meta/' are allowed)", .0.display())]
    UnexpectedEntry(PathBuf),
    #[error("entity I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A source unit to be packaged: `data/` holds the payload, the optional
/// `meta/` holds auxiliary files including the source-metadata document.
///
/// The entity is only ever read.
#[derive(Debug, Clone)]
pub struct Entity {
    root: PathBuf,
    source_metadata_name: String,
}

impl Entity {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, EntityError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(EntityError::NotFound(root));
        }
        if !root.join(PAYLOAD_DIR).is_dir() {
            return Err(EntityError::MissingPayloadDir(root));
        }
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let name = entry.file_name();
            let allowed = (name == PAYLOAD_DIR || name == META_DIR) && entry.path().is_dir();
            if !allowed {
                return Err(EntityError::UnexpectedEntry(entry.path()));
            }
        }
        Ok(Self {
            root,
            source_metadata_name: DEFAULT_SOURCE_METADATA.to_owned(),
        })
    }

    #[must_use]
    pub fn with_source_metadata_name(mut self, name: &str) -> Self {
        name.clone_into(&mut self.source_metadata_name);
        self
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn payload_dir(&self) -> PathBuf {
        self.root.join(PAYLOAD_DIR)
    }

    /// The `meta/` directory, if the entity has one.
    pub fn meta_dir(&self) -> Option<PathBuf> {
        let dir = self.root.join(META_DIR);
        dir.is_dir().then_some(dir)
    }

    pub fn source_metadata_path(&self) -> Option<PathBuf> {
        let path = self.root.join(META_DIR).join(&self.source_metadata_name);
        path.is_file().then_some(path)
    }

    /// Read the source-metadata document into an owned string.
    pub fn read_source_metadata(&self) -> Result<Option<String>, EntityError> {
        match self.source_metadata_path() {
            Some(path) => Ok(Some(fs::read_to_string(path)?)),
            None => Ok(None),
        }
    }
}
