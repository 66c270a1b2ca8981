//! Package builder and profile validation engine for bagsmith.
//!
//! This crate ties together the data model, the checksum engine and the
//! mapping registry into the `Builder` (entity -> published package) and the
//! profile `validator` (package + rule set -> `ValidationReport`). It also
//! provides build cancellation, profile discovery, the deep-content validator
//! boundary, and the TOML service configuration.

pub mod builder;
pub mod cancel;
pub mod config;
pub mod content;
pub mod profile_source;
pub mod staging;
pub mod validator;

pub use builder::{
    serialize_package, today, BuildReport, BuildRequest, BuiltPackage, Builder, BuilderConfig,
};
pub use cancel::{install_signal_handler, CancelToken, PublishLock};
pub use config::ServiceConfig;
pub use content::{
    await_content_validation, ContentReport, ContentValidationError, ContentValidator, JobStatus,
    JobToken, ModuleResult,
};
pub use profile_source::{LoadedProfile, ProfileResolver};
pub use validator::{
    validate, validate_discovered, validate_path, Category, CheckSet, Finding, ValidationOptions,
    ValidationReport,
};

use bagsmith_mapping::{MappingError, ResolutionError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    UnsupportedAlgorithm(#[from] bagsmith_schema::UnsupportedAlgorithm),
    #[error("at least one payload manifest algorithm is required")]
    NoPayloadAlgorithm,
    #[error("invalid entity: {0}")]
    InvalidEntity(#[from] bagsmith_schema::EntityError),
    #[error("destination already exists: {}", .0.display())]
    DestinationConflict(PathBuf),
    #[error("cannot load profile '{reference}': {reason}")]
    ProfileLoad { reference: String, reason: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("mapper resolution failed: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("mapping with '{plugin}' failed: {source}")]
    MappingFailed {
        plugin: String,
        #[source]
        source: MappingError,
    },
    #[error("staging failed: {0}")]
    StagingFailed(String),
    #[error("failed to publish package to {}: {source}", .dest.display())]
    PublishFailed {
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] bagsmith_store::StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("build cancelled")]
    Cancelled,
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

/// Coarse classification of a `CoreError`, used to pick exit codes and log
/// levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad request or configuration; detected before any side effect.
    Configuration,
    /// Filesystem trouble while staging or publishing.
    Resource,
    /// Mapper resolution or invocation failed.
    Plugin,
    Cancelled,
    /// A broken internal invariant. Never downgraded to a finding.
    Internal,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedAlgorithm(_)
            | Self::NoPayloadAlgorithm
            | Self::InvalidEntity(_)
            | Self::DestinationConflict(_)
            | Self::ProfileLoad { .. }
            | Self::Config(_)
            | Self::Resolution(ResolutionError::ResolutionDisabled { .. } | ResolutionError::InvalidArguments { .. })
            | Self::Store(bagsmith_store::StoreError::UnsupportedAlgorithm(_)) => ErrorKind::Configuration,
            Self::Resolution(_) | Self::MappingFailed { .. } => ErrorKind::Plugin,
            Self::StagingFailed(_) | Self::PublishFailed { .. } | Self::Store(_) | Self::Io(_) => {
                ErrorKind::Resource
            }
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvariantViolation(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bagsmith_mapping::StrategyKind;

    #[test]
    fn disabled_strategy_is_configuration_error() {
        let err = CoreError::from(ResolutionError::ResolutionDisabled {
            strategy: StrategyKind::Inline,
        });
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn mapping_failure_is_plugin_error() {
        let err = CoreError::MappingFailed {
            plugin: "oai-dc".to_owned(),
            source: MappingError::MissingField {
                key: "DC-Title".to_owned(),
            },
        };
        assert_eq!(err.kind(), ErrorKind::Plugin);
        assert!(err.to_string().contains("DC-Title"));
    }

    #[test]
    fn invariant_violation_is_internal() {
        assert_eq!(
            CoreError::InvariantViolation("x".to_owned()).kind(),
            ErrorKind::Internal
        );
        assert_eq!(
            CoreError::StagingFailed("disk full".to_owned()).kind(),
            ErrorKind::Resource
        );
    }
}
