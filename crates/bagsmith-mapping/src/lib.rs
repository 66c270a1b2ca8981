//! Metadata mapping for bagsmith.
//!
//! A mapper turns an entity's source-metadata document into the package's
//! `bag-info.txt` entries. Mappers are acquired through one of five strategies
//! (see [`PluginSpec`]): a declarative template, a statically registered
//! mapper, an inline mapping script, a base64 serialized mapper object, or a
//! script fetched from a URL. The last three are untrusted and are only
//! resolvable when the registry policy allows it.
//!
//! Resolution happens once, in [`MappingRegistry::resolve`]; the result is a
//! [`ResolvedMapper`] that callers invoke without knowing its strategy.

pub mod builtin;
pub mod contract;
pub mod invoke;
pub mod ops;
pub mod registry;
pub mod script;
pub mod strategy;
pub mod template;
pub mod xpath;

pub use contract::{ArgKind, ArgSpec, InputContract};
pub use invoke::{invoke, DEFAULT_MAPPING_TIMEOUT};
pub use registry::{Catalog, MappingRegistry, PluginDescriptor, ResolutionPolicy, ResolvedMapper};
pub use script::Script;
pub use strategy::{PluginSpec, SerializedMapper, StrategyDescriptor, StrategyKind, TrustTier};
pub use template::{Template, TemplateDocument};

use bagsmith_remote::RemoteError;
use bagsmith_schema::{BagInfo, PluginContext, PluginName};
use std::time::Duration;
use thiserror::Error;

/// Failure to turn a `PluginSpec` into a callable mapper.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("mapping strategy '{strategy}' is disabled; set mapping.allow_untrusted to enable it")]
    ResolutionDisabled { strategy: StrategyKind },
    #[error("no mapper '{name}' registered for context '{context}'")]
    NotFound {
        name: PluginName,
        context: PluginContext,
    },
    #[error("mapper '{name}' is already registered for context '{context}'")]
    DuplicatePlugin {
        name: PluginName,
        context: PluginContext,
    },
    #[error("invalid mapper source ({origin}{}): {reason}", .line.map(|l| format!(", line {l}")).unwrap_or_default())]
    InvalidSource {
        origin: String,
        line: Option<usize>,
        reason: String,
    },
    #[error("invalid arguments for mapper '{plugin}': {}", .problems.join("; "))]
    InvalidArguments {
        plugin: String,
        problems: Vec<String>,
    },
    #[error("failed to fetch mapper from '{url}': {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: RemoteError,
    },
    #[error("I/O error loading mappers from '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ResolutionError {
    pub(crate) fn invalid_source(
        origin: impl Into<String>,
        line: Option<usize>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidSource {
            origin: origin.into(),
            line,
            reason: reason.into(),
        }
    }
}

/// Failure while a resolved mapper runs.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("mapper needs source metadata but the entity has none")]
    MissingSourceMetadata,
    #[error("source metadata is not well-formed XML: {0}")]
    InvalidSourceMetadata(String),
    #[error("required field '{key}' has no value in the source metadata")]
    MissingField { key: String },
    #[error("mapping script exceeded its budget of {budget} operations")]
    BudgetExhausted { budget: u64 },
    #[error("mapper did not finish within {}s", .after.as_secs_f64())]
    Timeout { after: Duration },
    #[error("mapper crashed: {0}")]
    Crashed(String),
    #[error("mapper produced an invalid tag name {key:?}")]
    InvalidTag { key: String },
    #[error("{0}")]
    Failed(String),
}

/// Everything a mapper may see: an owned snapshot of the entity's source
/// metadata and the request arguments.
#[derive(Debug, Clone, Default)]
pub struct MappingInput {
    pub source_metadata: Option<String>,
    pub args: serde_json::Map<String, serde_json::Value>,
}

impl MappingInput {
    pub fn new(source_metadata: Option<String>) -> Self {
        Self {
            source_metadata,
            args: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: serde_json::Map<String, serde_json::Value>) -> Self {
        self.args = args;
        self
    }

    /// Parse the source metadata document.
    pub(crate) fn document(&self) -> Result<roxmltree::Document<'_>, MappingError> {
        let text = self
            .source_metadata
            .as_deref()
            .ok_or(MappingError::MissingSourceMetadata)?;
        roxmltree::Document::parse(text).map_err(|e| MappingError::InvalidSourceMetadata(e.to_string()))
    }
}

/// A metadata mapper. Implementations must not keep state between calls.
pub trait Mapper: Send + Sync {
    fn map(&self, input: &MappingInput) -> Result<BagInfo, MappingError>;

    /// Arguments this mapper accepts.
    fn contract(&self) -> InputContract {
        InputContract::default()
    }
}

/// String values of a request argument: scalars as their text, arrays
/// flattened, null as nothing.
pub(crate) fn arg_values(value: &serde_json::Value) -> Vec<String> {
    use serde_json::Value;
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(arg_values).collect(),
        Value::Bool(_) | Value::Number(_) | Value::Object(_) => vec![value.to_string()],
    }
}
