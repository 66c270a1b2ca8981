use crate::template::TemplateDocument;
use bagsmith_schema::{PluginContext, PluginName};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a mapper is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Declarative,
    Registered,
    Inline,
    Serialized,
    Remote,
}

impl StrategyKind {
    pub const ALL: [Self; 5] = [
        Self::Declarative,
        Self::Registered,
        Self::Inline,
        Self::Serialized,
        Self::Remote,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Declarative => "declarative",
            Self::Registered => "registered",
            Self::Inline => "inline",
            Self::Serialized => "serialized",
            Self::Remote => "remote",
        }
    }

    /// Declarative templates carry no code and registered mappers come from
    /// the operator; everything else is request-supplied code.
    pub fn trust(self) -> TrustTier {
        match self {
            Self::Declarative | Self::Registered => TrustTier::Trusted,
            Self::Inline | Self::Serialized | Self::Remote => TrustTier::Untrusted,
        }
    }

    /// Whether the mapper itself arrives with the request.
    pub fn is_request_time(self) -> bool {
        !matches!(self, Self::Registered)
    }

    pub fn summary(self) -> &'static str {
        match self {
            Self::Declarative => "JSON template of XPath rules and static values",
            Self::Registered => "mapper registered by name at startup",
            Self::Inline => "mapping script supplied as source text",
            Self::Serialized => "base64 encoded template or script object",
            Self::Remote => "mapping script fetched from a URL",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    Trusted,
    Untrusted,
}

/// A request's choice of mapper.
///
/// ```json
/// { "strategy": "registered", "name": "oai-dc" }
/// { "strategy": "inline", "source": "map DC-Title <- //title", "args": {} }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum PluginSpec {
    Declarative {
        template: TemplateDocument,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        args: serde_json::Map<String, serde_json::Value>,
    },
    Registered {
        name: PluginName,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<PluginContext>,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        args: serde_json::Map<String, serde_json::Value>,
    },
    Inline {
        source: String,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        args: serde_json::Map<String, serde_json::Value>,
    },
    Serialized {
        object: String,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        args: serde_json::Map<String, serde_json::Value>,
    },
    Remote {
        url: String,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        args: serde_json::Map<String, serde_json::Value>,
    },
}

impl PluginSpec {
    pub fn registered(name: impl Into<PluginName>) -> Self {
        Self::Registered {
            name: name.into(),
            context: None,
            args: serde_json::Map::new(),
        }
    }

    pub fn inline(source: impl Into<String>) -> Self {
        Self::Inline {
            source: source.into(),
            args: serde_json::Map::new(),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Declarative { .. } => StrategyKind::Declarative,
            Self::Registered { .. } => StrategyKind::Registered,
            Self::Inline { .. } => StrategyKind::Inline,
            Self::Serialized { .. } => StrategyKind::Serialized,
            Self::Remote { .. } => StrategyKind::Remote,
        }
    }

    pub fn args(&self) -> &serde_json::Map<String, serde_json::Value> {
        match self {
            Self::Declarative { args, .. }
            | Self::Registered { args, .. }
            | Self::Inline { args, .. }
            | Self::Serialized { args, .. }
            | Self::Remote { args, .. } => args,
        }
    }

    #[must_use]
    pub fn with_args(mut self, new_args: serde_json::Map<String, serde_json::Value>) -> Self {
        match &mut self {
            Self::Declarative { args, .. }
            | Self::Registered { args, .. }
            | Self::Inline { args, .. }
            | Self::Serialized { args, .. }
            | Self::Remote { args, .. } => *args = new_args,
        }
        self
    }
}

/// Decoded content of a `serialized` spec's `object`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SerializedMapper {
    Template(TemplateDocument),
    Script {
        source: String,
    },
}

impl SerializedMapper {
    /// Encode as a `serialized` spec object.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        use base64::Engine as _;
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::STANDARD.encode(json))
    }

    pub fn decode(object: &str) -> Result<Self, String> {
        use base64::Engine as _;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(object.trim())
            .map_err(|e| format!("not valid base64: {e}"))?;
        serde_json::from_slice(&bytes).map_err(|e| format!("not a serialized mapper: {e}"))
    }
}

/// Introspection entry for a request-time strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyDescriptor {
    pub strategy: StrategyKind,
    pub trust: TrustTier,
    pub description: &'static str,
}

impl From<StrategyKind> for StrategyDescriptor {
    fn from(strategy: StrategyKind) -> Self {
        Self {
            strategy,
            trust: strategy.trust(),
            description: strategy.summary(),
        }
    }
}
