//! Mapper registry and resolution.
//!
//! Registered mappers are keyed by `(name, context)` in a `BTreeMap`, so
//! iteration and introspection order never depends on registration order.
//! Request-time strategies are resolved on demand and never stored.

use crate::builtin::{OaiDcMapper, OAI_DC};
use crate::contract::InputContract;
use crate::script::{Script, DEFAULT_SCRIPT_BUDGET};
use crate::strategy::{PluginSpec, SerializedMapper, StrategyDescriptor, StrategyKind, TrustTier};
use crate::template::{Template, TemplateDocument};
use crate::{Mapper, MappingError, ResolutionError};
use bagsmith_remote::{FetchConfig, Fetcher, HttpFetcher};
use bagsmith_schema::{BagInfo, PluginContext, PluginName};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Self-description of a mapper, available without invoking it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDescriptor {
    pub name: PluginName,
    pub context: PluginContext,
    pub display_name: String,
    pub description: String,
    pub strategy: StrategyKind,
    pub trust: TrustTier,
    pub contract: InputContract,
    /// blake3 of the mapper source, for mappers that have one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<String>,
}

impl PluginDescriptor {
    /// Descriptor for a mapper registered at startup under the default context.
    pub fn registered(name: impl Into<PluginName>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.to_string(),
            name,
            context: PluginContext::default(),
            description: description.into(),
            strategy: StrategyKind::Registered,
            trust: TrustTier::Trusted,
            contract: InputContract::default(),
            source_digest: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<PluginContext>) -> Self {
        self.context = context.into();
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    fn request_time(strategy: StrategyKind, source: &[u8], description: Option<&str>) -> Self {
        Self {
            name: PluginName::new(strategy.as_str()),
            context: PluginContext::default(),
            display_name: format!("{strategy} mapper"),
            description: description.unwrap_or(strategy.summary()).to_owned(),
            strategy,
            trust: strategy.trust(),
            contract: InputContract::default(),
            source_digest: Some(source_digest(source)),
        }
    }
}

pub fn source_digest(source: &[u8]) -> String {
    blake3::hash(source).to_hex().to_string()
}

/// What the registry may resolve.
#[derive(Debug, Clone)]
pub struct ResolutionPolicy {
    /// Enables the inline, serialized and remote strategies.
    pub allow_untrusted: bool,
    pub script_budget: u64,
    pub fetch: FetchConfig,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            allow_untrusted: false,
            script_budget: DEFAULT_SCRIPT_BUDGET,
            fetch: FetchConfig::default(),
        }
    }
}

impl ResolutionPolicy {
    pub fn permits(&self, strategy: StrategyKind) -> bool {
        strategy.trust() == TrustTier::Trusted || self.allow_untrusted
    }
}

/// A mapper ready to run, with its arguments already checked.
#[derive(Clone)]
pub struct ResolvedMapper {
    descriptor: PluginDescriptor,
    mapper: Arc<dyn Mapper>,
    args: serde_json::Map<String, serde_json::Value>,
}

impl ResolvedMapper {
    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn args(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.args
    }

    pub fn implementation(&self) -> Arc<dyn Mapper> {
        Arc::clone(&self.mapper)
    }

    /// Run with a bounded timeout. See [`crate::invoke`].
    pub fn invoke(&self, source_metadata: Option<String>, timeout: Duration) -> Result<BagInfo, MappingError> {
        crate::invoke::invoke(self, source_metadata, timeout)
    }
}

impl std::fmt::Debug for ResolvedMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedMapper")
            .field("descriptor", &self.descriptor)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Introspection result of [`MappingRegistry::describe`].
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub plugins: Vec<PluginDescriptor>,
    /// Request-time strategies currently enabled.
    pub strategies: Vec<StrategyDescriptor>,
}

struct Registered {
    descriptor: PluginDescriptor,
    mapper: Arc<dyn Mapper>,
}

pub struct MappingRegistry {
    plugins: BTreeMap<(PluginName, PluginContext), Registered>,
    policy: ResolutionPolicy,
    fetcher: Arc<dyn Fetcher>,
}

impl MappingRegistry {
    /// An empty registry. Remote mappers are fetched over HTTP with the
    /// policy's fetch limits.
    pub fn new(policy: ResolutionPolicy) -> Self {
        let fetcher = Arc::new(HttpFetcher::new(policy.fetch.clone().remote_only()));
        Self {
            plugins: BTreeMap::new(),
            policy,
            fetcher,
        }
    }

    /// A registry holding the built-in mappers.
    pub fn with_builtins(policy: ResolutionPolicy) -> Result<Self, ResolutionError> {
        let mut registry = Self::new(policy);
        registry.register_builtins()?;
        Ok(registry)
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn register_builtins(&mut self) -> Result<(), ResolutionError> {
        let oai_dc = OaiDcMapper::new().map_err(|reason| ResolutionError::invalid_source(OAI_DC, None, reason))?;
        self.register(
            PluginDescriptor::registered(OAI_DC, OaiDcMapper::DESCRIPTION)
                .with_display_name(OaiDcMapper::DISPLAY_NAME),
            Arc::new(oai_dc),
        )
    }

    /// Register a mapper. The descriptor's contract is replaced by the
    /// mapper's own.
    pub fn register(&mut self, mut descriptor: PluginDescriptor, mapper: Arc<dyn Mapper>) -> Result<(), ResolutionError> {
        let key = (descriptor.name.clone(), descriptor.context.clone());
        if self.plugins.contains_key(&key) {
            return Err(ResolutionError::DuplicatePlugin {
                name: key.0,
                context: key.1,
            });
        }
        descriptor.contract = mapper.contract();
        debug!("registered mapper '{}' ({})", descriptor.name, descriptor.context);
        self.plugins.insert(key, Registered { descriptor, mapper });
        Ok(())
    }

    /// Register every `*.json` template and `*.map` script in `dir` under
    /// its file stem. Other files are ignored. Returns the number loaded.
    pub fn load_extension_dir(&mut self, dir: &Path) -> Result<usize, ResolutionError> {
        let io_error = |path: &Path, source: std::io::Error| ResolutionError::Io {
            path: path.display().to_string(),
            source,
        };
        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
            paths.push(entry.map_err(|e| io_error(dir, e))?.path());
        }
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let extension = path.extension().and_then(|e| e.to_str());
            if !matches!(extension, Some("json" | "map")) || !path.is_file() {
                debug!("ignoring {}", path.display());
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let origin = path.display().to_string();
            let text = fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;

            let (mapper, context, description): (Arc<dyn Mapper>, Option<String>, Option<String>) =
                if extension == Some("json") {
                    let template = Template::from_json_str(&text)
                        .map_err(|(line, reason)| ResolutionError::invalid_source(&origin, line, reason))?;
                    let context = template.context().map(str::to_owned);
                    let description = template.description().map(str::to_owned);
                    (Arc::new(template), context, description)
                } else {
                    let script = Script::parse(&text, self.policy.script_budget)
                        .map_err(|(line, reason)| ResolutionError::invalid_source(&origin, Some(line), reason))?;
                    let context = script.context().map(str::to_owned);
                    let description = script.description().map(str::to_owned);
                    (Arc::new(script), context, description)
                };

            let mut descriptor = PluginDescriptor::registered(
                stem,
                description.unwrap_or_else(|| format!("mapper loaded from {origin}")),
            );
            if let Some(context) = context.filter(|c| !c.is_empty()) {
                descriptor = descriptor.with_context(context);
            }
            descriptor.source_digest = Some(source_digest(text.as_bytes()));
            self.register(descriptor, mapper)?;
            loaded += 1;
        }
        info!("loaded {loaded} mappers from {}", dir.display());
        Ok(loaded)
    }

    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn get(&self, name: &str, context: &str) -> Option<&PluginDescriptor> {
        self.plugins
            .get(&(PluginName::new(name), PluginContext::new(context)))
            .map(|r| &r.descriptor)
    }

    /// Registered mappers in `(name, context)` order, plus the request-time
    /// strategies the policy enables. Never invokes a mapper.
    pub fn describe(&self) -> Catalog {
        Catalog {
            plugins: self.plugins.values().map(|r| r.descriptor.clone()).collect(),
            strategies: StrategyKind::ALL
                .into_iter()
                .filter(|k| k.is_request_time() && self.policy.permits(*k))
                .map(StrategyDescriptor::from)
                .collect(),
        }
    }

    /// Turn `spec` into a runnable mapper.
    ///
    /// Untrusted strategies are refused before their payload is decoded or
    /// fetched when the policy does not allow them.
    pub fn resolve(&self, spec: &PluginSpec) -> Result<ResolvedMapper, ResolutionError> {
        let strategy = spec.kind();
        if !self.policy.permits(strategy) {
            warn!("refusing {strategy} mapper: untrusted strategies are disabled");
            return Err(ResolutionError::ResolutionDisabled { strategy });
        }

        let (mut descriptor, mapper): (PluginDescriptor, Arc<dyn Mapper>) = match spec {
            PluginSpec::Registered { name, context, .. } => {
                let context = context.clone().unwrap_or_default();
                let registered = self
                    .plugins
                    .get(&(name.clone(), context.clone()))
                    .ok_or_else(|| ResolutionError::NotFound {
                        name: name.clone(),
                        context,
                    })?;
                (registered.descriptor.clone(), Arc::clone(&registered.mapper))
            }
            PluginSpec::Declarative { template, .. } => self.declarative(template, strategy)?,
            PluginSpec::Inline { source, .. } => self.script(source, "inline", strategy)?,
            PluginSpec::Serialized { object, .. } => {
                let decoded = SerializedMapper::decode(object)
                    .map_err(|reason| ResolutionError::invalid_source("serialized", None, reason))?;
                match decoded {
                    SerializedMapper::Template(template) => {
                        let (mut descriptor, mapper) = self.declarative(&template, strategy)?;
                        descriptor.source_digest = Some(source_digest(object.trim().as_bytes()));
                        (descriptor, mapper)
                    }
                    SerializedMapper::Script { source } => {
                        let (mut descriptor, mapper) = self.script(&source, "serialized", strategy)?;
                        descriptor.source_digest = Some(source_digest(object.trim().as_bytes()));
                        (descriptor, mapper)
                    }
                }
            }
            PluginSpec::Remote { url, .. } => {
                debug!("fetching mapper from {url}");
                let source = self
                    .fetcher
                    .fetch_text(url)
                    .map_err(|source| ResolutionError::FetchFailed {
                        url: url.clone(),
                        source,
                    })?;
                let (mut descriptor, mapper) = self.script(&source, url, strategy)?;
                if descriptor.description == strategy.summary() {
                    descriptor.description = format!("mapping script from {url}");
                }
                (descriptor, mapper)
            }
        };
        descriptor.contract = mapper.contract();

        descriptor
            .contract
            .check(spec.args())
            .map_err(|problems| ResolutionError::InvalidArguments {
                plugin: descriptor.name.to_string(),
                problems,
            })?;

        debug!(
            "resolved {} mapper '{}' ({}) digest={}",
            strategy,
            descriptor.name,
            descriptor.context,
            descriptor.source_digest.as_deref().unwrap_or("-")
        );
        Ok(ResolvedMapper {
            descriptor,
            mapper,
            args: spec.args().clone(),
        })
    }

    fn declarative(
        &self,
        template: &TemplateDocument,
        strategy: StrategyKind,
    ) -> Result<(PluginDescriptor, Arc<dyn Mapper>), ResolutionError> {
        let compiled = Template::compile(template)
            .map_err(|(line, reason)| ResolutionError::invalid_source("template", line, reason))?;
        let canonical = serde_json::to_vec(template)
            .map_err(|e| ResolutionError::invalid_source("template", None, e.to_string()))?;
        let mut descriptor = PluginDescriptor::request_time(strategy, &canonical, compiled.description());
        if let Some(context) = compiled.context().filter(|c| !c.is_empty()) {
            descriptor.context = PluginContext::new(context);
        }
        Ok((descriptor, Arc::new(compiled)))
    }

    fn script(
        &self,
        source: &str,
        origin: &str,
        strategy: StrategyKind,
    ) -> Result<(PluginDescriptor, Arc<dyn Mapper>), ResolutionError> {
        let script = Script::parse(source, self.policy.script_budget)
            .map_err(|(line, reason)| ResolutionError::invalid_source(origin, Some(line), reason))?;
        let mut descriptor = PluginDescriptor::request_time(strategy, source.as_bytes(), script.description());
        if let Some(context) = script.context().filter(|c| !c.is_empty()) {
            descriptor.context = PluginContext::new(context);
        }
        Ok((descriptor, Arc::new(script)))
    }
}
