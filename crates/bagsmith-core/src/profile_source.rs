//! Locating the profile a package is validated against.

use crate::CoreError;
use bagsmith_remote::{Fetcher, HttpFetcher};
use bagsmith_schema::RuleSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A compiled profile and the reference it was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedProfile {
    pub rules: RuleSet,
    pub reference: String,
}

/// Loads profiles from paths or URLs, with a configured default.
///
/// Precedence: an explicit reference, then the package's
/// `BagIt-Profile-Identifier`, then the default profile. Only a declared
/// identifier that fails to load falls back to the default.
#[derive(Clone)]
pub struct ProfileResolver {
    fetcher: Arc<dyn Fetcher>,
    default_profile: Option<String>,
}

impl Default for ProfileResolver {
    fn default() -> Self {
        Self::new(Arc::new(HttpFetcher::default()))
    }
}

impl ProfileResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            default_profile: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default_profile: Option<String>) -> Self {
        self.default_profile = default_profile;
        self
    }

    pub fn default_profile(&self) -> Option<&str> {
        self.default_profile.as_deref()
    }

    /// Load and compile one profile document.
    pub fn load(&self, reference: &str) -> Result<LoadedProfile, CoreError> {
        let load_error = |reason: String| CoreError::ProfileLoad {
            reference: reference.to_owned(),
            reason,
        };
        debug!("loading profile {reference}");
        let text = self
            .fetcher
            .fetch_text(reference)
            .map_err(|e| load_error(e.to_string()))?;
        let rules = RuleSet::from_json_str(&text).map_err(|e| load_error(e.to_string()))?;
        Ok(LoadedProfile {
            rules,
            reference: reference.to_owned(),
        })
    }

    /// Pick and load the profile for a package that declares `declared` as
    /// its `BagIt-Profile-Identifier`.
    pub fn resolve(&self, explicit: Option<&str>, declared: Option<&str>) -> Result<LoadedProfile, CoreError> {
        if let Some(reference) = explicit {
            return self.load(reference);
        }
        if let Some(identifier) = declared.map(str::trim).filter(|s| !s.is_empty()) {
            match self.load(identifier) {
                Ok(profile) => return Ok(profile),
                Err(e) => match &self.default_profile {
                    Some(default) => {
                        warn!("{e}; falling back to default profile {default}");
                    }
                    None => return Err(e),
                },
            }
        }
        match &self.default_profile {
            Some(default) => {
                info!("using default profile {default}");
                self.load(default)
            }
            None => Err(CoreError::ProfileLoad {
                reference: "<none>".to_owned(),
                reason: "no profile given, the package declares none, and no default profile is configured"
                    .to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn write_profile(dir: &Path, name: &str, identifier: &str) -> String {
        let path = dir.join(name);
        fs::write(
            &path,
            format!(r#"{{"BagIt-Profile-Info": {{"BagIt-Profile-Identifier": "{identifier}"}}}}"#),
        )
        .unwrap();
        path.display().to_string()
    }

    fn identifier(profile: &LoadedProfile) -> &str {
        profile.rules.identifier().map_or("", |id| id.as_str())
    }

    #[test]
    fn explicit_reference_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = write_profile(dir.path(), "a.json", "a");
        let declared = write_profile(dir.path(), "b.json", "b");
        let resolver = ProfileResolver::default();
        let profile = resolver.resolve(Some(&explicit), Some(&declared)).unwrap();
        assert_eq!(identifier(&profile), "a");
        assert_eq!(profile.reference, explicit);
    }

    #[test]
    fn declared_identifier_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let declared = write_profile(dir.path(), "b.json", "b");
        let default = write_profile(dir.path(), "d.json", "d");
        let resolver = ProfileResolver::default().with_default(Some(default));
        assert_eq!(identifier(&resolver.resolve(None, Some(&declared)).unwrap()), "b");
    }

    #[test]
    fn unloadable_declared_profile_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let default = write_profile(dir.path(), "d.json", "d");
        let resolver = ProfileResolver::default().with_default(Some(default));
        let missing = dir.path().join("missing.json").display().to_string();
        assert_eq!(identifier(&resolver.resolve(None, Some(&missing)).unwrap()), "d");
        assert_eq!(identifier(&resolver.resolve(None, None).unwrap()), "d");
    }

    #[test]
    fn unloadable_declared_profile_without_default_fails() {
        let resolver = ProfileResolver::default();
        let err = resolver
            .resolve(None, Some("/nonexistent/profile.json"))
            .unwrap_err();
        assert!(matches!(err, CoreError::ProfileLoad { .. }));
    }

    #[test]
    fn explicit_reference_does_not_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let default = write_profile(dir.path(), "d.json", "d");
        let resolver = ProfileResolver::default().with_default(Some(default));
        assert!(resolver.resolve(Some("/nonexistent/p.json"), None).is_err());
    }

    #[test]
    fn nothing_to_resolve() {
        let err = ProfileResolver::default().resolve(None, None).unwrap_err();
        assert!(err.to_string().contains("no default profile"));
    }

    #[test]
    fn invalid_profile_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"Bag-Info": {"X": {"regex": "("}}}"#).unwrap();
        let err = ProfileResolver::default()
            .load(&path.display().to_string())
            .unwrap_err();
        assert!(matches!(err, CoreError::ProfileLoad { .. }));
    }
}
