//! Compiled, immutable form of a [`ProfileDocument`].
//!
//! Every pattern is compiled once at load time, so an unusable profile fails
//! before any package is looked at.

use crate::profile::{
    parse_profile_file, parse_profile_str, FolderSpec, ProfileDocument, ProfileError,
    SerializationPolicy, TagSpec,
};
use crate::types::ProfileId;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;

/// How a tag value is checked.
#[derive(Debug, Clone)]
pub enum ValueMatcher {
    /// Must match the whole value.
    Pattern(Regex),
    OneOf(BTreeSet<String>),
}

impl ValueMatcher {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Pattern(re) => re.is_match(value),
            Self::OneOf(set) => set.contains(value),
        }
    }

    /// Human-readable description used in findings.
    pub fn describe(&self) -> String {
        match self {
            Self::Pattern(re) => {
                let src = re.as_str();
                let inner = src
                    .strip_prefix("^(?:")
                    .and_then(|s| s.strip_suffix(")$"))
                    .unwrap_or(src);
                format!("pattern '{inner}'")
            }
            Self::OneOf(set) => {
                let items: Vec<&str> = set.iter().map(String::as_str).collect();
                format!("one of [{}]", items.join(", "))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TagRule {
    pub name: String,
    pub required: bool,
    pub repeatable: bool,
    pub matchers: Vec<ValueMatcher>,
}

impl TagRule {
    fn compile(name: &str, spec: &TagSpec) -> Result<Self, ProfileError> {
        let mut matchers = Vec::new();
        if let Some(values) = &spec.values {
            matchers.push(ValueMatcher::OneOf(values.iter().cloned().collect()));
        }
        if let Some(pattern) = spec.pattern() {
            matchers.push(ValueMatcher::Pattern(full_match(name, pattern)?));
        }
        Ok(Self {
            name: name.to_owned(),
            required: spec.required,
            repeatable: spec.repeatable,
            matchers,
        })
    }

    /// The first matcher `value` fails, if any.
    pub fn rejecting_matcher(&self, value: &str) -> Option<&ValueMatcher> {
        self.matchers.iter().find(|m| !m.matches(value))
    }
}

/// Required and allowed algorithm names for one kind of manifest.
///
/// Names are kept as written (lower-cased) so packages carrying algorithms
/// this crate cannot compute can still be judged.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmPolicy {
    pub required: BTreeSet<String>,
    /// `None` allows any algorithm.
    pub allowed: Option<BTreeSet<String>>,
}

impl AlgorithmPolicy {
    fn new(required: &[String], allowed: Option<&Vec<String>>) -> Self {
        Self {
            required: required.iter().map(|s| s.to_ascii_lowercase()).collect(),
            allowed: allowed.map(|a| a.iter().map(|s| s.to_ascii_lowercase()).collect()),
        }
    }

    pub fn allows(&self, algorithm: &str) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |set| set.contains(&algorithm.to_ascii_lowercase()))
    }
}

/// A `*`/`**` path pattern such as `meta/*`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self, ProfileError> {
        let mut re = String::from("^");
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' if chars.peek() == Some(&'*') => {
                    chars.next();
                    re.push_str(".*");
                }
                '*' => re.push_str("[^/]*"),
                '?' => re.push_str("[^/]"),
                other => re.push_str(&regex::escape(&other.to_string())),
            }
        }
        re.push('$');
        let regex = Regex::new(&re).map_err(|source| ProfileError::InvalidPattern {
            subject: pattern.to_owned(),
            source,
        })?;
        Ok(Self {
            source: pattern.to_owned(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// An allowed payload folder. Matches any path below it, relative to `data/`.
#[derive(Debug, Clone)]
pub struct FolderRule {
    source: String,
    regex: Regex,
}

impl FolderRule {
    fn compile(spec: &FolderSpec) -> Result<Self, ProfileError> {
        let (source, body) = match spec {
            FolderSpec::Literal(s) => (s.clone(), regex::escape(s.trim_end_matches('/'))),
            FolderSpec::Regex { regex } => (regex.clone(), regex.trim_end_matches('/').to_owned()),
        };
        let regex = Regex::new(&format!("^(?:{body})/")).map_err(|source_err| {
            ProfileError::InvalidPattern {
                subject: format!("Payload-Folders-Allowed '{source}'"),
                source: source_err,
            }
        })?;
        Ok(Self { source, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True if `path` (relative to `data/`) lies inside this folder.
    pub fn contains(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// True if `folder` itself is covered by this rule.
    pub fn covers_folder(&self, folder: &str) -> bool {
        self.contains(&format!("{}/", folder.trim_end_matches('/')))
    }
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    identifier: Option<ProfileId>,
    tags: Vec<TagRule>,
    tags_closed: bool,
    manifests: AlgorithmPolicy,
    tag_manifests: AlgorithmPolicy,
    tag_files_required: Vec<String>,
    tag_files_allowed: Option<Vec<PathPattern>>,
    allow_fetch: bool,
    serialization: SerializationPolicy,
    accept_serialization: BTreeSet<String>,
    accept_versions: BTreeSet<String>,
    payload_required: bool,
    payload_folders_allowed: Option<Vec<FolderRule>>,
    payload_folders_required: Vec<String>,
}

impl RuleSet {
    pub fn compile(doc: &ProfileDocument) -> Result<Self, ProfileError> {
        // BTreeMap iteration keeps the arena sorted by tag name.
        let tags = doc
            .bag_info
            .iter()
            .map(|(name, spec)| TagRule::compile(name, spec))
            .collect::<Result<Vec<_>, _>>()?;

        let tag_files_allowed = doc
            .tag_files_allowed
            .as_ref()
            .map(|patterns| {
                patterns
                    .iter()
                    .map(|p| PathPattern::compile(p))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        let payload_folders_allowed = doc
            .payload_folders_allowed
            .as_ref()
            .map(|folders| {
                folders
                    .iter()
                    .map(FolderRule::compile)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        let mut tag_files_required = doc.tag_files_required.clone();
        tag_files_required.sort();
        tag_files_required.dedup();
        let mut payload_folders_required: Vec<String> = doc
            .payload_folders_required
            .iter()
            .map(|f| f.trim_end_matches('/').to_owned())
            .collect();
        payload_folders_required.sort();
        payload_folders_required.dedup();

        Ok(Self {
            identifier: doc.info.identifier.clone().map(ProfileId::new),
            tags,
            tags_closed: doc.bag_info_closed,
            manifests: AlgorithmPolicy::new(
                &doc.manifests_required,
                doc.manifests_allowed.as_ref(),
            ),
            tag_manifests: AlgorithmPolicy::new(
                &doc.tag_manifests_required,
                doc.tag_manifests_allowed.as_ref(),
            ),
            tag_files_required,
            tag_files_allowed,
            allow_fetch: doc.allow_fetch,
            serialization: doc.serialization,
            accept_serialization: doc.accept_serialization.iter().cloned().collect(),
            accept_versions: doc.accept_bagit_version.iter().cloned().collect(),
            payload_required: doc.payload_required,
            payload_folders_allowed,
            payload_folders_required,
        })
    }

    pub fn from_json_str(input: &str) -> Result<Self, ProfileError> {
        Self::compile(&parse_profile_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        Self::compile(&parse_profile_file(path)?)
    }

    pub fn identifier(&self) -> Option<&ProfileId> {
        self.identifier.as_ref()
    }

    /// Tag rules, sorted by name.
    pub fn tags(&self) -> &[TagRule] {
        &self.tags
    }

    pub fn tag(&self, name: &str) -> Option<&TagRule> {
        self.tags
            .binary_search_by(|rule| rule.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.tags[idx])
    }

    /// Whether tags not declared in the profile are rejected.
    pub fn tags_closed(&self) -> bool {
        self.tags_closed
    }

    pub fn manifests(&self) -> &AlgorithmPolicy {
        &self.manifests
    }

    pub fn tag_manifests(&self) -> &AlgorithmPolicy {
        &self.tag_manifests
    }

    pub fn tag_files_required(&self) -> &[String] {
        &self.tag_files_required
    }

    pub fn tag_files_allowed(&self) -> Option<&[PathPattern]> {
        self.tag_files_allowed.as_deref()
    }

    pub fn allow_fetch(&self) -> bool {
        self.allow_fetch
    }

    pub fn serialization(&self) -> SerializationPolicy {
        self.serialization
    }

    pub fn accept_serialization(&self) -> &BTreeSet<String> {
        &self.accept_serialization
    }

    /// Accepted `BagIt-Version` tokens; empty accepts any.
    pub fn accept_versions(&self) -> &BTreeSet<String> {
        &self.accept_versions
    }

    pub fn payload_required(&self) -> bool {
        self.payload_required
    }

    pub fn payload_folders_allowed(&self) -> Option<&[FolderRule]> {
        self.payload_folders_allowed.as_deref()
    }

    pub fn payload_folders_required(&self) -> &[String] {
        &self.payload_folders_required
    }
}

fn full_match(subject: &str, pattern: &str) -> Result<Regex, ProfileError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| ProfileError::InvalidPattern {
        subject: subject.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ruleset(json: &str) -> RuleSet {
        RuleSet::from_json_str(json).unwrap()
    }

    #[test]
    fn tags_are_sorted_and_searchable() {
        let rs = ruleset(r#"{"Bag-Info": {"Z-Tag": {}, "A-Tag": {"required": true}}}"#);
        let names: Vec<&str> = rs.tags().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["A-Tag", "Z-Tag"]);
        assert!(rs.tag("A-Tag").unwrap().required);
        assert!(rs.tag("missing").is_none());
    }

    #[test]
    fn patterns_must_match_whole_value() {
        let rs = ruleset(r#"{"Bag-Info": {"Id": {"description": "[0-9]+"}}}"#);
        let rule = rs.tag("Id").unwrap();
        assert!(rule.rejecting_matcher("123").is_none());
        assert!(rule.rejecting_matcher("123a").is_some());
        assert!(rule.rejecting_matcher("a123").is_some());
    }

    #[test]
    fn alternation_is_anchored_as_a_whole() {
        let rs = ruleset(r#"{"Bag-Info": {"T": {"regex": "a|b"}}}"#);
        let rule = rs.tag("T").unwrap();
        assert!(rule.rejecting_matcher("a").is_none());
        assert!(rule.rejecting_matcher("ab").is_some());
    }

    #[test]
    fn enumerated_values() {
        let rs = ruleset(r#"{"Bag-Info": {"Org": {"values": ["A", "B"]}}}"#);
        let rule = rs.tag("Org").unwrap();
        assert!(rule.rejecting_matcher("A").is_none());
        let m = rule.rejecting_matcher("C").unwrap();
        assert_eq!(m.describe(), "one of [A, B]");
    }

    #[test]
    fn invalid_pattern_is_load_error() {
        let err = RuleSet::from_json_str(r#"{"Bag-Info": {"Bad": {"regex": "("}}}"#).unwrap_err();
        assert!(err.to_string().contains("Bad"));
    }

    #[test]
    fn pattern_describe_strips_anchors() {
        let rs = ruleset(r#"{"Bag-Info": {"T": {"regex": "x+"}}}"#);
        let m = rs.tag("T").unwrap().rejecting_matcher("y").unwrap();
        assert_eq!(m.describe(), "pattern 'x+'");
    }

    #[test]
    fn algorithm_policy_defaults_to_any() {
        let rs = ruleset("{}");
        assert!(rs.manifests().allows("sha384"));
        let rs = ruleset(r#"{"Manifests-Allowed": ["SHA256"]}"#);
        assert!(rs.manifests().allows("sha256"));
        assert!(!rs.manifests().allows("sha384"));
    }

    #[test]
    fn path_pattern_globs() {
        let single = PathPattern::compile("meta/*").unwrap();
        assert!(single.matches("meta/source_metadata.xml"));
        assert!(!single.matches("meta/sub/file.xml"));
        let deep = PathPattern::compile("meta/**").unwrap();
        assert!(deep.matches("meta/sub/file.xml"));
        let literal = PathPattern::compile("meta/a.b").unwrap();
        assert!(!literal.matches("meta/aXb"));
    }

    #[test]
    fn folder_rules_match_prefixes() {
        let rs = ruleset(
            r#"{"Payload-Folders-Allowed": ["preservation_master/", {"regex": "access_copy(_[0-9]+)?"}]}"#,
        );
        let folders = rs.payload_folders_allowed().unwrap();
        assert!(folders[0].contains("preservation_master/a.tif"));
        assert!(!folders[0].contains("preservation_master_x/a.tif"));
        assert!(folders[1].contains("access_copy_2/b.jpg"));
        assert!(!folders[1].contains("other/b.jpg"));
        assert!(folders[0].covers_folder("preservation_master"));
    }

    #[test]
    fn literal_folder_is_escaped() {
        let rs = ruleset(r#"{"Payload-Folders-Allowed": ["a.b"]}"#);
        let folder = &rs.payload_folders_allowed().unwrap()[0];
        assert!(folder.contains("a.b/file"));
        assert!(!folder.contains("aXb/file"));
    }

    #[test]
    fn identifier_and_required_folders() {
        let rs = ruleset(
            r#"{"BagIt-Profile-Info": {"BagIt-Profile-Identifier": "urn:p"},
                "Payload-Folders-Required": ["b/", "a", "a"]}"#,
        );
        assert_eq!(rs.identifier().unwrap().as_str(), "urn:p");
        assert_eq!(rs.payload_folders_required(), ["a", "b"]);
    }
}
