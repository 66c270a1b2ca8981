//! Profile validation engine.
//!
//! [`validate`] is a pure function of a compiled [`RuleSet`], a discovered
//! [`Package`] and the options. Each rule category is an independent
//! predicate; the collected findings are sorted before the report is
//! returned, so the report never depends on evaluation order. A failing
//! package is a successful validation with findings, not an error.

use crate::profile_source::{LoadedProfile, ProfileResolver};
use crate::CoreError;
use bagsmith_schema::{
    ProfileId, RuleSet, SerializationPolicy, BAGGING_DATE, PAYLOAD_DIR, PAYLOAD_OXUM,
    PROFILE_IDENTIFIER,
};
use bagsmith_store::{
    detect_serialization, is_reserved_tag_file, unpack_package, verify_package, Package,
    Serialization, StoreError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// Rule category of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Tag,
    ManifestAlgorithm,
    TagFile,
    Serialization,
    PayloadPresence,
    Version,
    Fetch,
    PayloadStructure,
    Fixity,
}

impl Category {
    pub const ALL: [Self; 9] = [
        Self::Tag,
        Self::ManifestAlgorithm,
        Self::TagFile,
        Self::Serialization,
        Self::PayloadPresence,
        Self::Version,
        Self::Fetch,
        Self::PayloadStructure,
        Self::Fixity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::ManifestAlgorithm => "manifest-algorithm",
            Self::TagFile => "tag-file",
            Self::Serialization => "serialization",
            Self::PayloadPresence => "payload-presence",
            Self::Version => "version",
            Self::Fetch => "fetch",
            Self::PayloadStructure => "payload-structure",
            Self::Fixity => "fixity",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown check category '{s}'"))
    }
}

/// The categories a validation run evaluates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSet(BTreeSet<Category>);

impl Default for CheckSet {
    fn default() -> Self {
        Self::all()
    }
}

impl CheckSet {
    pub fn all() -> Self {
        Self(Category::ALL.into_iter().collect())
    }

    pub fn only(categories: impl IntoIterator<Item = Category>) -> Self {
        Self(categories.into_iter().collect())
    }

    #[must_use]
    pub fn without(mut self, category: Category) -> Self {
        self.0.remove(&category);
        self
    }

    pub fn contains(&self, category: Category) -> bool {
        self.0.contains(&category)
    }

    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        self.0.iter().copied()
    }
}

impl FromStr for CheckSet {
    type Err = String;

    /// Comma-separated category names, or `all`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::all());
        }
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Category::from_str)
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Finding {
    pub category: Category,
    /// Tag, file, folder or algorithm the finding is about.
    pub subject: String,
    pub message: String,
}

impl Finding {
    fn new(category: Category, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            subject: subject.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.subject.is_empty() {
            write!(f, "[{}] {}", self.category, self.message)
        } else {
            write!(f, "[{}] {}: {}", self.category, self.subject, self.message)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileId>,
    pub package: String,
    /// Content type the package was submitted as, if serialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serialization: Option<String>,
    pub findings: Vec<Finding>,
    /// Limits of the run that do not affect `valid`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl ValidationReport {
    fn from_findings(
        rules: &RuleSet,
        package: &Path,
        serialization: Option<Serialization>,
        mut findings: Vec<Finding>,
    ) -> Self {
        findings.sort();
        findings.dedup();
        Self {
            valid: findings.is_empty(),
            profile: rules.identifier().cloned(),
            package: package.display().to_string(),
            serialization: serialization.map(|s| s.content_type().to_owned()),
            findings,
            notes: Vec::new(),
        }
    }

    pub fn findings_in(&self, category: Category) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.category == category)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    pub checks: CheckSet,
    /// Compare bag-info tag names ASCII case-insensitively.
    pub tag_case_insensitive: bool,
}

/// Validate a discovered package. `serialization` is the form the package
/// was submitted in, `None` for a plain directory.
pub fn validate(
    rules: &RuleSet,
    package: &Package,
    serialization: Option<Serialization>,
    options: &ValidationOptions,
) -> ValidationReport {
    let mut findings = Vec::new();
    for category in options.checks.iter() {
        let before = findings.len();
        match category {
            Category::Tag => check_tags(rules, package, options.tag_case_insensitive, &mut findings),
            Category::ManifestAlgorithm => check_algorithms(rules, package, &mut findings),
            Category::TagFile => check_tag_files(rules, package, &mut findings),
            Category::Serialization => check_serialization(rules, serialization, &mut findings),
            Category::PayloadPresence => check_payload_presence(rules, package, &mut findings),
            Category::Version => check_version(rules, package, &mut findings),
            Category::Fetch => check_fetch(rules, package, &mut findings),
            Category::PayloadStructure => check_payload_structure(rules, package, &mut findings),
            Category::Fixity => check_fixity(package, &mut findings),
        }
        debug!("{category}: {} findings", findings.len() - before);
    }
    let report = ValidationReport::from_findings(rules, package.root(), serialization, findings);
    info!(
        "validated {}: {} ({} findings)",
        report.package,
        if report.valid { "valid" } else { "invalid" },
        report.findings.len()
    );
    report
}

/// A package as found at a path.
enum Target {
    Directory(Package),
    /// Unpacked archive; the scratch directory lives as long as the package.
    Unpacked {
        package: Package,
        serialization: Serialization,
        _scratch: tempfile::TempDir,
    },
    /// An archive whose contents cannot be inspected.
    Opaque(Serialization),
}

impl Target {
    fn open(path: &Path) -> Result<Self, CoreError> {
        if path.is_dir() {
            return Ok(Self::Directory(Package::open(path)?));
        }
        if !path.is_file() {
            return Err(StoreError::InvalidPackage(format!("'{}' does not exist", path.display())).into());
        }
        let serialization = detect_serialization(path)
            .ok_or_else(|| StoreError::UnsupportedSerialization(path.display().to_string()))?;
        if !serialization.can_unpack() {
            return Ok(Self::Opaque(serialization));
        }
        let scratch = tempfile::tempdir()?;
        let root = unpack_package(path, scratch.path())?;
        Ok(Self::Unpacked {
            package: Package::open(&root)?,
            serialization,
            _scratch: scratch,
        })
    }

    fn package(&self) -> Option<&Package> {
        match self {
            Self::Directory(package) | Self::Unpacked { package, .. } => Some(package),
            Self::Opaque(_) => None,
        }
    }

    fn validate(&self, rules: &RuleSet, path: &Path, options: &ValidationOptions) -> ValidationReport {
        match self {
            Self::Directory(package) => validate(rules, package, None, options),
            Self::Unpacked {
                package, serialization, ..
            } => {
                let mut report = validate(rules, package, Some(*serialization), options);
                report.package = path.display().to_string();
                report
            }
            Self::Opaque(serialization) => {
                let mut findings = Vec::new();
                if options.checks.contains(Category::Serialization) {
                    check_serialization(rules, Some(*serialization), &mut findings);
                }
                let mut report = ValidationReport::from_findings(rules, path, Some(*serialization), findings);
                report.notes.push(format!(
                    "contents of {} packages cannot be inspected; only the serialization policy was checked",
                    serialization.content_type()
                ));
                report
            }
        }
    }
}

/// Validate the package at `path`: a directory, or a serialized package.
///
/// A `.tar` archive is unpacked into a private temporary directory first.
/// Other archive formats are only checked against the serialization policy.
pub fn validate_path(
    rules: &RuleSet,
    path: &Path,
    options: &ValidationOptions,
) -> Result<ValidationReport, CoreError> {
    Ok(Target::open(path)?.validate(rules, path, options))
}

/// Like [`validate_path`], with the profile picked by `resolver`: `explicit`
/// if given, else the package's `BagIt-Profile-Identifier`, else the
/// resolver's default.
pub fn validate_discovered(
    resolver: &ProfileResolver,
    explicit: Option<&str>,
    path: &Path,
    options: &ValidationOptions,
) -> Result<(ValidationReport, LoadedProfile), CoreError> {
    let target = Target::open(path)?;
    let declared = target
        .package()
        .and_then(|p| p.bag_info.first(PROFILE_IDENTIFIER))
        .map(str::to_owned);
    let profile = resolver.resolve(explicit, declared.as_deref())?;
    let report = target.validate(&profile.rules, path, options);
    Ok((report, profile))
}

fn check_tags(rules: &RuleSet, package: &Package, case_insensitive: bool, out: &mut Vec<Finding>) {
    let info = &package.bag_info;
    for rule in rules.tags() {
        let values: Vec<&str> = if case_insensitive {
            info.get_ignore_case(&rule.name)
        } else {
            info.get(&rule.name)
                .map(|vs| vs.iter().map(String::as_str).collect())
                .unwrap_or_default()
        };
        if values.is_empty() {
            if rule.required {
                out.push(Finding::new(Category::Tag, &rule.name, "required tag is missing"));
            }
            continue;
        }
        if !rule.repeatable && values.len() > 1 {
            out.push(Finding::new(
                Category::Tag,
                &rule.name,
                format!("tag is not repeatable but has {} values", values.len()),
            ));
        }
        for value in values {
            if let Some(matcher) = rule.rejecting_matcher(value) {
                out.push(Finding::new(
                    Category::Tag,
                    &rule.name,
                    format!("value '{value}' does not match {}", matcher.describe()),
                ));
            }
        }
    }

    if rules.tags_closed() {
        let declared: BTreeSet<String> = rules
            .tags()
            .iter()
            .map(|r| normalize_tag(&r.name, case_insensitive))
            .collect();
        for key in info.keys() {
            let generated = [PAYLOAD_OXUM, BAGGING_DATE, PROFILE_IDENTIFIER]
                .iter()
                .any(|g| g.eq_ignore_ascii_case(key));
            if !generated && !declared.contains(&normalize_tag(key, case_insensitive)) {
                out.push(Finding::new(
                    Category::Tag,
                    key,
                    "tag is not declared by the profile",
                ));
            }
        }
    }
}

fn normalize_tag(name: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        name.to_ascii_lowercase()
    } else {
        name.to_owned()
    }
}

fn check_algorithms(rules: &RuleSet, package: &Package, out: &mut Vec<Finding>) {
    let groups = [
        ("payload manifest", rules.manifests(), &package.manifests),
        ("tag manifest", rules.tag_manifests(), &package.tag_manifests),
    ];
    for (kind, policy, present) in groups {
        for algorithm in present.keys() {
            if !policy.allows(algorithm) {
                let allowed: Vec<&str> = policy
                    .allowed
                    .iter()
                    .flatten()
                    .map(String::as_str)
                    .collect();
                out.push(Finding::new(
                    Category::ManifestAlgorithm,
                    algorithm,
                    format!("{kind} algorithm is not allowed (allowed: {})", allowed.join(", ")),
                ));
            }
        }
        for algorithm in &policy.required {
            if !present.contains_key(algorithm) {
                out.push(Finding::new(
                    Category::ManifestAlgorithm,
                    algorithm,
                    format!("required {kind} is missing"),
                ));
            }
        }
    }
}

fn check_tag_files(rules: &RuleSet, package: &Package, out: &mut Vec<Finding>) {
    if let Some(allowed) = rules.tag_files_allowed() {
        for file in &package.tag_files {
            if is_reserved_tag_file(file) {
                continue;
            }
            if !allowed.iter().any(|p| p.matches(file)) {
                out.push(Finding::new(Category::TagFile, file, "tag file is not allowed"));
            }
        }
    }
    for required in rules.tag_files_required() {
        if !package.tag_files.iter().any(|f| f == required) {
            out.push(Finding::new(
                Category::TagFile,
                required,
                "required tag file is missing",
            ));
        }
    }
}

fn check_serialization(rules: &RuleSet, serialization: Option<Serialization>, out: &mut Vec<Finding>) {
    match (rules.serialization(), serialization) {
        (SerializationPolicy::Forbidden, Some(s)) => out.push(Finding::new(
            Category::Serialization,
            s.content_type(),
            "profile forbids serialized packages",
        )),
        (SerializationPolicy::Required, None) => out.push(Finding::new(
            Category::Serialization,
            "directory",
            "profile requires a serialized package",
        )),
        _ => {}
    }
    if let Some(s) = serialization {
        let accepted = rules.accept_serialization();
        if !accepted.is_empty() && !accepted.contains(s.content_type()) {
            let list: Vec<&str> = accepted.iter().map(String::as_str).collect();
            out.push(Finding::new(
                Category::Serialization,
                s.content_type(),
                format!("serialization is not accepted (accepted: {})", list.join(", ")),
            ));
        }
    }
}

fn check_payload_presence(rules: &RuleSet, package: &Package, out: &mut Vec<Finding>) {
    if !rules.payload_required() {
        return;
    }
    let empty = package.payload_files.is_empty() && package.manifests.values().all(|m| m.is_empty());
    if empty {
        out.push(Finding::new(
            Category::PayloadPresence,
            PAYLOAD_DIR,
            "package has no payload but the profile requires one",
        ));
    }
}

fn check_version(rules: &RuleSet, package: &Package, out: &mut Vec<Finding>) {
    let accepted = rules.accept_versions();
    match &package.version {
        None => out.push(Finding::new(
            Category::Version,
            "bagit.txt",
            "package declares no BagIt-Version",
        )),
        Some(version) if !accepted.is_empty() && !accepted.contains(version) => {
            let list: Vec<&str> = accepted.iter().map(String::as_str).collect();
            out.push(Finding::new(
                Category::Version,
                version,
                format!("version is not accepted (accepted: {})", list.join(", ")),
            ));
        }
        Some(_) => {}
    }
}

fn check_fetch(rules: &RuleSet, package: &Package, out: &mut Vec<Finding>) {
    if package.has_fetch && !rules.allow_fetch() {
        out.push(Finding::new(
            Category::Fetch,
            "fetch.txt",
            "profile does not allow fetch.txt",
        ));
    }
}

fn check_payload_structure(rules: &RuleSet, package: &Package, out: &mut Vec<Finding>) {
    let allowed = rules.payload_folders_allowed();
    let payload_dir = package.layout().payload_dir();

    for folder in rules.payload_folders_required() {
        if let Some(allowed) = allowed {
            if !allowed.iter().any(|rule| rule.covers_folder(folder)) {
                out.push(Finding::new(
                    Category::PayloadStructure,
                    folder,
                    "required payload folder is not among the allowed folders",
                ));
            }
        }
        if !payload_dir.join(folder).is_dir() {
            out.push(Finding::new(
                Category::PayloadStructure,
                folder,
                "required payload folder is missing",
            ));
        }
    }

    let prefix = format!("{PAYLOAD_DIR}/");
    if let Some(allowed) = allowed {
        for file in &package.payload_files {
            let rel = file.strip_prefix(&prefix).unwrap_or(file);
            if !allowed.iter().any(|rule| rule.contains(rel)) {
                out.push(Finding::new(
                    Category::PayloadStructure,
                    file,
                    "payload file is not inside an allowed folder",
                ));
            }
        }
    }

    let mut by_lowercase: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for file in &package.payload_files {
        by_lowercase.entry(file.to_lowercase()).or_default().push(file);
    }
    for names in by_lowercase.values().filter(|names| names.len() > 1) {
        for name in &names[1..] {
            out.push(Finding::new(
                Category::PayloadStructure,
                *name,
                format!("file name differs only in case from '{}'", names[0]),
            ));
        }
    }
}

fn check_fixity(package: &Package, out: &mut Vec<Finding>) {
    match verify_package(package) {
        Ok(report) => {
            for failure in report.failed {
                out.push(Finding::new(Category::Fixity, failure.path, failure.reason));
            }
        }
        Err(e) => out.push(Finding::new(Category::Fixity, "", e.to_string())),
    }
}
