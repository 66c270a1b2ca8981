#![allow(unsafe_code)]

use bagsmith_core::{
    serialize_package, validate_path, BuildRequest, Builder, BuilderConfig, CancelToken, Category,
    CoreError, ErrorKind, ServiceConfig, ValidationOptions,
};
use bagsmith_mapping::{
    Mapper, MappingError, MappingInput, MappingRegistry, PluginDescriptor, PluginSpec,
    ResolutionError, ResolutionPolicy,
};
use bagsmith_schema::{BagInfo, RuleSet};
use bagsmith_store::{verify_package, Package};
use serde_json::json;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// Skip test if running as root: root bypasses filesystem permission checks.
fn skip_if_root() -> bool {
    #[allow(unsafe_code)]
    unsafe {
        libc::getuid() == 0
    }
}

const RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <GetRecord>
    <record>
      <header>
        <identifier>repo:items:4711</identifier>
      </header>
      <metadata>
        <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/"
                   xmlns:dc="http://purl.org/dc/elements/1.1/">
          <dc:title>Field notes</dc:title>
          <dc:creator>Doe, Jane</dc:creator>
          <dc:rights>CC BY 4.0</dc:rights>
          <dc:identifier>10.1234/abc.42</dc:identifier>
        </oai_dc:dc>
      </metadata>
    </record>
  </GetRecord>
</OAI-PMH>"#;

fn make_entity(dir: &Path) -> PathBuf {
    let entity = dir.join("entity");
    fs::create_dir_all(entity.join("data/images")).unwrap();
    fs::write(entity.join("data/report.txt"), b"quarterly report\n").unwrap();
    fs::write(entity.join("data/images/scan.tif"), vec![7u8; 4096]).unwrap();
    fs::create_dir_all(entity.join("meta")).unwrap();
    fs::write(entity.join("meta/source_metadata.xml"), RECORD).unwrap();
    entity
}

fn empty_entity(dir: &Path) -> PathBuf {
    let entity = dir.join("empty");
    fs::create_dir_all(entity.join("data")).unwrap();
    entity
}

fn builder() -> Builder {
    let registry = MappingRegistry::with_builtins(ResolutionPolicy::default()).unwrap();
    Builder::new(Arc::new(registry), BuilderConfig::default())
}

fn declarative(template: serde_json::Value) -> PluginSpec {
    serde_json::from_value(json!({"strategy": "declarative", "template": template})).unwrap()
}

fn profile(doc: &serde_json::Value) -> RuleSet {
    RuleSet::from_json_str(&doc.to_string()).unwrap()
}

fn archive_profile() -> RuleSet {
    profile(&json!({
        "BagIt-Profile-Info": {"BagIt-Profile-Identifier": "https://example.org/profiles/archive.json"},
        "Bag-Info": {
            "Source-Organization": {"required": true},
            "DC-Title": {"required": true},
            "DC-Creator": {"required": true},
            "Payload-Oxum": {"required": true, "repeatable": false}
        },
        "Manifests-Required": ["sha512"],
        "Manifests-Allowed": ["sha256", "sha512"],
        "Tag-Manifests-Required": ["sha256"],
        "Tag-Files-Required": ["meta/source_metadata.xml"],
        "Accept-BagIt-Version": ["1.0"],
        "Accept-Serialization": ["application/tar"],
        "Allow-Fetch.txt": false,
        "Payload-Required": true
    }))
}

fn leftovers(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".bagsmith-staging-"))
        .collect()
}

#[test]
fn oai_dc_package_satisfies_archive_profile() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let dest = dir.path().join("out/pkg");
    let request = BuildRequest::new(&entity, &dest, PluginSpec::registered("oai-dc"));

    let report = builder()
        .build_and_validate(
            &request,
            &CancelToken::new(),
            &archive_profile(),
            &ValidationOptions::default(),
        )
        .unwrap();

    assert!(report.validation.valid, "findings: {:?}", report.validation.findings);
    assert!(report.validation.findings.is_empty());
    assert_eq!(report.package.payload_oxum, "4113.2");
    assert_eq!(report.package.payload_files, 2);
    assert_eq!(report.package.plugin.name.as_str(), "oai-dc");

    let package = Package::open(&dest).unwrap();
    assert_eq!(package.bag_info.first("DC-Title"), Some("Field notes"));
    assert_eq!(package.bag_info.first("External-Identifier"), Some("4711"));
    assert_eq!(package.bag_info.first("Payload-Oxum"), Some("4113.2"));
    assert!(package.bag_info.first("Bagging-Date").is_none());
    assert!(verify_package(&package).unwrap().is_ok());
    assert!(leftovers(&dir.path().join("out")).is_empty());
}

#[test]
fn identical_input_builds_identical_packages() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let b = builder();
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    for dest in [&first, &second] {
        let request = BuildRequest::new(&entity, dest, PluginSpec::registered("oai-dc"));
        b.build(&request, &CancelToken::new()).unwrap();
    }
    for file in [
        "bagit.txt",
        "bag-info.txt",
        "manifest-sha256.txt",
        "manifest-sha512.txt",
        "tagmanifest-sha256.txt",
        "tagmanifest-sha512.txt",
    ] {
        assert_eq!(
            fs::read(first.join(file)).unwrap(),
            fs::read(second.join(file)).unwrap(),
            "{file} differs between builds"
        );
    }
}

#[test]
fn bagging_date_written_when_requested() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let dest = dir.path().join("dated");
    let request = BuildRequest::new(&entity, &dest, PluginSpec::registered("oai-dc")).with_bagging_date("2024-05-01");
    builder().build(&request, &CancelToken::new()).unwrap();
    let text = fs::read_to_string(dest.join("bag-info.txt")).unwrap();
    assert!(text.ends_with("Payload-Oxum: 4113.2\nBagging-Date: 2024-05-01\n"), "{text}");
}

#[test]
fn mapping_failure_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();
    let dest = out.join("pkg");
    let plugin = declarative(json!({
        "rules": [{"key": "DC-Subject", "path": "//subject", "required": true}]
    }));

    let err = builder()
        .build(&BuildRequest::new(&entity, &dest, plugin), &CancelToken::new())
        .unwrap_err();

    assert!(matches!(err, CoreError::MappingFailed { .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Plugin);
    assert!(err.to_string().contains("DC-Subject"));
    assert!(!dest.exists());
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

/// Registered mapper returning fixed output after an optional delay.
struct FixedMapper {
    tags: Vec<(&'static str, &'static str)>,
    delay: Duration,
}

impl Mapper for FixedMapper {
    fn map(&self, _input: &MappingInput) -> Result<BagInfo, MappingError> {
        thread::sleep(self.delay);
        let mut info = BagInfo::new();
        for (key, value) in &self.tags {
            info.push(*key, *value);
        }
        Ok(info)
    }
}

fn builder_with(mapper: FixedMapper, config: BuilderConfig) -> Builder {
    let mut registry = MappingRegistry::with_builtins(ResolutionPolicy::default()).unwrap();
    registry
        .register(PluginDescriptor::registered("fixed", "test mapper"), Arc::new(mapper))
        .unwrap();
    Builder::new(Arc::new(registry), config)
}

#[test]
fn template_cannot_forge_tag_lines() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();
    let dest = out.join("pkg");
    let plugin = declarative(json!({
        "static": {"Payload-Oxum: 999.9\nX-Note": "v", "A:B": "c"}
    }));

    let err = builder()
        .build(&BuildRequest::new(&entity, &dest, plugin), &CancelToken::new())
        .unwrap_err();

    assert!(matches!(err, CoreError::Resolution(ResolutionError::InvalidSource { .. })), "{err}");
    assert!(!dest.exists());
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn registered_mapper_with_invalid_tag_name_fails() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();
    let dest = out.join("pkg");
    let builder = builder_with(
        FixedMapper {
            tags: vec![("Source-Organization", "Org"), ("Payload-Oxum: 1.1\nX", "v")],
            delay: Duration::ZERO,
        },
        BuilderConfig::default(),
    );

    let err = builder
        .build(
            &BuildRequest::new(&entity, &dest, PluginSpec::registered("fixed")),
            &CancelToken::new(),
        )
        .unwrap_err();

    assert!(
        matches!(err, CoreError::MappingFailed { source: MappingError::InvalidTag { .. }, .. }),
        "{err}"
    );
    assert_eq!(err.kind(), ErrorKind::Plugin);
    assert!(!dest.exists());
    assert!(leftovers(&out).is_empty());
}

#[test]
fn slow_mapper_times_out_and_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();
    let dest = out.join("pkg");
    let builder = builder_with(
        FixedMapper {
            tags: vec![("Source-Organization", "Org")],
            delay: Duration::from_secs(3),
        },
        BuilderConfig {
            mapping_timeout: Duration::from_millis(100),
            ..BuilderConfig::default()
        },
    );

    let err = builder
        .build(
            &BuildRequest::new(&entity, &dest, PluginSpec::registered("fixed")),
            &CancelToken::new(),
        )
        .unwrap_err();

    assert!(
        matches!(err, CoreError::MappingFailed { source: MappingError::Timeout { .. }, .. }),
        "{err}"
    );
    assert_eq!(err.kind(), ErrorKind::Plugin);
    assert!(!dest.exists());
    assert!(leftovers(&out).is_empty());
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn untrusted_strategy_fails_before_entity_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("pkg");
    // The entity does not exist: resolution must fail first.
    let request = BuildRequest::new(
        dir.path().join("no-such-entity"),
        &dest,
        PluginSpec::inline("set DC-Title = \"x\"\n"),
    );

    let err = builder().build(&request, &CancelToken::new()).unwrap_err();

    assert!(
        matches!(err, CoreError::Resolution(ResolutionError::ResolutionDisabled { .. })),
        "{err}"
    );
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!dest.exists());
}

#[test]
fn inline_script_runs_when_untrusted_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let dest = dir.path().join("pkg");
    let mut config = ServiceConfig::default();
    config.mapping.allow_untrusted = true;
    let b = Builder::new(Arc::new(config.build_registry().unwrap()), config.builder_config());
    let request = BuildRequest::new(&entity, &dest, PluginSpec::inline("set DC-Title = \"Inline\"\n"));

    let built = b.build(&request, &CancelToken::new()).unwrap();

    assert_eq!(built.plugin.strategy.as_str(), "inline");
    assert!(built.plugin.source_digest.is_some());
    let package = Package::open(&dest).unwrap();
    assert_eq!(package.bag_info.first("DC-Title"), Some("Inline"));
}

#[test]
fn empty_payload_builds_but_fails_payload_required() {
    let dir = tempfile::tempdir().unwrap();
    let entity = empty_entity(dir.path());
    let dest = dir.path().join("pkg");
    let plugin = declarative(json!({"static": {"Source-Organization": "Org"}}));
    let built = builder()
        .build(&BuildRequest::new(&entity, &dest, plugin), &CancelToken::new())
        .unwrap();
    assert_eq!(built.payload_oxum, "0.0");
    assert_eq!(fs::read_to_string(dest.join("manifest-sha256.txt")).unwrap(), "");

    let rules = profile(&json!({"Payload-Required": true}));
    let report = validate_path(&rules, &dest, &ValidationOptions::default()).unwrap();
    assert!(!report.valid);
    assert_eq!(report.findings_in(Category::PayloadPresence).count(), 1);
}

#[test]
fn missing_required_tag_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let dest = dir.path().join("pkg");
    let plugin = declarative(json!({"static": {"Source-Organization": "Org"}}));
    builder()
        .build(&BuildRequest::new(&entity, &dest, plugin), &CancelToken::new())
        .unwrap();

    let rules = profile(&json!({"Bag-Info": {"DC-Title": {"required": true}}}));
    let report = validate_path(&rules, &dest, &ValidationOptions::default()).unwrap();

    assert!(!report.valid);
    let tags: Vec<_> = report.findings_in(Category::Tag).collect();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].subject, "DC-Title");
}

#[test]
fn unsupported_algorithm_rejected_before_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let dest = dir.path().join("pkg");
    let request = BuildRequest::new(&entity, &dest, PluginSpec::registered("oai-dc")).with_manifests(["sha384"]);

    let err = builder().build(&request, &CancelToken::new()).unwrap_err();

    assert!(matches!(err, CoreError::UnsupportedAlgorithm(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!dest.exists());
}

#[test]
fn empty_payload_algorithm_list_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let request = BuildRequest::new(&entity, dir.path().join("pkg"), PluginSpec::registered("oai-dc"))
        .with_manifests(Vec::<String>::new());
    let err = builder().build(&request, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, CoreError::NoPayloadAlgorithm));
}

#[test]
fn disallowed_manifest_algorithm_is_a_finding() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let dest = dir.path().join("pkg");
    let request = BuildRequest::new(&entity, &dest, PluginSpec::registered("oai-dc"))
        .with_manifests(["md5", "sha256"])
        .with_tag_manifests(["sha256"]);
    builder().build(&request, &CancelToken::new()).unwrap();

    let rules = profile(&json!({"Manifests-Allowed": ["sha256"]}));
    let report = validate_path(&rules, &dest, &ValidationOptions::default()).unwrap();

    let findings: Vec<_> = report.findings_in(Category::ManifestAlgorithm).collect();
    assert_eq!(findings.len(), 1, "{findings:?}");
    assert_eq!(findings[0].subject, "md5");
}

#[test]
fn existing_destination_is_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let dest = dir.path().join("pkg");
    fs::create_dir(&dest).unwrap();
    fs::write(dest.join("keep.txt"), b"mine").unwrap();

    let err = builder()
        .build(
            &BuildRequest::new(&entity, &dest, PluginSpec::registered("oai-dc")),
            &CancelToken::new(),
        )
        .unwrap_err();

    assert!(matches!(err, CoreError::DestinationConflict(_)));
    assert_eq!(fs::read(dest.join("keep.txt")).unwrap(), b"mine");
    assert_eq!(fs::read_dir(&dest).unwrap().count(), 1);
}

#[test]
fn cancelled_build_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let out = dir.path().join("out");
    let dest = out.join("pkg");
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = builder()
        .build(&BuildRequest::new(&entity, &dest, PluginSpec::registered("oai-dc")), &cancel)
        .unwrap_err();

    assert!(matches!(err, CoreError::Cancelled));
    assert!(!dest.exists());
    if out.exists() {
        assert!(leftovers(&out).is_empty());
    }
}

#[test]
fn entity_is_never_modified() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let before = bagsmith_store::collect_files(&entity, &entity).unwrap();
    builder()
        .build(
            &BuildRequest::new(&entity, dir.path().join("pkg"), PluginSpec::registered("oai-dc")),
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(bagsmith_store::collect_files(&entity, &entity).unwrap(), before);
    assert_eq!(
        fs::read_to_string(entity.join("meta/source_metadata.xml")).unwrap(),
        RECORD
    );
}

#[test]
fn concurrent_builds_to_one_destination_publish_once() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let dest = dir.path().join("pkg");
    let b = Arc::new(builder());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let b = Arc::clone(&b);
            let barrier = Arc::clone(&barrier);
            let request = BuildRequest::new(&entity, &dest, PluginSpec::registered("oai-dc"));
            thread::spawn(move || {
                barrier.wait();
                b.build(&request, &CancelToken::new())
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(result, CoreError::DestinationConflict(_)), "{result}");
    }
    assert!(verify_package(&Package::open(&dest).unwrap()).unwrap().is_ok());
    assert!(leftovers(dir.path()).is_empty());
}

#[test]
fn separate_staging_root_is_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let staging = dir.path().join("staging");
    let registry = MappingRegistry::with_builtins(ResolutionPolicy::default()).unwrap();
    let b = Builder::new(
        Arc::new(registry),
        BuilderConfig {
            staging_root: Some(staging.clone()),
            ..BuilderConfig::default()
        },
    );
    let dest = dir.path().join("pkg");
    b.build(
        &BuildRequest::new(&entity, &dest, PluginSpec::registered("oai-dc")),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(dest.join("bagit.txt").is_file());
    assert!(leftovers(&staging).is_empty());
}

#[test]
fn unwritable_destination_parent_fails_cleanly() {
    if skip_if_root() {
        eprintln!("skipping: running as root");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let locked = dir.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();
    let dest = locked.join("pkg");

    let result = builder().build(
        &BuildRequest::new(&entity, &dest, PluginSpec::registered("oai-dc")),
        &CancelToken::new(),
    );

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource, "{err}");
    assert!(!dest.exists());
}

#[test]
fn serialized_package_validates_like_directory() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let dest = dir.path().join("pkg");
    builder()
        .build(
            &BuildRequest::new(&entity, &dest, PluginSpec::registered("oai-dc")),
            &CancelToken::new(),
        )
        .unwrap();
    let archive = serialize_package(&dest).unwrap();

    let rules = archive_profile();
    let report = validate_path(&rules, &archive, &ValidationOptions::default()).unwrap();
    assert!(report.valid, "findings: {:?}", report.findings);
    assert_eq!(report.serialization.as_deref(), Some("application/tar"));

    let forbidden = profile(&json!({"Serialization": "forbidden"}));
    let report = validate_path(&forbidden, &archive, &ValidationOptions::default()).unwrap();
    assert_eq!(report.findings_in(Category::Serialization).count(), 1);
}

#[test]
fn tampered_payload_is_a_fixity_finding() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let dest = dir.path().join("pkg");
    builder()
        .build(
            &BuildRequest::new(&entity, &dest, PluginSpec::registered("oai-dc")),
            &CancelToken::new(),
        )
        .unwrap();
    fs::write(dest.join("data/report.txt"), b"quarterly REPORT\n").unwrap();

    let report = validate_path(&archive_profile(), &dest, &ValidationOptions::default()).unwrap();

    assert!(!report.valid);
    assert!(report
        .findings_in(Category::Fixity)
        .all(|f| f.subject == "data/report.txt"));
    assert!(report.findings_in(Category::Fixity).count() >= 1);
}
