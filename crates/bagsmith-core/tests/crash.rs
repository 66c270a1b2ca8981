#![allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
//! Crash tests using fork + SIGKILL.
//!
//! A child process builds packages in a tight loop and is killed mid-flight.
//! Whatever the parent then finds at a destination must be a complete
//! package: publication is a single rename, so there is no half-written
//! state to observe. Staging directories may survive a SIGKILL but never
//! under a destination name.

use bagsmith_core::{BuildRequest, Builder, BuilderConfig, CancelToken};
use bagsmith_mapping::{MappingRegistry, PluginSpec, ResolutionPolicy};
use bagsmith_store::{verify_package, Package};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn make_entity(dir: &Path) -> PathBuf {
    let entity = dir.join("entity");
    fs::create_dir_all(entity.join("data")).unwrap();
    for i in 0..32 {
        fs::write(entity.join(format!("data/file-{i:02}.bin")), vec![i as u8; 64 * 1024]).unwrap();
    }
    entity
}

fn run_builds_forever(entity: &Path, out: &Path) -> ! {
    let registry = MappingRegistry::with_builtins(ResolutionPolicy::default()).unwrap();
    let builder = Builder::new(Arc::new(registry), BuilderConfig::default());
    let plugin: PluginSpec = serde_json::from_value(serde_json::json!({
        "strategy": "declarative",
        "template": {"static": {"Source-Organization": "Crash Test"}}
    }))
    .unwrap();
    for i in 0.. {
        let request = BuildRequest::new(entity, out.join(format!("pkg-{i:05}")), plugin.clone());
        let _ = builder.build(&request, &CancelToken::new());
    }
    unreachable!()
}

fn crash_after(delay: Duration) {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let out = dir.path().join("out");
    fs::create_dir(&out).unwrap();

    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        run_builds_forever(&entity, &out);
    }

    std::thread::sleep(delay);
    unsafe {
        libc::kill(pid, libc::SIGKILL);
        let mut status = 0;
        libc::waitpid(pid, &mut status, 0);
    }

    let mut published = 0;
    for entry in fs::read_dir(&out).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(".bagsmith-staging-") {
            continue;
        }
        assert!(name.starts_with("pkg-"), "unexpected entry {name}");
        let package = Package::open(entry.path()).unwrap();
        let report = verify_package(&package).unwrap();
        assert!(report.is_ok(), "{name} is incomplete: {:?}", report.failed);
        assert_eq!(package.payload_files.len(), 32);
        published += 1;
    }
    eprintln!("{published} packages published before SIGKILL");
}

#[test]
fn killed_builder_never_leaves_partial_package() {
    for ms in [5, 20, 50, 150] {
        crash_after(Duration::from_millis(ms));
    }
}

#[test]
fn staging_leftovers_do_not_block_next_build() {
    let dir = tempfile::tempdir().unwrap();
    let entity = make_entity(dir.path());
    let out = dir.path().join("out");
    fs::create_dir_all(out.join(".bagsmith-staging-stale/package/data")).unwrap();

    let registry = MappingRegistry::with_builtins(ResolutionPolicy::default()).unwrap();
    let builder = Builder::new(Arc::new(registry), BuilderConfig::default());
    let plugin: PluginSpec = serde_json::from_value(serde_json::json!({
        "strategy": "declarative",
        "template": {"static": {"Source-Organization": "Org"}}
    }))
    .unwrap();
    let built = builder
        .build(&BuildRequest::new(&entity, out.join("pkg"), plugin), &CancelToken::new())
        .unwrap();
    assert_eq!(built.payload_files, 32);
}
