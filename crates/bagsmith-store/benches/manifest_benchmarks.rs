use bagsmith_schema::ChecksumAlgorithm;
use bagsmith_store::{collect_files, compute_manifests};
use criterion::{criterion_group, criterion_main, Criterion};
use std::fs;
use std::path::Path;

fn create_payload(dir: &Path, files: usize, size: usize) {
    let data = dir.join("data");
    fs::create_dir_all(&data).unwrap();
    let content = vec![0xA5u8; size];
    for i in 0..files {
        let sub = data.join(format!("d{}", i % 10));
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(format!("file_{i}.bin")), &content).unwrap();
    }
}

fn bench_manifest_small_files(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    create_payload(dir.path(), 200, 4 * 1024);
    let files = collect_files(dir.path(), &dir.path().join("data")).unwrap();
    c.bench_function("manifest_200x4k_sha256_sha512", |b| {
        b.iter(|| {
            compute_manifests(
                dir.path(),
                &files,
                &[ChecksumAlgorithm::Sha256, ChecksumAlgorithm::Sha512],
            )
            .unwrap();
        });
    });
}

fn bench_manifest_large_file(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    create_payload(dir.path(), 1, 16 * 1024 * 1024);
    let files = collect_files(dir.path(), &dir.path().join("data")).unwrap();
    c.bench_function("manifest_1x16m_all_algorithms", |b| {
        b.iter(|| {
            compute_manifests(dir.path(), &files, &ChecksumAlgorithm::ALL).unwrap();
        });
    });
}

fn bench_collect_files(c: &mut Criterion) {
    c.bench_function("collect_files_1000", |b| {
        b.iter_with_setup(
            || {
                let dir = tempfile::tempdir().unwrap();
                create_payload(dir.path(), 1000, 1);
                dir
            },
            |dir| {
                collect_files(dir.path(), &dir.path().join("data")).unwrap();
            },
        );
    });
}

criterion_group!(
    benches,
    bench_manifest_small_files,
    bench_manifest_large_file,
    bench_collect_files
);
criterion_main!(benches);
