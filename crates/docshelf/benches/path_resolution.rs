//! Performance benchmarks for path handling.
//!
//! These benchmarks measure the hot paths every request goes through:
//! - Relative path normalization
//! - Resolution against the document root
//! - Guard checks and directory listing

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use docshelf::files::{Confinement, DirectoryScanner, GuardPolicy, PathResolver};
use protocol::RelativePath;
use tempfile::TempDir;

const RAW_PATHS: &[(&str, &str)] = &[
    ("plain", "docs/guides/intro.md"),
    ("messy", "/docs//guides/./intro.md/"),
    ("encoded", "docs%2Fguides%2F%252e%252e%2Fintro.md"),
    ("traversal", "docs/../../../../etc/passwd"),
    ("deep", "a/b/c/d/e/f/g/h/i/j/k/l/m/n/o/p/q/r/s/t/u/v/w/x/y/z.txt"),
];

/// Build a small document root with nested folders and a protected area.
fn create_tree() -> (TempDir, Arc<Confinement>) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join("docs/guides")).unwrap();
    std::fs::create_dir_all(root.join("cgi-bin")).unwrap();
    std::fs::write(root.join("docs/guides/intro.md"), "# Intro\n").unwrap();
    for i in 0..200 {
        std::fs::write(root.join(format!("docs/file-{:03}.txt", i)), "content").unwrap();
    }

    let confinement = Confinement::new(root)
        .unwrap()
        .with_critical_path("cgi-bin");
    (temp_dir, Arc::new(confinement))
}

/// Benchmark normalization of untrusted path strings.
fn bench_normalization(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalization");

    for (label, raw) in RAW_PATHS {
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), raw, |b, raw| {
            b.iter(|| RelativePath::parse(black_box(raw)));
        });
    }

    group.finish();
}

/// Benchmark resolution, which touches the filesystem for every segment.
fn bench_resolution(c: &mut Criterion) {
    let (_temp_dir, confinement) = create_tree();
    let resolver = PathResolver::new(confinement);
    let mut group = c.benchmark_group("resolution");

    group.bench_function("existing_file", |b| {
        b.iter(|| resolver.resolve(black_box("docs/guides/intro.md")));
    });
    group.bench_function("missing_leaf", |b| {
        b.iter(|| resolver.resolve(black_box("docs/guides/new/page.md")));
    });
    group.bench_function("root", |b| {
        b.iter(|| resolver.resolve(black_box("")));
    });

    group.finish();
}

/// Benchmark guard checks on allowed and protected locations.
fn bench_guard(c: &mut Criterion) {
    let (_temp_dir, confinement) = create_tree();
    let resolver = PathResolver::new(confinement.clone());
    let guard = GuardPolicy::new(confinement);

    let allowed = resolver.resolve("docs/guides/intro.md").absolute;
    let protected = resolver.resolve("cgi-bin/script.cgi").absolute;

    let mut group = c.benchmark_group("guard");
    group.bench_function("allowed", |b| {
        b.iter(|| guard.is_safe(black_box(&allowed)));
    });
    group.bench_function("protected", |b| {
        b.iter(|| guard.is_safe(black_box(&protected)));
    });
    group.bench_function("contains_critical_root", |b| {
        b.iter(|| guard.contains_critical(black_box(resolver.root())));
    });
    group.finish();
}

/// Benchmark listing a directory of 200 files.
fn bench_listing(c: &mut Criterion) {
    let (_temp_dir, confinement) = create_tree();
    let scanner = DirectoryScanner::new(
        PathResolver::new(confinement.clone()),
        GuardPolicy::new(confinement),
    );

    let mut group = c.benchmark_group("listing");
    group.throughput(Throughput::Elements(200));
    group.bench_function("list_200_entries", |b| {
        b.iter(|| scanner.list(black_box("docs")).unwrap());
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_normalization,
    bench_resolution,
    bench_guard,
    bench_listing,
);
criterion_main!(benches);
