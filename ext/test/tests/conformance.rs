//! Conformance tests that run YAML fixtures against saboteur
//!
//! Run with: cargo test -p saboteur-test --test conformance --features saboteur-test/fixtures

#![cfg(feature = "fixtures")]

use saboteur_test::fixture::Fixture;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the spec/tests directory relative to the workspace root
fn fixtures_dir() -> PathBuf {
    let ext_test = Path::new(env!("CARGO_MANIFEST_DIR"));

    // Go up: ext/test -> ext -> workspace root
    let root = ext_test
        .parent()
        .and_then(Path::parent)
        .expect("Could not find workspace root");

    root.join("spec").join("tests")
}

/// Load and run all fixtures in a directory
fn run_fixtures_in_dir(dir: &Path) {
    assert!(dir.exists(), "Fixtures directory does not exist: {}", dir.display());

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("dir entry").path())
        .filter(|path| path.extension().is_some_and(|e| e == "yaml" || e == "yml"))
        .collect();
    paths.sort();
    assert!(!paths.is_empty(), "no fixtures in {}", dir.display());

    for path in paths {
        println!("Running fixture: {}", path.display());
        let yaml = fs::read_to_string(&path).expect("read yaml");

        // Parse potentially multiple fixtures (separated by ---)
        let fixtures = Fixture::from_yaml_multi(&yaml).unwrap_or_else(|e| {
            panic!("Failed to parse {}: {}", path.display(), e);
        });

        for fixture in fixtures {
            println!("  Running: {}", fixture.name);
            fixture.run_and_assert();
        }
    }
}

#[test]
fn test_matching() {
    run_fixtures_in_dir(&fixtures_dir().join("01_matching"));
}

#[test]
fn test_limits() {
    run_fixtures_in_dir(&fixtures_dir().join("02_limits"));
}

#[test]
fn test_param_expr() {
    run_fixtures_in_dir(&fixtures_dir().join("03_param_expr"));
}

#[test]
fn test_dispatch() {
    run_fixtures_in_dir(&fixtures_dir().join("04_dispatch"));
}
