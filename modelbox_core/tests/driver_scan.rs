//! Integration tests for the driver scan surface.
//!
//! Real plugin libraries cannot be assumed on the test host, so these
//! tests drive the public scan path with empty directories, broken
//! libraries, and symlinks, and inspect the persisted scan cache.

use std::fs;
use std::path::PathBuf;

use modelbox_core::{Configuration, Drivers};

struct ScanFixture {
    _dir: tempfile::TempDir,
    driver_dir: PathBuf,
    scan_info: PathBuf,
    ld_cache: PathBuf,
}

fn fixture() -> ScanFixture {
    let dir = tempfile::tempdir().unwrap();
    let driver_dir = dir.path().join("drivers");
    fs::create_dir_all(&driver_dir).unwrap();
    let ld_cache = dir.path().join("ld.so.cache");
    fs::write(&ld_cache, b"stamp").unwrap();
    let scan_info = dir.path().join("scan-info.json");
    ScanFixture {
        driver_dir,
        scan_info,
        ld_cache,
        _dir: dir,
    }
}

fn registry_for(fixture: &ScanFixture) -> Drivers {
    let config = Configuration::from_toml_str(&format!(
        r#"
[driver]
dir = ["{}"]
skip-default = true
"#,
        fixture.driver_dir.display()
    ))
    .unwrap();

    let mut drivers = Drivers::new();
    drivers.set_scan_info_path(&fixture.scan_info);
    drivers.set_ld_cache_path(&fixture.ld_cache);
    drivers.initialize(config).unwrap();
    drivers
}

fn read_cache(fixture: &ScanFixture) -> serde_json::Value {
    let content = fs::read_to_string(&fixture.scan_info).unwrap();
    serde_json::from_str(&content).unwrap()
}

#[test]
fn scan_empty_directory_yields_empty_catalogue() {
    let fixture = fixture();
    let mut drivers = registry_for(&fixture);

    drivers.scan().unwrap();
    assert!(drivers.get_all_driver_list().is_empty());
    assert!(drivers.get_driver_class_list().is_empty());

    let cache = read_cache(&fixture);
    assert_eq!(cache["scan_drivers"].as_array().unwrap().len(), 0);
    assert!(cache["check_code"].is_string());

    // second scan validates the cache instead of re-walking
    drivers.scan().unwrap();
    assert!(drivers.get_all_driver_list().is_empty());
}

#[test]
fn scan_records_broken_library_as_failure() {
    let fixture = fixture();
    fs::write(
        fixture.driver_dir.join("libmodelbox-broken.so"),
        b"this is not an elf file",
    )
    .unwrap();

    let mut drivers = registry_for(&fixture);
    drivers.scan().unwrap();

    // the broken file never reaches the catalogue
    assert!(drivers.get_all_driver_list().is_empty());

    let cache = read_cache(&fixture);
    let entries = cache["scan_drivers"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["load_success"], serde_json::json!(false));
    assert!(entries[0]["file_path"]
        .as_str()
        .unwrap()
        .ends_with("libmodelbox-broken.so"));
    assert!(entries[0]["err_msg"].as_str().unwrap().contains("dlopen"));
}

#[cfg(unix)]
#[test]
fn scan_skips_symlinks() {
    let fixture = fixture();
    let target = fixture.driver_dir.parent().unwrap().join("target.so");
    fs::write(&target, b"garbage").unwrap();
    std::os::unix::fs::symlink(&target, fixture.driver_dir.join("libmodelbox-link.so")).unwrap();

    let mut drivers = registry_for(&fixture);
    drivers.scan().unwrap();

    assert!(drivers.get_all_driver_list().is_empty());

    // neither a driver nor a failure: the symlink was skipped outright
    let cache = read_cache(&fixture);
    assert_eq!(cache["scan_drivers"].as_array().unwrap().len(), 0);
}

#[test]
fn scan_tolerates_missing_directory() {
    let fixture = fixture();
    let config = Configuration::from_toml_str(&format!(
        r#"
[driver]
dir = ["{}", "{}"]
skip-default = true
"#,
        fixture.driver_dir.join("does-not-exist").display(),
        fixture.driver_dir.display()
    ))
    .unwrap();

    let mut drivers = Drivers::new();
    drivers.set_scan_info_path(&fixture.scan_info);
    drivers.set_ld_cache_path(&fixture.ld_cache);
    drivers.initialize(config).unwrap();

    // best-effort across directories: the missing one is logged, not fatal
    drivers.scan().unwrap();
    assert!(drivers.get_all_driver_list().is_empty());
}

#[test]
fn clear_then_rescan_matches_fresh_registry() {
    let fixture = fixture();
    fs::write(
        fixture.driver_dir.join("libmodelbox-broken.so"),
        b"still not an elf file",
    )
    .unwrap();

    let mut drivers = registry_for(&fixture);
    drivers.scan().unwrap();
    let first = drivers.get_driver_class_list();

    drivers.clear();
    assert!(drivers.driver_dirs().is_empty());
    assert!(drivers.get_all_driver_list().is_empty());

    let mut drivers = registry_for(&fixture);
    drivers.scan().unwrap();
    assert_eq!(drivers.get_driver_class_list(), first);
}
