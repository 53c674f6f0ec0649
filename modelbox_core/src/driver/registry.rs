//! Driver registry
//!
//! [`Drivers`] is the process catalogue of plugins. It scans the
//! configured directories for `libmodelbox-*` libraries, harvests each
//! one's exported description, deduplicates, and persists the result as a
//! scan cache so later processes can skip the walk. Drivers of class
//! `"virtual"` get a second pass: their factories act as sub-registries
//! and may contribute further drivers.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lazy_static::lazy_static;
use libloading::os::unix::{Library, Symbol};
use parking_lot::Mutex;

use crate::config::Configuration;
use crate::driver::cache::{
    self, ScanCacheFile, ScanDriverEntry, ScanDriverRecord, ScanFailureRecord,
};
use crate::driver::loader::{Driver, DriverFactoryHandle};
use crate::driver::traits::{DriverDescriptionFn, DRIVER_DESCRIPTION_SYMBOL};
use crate::driver::types::DriverDesc;
use crate::error::{ModelboxError, Result};
use crate::utils;

/// Reserved class for drivers whose factory is a virtual driver manager.
pub const DRIVER_CLASS_VIRTUAL: &str = "virtual";

/// Configuration key listing the directories to scan.
pub const DRIVER_DIR_KEY: &str = "driver.dir";

/// Configuration key suppressing the compiled-in default directory.
pub const DRIVER_SKIP_DEFAULT_KEY: &str = "driver.skip-default";

/// Compiled-in default driver directory.
pub const DEFAULT_DRIVER_PATH: &str = "/usr/local/lib/modelbox";

/// Default location of the persisted scan cache.
pub const DEFAULT_SCAN_INFO: &str = "/tmp/modelbox-driver-scan-info.json";

/// System linker cache whose mtime stamps the scan cache validity.
pub const DEFAULT_LD_CACHE: &str = "/etc/ld.so.cache";

/// Filename glob for driver libraries, applied at depth 1 per directory.
pub const DRIVER_GLOB: &str = "libmodelbox-*.so*";

lazy_static! {
    static ref DRIVERS: Arc<Mutex<Drivers>> = Arc::new(Mutex::new(Drivers::new()));
}

/// Outcome buckets of the most recent directory walk.
#[derive(Debug, Clone, Default)]
pub struct ScanResultInfo {
    load_success: Vec<String>,
    load_failed: BTreeMap<String, String>,
}

impl ScanResultInfo {
    /// Paths that registered successfully, in walk order.
    pub fn load_success(&self) -> &[String] {
        &self.load_success
    }

    /// Failed path to error message.
    pub fn load_failed(&self) -> &BTreeMap<String, String> {
        &self.load_failed
    }
}

/// Process catalogue of registered drivers.
pub struct Drivers {
    drivers_list: Vec<Arc<Driver>>,
    virtual_manager_list: Vec<DriverFactoryHandle>,
    driver_dirs: Vec<PathBuf>,
    config: Option<Configuration>,
    last_modify_time_sum: i64,
    scan_result: ScanResultInfo,
    scan_info_path: PathBuf,
    ld_cache_path: PathBuf,
}

impl Default for Drivers {
    fn default() -> Self {
        Self::new()
    }
}

impl Drivers {
    pub fn new() -> Self {
        Self {
            drivers_list: Vec::new(),
            virtual_manager_list: Vec::new(),
            driver_dirs: Vec::new(),
            config: None,
            last_modify_time_sum: 0,
            scan_result: ScanResultInfo::default(),
            scan_info_path: PathBuf::from(DEFAULT_SCAN_INFO),
            ld_cache_path: PathBuf::from(DEFAULT_LD_CACHE),
        }
    }

    /// The per-process registry instance.
    pub fn global() -> Arc<Mutex<Drivers>> {
        Arc::clone(&DRIVERS)
    }

    /// Relocate the scan cache file (defaults to [`DEFAULT_SCAN_INFO`]).
    pub fn set_scan_info_path(&mut self, path: impl Into<PathBuf>) {
        self.scan_info_path = path.into();
    }

    /// Relocate the linker-cache stamp source (defaults to
    /// [`DEFAULT_LD_CACHE`]).
    pub fn set_ld_cache_path(&mut self, path: impl Into<PathBuf>) {
        self.ld_cache_path = path.into();
    }

    /// Directories the next scan will walk.
    pub fn driver_dirs(&self) -> &[PathBuf] {
        &self.driver_dirs
    }

    /// Outcome buckets of the most recent walk in this process.
    pub fn scan_result(&self) -> &ScanResultInfo {
        &self.scan_result
    }

    /// Read the driver directories out of the configuration.
    ///
    /// Unless `driver.skip-default` is set, the compiled-in default
    /// directory is appended after the configured ones. Idempotent over
    /// the same configuration.
    pub fn initialize(&mut self, config: Configuration) -> Result<()> {
        self.driver_dirs = config
            .get_strings(DRIVER_DIR_KEY)
            .into_iter()
            .map(PathBuf::from)
            .collect();
        if !config.get_bool(DRIVER_SKIP_DEFAULT_KEY, false) {
            self.driver_dirs.push(PathBuf::from(DEFAULT_DRIVER_PATH));
        }

        log::debug!("driver search paths:");
        for dir in &self.driver_dirs {
            log::debug!("  {}", dir.display());
        }

        self.config = Some(config);
        Ok(())
    }

    /// Discover drivers in the configured directories.
    ///
    /// When the persisted scan cache is still valid the walk is skipped
    /// and the catalogue is rebuilt from the cache. Otherwise the walk
    /// runs in a forked helper process (so transient dlopen side effects
    /// cannot pollute this one) which writes a fresh cache. Afterwards
    /// every driver of class `"virtual"` is given the chance to append
    /// drivers of its own.
    pub fn scan(&mut self) -> Result<()> {
        if !self.check_path_and_magic_code() {
            if let Err(e) = utils::subprocess_run(|| self.inner_scan()) {
                let err_msg = format!("fork subprocess run scan failed, {}", e);
                log::error!("{}", err_msg);
                return Err(ModelboxError::Fault(err_msg));
            }
        }

        let scan_info_path = self.scan_info_path.clone();
        if let Err(e) = self.gather_scan_info(&scan_info_path) {
            let err_msg = format!("gather scan info failed, {}", e);
            log::error!("{}", err_msg);
            return Err(ModelboxError::Fault(err_msg));
        }

        self.print_scan_results(&scan_info_path);

        log::info!("begin scan virtual drivers");
        let status = self.virtual_driver_scan();
        log::info!("end scan virtual drivers");
        status
    }

    /// Walk every configured directory and persist the result.
    ///
    /// Per-directory failures are best-effort: logged, then the walk
    /// continues with the next directory.
    fn inner_scan(&mut self) -> Result<()> {
        for dir in self.driver_dirs.clone() {
            match self.scan_path(&dir, DRIVER_GLOB) {
                Ok(()) => {}
                Err(ModelboxError::NotFound(_)) => {}
                Err(e) => log::warn!("scan {} failed: {}", dir.display(), e),
            }
        }

        let check_code = utils::generate_key(self.last_modify_time_sum);
        let scan_info_path = self.scan_info_path.clone();
        self.write_scan_info(&scan_info_path, &check_code).map_err(|e| {
            log::error!("write scan info failed: {}", e);
            ModelboxError::Fault(format!("write scan info failed, {}", e))
        })
    }

    /// Register every library under `path` matching `filter`.
    ///
    /// A single-file path is registered directly. Within a directory,
    /// symbolic links are skipped; their targets are picked up as regular
    /// files elsewhere in the walk or not at all.
    fn scan_path(&mut self, path: &Path, filter: &str) -> Result<()> {
        let meta = fs::symlink_metadata(path).map_err(|e| {
            ModelboxError::Fault(format!("lstat {} failed, errno: {}", path.display(), e))
        })?;

        if !meta.is_dir() {
            self.last_modify_time_sum += utils::mtime_secs(&meta);
            return self.add_and_record(path);
        }

        let driver_files = utils::list_files(path, filter)?;
        if driver_files.is_empty() {
            return Err(ModelboxError::NotFound("directory is empty".into()));
        }

        for driver_file in driver_files {
            let Ok(meta) = fs::symlink_metadata(&driver_file) else {
                continue;
            };
            if meta.file_type().is_symlink() {
                continue;
            }
            self.last_modify_time_sum += utils::mtime_secs(&meta);
            let _ = self.add_and_record(&driver_file);
        }

        Ok(())
    }

    fn add_and_record(&mut self, file: &Path) -> Result<()> {
        match self.add(file) {
            Ok(()) => {
                self.scan_result
                    .load_success
                    .push(file.display().to_string());
                Ok(())
            }
            Err(e) => {
                self.scan_result
                    .load_failed
                    .insert(file.display().to_string(), e.to_string());
                Err(e)
            }
        }
    }

    /// Register a single driver library.
    ///
    /// The library is opened lazily in local scope just long enough to
    /// read its exported description, then closed again; activation
    /// happens later through [`Driver::create_factory`]. Duplicates (same
    /// identity tuple) are rejected. Descriptors requesting `no_delete`
    /// get a second, immediately-closed open with `RTLD_NODELETE` so the
    /// loader pins the library.
    pub fn add(&mut self, file: &Path) -> Result<()> {
        let library = unsafe { Library::open(Some(file), libc::RTLD_LAZY | libc::RTLD_LOCAL) }
            .map_err(|e| {
                ModelboxError::Linkage(format!("{} : dlopen failed, {}", file.display(), e))
            })?;

        let describe: Symbol<DriverDescriptionFn> =
            unsafe { library.get(DRIVER_DESCRIPTION_SYMBOL.as_bytes()) }.map_err(|e| {
                ModelboxError::Linkage(format!(
                    "{} : dlsym DriverDescription failed, {}",
                    file.display(),
                    e
                ))
            })?;

        let mut desc = DriverDesc::new();
        unsafe { describe(&mut desc as *mut DriverDesc) };

        if self.contains(&desc) {
            log::debug!(
                "add driver {} failed, it already has the same function library in libraries",
                file.display()
            );
            return Err(ModelboxError::AlreadyExists(format!(
                "{} : driver is already registered",
                file.display()
            )));
        }

        desc.set_file_path(file.to_string_lossy().to_string());

        if desc.no_delete() {
            let pin = unsafe {
                Library::open(
                    Some(file),
                    libc::RTLD_LAZY | libc::RTLD_LOCAL | libc::RTLD_NODELETE,
                )
            };
            match pin {
                Ok(pinned) => drop(pinned),
                Err(_) => log::warn!("dlopen {} as no delete failed", file.display()),
            }
        }

        log::debug!("add driver:");
        log::debug!("  name: {}", desc.name());
        log::debug!("  class: {}", desc.class());
        log::debug!("  type: {}", desc.driver_type());
        log::debug!("  description: {}", desc.description());
        log::debug!("  version: {}", desc.version());
        log::debug!("  driver file: {}", file.display());

        self.drivers_list.push(Arc::new(Driver::new(desc)));
        drop(library);
        Ok(())
    }

    fn contains(&self, desc: &DriverDesc) -> bool {
        self.drivers_list
            .iter()
            .any(|driver| driver.desc().same_identity(desc))
    }

    /// Decide whether the persisted cache still matches the filesystem.
    ///
    /// Valid iff the cache and linker cache both exist, the linker-cache
    /// mtime matches the stamp, every matching file on disk appears in the
    /// cached file set, and the check code over the current mtime sum
    /// equals the cached one.
    fn check_path_and_magic_code(&self) -> bool {
        if !self.scan_info_path.exists() {
            log::debug!("{} does not exist", self.scan_info_path.display());
            return false;
        }

        let Ok(ld_meta) = fs::metadata(&self.ld_cache_path) else {
            log::debug!("{} does not exist", self.ld_cache_path.display());
            return false;
        };

        let cache = match cache::read_scan_info(&self.scan_info_path) {
            Ok(cache) => cache,
            Err(e) => {
                log::debug!("read scan info failed: {}", e);
                return false;
            }
        };

        if cache.ld_cache_time != utils::mtime_secs(&ld_meta) {
            return false;
        }

        let file_set: HashSet<&str> = cache
            .scan_drivers
            .iter()
            .map(|entry| entry.file_path())
            .collect();

        let mut check_sum: i64 = 0;
        for dir in &self.driver_dirs {
            let Ok(meta) = fs::symlink_metadata(dir) else {
                log::error!("lstat {} failed", dir.display());
                return false;
            };

            if !meta.is_dir() {
                check_sum += utils::mtime_secs(&meta);
                continue;
            }

            let driver_files = match utils::list_files(dir, DRIVER_GLOB) {
                Ok(files) => files,
                Err(e) => {
                    log::error!(
                        "list directory {}/{} failed: {}",
                        dir.display(),
                        DRIVER_GLOB,
                        e
                    );
                    return false;
                }
            };

            for driver_file in driver_files {
                let Ok(meta) = fs::symlink_metadata(&driver_file) else {
                    continue;
                };
                if meta.file_type().is_symlink() {
                    continue;
                }

                if !file_set.contains(driver_file.to_string_lossy().as_ref()) {
                    return false;
                }
                check_sum += utils::mtime_secs(&meta);
            }
        }

        utils::generate_key(check_sum) == cache.check_code
    }

    fn write_scan_info(&self, path: &Path, check_code: &str) -> Result<()> {
        let mut scan_drivers: Vec<ScanDriverEntry> = self
            .drivers_list
            .iter()
            .map(|driver| ScanDriverEntry::Success(ScanDriverRecord::from_desc(driver.desc())))
            .collect();

        for (file_path, err_msg) in &self.scan_result.load_failed {
            scan_drivers.push(ScanDriverEntry::Failure(ScanFailureRecord {
                file_path: file_path.clone(),
                err_msg: err_msg.clone(),
                load_success: false,
            }));
        }

        let document = ScanCacheFile {
            ld_cache_time: cache::ld_cache_mtime(&self.ld_cache_path),
            check_code: check_code.to_string(),
            version_record: chrono::Local::now().to_rfc2822(),
            scan_drivers,
        };

        cache::write_scan_info(path, &document)
    }

    /// Rebuild the in-memory catalogue from the persisted cache.
    ///
    /// Failed entries are skipped; an entry whose `(class, type, name)` is
    /// already catalogued is skipped as well.
    fn gather_scan_info(&mut self, path: &Path) -> Result<()> {
        let cache = cache::read_scan_info(path)?;

        for entry in cache.scan_drivers {
            let ScanDriverEntry::Success(record) = entry else {
                continue;
            };
            if !record.load_success {
                continue;
            }

            let desc = record.to_desc();
            if self
                .get_driver(desc.class(), desc.driver_type(), desc.name(), desc.version())
                .is_some()
            {
                continue;
            }
            self.drivers_list.push(Arc::new(Driver::new(desc)));
        }

        log::info!(
            "gather scan info success, drivers count {}",
            self.drivers_list.len()
        );
        Ok(())
    }

    fn print_scan_results(&self, path: &Path) {
        let cache = match cache::read_scan_info(path) {
            Ok(cache) => cache,
            Err(e) => {
                log::error!("open file {} for read failed: {}", path.display(), e);
                return;
            }
        };

        let mut load_success = Vec::new();
        let mut load_failed = BTreeMap::new();
        for entry in cache.scan_drivers {
            match entry {
                ScanDriverEntry::Success(record) => load_success.push(record.file_path),
                ScanDriverEntry::Failure(record) => {
                    load_failed.insert(record.file_path, record.err_msg);
                }
            }
        }

        Self::print_scan_result(&load_success, &load_failed);
    }

    fn print_scan_result(load_success: &[String], load_failed: &BTreeMap<String, String>) {
        if load_success.is_empty() {
            log::warn!("no driver load success, please check");
        } else {
            log::info!(
                "load success drivers: count {}, show detail in debug level",
                load_success.len()
            );
            for info in load_success {
                log::debug!("{}", info);
            }
        }

        if load_failed.is_empty() {
            log::info!("no drivers load failed");
        } else {
            log::warn!("load failed drivers: count {}, detail:", load_failed.len());
            for err_msg in load_failed.values() {
                log::warn!("{}", err_msg);
            }
        }
    }

    /// Second registration pass over drivers of class `"virtual"`.
    ///
    /// Each virtual driver's factory is asked to act as a sub-registry:
    /// initialized against this registry, scanned over the configured
    /// directories, and its produced drivers appended. The manager's
    /// factory handle is retained so it outlives the drivers it spawned.
    fn virtual_driver_scan(&mut self) -> Result<()> {
        for driver in self.get_driver_list_by_class(DRIVER_CLASS_VIRTUAL) {
            let handle = match Arc::clone(&driver).create_factory() {
                Ok(handle) => handle,
                Err(e) => {
                    log::warn!(
                        "virtual driver {} factory failed, {}",
                        driver.driver_file(),
                        e
                    );
                    continue;
                }
            };

            let produced = {
                let Some(manager) = handle.factory().as_virtual_manager() else {
                    continue;
                };

                if let Err(e) = manager.init(self) {
                    log::warn!("virtual driver init failed, {}", e);
                }
                if let Err(e) = manager.scan(&self.driver_dirs) {
                    log::warn!("scan failed, {}", e);
                }
                manager.drivers()
            };

            for virtual_driver in produced {
                virtual_driver.set_virtual(true);
                self.drivers_list.push(virtual_driver);
            }

            self.virtual_manager_list.push(handle);
        }

        Ok(())
    }

    pub fn get_all_driver_list(&self) -> Vec<Arc<Driver>> {
        self.drivers_list.clone()
    }

    pub fn get_driver_list_by_class(&self, driver_class: &str) -> Vec<Arc<Driver>> {
        self.drivers_list
            .iter()
            .filter(|driver| driver.desc().class() == driver_class)
            .cloned()
            .collect()
    }

    pub fn get_driver_class_list(&self) -> Vec<String> {
        let mut classes: Vec<String> = self
            .drivers_list
            .iter()
            .map(|driver| driver.desc().class().to_string())
            .collect();
        Self::remove_same_elements(&mut classes);
        classes
    }

    pub fn get_driver_type_list(&self, driver_class: &str) -> Vec<String> {
        let mut types: Vec<String> = self
            .drivers_list
            .iter()
            .filter(|driver| driver.desc().class() == driver_class)
            .map(|driver| driver.desc().driver_type().to_string())
            .collect();
        Self::remove_same_elements(&mut types);
        types
    }

    pub fn get_driver_name_list(&self, driver_class: &str, driver_type: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .drivers_list
            .iter()
            .filter(|driver| {
                driver.desc().class() == driver_class
                    && driver.desc().driver_type() == driver_type
            })
            .map(|driver| driver.desc().name().to_string())
            .collect();
        Self::remove_same_elements(&mut names);
        names
    }

    /// Look up a driver by identity.
    ///
    /// An exact version match wins. Otherwise the driver with the
    /// lexicographically greatest version string among `(class, type,
    /// name)` matches is returned, ties broken by scan order.
    pub fn get_driver(
        &self,
        driver_class: &str,
        driver_type: &str,
        driver_name: &str,
        driver_version: &str,
    ) -> Option<Arc<Driver>> {
        let mut best: Option<&Arc<Driver>> = None;
        for driver in &self.drivers_list {
            let desc = driver.desc();
            if desc.class() != driver_class
                || desc.driver_type() != driver_type
                || desc.name() != driver_name
            {
                continue;
            }

            if desc.version() == driver_version {
                return Some(Arc::clone(driver));
            }

            match best {
                None => best = Some(driver),
                Some(current) if current.desc().version() < desc.version() => {
                    best = Some(driver);
                }
                Some(_) => {}
            }
        }

        best.cloned()
    }

    fn remove_same_elements(list: &mut Vec<String>) {
        list.sort();
        list.dedup();
    }

    /// Drop the whole catalogue: virtual drivers first, then the rest,
    /// the retained managers, the directory list, and the configuration.
    ///
    /// Outstanding factory handles are not force-released; the per-driver
    /// refcount discipline governs their teardown.
    pub fn clear(&mut self) {
        self.drivers_list.retain(|driver| !driver.is_virtual());
        self.virtual_manager_list.clear();
        self.drivers_list.clear();
        self.driver_dirs.clear();
        self.config = None;
        self.last_modify_time_sum = 0;
        self.scan_result = ScanResultInfo::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::traits::{DriverFactory, VirtualDriverManager};
    use std::any::Any;

    fn make_desc(class: &str, driver_type: &str, name: &str, version: &str) -> DriverDesc {
        let mut desc = DriverDesc::new();
        desc.set_class(class);
        desc.set_type(driver_type);
        desc.set_name(name);
        desc.set_description(format!("{} {}", name, version));
        desc.set_version(version).unwrap();
        desc.set_file_path(format!("/opt/drivers/libmodelbox-{}.so", name));
        desc
    }

    fn registry_with(descs: Vec<DriverDesc>) -> Drivers {
        let mut drivers = Drivers::new();
        for desc in descs {
            drivers.drivers_list.push(Arc::new(Driver::new(desc)));
        }
        drivers
    }

    #[test]
    fn test_initialize_appends_default_dir() {
        let config = Configuration::from_toml_str(
            r#"
[driver]
dir = ["/opt/a", "/opt/b"]
"#,
        )
        .unwrap();

        let mut drivers = Drivers::new();
        drivers.initialize(config).unwrap();
        assert_eq!(
            drivers.driver_dirs(),
            &[
                PathBuf::from("/opt/a"),
                PathBuf::from("/opt/b"),
                PathBuf::from(DEFAULT_DRIVER_PATH)
            ]
        );
    }

    #[test]
    fn test_initialize_skip_default() {
        let config = Configuration::from_toml_str(
            r#"
[driver]
dir = ["/opt/a"]
skip-default = true
"#,
        )
        .unwrap();

        let mut drivers = Drivers::new();
        drivers.initialize(config).unwrap();
        assert_eq!(drivers.driver_dirs(), &[PathBuf::from("/opt/a")]);
    }

    #[test]
    fn test_initialize_idempotent() {
        let config = Configuration::from_toml_str(
            r#"
[driver]
dir = ["/opt/a"]
skip-default = true
"#,
        )
        .unwrap();

        let mut drivers = Drivers::new();
        drivers.initialize(config.clone()).unwrap();
        drivers.initialize(config).unwrap();
        assert_eq!(drivers.driver_dirs(), &[PathBuf::from("/opt/a")]);
    }

    #[test]
    fn test_get_driver_exact_version() {
        let drivers = registry_with(vec![
            make_desc("cpu", "flowunit", "resize", "1.0.0"),
            make_desc("cpu", "flowunit", "resize", "1.1.0"),
        ]);

        let driver = drivers.get_driver("cpu", "flowunit", "resize", "1.0.0").unwrap();
        assert_eq!(driver.desc().version(), "1.0.0");
    }

    #[test]
    fn test_get_driver_lexicographic_fallback() {
        let drivers = registry_with(vec![
            make_desc("cpu", "flowunit", "resize", "2.0.0"),
            make_desc("cpu", "flowunit", "resize", "10.0.0"),
        ]);

        // plain string ordering: "2.0.0" > "10.0.0"
        let driver = drivers.get_driver("cpu", "flowunit", "resize", "").unwrap();
        assert_eq!(driver.desc().version(), "2.0.0");
    }

    #[test]
    fn test_get_driver_no_match() {
        let drivers = registry_with(vec![make_desc("cpu", "flowunit", "resize", "1.0.0")]);
        assert!(drivers.get_driver("gpu", "flowunit", "resize", "").is_none());
        assert!(drivers.get_driver("cpu", "flowunit", "crop", "").is_none());
    }

    #[test]
    fn test_projection_lists_dedup() {
        let drivers = registry_with(vec![
            make_desc("cpu", "flowunit", "resize", "1.0.0"),
            make_desc("cpu", "flowunit", "crop", "1.0.0"),
            make_desc("cpu", "device", "cpu", "1.0.0"),
            make_desc("gpu", "flowunit", "resize", "1.0.0"),
        ]);

        assert_eq!(drivers.get_driver_class_list(), vec!["cpu", "gpu"]);
        assert_eq!(
            drivers.get_driver_type_list("cpu"),
            vec!["device", "flowunit"]
        );
        assert_eq!(
            drivers.get_driver_name_list("cpu", "flowunit"),
            vec!["crop", "resize"]
        );
        assert_eq!(drivers.get_driver_list_by_class("cpu").len(), 3);
        assert_eq!(drivers.get_all_driver_list().len(), 4);
    }

    #[test]
    fn test_contains_matches_identity_tuple() {
        let drivers = registry_with(vec![make_desc("cpu", "flowunit", "resize", "1.0.0")]);

        let same = make_desc("cpu", "flowunit", "resize", "1.0.0");
        assert!(drivers.contains(&same));

        let other_version = make_desc("cpu", "flowunit", "resize", "1.0.1");
        assert!(!drivers.contains(&other_version));
    }

    #[test]
    fn test_gather_scan_info_skips_failures_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan-info.json");

        let document = ScanCacheFile {
            ld_cache_time: 0,
            check_code: utils::generate_key(0),
            version_record: "test".into(),
            scan_drivers: vec![
                ScanDriverEntry::Success(ScanDriverRecord::from_desc(&make_desc(
                    "cpu", "flowunit", "resize", "1.0.0",
                ))),
                ScanDriverEntry::Failure(ScanFailureRecord {
                    file_path: "/opt/drivers/libmodelbox-broken.so".into(),
                    err_msg: "dlopen failed".into(),
                    load_success: false,
                }),
            ],
        };
        cache::write_scan_info(&path, &document).unwrap();

        let mut drivers = Drivers::new();
        drivers.gather_scan_info(&path).unwrap();
        assert_eq!(drivers.drivers_list.len(), 1);
        assert_eq!(drivers.drivers_list[0].desc().name(), "resize");

        // a second gather over the same cache adds nothing
        drivers.gather_scan_info(&path).unwrap();
        assert_eq!(drivers.drivers_list.len(), 1);
    }

    #[test]
    fn test_cache_validity_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let driver_dir = dir.path().join("drivers");
        fs::create_dir_all(&driver_dir).unwrap();
        let ld_cache = dir.path().join("ld.so.cache");
        fs::write(&ld_cache, b"stamp").unwrap();

        let mut drivers = Drivers::new();
        drivers.set_scan_info_path(dir.path().join("scan-info.json"));
        drivers.set_ld_cache_path(&ld_cache);
        drivers.driver_dirs.push(driver_dir.clone());

        // nothing written yet
        assert!(!drivers.check_path_and_magic_code());

        drivers.inner_scan().unwrap();
        assert!(drivers.check_path_and_magic_code());

        // a new matching file invalidates the cache
        fs::write(driver_dir.join("libmodelbox-new.so"), b"not a library").unwrap();
        assert!(!drivers.check_path_and_magic_code());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut drivers = registry_with(vec![make_desc("cpu", "flowunit", "resize", "1.0.0")]);
        drivers.driver_dirs.push(PathBuf::from("/opt/a"));
        drivers.last_modify_time_sum = 42;

        drivers.clear();
        assert!(drivers.drivers_list.is_empty());
        assert!(drivers.virtual_manager_list.is_empty());
        assert!(drivers.driver_dirs().is_empty());
        assert_eq!(drivers.last_modify_time_sum, 0);
    }

    struct MockManager {
        produced: Mutex<Vec<Arc<Driver>>>,
    }

    impl MockManager {
        fn new() -> Self {
            Self {
                produced: Mutex::new(Vec::new()),
            }
        }
    }

    impl DriverFactory for MockManager {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_virtual_manager(&self) -> Option<&dyn VirtualDriverManager> {
            Some(self)
        }
    }

    impl VirtualDriverManager for MockManager {
        fn init(&self, _drivers: &Drivers) -> Result<()> {
            Ok(())
        }

        fn scan(&self, _dirs: &[PathBuf]) -> Result<()> {
            let mut produced = self.produced.lock();
            produced.push(Arc::new(Driver::new(make_desc(
                "cpu",
                "flowunit",
                "sub-one",
                "1.0.0",
            ))));
            produced.push(Arc::new(Driver::new(make_desc(
                "cpu",
                "flowunit",
                "sub-two",
                "1.0.0",
            ))));
            Ok(())
        }

        fn drivers(&self) -> Vec<Arc<Driver>> {
            self.produced.lock().clone()
        }
    }

    #[test]
    fn test_virtual_driver_scan_appends_sub_drivers() {
        let mut drivers = Drivers::new();
        let virtual_driver = Arc::new(Driver::with_factory(
            make_desc(DRIVER_CLASS_VIRTUAL, "js", "script-engine", "1.0.0"),
            Arc::new(MockManager::new()),
        ));
        drivers.drivers_list.push(virtual_driver);

        drivers.virtual_driver_scan().unwrap();

        assert_eq!(drivers.drivers_list.len(), 3);
        assert_eq!(drivers.virtual_manager_list.len(), 1);
        let sub = drivers.get_driver("cpu", "flowunit", "sub-one", "1.0.0").unwrap();
        assert!(sub.is_virtual());
        let sub = drivers.get_driver("cpu", "flowunit", "sub-two", "1.0.0").unwrap();
        assert!(sub.is_virtual());

        // clear removes virtual drivers and retained managers
        drivers.clear();
        assert!(drivers.drivers_list.is_empty());
        assert!(drivers.virtual_manager_list.is_empty());
    }

    #[test]
    fn test_non_manager_factory_is_skipped() {
        struct PlainFactory;
        impl DriverFactory for PlainFactory {
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let mut drivers = Drivers::new();
        drivers.drivers_list.push(Arc::new(Driver::with_factory(
            make_desc(DRIVER_CLASS_VIRTUAL, "js", "bogus", "1.0.0"),
            Arc::new(PlainFactory),
        )));

        drivers.virtual_driver_scan().unwrap();
        assert_eq!(drivers.drivers_list.len(), 1);
        assert!(drivers.virtual_manager_list.is_empty());
    }
}
