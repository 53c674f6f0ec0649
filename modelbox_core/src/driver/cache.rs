//! Persisted scan cache
//!
//! A successful scan is recorded as a single JSON document so later
//! processes can rebuild the catalogue without re-opening every library.
//! The document carries a validity stamp: the linker-cache mtime at scan
//! time plus a check code derived from the summed mtimes of every scanned
//! file.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::driver::types::DriverDesc;
use crate::error::{ModelboxError, Result};

/// On-disk scan cache document.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ScanCacheFile {
    /// mtime in seconds of the system linker cache at scan time, 0 when
    /// the linker cache file was absent.
    pub ld_cache_time: i64,
    /// Check code over the summed mtimes of every scanned regular file.
    pub check_code: String,
    /// Informational timestamp of the scan.
    pub version_record: String,
    pub scan_drivers: Vec<ScanDriverEntry>,
}

/// One scanned file: either a catalogued driver or a failure record.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum ScanDriverEntry {
    Success(ScanDriverRecord),
    Failure(ScanFailureRecord),
}

impl ScanDriverEntry {
    pub(crate) fn file_path(&self) -> &str {
        match self {
            ScanDriverEntry::Success(record) => &record.file_path,
            ScanDriverEntry::Failure(record) => &record.file_path,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ScanDriverRecord {
    pub class: String,
    #[serde(rename = "type")]
    pub driver_type: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub file_path: String,
    pub no_delete: bool,
    pub global: bool,
    pub deep_bind: bool,
    pub load_success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ScanFailureRecord {
    pub file_path: String,
    pub err_msg: String,
    pub load_success: bool,
}

impl ScanDriverRecord {
    pub(crate) fn from_desc(desc: &DriverDesc) -> Self {
        Self {
            class: desc.class().to_string(),
            driver_type: desc.driver_type().to_string(),
            name: desc.name().to_string(),
            description: desc.description().to_string(),
            version: desc.version().to_string(),
            file_path: desc.file_path().to_string(),
            no_delete: desc.no_delete(),
            global: desc.global(),
            deep_bind: desc.deep_bind(),
            load_success: true,
        }
    }

    /// Rebuild a descriptor from a cached record. Version strings were
    /// validated when the record was produced; a record that no longer
    /// validates keeps an empty version, matching the registration path.
    pub(crate) fn to_desc(&self) -> DriverDesc {
        let mut desc = DriverDesc::new();
        desc.set_class(&self.class);
        desc.set_type(&self.driver_type);
        desc.set_name(&self.name);
        desc.set_description(&self.description);
        let _ = desc.set_version(&self.version);
        desc.set_file_path(&self.file_path);
        desc.set_no_delete(self.no_delete);
        desc.set_global(self.global);
        desc.set_deep_bind(self.deep_bind);
        desc
    }
}

pub(crate) fn read_scan_info(path: &Path) -> Result<ScanCacheFile> {
    let content = fs::read_to_string(path).map_err(|e| {
        ModelboxError::Fault(format!("open file {} for read failed: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&content)?)
}

pub(crate) fn write_scan_info(path: &Path, cache: &ScanCacheFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string(cache)?;
    fs::write(path, content).map_err(|e| {
        ModelboxError::Fault(format!(
            "open file {} for write failed: {}",
            path.display(),
            e
        ))
    })
}

/// mtime of the linker cache in seconds, 0 when the file is absent.
pub(crate) fn ld_cache_mtime(path: &Path) -> i64 {
    match fs::metadata(path) {
        Ok(meta) => crate::utils::mtime_secs(&meta),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_desc() -> DriverDesc {
        let mut desc = DriverDesc::new();
        desc.set_class("cpu");
        desc.set_type("flowunit");
        desc.set_name("resize");
        desc.set_description("image resize");
        desc.set_version("1.2.3").unwrap();
        desc.set_file_path("/opt/drivers/libmodelbox-resize.so");
        desc.set_no_delete(true);
        desc
    }

    #[test]
    fn test_record_roundtrip_through_desc() {
        let desc = sample_desc();
        let record = ScanDriverRecord::from_desc(&desc);
        assert!(record.load_success);
        assert_eq!(record.to_desc(), desc);
    }

    #[test]
    fn test_cache_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan-info.json");

        let cache = ScanCacheFile {
            ld_cache_time: 1234,
            check_code: "abcd".into(),
            version_record: "now".into(),
            scan_drivers: vec![
                ScanDriverEntry::Success(ScanDriverRecord::from_desc(&sample_desc())),
                ScanDriverEntry::Failure(ScanFailureRecord {
                    file_path: "/opt/drivers/libmodelbox-broken.so".into(),
                    err_msg: "dlopen failed".into(),
                    load_success: false,
                }),
            ],
        };

        write_scan_info(&path, &cache).unwrap();
        let loaded = read_scan_info(&path).unwrap();

        assert_eq!(loaded.ld_cache_time, 1234);
        assert_eq!(loaded.check_code, "abcd");
        assert_eq!(loaded.scan_drivers.len(), 2);
        assert!(matches!(
            loaded.scan_drivers[0],
            ScanDriverEntry::Success(_)
        ));
        assert!(matches!(
            loaded.scan_drivers[1],
            ScanDriverEntry::Failure(_)
        ));
    }

    #[test]
    fn test_read_missing_cache() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_scan_info(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(ModelboxError::Fault(_))));
    }

    #[test]
    fn test_ld_cache_mtime_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ld_cache_mtime(&dir.path().join("no-ld-cache")), 0);
    }
}
