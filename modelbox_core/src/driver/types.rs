//! Driver descriptor value object
//!
//! [`DriverDesc`] is the identity card a plugin fills in through its
//! exported `DriverDescription` entrypoint: class/type/name/version plus
//! the load flags that shape how the library is opened later.

use crate::error::{ModelboxError, Result};

/// Metadata describing one registered driver.
///
/// A `(class, type, name, version, description)` tuple uniquely identifies
/// a driver within a registry. The descriptor is immutable once the driver
/// has been added; setters exist for the plugin's `DriverDescription`
/// callback and for cache rebuilds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverDesc {
    driver_class: String,
    driver_type: String,
    driver_name: String,
    driver_description: String,
    driver_version: String,
    driver_file_path: String,
    no_delete: bool,
    global: bool,
    deep_bind: bool,
}

impl DriverDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class(&self) -> &str {
        &self.driver_class
    }

    pub fn driver_type(&self) -> &str {
        &self.driver_type
    }

    pub fn name(&self) -> &str {
        &self.driver_name
    }

    pub fn description(&self) -> &str {
        &self.driver_description
    }

    pub fn version(&self) -> &str {
        &self.driver_version
    }

    pub fn file_path(&self) -> &str {
        &self.driver_file_path
    }

    /// Keep the library resident after the last unload.
    pub fn no_delete(&self) -> bool {
        self.no_delete
    }

    /// Export the library's symbols into the global scope.
    pub fn global(&self) -> bool {
        self.global
    }

    /// Prefer the library's own symbols over global ones.
    pub fn deep_bind(&self) -> bool {
        self.deep_bind
    }

    pub fn set_class(&mut self, class: impl Into<String>) {
        self.driver_class = class.into();
    }

    pub fn set_type(&mut self, driver_type: impl Into<String>) {
        self.driver_type = driver_type.into();
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.driver_name = name.into();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.driver_description = description.into();
    }

    pub fn set_file_path(&mut self, file_path: impl Into<String>) {
        self.driver_file_path = file_path.into();
    }

    pub fn set_no_delete(&mut self, no_delete: bool) {
        self.no_delete = no_delete;
    }

    pub fn set_global(&mut self, global: bool) {
        self.global = global;
    }

    pub fn set_deep_bind(&mut self, deep_bind: bool) {
        self.deep_bind = deep_bind;
    }

    /// Set the version string.
    ///
    /// Accepts an empty string, or `x.y.z` where each component is a
    /// non-empty run of ASCII decimal digits. Anything else is a
    /// configuration error and leaves the field unchanged.
    pub fn set_version(&mut self, version: impl Into<String>) -> Result<()> {
        let version = version.into();
        if version.is_empty() {
            return Ok(());
        }

        Self::check_version(&version)?;
        self.driver_version = version;
        Ok(())
    }

    fn check_version(version: &str) -> Result<()> {
        if !version.contains('.') {
            return Err(ModelboxError::Config(format!(
                "version is invalid, expected x.y.z, got: {}",
                version
            )));
        }

        let components: Vec<&str> = version.split('.').collect();
        if components.len() != 3 {
            return Err(ModelboxError::Config(format!(
                "version is invalid, expected x.y.z, got: {}",
                version
            )));
        }

        for component in components {
            if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ModelboxError::Config(format!(
                    "version is invalid, expected x.y.z, got: {}",
                    version
                )));
            }
        }

        Ok(())
    }

    /// Whether two descriptors name the same driver.
    pub(crate) fn same_identity(&self, other: &DriverDesc) -> bool {
        self.driver_class == other.driver_class
            && self.driver_type == other.driver_type
            && self.driver_name == other.driver_name
            && self.driver_description == other.driver_description
            && self.driver_version == other.driver_version
    }
}
