//! Configuration reader for the driver core
//!
//! The registry consumes configuration as flat dotted key/value lookups
//! (`driver.dir`, `driver.skip-default`) over a parsed TOML document:
//!
//! ```toml
//! [driver]
//! dir = ["/opt/modelbox/drivers", "/usr/lib/modelbox"]
//! skip-default = false
//! ```

use crate::error::Result;

/// Key/value configuration backed by a TOML table.
///
/// Lookups use dotted keys: `get_strings("driver.dir")` walks the `driver`
/// table and reads its `dir` entry. Missing keys resolve to the caller's
/// default rather than erroring.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    root: toml::Table,
}

impl Configuration {
    /// Create an empty configuration (all lookups return defaults).
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let root: toml::Table = content.parse()?;
        Ok(Self { root })
    }

    /// Parse a configuration from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    fn lookup(&self, key: &str) -> Option<&toml::Value> {
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = self.root.get(first)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }

    /// Read a multi-valued string key. A single string value yields a
    /// one-element list; a missing key yields an empty list.
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        match self.lookup(key) {
            Some(toml::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(toml::Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Read a boolean key, falling back to `default` when absent or not a
    /// boolean.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.lookup(key) {
            Some(toml::Value::Boolean(b)) => *b,
            _ => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_strings_array() {
        let config = Configuration::from_toml_str(
            r#"
[driver]
dir = ["/a", "/b"]
"#,
        )
        .unwrap();
        assert_eq!(config.get_strings("driver.dir"), vec!["/a", "/b"]);
    }

    #[test]
    fn test_get_strings_single_value() {
        let config = Configuration::from_toml_str(
            r#"
[driver]
dir = "/only"
"#,
        )
        .unwrap();
        assert_eq!(config.get_strings("driver.dir"), vec!["/only"]);
    }

    #[test]
    fn test_get_strings_missing() {
        let config = Configuration::new();
        assert!(config.get_strings("driver.dir").is_empty());
    }

    #[test]
    fn test_get_bool() {
        let config = Configuration::from_toml_str(
            r#"
[driver]
skip-default = true
"#,
        )
        .unwrap();
        assert!(config.get_bool("driver.skip-default", false));
        assert!(!config.get_bool("driver.missing", false));
        assert!(config.get_bool("driver.missing", true));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(Configuration::from_toml_str("driver = [").is_err());
    }
}
