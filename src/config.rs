//! Versioning configuration
//!
//! Names of the generated columns, tables and namespace root. Every field
//! has a default, so an empty JSON object is a valid configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersioningConfig {
    /// Application-time range column
    pub application_dimension: String,
    /// Transaction-time range column on history tables
    pub system_dimension: String,
    /// Revision counter column on application-versioned tables
    pub version_column: String,
    /// Appended to the source table name to derive the history table
    pub history_suffix: String,
    /// Root of the history counterpart namespace
    pub history_namespace: String,
    /// Primary key used when a table declares none
    pub default_primary_key: String,
}

impl Default for VersioningConfig {
    fn default() -> Self {
        Self {
            application_dimension: "validity".to_string(),
            system_dimension: "system_period".to_string(),
            version_column: "version".to_string(),
            history_suffix: "_history".to_string(),
            history_namespace: "History".to_string(),
            default_primary_key: "id".to_string(),
        }
    }
}

impl VersioningConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("application_dimension", &self.application_dimension),
            ("system_dimension", &self.system_dimension),
            ("version_column", &self.version_column),
            ("history_suffix", &self.history_suffix),
            ("history_namespace", &self.history_namespace),
            ("default_primary_key", &self.default_primary_key),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(Error::Configuration(format!("{field} must not be empty")));
            }
        }
        if self.application_dimension == self.system_dimension {
            return Err(Error::Configuration(format!(
                "application and system dimensions are both {}",
                self.system_dimension
            )));
        }
        if self.history_namespace.contains("::") {
            return Err(Error::Configuration(
                "history_namespace must be a single path segment".to_string(),
            ));
        }
        Ok(())
    }
}
