use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TransferError};

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "filetransfer";
const APP_NAME: &str = "filetransfer";
const CONFIG_FILE: &str = "config.json";

/// Overrides the directory `config.json` is read from.
pub const CONFIG_DIR_ENV: &str = "FILETRANSFER_CONFIG_DIR";

pub const DEFAULT_SERVICE_TYPE: &str = "_filetransfer._tcp";
pub const DEFAULT_DOMAIN: &str = "local.";
pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_BROWSE_TIMEOUT_SECS: u64 = 15;

/// What the receiver does with the name decoded from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileNamePolicy {
    /// Reject names that would escape the destination directory.
    #[default]
    RejectUnsafe,
    /// Join the name to the destination directory exactly as received.
    Preserve,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// mDNS service type, without the domain.
    pub service_type: String,
    pub domain: String,
    /// TCP port the receiver listens on. 0 picks a free port.
    pub port: u16,
    /// Overall window for the sender's browse.
    pub browse_timeout_secs: u64,
    pub file_name_policy: FileNamePolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            domain: DEFAULT_DOMAIN.to_string(),
            port: DEFAULT_PORT,
            browse_timeout_secs: DEFAULT_BROWSE_TIMEOUT_SECS,
            file_name_policy: FileNamePolicy::default(),
        }
    }
}

impl TransferConfig {
    /// Fully qualified service type, e.g. `_filetransfer._tcp.local.`
    pub fn service_domain(&self) -> String {
        let domain = self.domain.trim_matches('.');
        format!("{}.{}.", self.service_type.trim_end_matches('.'), domain)
    }

    pub fn browse_timeout(&self) -> Duration {
        Duration::from_secs(self.browse_timeout_secs)
    }

    /// Get the config file path
    fn get_config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }

        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load config from the platform config directory, or defaults if there is none.
    /// A file that exists but does not parse is an error.
    pub fn load() -> Result<Self> {
        match Self::get_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            TransferError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            TransferError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.service_type.starts_with('_') || !self.service_type.contains("._") {
            return Err(TransferError::Config(format!(
                "service type {:?} must look like _name._tcp",
                self.service_type
            )));
        }
        if self.domain.trim_matches('.').is_empty() {
            return Err(TransferError::Config("domain must not be empty".to_string()));
        }
        if self.browse_timeout_secs == 0 {
            return Err(TransferError::Config(
                "browse timeout must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.port, 12345);
        assert_eq!(config.service_domain(), "_filetransfer._tcp.local.");
        assert_eq!(config.browse_timeout(), Duration::from_secs(15));
        assert_eq!(config.file_name_policy, FileNamePolicy::RejectUnsafe);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_service_domain_normalizes_dots() {
        let config = TransferConfig {
            service_type: "_other._tcp.".to_string(),
            domain: ".local".to_string(),
            ..Default::default()
        };
        assert_eq!(config.service_domain(), "_other._tcp.local.");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "port": 4000, "file_name_policy": "preserve" }"#).unwrap();

        let config = TransferConfig::load_from(&path).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.file_name_policy, FileNamePolicy::Preserve);
        assert_eq!(config.service_type, DEFAULT_SERVICE_TYPE);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = TransferConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
    }

    #[test]
    fn test_rejects_bad_service_type() {
        let config = TransferConfig {
            service_type: "filetransfer".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
