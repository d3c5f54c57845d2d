//! On-disk configuration for the `xferterm` binary.
//!
//! A single JSON document holding the port settings and the transfer
//! budgets.  Every field has a default, so a partial (or absent) file is
//! fine; command-line flags are applied on top.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use xferterm_serial::serial::{SerialConfig, SerialError, SerialErrorKind, TransferConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// `<config_dir>/xferterm/config.json`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("xferterm").join("config.json"))
}

/// Load the configuration.
///
/// An explicit `path` must exist.  The default location is optional and
/// falls back to built-in defaults when missing.
pub fn load(path: Option<&Path>) -> Result<AppConfig, SerialError> {
    match path {
        Some(p) => read(p),
        None => match default_config_path() {
            Some(p) if p.exists() => read(&p),
            _ => Ok(AppConfig::default()),
        },
    }
}

fn read(path: &Path) -> Result<AppConfig, SerialError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        SerialError::new(
            SerialErrorKind::FileError,
            format!("cannot read config {}: {}", path.display(), e),
        )
    })?;
    let config: AppConfig = serde_json::from_str(&text).map_err(|e| {
        SerialError::new(
            SerialErrorKind::InvalidConfig,
            format!("invalid config {}: {}", path.display(), e),
        )
    })?;
    log::debug!("loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xferterm_serial::serial::BaudRate;

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"serial":{"portName":"/dev/ttyS1","baudRate":"2400"},"transfer":{"retryMax":5}}"#,
        )
        .unwrap();

        let cfg = load(Some(&path)).unwrap();
        assert_eq!(cfg.serial.port_name, "/dev/ttyS1");
        assert_eq!(cfg.serial.baud_rate, BaudRate::Baud2400);
        assert_eq!(cfg.transfer.retry_max, 5);
        assert_eq!(cfg.transfer.error_max, 10);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert_eq!(err.kind, SerialErrorKind::FileError);
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load(Some(&path)).unwrap_err();
        assert_eq!(err.kind, SerialErrorKind::InvalidConfig);
    }

    #[test]
    fn test_empty_object_is_default() {
        let cfg: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, AppConfig::default());
    }
}
