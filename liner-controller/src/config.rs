//! Host configuration stored in LINER_HOME

use std::path::{Path, PathBuf};
use std::time::Duration;

use liner_proto::ProtocolUuids;

/// Scan window used when the host does not pick one
pub const DEFAULT_SCAN_DURATION_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinerConfig {
    /// GATT layout of the devices this host talks to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuids: Option<ProtocolUuids>,
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,
}

fn default_scan_duration_ms() -> u64 {
    DEFAULT_SCAN_DURATION_MS
}

impl Default for LinerConfig {
    fn default() -> Self {
        Self {
            uuids: None,
            scan_duration_ms: DEFAULT_SCAN_DURATION_MS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no UUIDs configured, add a \"uuids\" section to {0}")]
    MissingUuids(PathBuf),
    #[error("could not determine home directory")]
    NoHome,
}

/// `$LINER_HOME`, or `~/.liner`
pub fn liner_home() -> Result<PathBuf, ConfigError> {
    if let Ok(home) = std::env::var("LINER_HOME") {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".liner"))
        .ok_or(ConfigError::NoHome)
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(liner_home()?.join("config.json"))
}

impl LinerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Load `path`, falling back to defaults when it does not exist yet
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn require_uuids(&self, path: &Path) -> Result<ProtocolUuids, ConfigError> {
        self.uuids
            .ok_or_else(|| ConfigError::MissingUuids(path.to_path_buf()))
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("liner-config-{}-{name}", std::process::id()))
            .join("config.json")
    }

    #[test]
    fn missing_file_means_defaults() {
        let path = temp_path("missing");
        assert!(matches!(
            LinerConfig::load(&path),
            Err(ConfigError::NotFound(_))
        ));
        let config = LinerConfig::load_or_default(&path).unwrap();
        assert_eq!(config, LinerConfig::default());
        assert_eq!(config.scan_duration(), Duration::from_secs(10));
        assert!(matches!(
            config.require_uuids(&path),
            Err(ConfigError::MissingUuids(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let path = temp_path("roundtrip");
        let config = LinerConfig {
            uuids: Some(ProtocolUuids {
                service: Uuid::from_u128(1),
                command: Uuid::from_u128(2),
                data: Uuid::from_u128(3),
                mode: Uuid::from_u128(4),
                live_stream: Uuid::from_u128(5),
                alternate_target: None,
            }),
            scan_duration_ms: 2500,
        };
        config.save(&path).unwrap();
        assert_eq!(LinerConfig::load(&path).unwrap(), config);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("scanDurationMs"));
        assert!(raw.contains("liveStream"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn duration_defaults_when_absent() {
        let config: LinerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.scan_duration_ms, DEFAULT_SCAN_DURATION_MS);
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let path = temp_path("garbage");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            LinerConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
