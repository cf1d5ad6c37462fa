//! patcha.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default cache time-to-live.
pub const DEFAULT_TTL: &str = "24h";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("invalid duration {0:?} (expected e.g. \"500ms\", \"30s\", \"5m\", \"24h\", \"7d\")")]
    InvalidDuration(String),
    #[error("cache ttl {0:?} is shorter than one second")]
    TtlTooShort(String),
    #[error("store kind \"redb\" needs a [store].path")]
    MissingStorePath,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PatchaConfig {
    /// Projects to reconcile, in order.
    pub projects: Vec<String>,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub source: SourceConfig,
}

/// Which cache store technology backs the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// redb database file on disk.
    #[default]
    Redb,
    /// redb in-memory backend; nothing survives the process.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a refreshed snapshot stays fresh (e.g. "24h").
    pub ttl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    /// JSON inventory export read by the file-backed fleet source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<PathBuf>,
    /// Items per page requested from the source.
    pub page_size: usize,
    /// Deployments fetched concurrently within one project.
    pub concurrency: usize,
    /// Timeout for a single source page call (e.g. "30s").
    pub timeout: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Redb,
            path: Some(PathBuf::from("patcha.redb")),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL.to_string(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            inventory: None,
            page_size: 100,
            concurrency: 8,
            timeout: "30s".to_string(),
        }
    }
}

impl PatchaConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PatchaConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Read `path` if it exists, otherwise start from defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.is_file() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn ttl(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.cache.ttl)
    }

    pub fn call_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.source.timeout)
    }

    /// Check the settings that would otherwise fail late in a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Expiry is stored in whole seconds.
        if self.ttl()? < Duration::from_secs(1) {
            return Err(ConfigError::TtlTooShort(self.cache.ttl.clone()));
        }
        self.call_timeout()?;
        if self.store.kind == StoreKind::Redb && self.store.path.is_none() {
            return Err(ConfigError::MissingStorePath);
        }
        Ok(())
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "24h", "7d".
/// A plain number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());
    let (digits, unit_secs) = if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid());
    } else if let Some(v) = s.strip_suffix('s') {
        (v, 1)
    } else if let Some(v) = s.strip_suffix('m') {
        (v, 60)
    } else if let Some(v) = s.strip_suffix('h') {
        (v, 60 * 60)
    } else if let Some(v) = s.strip_suffix('d') {
        (v, 24 * 60 * 60)
    } else {
        (s, 1)
    };
    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
projects = ["integration", "staging", "production"]

[store]
kind = "redb"
path = "/var/lib/patcha/cache.redb"

[cache]
ttl = "12h"

[source]
inventory = "fleet.json"
page_size = 50
concurrency = 4
timeout = "10s"
"#;
        let config: PatchaConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.projects, vec!["integration", "staging", "production"]);
        assert_eq!(config.store.kind, StoreKind::Redb);
        assert_eq!(config.ttl().unwrap(), Duration::from_secs(12 * 3600));
        assert_eq!(config.source.page_size, 50);
        assert_eq!(config.call_timeout().unwrap(), Duration::from_secs(10));
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_minimal_uses_defaults() {
        let config: PatchaConfig = toml::from_str("projects = [\"prod\"]").unwrap();
        assert_eq!(config.cache.ttl, DEFAULT_TTL);
        assert_eq!(config.ttl().unwrap(), Duration::from_secs(24 * 3600));
        assert_eq!(config.store.path, Some(PathBuf::from("patcha.redb")));
        assert_eq!(config.source.concurrency, 8);
    }

    #[test]
    fn test_memory_store_kind() {
        let config: PatchaConfig = toml::from_str("[store]\nkind = \"memory\"\n").unwrap();
        assert_eq!(config.store.kind, StoreKind::Memory);
    }

    #[test]
    fn test_redb_without_path_is_rejected() {
        let mut config = PatchaConfig::default();
        config.store.path = None;
        assert!(matches!(config.validate(), Err(ConfigError::MissingStorePath)));

        config.store.kind = StoreKind::Memory;
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_ttl_is_rejected() {
        let mut config = PatchaConfig::default();
        config.cache.ttl = "soon".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDuration(_))));
    }

    #[test]
    fn test_subsecond_ttl_is_rejected() {
        let mut config = PatchaConfig::default();
        config.cache.ttl = "500ms".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::TtlTooShort(_))));

        config.cache.ttl = "0s".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::TtlTooShort(_))));

        config.cache.ttl = "1000ms".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let mut config = PatchaConfig::default();
        config.projects = vec!["staging".to_string()];
        let rendered = config.to_toml_string().unwrap();
        let parsed: PatchaConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = PatchaConfig::load_or_default(&dir.path().join("patcha.toml")).unwrap();
        assert_eq!(config, PatchaConfig::default());
    }

    #[test]
    fn test_load_or_default_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patcha.toml");
        std::fs::write(&path, "projects = [\"a\", \"b\"]\n").unwrap();
        let config = PatchaConfig::load_or_default(&path).unwrap();
        assert_eq!(config.projects, vec!["a", "b"]);
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("99999999999999999999d").is_err());
    }
}
