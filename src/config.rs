//! Node agent configuration.
//!
//! The configuration is constructed once at process start and handed to every
//! component behind an [`Arc`](std::sync::Arc). Discovery order:
//! 1. Explicit path passed on the command line
//! 2. Current directory: ./node-admin.toml
//! 3. System config: /etc/node-admin/config.toml
//! 4. Built-in defaults

use crate::maintenance::CleanupRule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Local configuration file name
pub const LOCAL_CONFIG_FILE_NAME: &str = "node-admin.toml";

/// System-wide configuration file
pub const SYSTEM_CONFIG_FILE: &str = "/etc/node-admin/config.toml";

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Filesystem layout shared by the host, the agent container and workload containers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Root of per-container application storage, as seen from the host
    #[serde(default = "default_application_storage")]
    pub application_storage: PathBuf,

    /// Where the host's root filesystem is mounted inside the agent container.
    /// `/` when the agent runs directly on the host.
    #[serde(default = "default_host_root_in_agent")]
    pub host_root_in_agent: PathBuf,

    /// Home directory of the workload inside its container
    #[serde(default = "default_workload_home")]
    pub workload_home: PathBuf,

    /// Directory inside the workload container where core dumps are written
    #[serde(default = "default_coredump_dir")]
    pub coredump_dir: PathBuf,

    /// Directory under the application storage root receiving reported core dumps
    #[serde(default = "default_processed_coredumps")]
    pub processed_coredumps: String,
}

fn default_application_storage() -> PathBuf {
    PathBuf::from("/home/docker/container-storage")
}

fn default_host_root_in_agent() -> PathBuf {
    PathBuf::from("/host")
}

fn default_workload_home() -> PathBuf {
    PathBuf::from("/opt/workload")
}

fn default_coredump_dir() -> PathBuf {
    PathBuf::from("/var/crash")
}

fn default_processed_coredumps() -> String {
    crate::paths::PROCESSED_COREDUMPS_DIR_NAME.to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            application_storage: default_application_storage(),
            host_root_in_agent: default_host_root_in_agent(),
            workload_home: default_workload_home(),
            coredump_dir: default_coredump_dir(),
            processed_coredumps: default_processed_coredumps(),
        }
    }
}

/// Maintenance job settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaintenanceConfig {
    /// Minimum interval between two successful file cleanups of one container
    #[serde(default = "default_cleanup_cooldown", with = "duration_secs")]
    pub cleanup_cooldown: Duration,

    /// File cleanup rules applied inside each workload container.
    /// Unset means the default rules under `paths.workload_home`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_rules: Option<Vec<CleanupRule>>,
}

fn default_cleanup_cooldown() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Stock cleanup rules for a workload whose home directory is `home`
pub fn default_cleanup_rules(home: &Path) -> Vec<CleanupRule> {
    const DAY: u64 = 24 * 60 * 60;
    vec![
        CleanupRule::DeleteOlderThan {
            directory: home.join("logs"),
            pattern: "*.log.*".to_string(),
            max_age: Duration::from_secs(3 * DAY),
        },
        CleanupRule::DeleteOlderThan {
            directory: home.join("logs/archive"),
            pattern: "*".to_string(),
            max_age: Duration::from_secs(31 * DAY),
        },
        CleanupRule::DeleteOlderThan {
            directory: home.join("tmp"),
            pattern: "*".to_string(),
            max_age: Duration::from_secs(7 * DAY),
        },
        CleanupRule::KeepNewest {
            directory: home.join("logs"),
            pattern: "*.log.*".to_string(),
            count: 10,
        },
    ]
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_cooldown: default_cleanup_cooldown(),
            cleanup_rules: None,
        }
    }
}

/// PEM material for the agent's own service identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfig {
    /// Service identity asserted by the certificate, `<domain>.<service>`
    pub service: String,
    pub ca_bundle: PathBuf,
    pub certificate: PathBuf,
    pub private_key: PathBuf,
}

/// Complete node agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeAdminConfig {
    /// Upload target for core-dump reports. Dumps are only archived locally when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coredump_feed_endpoint: Option<Url>,

    /// Bounded wait for host and in-container command execution
    #[serde(default = "default_command_timeout", with = "duration_secs")]
    pub command_timeout: Duration,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityConfig>,
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

impl Default for NodeAdminConfig {
    fn default() -> Self {
        Self {
            coredump_feed_endpoint: None,
            command_timeout: default_command_timeout(),
            paths: PathsConfig::default(),
            maintenance: MaintenanceConfig::default(),
            identity: None,
        }
    }
}

impl NodeAdminConfig {
    /// Set the host-view application storage root
    pub fn with_application_storage(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.application_storage = path.into();
        self
    }

    /// Set where the host root is mounted inside the agent container
    pub fn with_host_root_in_agent(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.host_root_in_agent = path.into();
        self
    }

    pub fn with_coredump_feed_endpoint(mut self, endpoint: Url) -> Self {
        self.coredump_feed_endpoint = Some(endpoint);
        self
    }

    pub fn with_cleanup_cooldown(mut self, cooldown: Duration) -> Self {
        self.maintenance.cleanup_cooldown = cooldown;
        self
    }

    pub fn with_cleanup_rules(mut self, rules: Vec<CleanupRule>) -> Self {
        self.maintenance.cleanup_rules = Some(rules);
        self
    }

    /// Cleanup rules in effect, the defaults following the configured workload home
    pub fn cleanup_rules(&self) -> Vec<CleanupRule> {
        match &self.maintenance.cleanup_rules {
            Some(rules) => rules.clone(),
            None => default_cleanup_rules(&self.paths.workload_home),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Check the invariants the path resolver relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let absolute = [
            ("paths.application_storage", &self.paths.application_storage),
            ("paths.host_root_in_agent", &self.paths.host_root_in_agent),
            ("paths.workload_home", &self.paths.workload_home),
            ("paths.coredump_dir", &self.paths.coredump_dir),
        ];
        for (name, path) in absolute {
            if !path.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "{} must be absolute, got {}",
                    name,
                    path.display()
                )));
            }
        }

        let mut processed = Path::new(&self.paths.processed_coredumps).components();
        if !matches!(
            (processed.next(), processed.next()),
            (Some(std::path::Component::Normal(_)), None)
        ) {
            return Err(ConfigError::Invalid(format!(
                "paths.processed_coredumps must be a single directory name, got {}",
                self.paths.processed_coredumps
            )));
        }

        if self.command_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "command_timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: NodeAdminConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            info!("Loading configuration from: {:?}", path);
            return Self::from_toml_file(path);
        }

        for candidate in Self::config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                info!("Loading configuration from: {:?}", candidate);
                return Self::from_toml_file(candidate);
            }
        }

        info!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Configuration files checked by [`discover`](Self::discover), in priority order
    pub fn config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(current_dir) = std::env::current_dir() {
            candidates.push(current_dir.join(LOCAL_CONFIG_FILE_NAME));
        }
        candidates.push(PathBuf::from(SYSTEM_CONFIG_FILE));
        candidates
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = NodeAdminConfig::default();
        assert_eq!(config.maintenance.cleanup_cooldown, Duration::from_secs(3600));
        assert_eq!(
            config.paths.application_storage,
            PathBuf::from("/home/docker/container-storage")
        );
        assert!(config.coredump_feed_endpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("node-admin.toml");
        fs::write(
            &path,
            r#"
command_timeout = 30
coredump_feed_endpoint = "https://feed.example.com/document"

[paths]
host_root_in_agent = "/"

[maintenance]
cleanup_cooldown = 120
"#,
        )
        .unwrap();

        let config = NodeAdminConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.paths.host_root_in_agent, PathBuf::from("/"));
        assert_eq!(config.paths.coredump_dir, PathBuf::from("/var/crash"));
        assert_eq!(config.maintenance.cleanup_cooldown, Duration::from_secs(120));
        assert_eq!(config.maintenance.cleanup_rules, None);
        assert_eq!(
            config.cleanup_rules(),
            default_cleanup_rules(Path::new("/opt/workload"))
        );
        assert_eq!(
            config.coredump_feed_endpoint.unwrap().as_str(),
            "https://feed.example.com/document"
        );
    }

    #[test]
    fn test_default_cleanup_rules_follow_workload_home() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("node-admin.toml");
        fs::write(&path, "[paths]\nworkload_home = \"/srv/app\"\n").unwrap();

        let config = NodeAdminConfig::from_toml_file(&path).unwrap();
        let rules = config.cleanup_rules();
        assert!(!rules.is_empty());
        for rule in &rules {
            assert!(rule.directory().starts_with("/srv/app"), "{:?}", rule);
        }

        let custom = vec![CleanupRule::KeepNewest {
            directory: PathBuf::from("/data"),
            pattern: "*.bin".to_string(),
            count: 2,
        }];
        assert_eq!(config.with_cleanup_rules(custom.clone()).cleanup_rules(), custom);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = NodeAdminConfig::default().with_command_timeout(Duration::from_secs(10));
        let rendered = config.to_toml_string().unwrap();
        let parsed: NodeAdminConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_relative_paths_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        fs::write(&path, "[paths]\napplication_storage = \"relative/storage\"\n").unwrap();

        let err = NodeAdminConfig::from_toml_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_processed_coredumps_must_be_a_name() {
        for name in ["nested/dir", "/abs", "..", ""] {
            let mut config = NodeAdminConfig::default();
            config.paths.processed_coredumps = name.to_string();
            assert!(config.validate().is_err(), "{}", name);
        }
    }

    #[test]
    fn test_missing_file() {
        let err = NodeAdminConfig::from_toml_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
