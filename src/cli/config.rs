//! Configuration discovery reporting
//!
//! Renders the discovery hierarchy used by [`NodeAdminConfig::discover`]
//! and the effective configuration for `node-admin show-config`.

use crate::config::{ConfigError, NodeAdminConfig};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// First existing configuration file, the explicit one if given
    pub fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        NodeAdminConfig::config_candidates()
            .into_iter()
            .find(|candidate| candidate.is_file())
    }

    /// Discovery hierarchy with the status of each candidate, followed by the
    /// effective configuration as TOML
    pub fn discovery_info(explicit: Option<&Path>) -> Result<String, ConfigError> {
        let mut out = String::new();
        let _ = writeln!(out, "# Configuration discovery hierarchy:");

        let mut candidates = Vec::new();
        if let Some(path) = explicit {
            candidates.push(path.to_path_buf());
        }
        candidates.extend(NodeAdminConfig::config_candidates());

        for (i, candidate) in candidates.iter().enumerate() {
            let status = if candidate.is_file() {
                "exists"
            } else if candidate.exists() {
                "not a file"
            } else {
                "not found"
            };
            let _ = writeln!(out, "#   {}. {} ({})", i + 1, candidate.display(), status);
        }

        match Self::find_config_file(explicit) {
            Some(found) => {
                let _ = writeln!(out, "# Active configuration: {}", found.display());
            }
            None => {
                let _ = writeln!(out, "# Active configuration: built-in defaults");
            }
        }
        let _ = writeln!(out);

        let config = NodeAdminConfig::discover(explicit)?;
        out.push_str(&config.to_toml_string()?);
        Ok(out)
    }
}
