//! File retention rules and the shell script that applies them.
//!
//! All rules of one cleanup are rendered into a single `sh -c` script so a
//! cleanup costs exactly one exec into the container. Paths and patterns are
//! shell-quoted; patterns are `find -name` globs. The script avoids GNU-only
//! options such as `find -printf` and also runs on busybox images.

use serde::{Deserialize, Serialize};
use shell_escape::unix::escape;
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A retention rule for files in a workload container.
///
/// ```toml
/// [[maintenance.cleanup_rules]]
/// type = "delete_older_than"
/// directory = "/opt/workload/logs"
/// pattern = "*.log.*"
/// max_age = 259200
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CleanupRule {
    /// Delete matching files (recursively) last modified more than `max_age` ago
    DeleteOlderThan {
        directory: PathBuf,
        pattern: String,
        #[serde(with = "crate::config::duration_secs")]
        max_age: Duration,
    },
    /// Keep only the `count` most recently modified matching files directly in `directory`.
    /// File names containing a newline are never removed.
    KeepNewest {
        directory: PathBuf,
        pattern: String,
        count: usize,
    },
}

impl CleanupRule {
    pub fn directory(&self) -> &Path {
        match self {
            CleanupRule::DeleteOlderThan { directory, .. } => directory,
            CleanupRule::KeepNewest { directory, .. } => directory,
        }
    }

    /// One shell statement applying this rule; a missing directory is a no-op
    pub fn to_shell(&self) -> String {
        let directory = quote_path(self.directory());
        let action = match self {
            CleanupRule::DeleteOlderThan {
                pattern, max_age, ..
            } => format!(
                "find {dir} -type f -name {pattern} -mmin +{minutes} -delete",
                dir = directory,
                pattern = escape(Cow::Borrowed(pattern.as_str())),
                minutes = max_age.as_secs() / 60,
            ),
            CleanupRule::KeepNewest { pattern, count, .. } => format!(
                "find {top} ! -name . -prune -type f -name {pattern} -exec ls -1t -- {{}} + \
                 | tail -n +{first} \
                 | while IFS= read -r f; do rm -f -- \"$f\"; done",
                top = quote_path(&self.directory().join(".")),
                pattern = escape(Cow::Borrowed(pattern.as_str())),
                first = count + 1,
            ),
        };
        format!("if [ -d {} ]; then {}; fi", directory, action)
    }
}

/// Script applying `rules` in order, or `None` when there is nothing to do
pub fn cleanup_script(rules: &[CleanupRule]) -> Option<String> {
    if rules.is_empty() {
        return None;
    }
    let mut script = String::from("set -e\n");
    for rule in rules {
        script.push_str(&rule.to_shell());
        script.push('\n');
    }
    Some(script)
}

/// Argv running [`cleanup_script`] in the container
pub fn cleanup_command(rules: &[CleanupRule]) -> Option<Vec<String>> {
    cleanup_script(rules).map(|script| vec!["sh".to_string(), "-c".to_string(), script])
}

fn quote_path(path: &Path) -> String {
    escape(path.to_string_lossy()).into_owned()
}
