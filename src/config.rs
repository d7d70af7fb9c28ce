//! User configuration, read from TOML.
//!
//! Every field has a default, so an absent file or an empty table is valid.

use crate::diff::DiffContext;
use crate::watcher::WatchOptions;
use error_set::error_set;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

error_set! {
    /// Errors loading the configuration file
    ConfigError := {
        #[display("Failed to read config from {path}: {message}")]
        ReadFailed { path: String, message: String },
        #[display("Invalid config in {path}: {message}")]
        InvalidToml { path: String, message: String },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub git: GitConfig,
    pub diff: DiffConfig,
    pub status: StatusConfig,
    pub watcher: WatcherConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitConfig {
    /// git binary to run
    pub program: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

/// Context for diff views; `"unlimited"` shows whole files
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiffConfig {
    pub context: ContextSetting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawContext")]
pub struct ContextSetting(pub DiffContext);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawContext {
    Lines(u32),
    Word(String),
}

impl TryFrom<RawContext> for ContextSetting {
    type Error = String;

    fn try_from(raw: RawContext) -> Result<Self, Self::Error> {
        match raw {
            RawContext::Lines(lines) => Ok(Self(DiffContext::Lines(lines))),
            RawContext::Word(word) if word == "unlimited" => Ok(Self(DiffContext::Unlimited)),
            RawContext::Word(word) => Err(format!(
                "context must be \"unlimited\" or a line count, got \"{word}\""
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatusConfig {
    /// Context lines for hunks expanded inline
    pub context: u32,
    pub recent_commits: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            context: 3,
            recent_commits: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub watch_worktree: bool,
    pub stale_debounce_ms: u64,
    pub auto_refresh: bool,
    pub auto_refresh_debounce_ms: u64,
    pub cooldown_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_worktree: false,
            stale_debounce_ms: 200,
            auto_refresh: false,
            auto_refresh_debounce_ms: 1000,
            cooldown_ms: 500,
        }
    }
}

impl WatcherConfig {
    pub fn options(&self) -> WatchOptions {
        WatchOptions {
            watch_worktree: self.watch_worktree,
            stale_debounce: Duration::from_millis(self.stale_debounce_ms),
            auto_refresh: self
                .auto_refresh
                .then(|| Duration::from_millis(self.auto_refresh_debounce_ms)),
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }
}

impl Config {
    /// Load from `path`, or from [`Config::default_path`] when `None`.
    ///
    /// An explicit path must exist; a missing default file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let contents = std::fs::read_to_string(&path).map_err(|error| ConfigError::ReadFailed {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        let config = Self::parse(&contents).map_err(|message| ConfigError::InvalidToml {
            path: path.display().to_string(),
            message,
        })?;

        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, String> {
        toml::from_str(contents).map_err(|error| error.to_string())
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("git-stagehand").join("config.toml"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.git.program, PathBuf::from("git"));
        assert_eq!(config.diff.context.0, DiffContext::Unlimited);
        assert_eq!(config.status.context, 3);
        assert!(config.watcher.enabled);
        assert_eq!(config.watcher.options().auto_refresh, None);
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
[git]
program = "/usr/local/bin/git"

[diff]
context = 5

[status]
recent_commits = 3

[watcher]
auto_refresh = true
auto_refresh_debounce_ms = 750
"#,
        )
        .unwrap();

        assert_eq!(config.git.program, PathBuf::from("/usr/local/bin/git"));
        assert_eq!(config.diff.context.0, DiffContext::Lines(5));
        assert_eq!(config.status.recent_commits, 3);
        assert_eq!(config.status.context, 3);
        assert_eq!(
            config.watcher.options().auto_refresh,
            Some(Duration::from_millis(750))
        );
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::parse("[diff]\ncontext = \"lots\"").is_err());
        assert!(Config::parse("[status]\nunknown = 1").is_err());
        assert!(Config::parse("[diff]\ncontext = \"unlimited\"").is_ok());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::ReadFailed { .. })
        ));

        let present = dir.path().join("config.toml");
        std::fs::write(&present, "[status]\ncontext = 1\n").unwrap();
        assert_eq!(Config::load(Some(&present)).unwrap().status.context, 1);
    }
}
