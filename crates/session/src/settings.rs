use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};

/// Default retrieval-service endpoint.
pub const DEFAULT_BASE_URL: &str = "http://localhost:9000";

/// Default number of retrieved chunks per chat query. Observed call sites
/// used 3–5; this is a tunable, not a constant of the protocol.
pub const DEFAULT_TOP_K: u32 = 3;

const TOP_K_MIN: u32 = 1;
const TOP_K_MAX: u32 = 20;

const ENV_BASE_URL: &str = "AGRICHAT_BASE_URL";
const ENV_TOP_K: &str = "AGRICHAT_TOP_K";

/// Settings that persist across sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Base URL of the retrieval service.
    pub base_url: String,
    /// Retrieval depth passed on every chat query.
    pub top_k: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl SessionSettings {
    /// Defaults overridden by `AGRICHAT_BASE_URL` / `AGRICHAT_TOP_K` when
    /// set and non-empty.
    pub fn from_environment() -> Self {
        let mut settings = Self::default();

        if let Ok(value) = std::env::var(ENV_BASE_URL) {
            let value = value.trim();
            if !value.is_empty() {
                settings.base_url = value.trim_end_matches('/').to_string();
            }
        }

        if let Ok(value) = std::env::var(ENV_TOP_K) {
            settings.top_k = parse_top_k(&value);
        }

        settings
    }
}

fn parse_top_k(raw: &str) -> u32 {
    match raw.trim().parse::<u32>() {
        Ok(value) => value.clamp(TOP_K_MIN, TOP_K_MAX),
        Err(_) => {
            tracing::warn!(raw = %raw, "invalid top_k value, using default");
            DEFAULT_TOP_K
        }
    }
}

/// Errors from persisting settings.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create config directory at {path:?}"))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write settings file to {path:?}"))]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Settings persistence layer using a simple line-based format.
pub struct SettingsStore {
    settings: SessionSettings,
    config_path: PathBuf,
}

impl SettingsStore {
    /// Default config file path relative to the working directory.
    pub fn default_config_path() -> PathBuf {
        PathBuf::from(".agrichat").join("settings.conf")
    }

    /// Creates a store backed by the given config path, reading whatever is
    /// on disk (or environment-backed defaults when the file is missing).
    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings,
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Updates settings and persists them to disk.
    pub fn update(&mut self, settings: SessionSettings) -> Result<(), SettingsError> {
        self.persist(&settings)?;
        self.settings = settings;
        Ok(())
    }

    fn load_from_disk(path: &Path) -> SessionSettings {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                tracing::info!(path = %path.display(), "settings file not found, using environment defaults");
                return SessionSettings::from_environment();
            }
        };

        Self::parse_settings(&content)
    }

    /// Parses `key=value` lines, tolerating comments, blank lines, and
    /// unknown keys.
    fn parse_settings(content: &str) -> SessionSettings {
        let mut settings = SessionSettings::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();

                match key {
                    "base_url" => {
                        if !value.is_empty() {
                            settings.base_url = value.trim_end_matches('/').to_string();
                        }
                    }
                    "top_k" => settings.top_k = parse_top_k(value),
                    _ => {}
                }
            }
        }

        settings
    }

    fn format_settings(settings: &SessionSettings) -> String {
        format!(
            "# Agrichat session settings\n\
             base_url={}\n\
             top_k={}\n",
            settings.base_url, settings.top_k
        )
    }

    fn persist(&self, settings: &SessionSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                path: parent.to_path_buf(),
            })?;
        }

        let content = Self::format_settings(settings);
        std::fs::write(&self.config_path, content).context(WriteFileSnafu {
            path: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_applies_known_keys_and_ignores_noise() {
        let content = "# comment\n\nbase_url=http://farm.example:9000/\ntop_k=5\nmystery=42\n";
        let settings = SettingsStore::parse_settings(content);

        assert_eq!(settings.base_url, "http://farm.example:9000");
        assert_eq!(settings.top_k, 5);
    }

    #[test]
    fn invalid_top_k_falls_back_to_default() {
        let settings = SettingsStore::parse_settings("top_k=lots\n");
        assert_eq!(settings.top_k, DEFAULT_TOP_K);
    }

    #[test]
    fn out_of_range_top_k_is_clamped() {
        assert_eq!(SettingsStore::parse_settings("top_k=0\n").top_k, TOP_K_MIN);
        assert_eq!(SettingsStore::parse_settings("top_k=999\n").top_k, TOP_K_MAX);
    }

    #[test]
    fn format_and_parse_roundtrip() {
        let settings = SessionSettings {
            base_url: "http://farm.example:9000".to_string(),
            top_k: 4,
        };
        let parsed = SettingsStore::parse_settings(&SettingsStore::format_settings(&settings));
        assert_eq!(parsed, settings);
    }
}
