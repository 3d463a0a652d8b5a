use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Default location of the remote translator repository.
pub const DEFAULT_TRANSLATOR_URL: &str = "https://oss.wwang.de/translators_CN";

/// Root application configuration, loaded from `~/.config/cnmeta/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub resolver: ResolverConfig,
    pub translators: TranslatorsConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Use the overseas mirror of the search endpoints unless the
    /// `isOversea` preference says otherwise.
    pub is_oversea: bool,
    /// Keep the fetched detail page as a child snapshot when a search
    /// result is converted.
    pub retain_snapshot_on_search: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslatorsConfig {
    pub base_url: String,
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Minimum delay between two requests sent by the same transport.
    pub min_interval_ms: u64,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for TranslatorsConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("cnmeta");

        Self {
            base_url: DEFAULT_TRANSLATOR_URL.to_string(),
            data_dir: data_dir.to_string_lossy().to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!(
                "Mozilla/5.0 (X11; Linux x86_64) cnmeta/{}",
                env!("CARGO_PKG_VERSION")
            ),
            timeout_secs: 30,
            min_interval_ms: 500,
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/cnmeta/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CNMETA_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("cnmeta")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Reject settings no transport can work with.
    pub fn validate(&self) -> Result<()> {
        let base = self.translators.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(CoreError::ConfigError(format!(
                "translators.base_url must be an http(s) URL, got {base:?}"
            )));
        }
        if self.http.timeout_secs == 0 {
            return Err(CoreError::ConfigError(
                "http.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    // ─── Derived paths ─────────────────────────────────────

    /// Root of every file cnmeta keeps on disk.
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.translators.data_dir)
    }

    /// Path to the persisted preference file.
    pub fn prefs_path(&self) -> PathBuf {
        self.data_dir().join("prefs.json")
    }
}
