//! Persisted scalar preferences that survive restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrefKey {
    /// Override of the translator repository base URL.
    TranslatorUrl,
    /// Route searches through the overseas endpoints.
    IsOversea,
    /// Epoch milliseconds of the last translator manifest check.
    LastCheck,
}

impl PrefKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TranslatorUrl => "translatorurl",
            Self::IsOversea => "isOversea",
            Self::LastCheck => "lastCheck",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: PrefKey) -> Option<PrefValue>;

    fn set(&self, key: PrefKey, value: PrefValue) -> Result<()>;

    fn get_bool(&self, key: PrefKey) -> Option<bool> {
        match self.get(key)? {
            PrefValue::Bool(b) => Some(b),
            PrefValue::Int(n) => Some(n != 0),
            PrefValue::Str(_) => None,
        }
    }

    fn get_i64(&self, key: PrefKey) -> Option<i64> {
        match self.get(key)? {
            PrefValue::Int(n) => Some(n),
            PrefValue::Str(s) => s.trim().parse().ok(),
            PrefValue::Bool(_) => None,
        }
    }

    /// String value, with empty strings treated as unset.
    fn get_string(&self, key: PrefKey) -> Option<String> {
        match self.get(key)? {
            PrefValue::Str(s) if !s.trim().is_empty() => Some(s),
            _ => None,
        }
    }
}

// ─── Memory ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, PrefValue>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: PrefKey) -> Option<PrefValue> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.get(key.as_str()).cloned()
    }

    fn set(&self, key: PrefKey, value: PrefValue) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(key.as_str().to_string(), value);
        Ok(())
    }
}

// ─── File ──────────────────────────────────────────────────

/// Preferences stored as a flat JSON object; every `set` rewrites the file.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<BTreeMap<String, PrefValue>>,
}

impl FilePreferences {
    /// Open the preference file at `path`. A missing file starts empty; an
    /// unreadable one is logged and replaced on the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&contents) {
                Ok(values) => values,
                Err(e) => {
                    warn!("ignoring unreadable preferences {}: {e}", path.display());
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, PrefValue>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, json).map_err(|e| {
            CoreError::Preference(format!("failed to write {}: {e}", self.path.display()))
        })
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: PrefKey) -> Option<PrefValue> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.get(key.as_str()).cloned()
    }

    fn set(&self, key: PrefKey, value: PrefValue) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(key.as_str().to_string(), value);
        self.persist(&values)
    }
}
