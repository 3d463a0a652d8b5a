use std::fmt;

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// Timestamp layout used by manifests and translator headers.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `lastUpdated` of a translator we know nothing about.
pub const UNKNOWN_TIMESTAMP: &str = "1970-01-01 00:00:00";

/// Leading JSON object of a translator file.
static META_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\{[\S\s]*?\}\s*?[\r\n]").expect("valid regex"));

/// Remote index entry, keyed by filename in [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub label: String,
    #[serde(rename = "lastUpdated")]
    pub last_updated: String,
}

/// Remote index, in the order the repository lists it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest(Vec<(String, ManifestEntry)>);

impl Manifest {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, filename: &str) -> Option<&ManifestEntry> {
        self.0.iter().find(|(f, _)| f == filename).map(|(_, e)| e)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ManifestEntry)> {
        self.0.iter().map(|(f, e)| (f.as_str(), e))
    }
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ManifestVisitor;

        impl<'de> Visitor<'de> for ManifestVisitor {
            type Value = Manifest;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map of translator filenames to manifest entries")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries: Vec<(String, ManifestEntry)> =
                    Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((filename, entry)) = map.next_entry::<String, ManifestEntry>()? {
                    // A repeated key keeps its first position and its last value.
                    match entries.iter_mut().find(|(f, _)| *f == filename) {
                        Some(slot) => slot.1 = entry,
                        None => entries.push((filename, entry)),
                    }
                }
                Ok(Manifest(entries))
            }
        }

        deserializer.deserialize_map(ManifestVisitor)
    }
}

/// Header block of a translator file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranslatorMeta {
    #[serde(rename = "translatorID")]
    pub translator_id: String,
    pub label: String,
    pub creator: String,
    pub target: String,
    pub min_version: String,
    pub max_version: String,
    pub priority: i64,
    pub in_repository: bool,
    pub translator_type: i64,
    pub browser_support: String,
    pub last_updated: String,
}

impl Default for TranslatorMeta {
    fn default() -> Self {
        Self {
            translator_id: "undefined".to_string(),
            label: "undefined".to_string(),
            creator: "undefined".to_string(),
            target: "undefined".to_string(),
            min_version: "undefined".to_string(),
            max_version: "undefined".to_string(),
            priority: 100,
            in_repository: false,
            translator_type: 4,
            browser_support: "gcsibv".to_string(),
            last_updated: UNKNOWN_TIMESTAMP.to_string(),
        }
    }
}

impl TranslatorMeta {
    /// Parse the header of a translator file's contents.
    pub fn from_source(content: &str) -> Option<Self> {
        let header = META_HEADER_RE.find(content)?;
        serde_json::from_str(header.as_str()).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Current,
    Stale,
}

impl SyncStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Current => "✔",
            Self::Stale => "✖",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One row of the local translator cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatorCacheEntry {
    pub filename: String,
    /// Display label from the manifest.
    pub label: String,
    /// Filename without `.js`.
    pub short_label: String,
    pub local_updated: String,
    pub remote_updated: String,
    pub has_local_file: bool,
    pub status: SyncStatus,
}

impl TranslatorCacheEntry {
    /// Combine a manifest entry with what is on disk. `local` is `None` when
    /// the file does not exist.
    pub fn new(filename: &str, remote: &ManifestEntry, local: Option<&TranslatorMeta>) -> Self {
        let local_updated = local
            .map(|m| m.last_updated.clone())
            .unwrap_or_else(|| UNKNOWN_TIMESTAMP.to_string());
        let stale = local.is_none() || is_earlier(&local_updated, &remote.last_updated);
        Self {
            filename: filename.to_string(),
            label: remote.label.clone(),
            short_label: filename.strip_suffix(".js").unwrap_or(filename).to_string(),
            local_updated,
            remote_updated: remote.last_updated.clone(),
            has_local_file: local.is_some(),
            status: if stale {
                SyncStatus::Stale
            } else {
                SyncStatus::Current
            },
        }
    }
}

/// Cache rows, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TranslatorCache(Vec<TranslatorCacheEntry>);

impl TranslatorCache {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, filename: &str) -> Option<&TranslatorCacheEntry> {
        self.0.iter().find(|e| e.filename == filename)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TranslatorCacheEntry> {
        self.0.iter()
    }

    pub fn to_vec(&self) -> Vec<TranslatorCacheEntry> {
        self.0.clone()
    }

    /// The installed copy of `filename` now matches the manifest.
    pub fn mark_downloaded(&mut self, filename: &str) {
        if let Some(row) = self.0.iter_mut().find(|e| e.filename == filename) {
            row.local_updated = row.remote_updated.clone();
            row.has_local_file = true;
            row.status = SyncStatus::Current;
        }
    }
}

impl FromIterator<TranslatorCacheEntry> for TranslatorCache {
    fn from_iter<I: IntoIterator<Item = TranslatorCacheEntry>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).ok()
}

/// Strictly earlier. Anything unparsable compares as not earlier.
pub fn is_earlier(a: &str, b: &str) -> bool {
    match (parse_timestamp(a), parse_timestamp(b)) {
        (Some(a), Some(b)) => a < b,
        _ => false,
    }
}
