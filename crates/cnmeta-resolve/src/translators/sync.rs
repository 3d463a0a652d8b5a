use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use cnmeta_core::{PrefKey, PreferenceStore, TranslatorReload, TranslatorsConfig};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ResolveError, Result};
use crate::http::Transport;
use crate::translators::gate::check_at;
use crate::translators::manifest::{
    Manifest, SyncStatus, TranslatorCache, TranslatorCacheEntry, TranslatorMeta,
};

pub const MANIFEST_CACHE_FILE: &str = "translators_CN.json";
pub const TRANSLATORS_DIR: &str = "translators";

/// Progress of manifest refreshes and downloads.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    ManifestLoaded { entries: usize, from_cache: bool },
    DownloadStarted { total: usize },
    Downloaded { filename: String, progress: f64 },
    DownloadFailed { filename: String, error: String, progress: f64 },
    Finished { succeeded: usize, failed: usize },
}

pub type SyncProgressFn = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Debug, Default, Clone, Serialize)]
pub struct DownloadSummary {
    pub attempted: usize,
    pub succeeded: Vec<String>,
    /// Filename and reason.
    pub failed: Vec<(String, String)>,
    /// Entries left alone because they were current.
    pub skipped: usize,
    pub reloaded: bool,
}

/// Keeps `<data_dir>/translators` in step with the remote repository.
pub struct TranslatorSync {
    transport: Arc<dyn Transport>,
    prefs: Arc<dyn PreferenceStore>,
    reload: Arc<dyn TranslatorReload>,
    data_dir: PathBuf,
    default_base_url: String,
    entries: RwLock<Arc<TranslatorCache>>,
    progress: Option<SyncProgressFn>,
}

impl TranslatorSync {
    pub fn new(
        transport: Arc<dyn Transport>,
        prefs: Arc<dyn PreferenceStore>,
        reload: Arc<dyn TranslatorReload>,
        config: &TranslatorsConfig,
    ) -> Self {
        Self {
            transport,
            prefs,
            reload,
            data_dir: PathBuf::from(&config.data_dir),
            default_base_url: config.base_url.clone(),
            entries: RwLock::new(Arc::new(TranslatorCache::default())),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: SyncProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(progress) = &self.progress {
            progress(&event);
        }
    }

    /// Repository root: the `translatorurl` preference, else the configured
    /// default.
    pub fn base_url(&self) -> String {
        self.prefs
            .get_string(PrefKey::TranslatorUrl)
            .unwrap_or_else(|| self.default_base_url.clone())
            .trim()
            .trim_end_matches('/')
            .to_string()
    }

    pub fn manifest_cache_path(&self) -> PathBuf {
        self.data_dir.join(MANIFEST_CACHE_FILE)
    }

    pub fn translators_dir(&self) -> PathBuf {
        self.data_dir.join(TRANSLATORS_DIR)
    }

    fn translator_path(&self, filename: &str) -> Result<PathBuf> {
        let plain = Path::new(filename)
            .file_name()
            .is_some_and(|name| name == filename);
        if !plain {
            return Err(ResolveError::Download {
                filename: filename.to_string(),
                message: "not a plain file name".to_string(),
            });
        }
        Ok(self.translators_dir().join(filename))
    }

    /// The rows built by the last refresh.
    pub fn entries(&self) -> Arc<TranslatorCache> {
        let guard = self.entries.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    // ─── Manifest ─────────────────────────────────────────────────────────

    /// Read the cached manifest unless a check is due, otherwise fetch it.
    /// The gate is only consulted when a cache file exists.
    async fn load_manifest(&self, now_ms: i64) -> Result<Manifest> {
        let cache_path = self.manifest_cache_path();
        if tokio::fs::try_exists(&cache_path).await? && !check_at(self.prefs.as_ref(), now_ms)? {
            let contents = tokio::fs::read_to_string(&cache_path).await?;
            match serde_json::from_str::<Manifest>(&contents) {
                Ok(manifest) => {
                    self.emit(SyncEvent::ManifestLoaded {
                        entries: manifest.len(),
                        from_cache: true,
                    });
                    return Ok(manifest);
                }
                Err(err) => warn!("ignoring unreadable {}: {err}", cache_path.display()),
            }
        }

        let url = format!("{}/data/translators.json", self.base_url());
        info!("fetching translator manifest from {url}");
        let contents = self.transport.fetch_raw(&url).await?;
        let manifest: Manifest = serde_json::from_str(&contents)?;

        tokio::fs::create_dir_all(&self.data_dir).await?;
        tokio::fs::write(&cache_path, &contents).await?;
        self.emit(SyncEvent::ManifestLoaded {
            entries: manifest.len(),
            from_cache: false,
        });
        Ok(manifest)
    }

    /// Metadata of the installed copy of `filename`; `None` if it is absent.
    async fn local_meta(&self, filename: &str) -> Option<TranslatorMeta> {
        let path = self.translator_path(filename).ok()?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                debug!("cannot read {}: {err}", path.display());
                return Some(TranslatorMeta::default());
            }
        };
        Some(TranslatorMeta::from_source(&content).unwrap_or_else(|| {
            debug!("no metadata header in {}", path.display());
            TranslatorMeta::default()
        }))
    }

    /// Rebuild every cache row from the manifest and the files on disk.
    pub async fn refresh_manifest(&self) -> Result<Vec<TranslatorCacheEntry>> {
        self.refresh_manifest_at(Utc::now().timestamp_millis()).await
    }

    /// [`Self::refresh_manifest`] with an explicit clock reading in epoch
    /// milliseconds.
    pub async fn refresh_manifest_at(&self, now_ms: i64) -> Result<Vec<TranslatorCacheEntry>> {
        let manifest = self.load_manifest(now_ms).await?;
        let mut rows = Vec::with_capacity(manifest.len());
        for (filename, remote) in manifest.iter() {
            let local = self.local_meta(filename).await;
            rows.push(TranslatorCacheEntry::new(filename, remote, local.as_ref()));
        }
        let snapshot: TranslatorCache = rows.into_iter().collect();
        let rows = snapshot.to_vec();
        self.store_entries(snapshot);
        Ok(rows)
    }

    fn store_entries(&self, cache: TranslatorCache) {
        let mut guard = self.entries.write().unwrap_or_else(|p| p.into_inner());
        *guard = Arc::new(cache);
    }

    // ─── Downloads ────────────────────────────────────────────────────────

    /// Download stale translators, or every translator when `force` is set,
    /// one at a time. A failed file is reported and the rest still run; the
    /// host reload fires at the end either way.
    pub async fn download_all(&self, force: bool) -> Result<DownloadSummary> {
        let mut entries = self.entries();
        if entries.is_empty() {
            self.refresh_manifest().await?;
            entries = self.entries();
        }

        let todo: Vec<&TranslatorCacheEntry> = entries
            .iter()
            .filter(|e| force || e.status == SyncStatus::Stale)
            .collect();
        info!("{} translators to download", todo.len());

        let mut summary = DownloadSummary {
            attempted: todo.len(),
            skipped: entries.len() - todo.len(),
            ..DownloadSummary::default()
        };
        self.emit(SyncEvent::DownloadStarted { total: todo.len() });

        let step = if todo.is_empty() {
            100.0
        } else {
            100.0 / todo.len() as f64
        };
        for (index, entry) in todo.iter().enumerate() {
            let progress = step * (index + 1) as f64;
            match self.download_one(&entry.filename).await {
                Ok(()) => {
                    info!("{} download successfully", entry.filename);
                    summary.succeeded.push(entry.filename.clone());
                    self.emit(SyncEvent::Downloaded {
                        filename: entry.filename.clone(),
                        progress,
                    });
                }
                Err(err) => {
                    warn!("{} download failed: {err}", entry.filename);
                    summary.failed.push((entry.filename.clone(), err.to_string()));
                    self.emit(SyncEvent::DownloadFailed {
                        filename: entry.filename.clone(),
                        error: err.to_string(),
                        progress,
                    });
                }
            }
        }

        if !summary.succeeded.is_empty() {
            let mut updated = (*self.entries()).clone();
            for filename in &summary.succeeded {
                updated.mark_downloaded(filename);
            }
            self.store_entries(updated);
        }

        match self.reload.reload_translators().await {
            Ok(()) => summary.reloaded = true,
            Err(err) => warn!("translator reload failed: {err}"),
        }
        self.emit(SyncEvent::Finished {
            succeeded: summary.succeeded.len(),
            failed: summary.failed.len(),
        });
        Ok(summary)
    }

    async fn download_one(&self, filename: &str) -> Result<()> {
        let path = self.translator_path(filename)?;
        let url = format!("{}/{}", self.base_url(), filename);
        let wrap = |message: String| ResolveError::Download {
            filename: filename.to_string(),
            message,
        };

        let code = self
            .transport
            .fetch_raw(&url)
            .await
            .map_err(|e| wrap(e.to_string()))?;
        tokio::fs::create_dir_all(self.translators_dir())
            .await
            .map_err(|e| wrap(e.to_string()))?;
        tokio::fs::write(&path, code)
            .await
            .map_err(|e| wrap(e.to_string()))?;
        Ok(())
    }
}
