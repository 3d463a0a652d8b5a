//! Local cache of site translators, kept in step with a remote repository.

pub mod gate;
pub mod manifest;
pub mod sync;

pub use gate::{check_at, check_should_sync, crosses_hour_boundary};
pub use manifest::{
    Manifest, ManifestEntry, SyncStatus, TranslatorCache, TranslatorCacheEntry, TranslatorMeta,
    is_earlier,
};
pub use sync::{DownloadSummary, SyncEvent, SyncProgressFn, TranslatorSync};
