pub mod config;
pub mod error;
pub mod host;
pub mod models;
pub mod prefs;
pub mod storage;

pub use config::{AppConfig, HttpConfig, ResolverConfig, TranslatorsConfig};
pub use error::{CoreError, Result};
pub use host::{
    CandidateSelector, ConversionEngine, ConvertOptions, NoopReload, RecordStore,
    TranslatorReload,
};
pub use models::*;
pub use prefs::{FilePreferences, MemoryPreferences, PrefKey, PrefValue, PreferenceStore};
pub use storage::MemoryRecordStore;
