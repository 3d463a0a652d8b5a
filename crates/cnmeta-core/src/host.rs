//! Interfaces of the host reference manager that cnmeta drives but does not own.
//!
//! The host persists records, shows selection dialogs, and runs the
//! site-specific translators that turn a detail page into a structured
//! record. Implementations live with the host; [`crate::storage::MemoryRecordStore`]
//! is a self-contained store used by tests and tools.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CandidateSet, Page, Record, RecordId};

/// Record persistence. Every `save` is its own transaction.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: RecordId) -> Result<Option<Record>>;

    async fn save(&self, record: &Record) -> Result<()>;

    /// Notes and attachments whose parent is `id`.
    async fn children(&self, id: RecordId) -> Result<Vec<Record>>;

    /// Link two records with the symmetric "related" relation and save both.
    async fn add_related(&self, a: RecordId, b: RecordId) -> Result<()>;

    /// Rename an attachment's file after its (new) parent record.
    async fn rename_attachment_from_parent(&self, attachment: RecordId) -> Result<()>;
}

/// Interactive choice among several search hits.
#[async_trait]
pub trait CandidateSelector: Send + Sync {
    /// Returns the chosen URLs, or `None` when the user closes the dialog.
    async fn prompt_selection(&self, candidates: &CandidateSet) -> Option<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    pub library_id: u32,
    /// Let the converter store the page itself as a child snapshot.
    pub retain_attachments: bool,
}

/// The host's translator engine.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Run the translator `converter_id` against `page` and return the saved
    /// records.
    async fn convert(
        &self,
        converter_id: &str,
        page: &Page,
        options: &ConvertOptions,
    ) -> Result<Vec<Record>>;
}

/// Hook into the host's translator registry, fired after translator files
/// changed on disk.
#[async_trait]
pub trait TranslatorReload: Send + Sync {
    async fn reload_translators(&self) -> Result<()>;
}

/// Reload hook for hosts that pick up translator files on their own.
pub struct NoopReload;

#[async_trait]
impl TranslatorReload for NoopReload {
    async fn reload_translators(&self) -> Result<()> {
        Ok(())
    }
}
