use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::{CoreError, Result};
use crate::host::RecordStore;
use crate::models::{Record, RecordId, RecordKind};

/// Characters the host refuses in attachment filenames.
const FORBIDDEN_FILENAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// A record store held entirely in memory.
#[derive(Debug)]
pub struct MemoryRecordStore {
    records: Mutex<BTreeMap<RecordId, Record>>,
    next_id: AtomicU64,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id and store a fresh record of the given kind.
    pub fn create(&self, kind: RecordKind, title: impl Into<String>) -> Record {
        let record = Record::new(self.allocate_id(), kind, title);
        self.insert(record.clone());
        record
    }

    /// Allocate an id and store a top-level attachment for `filename`.
    pub fn create_attachment(&self, filename: impl Into<String>) -> Record {
        let record = Record::attachment(self.allocate_id(), filename);
        self.insert(record.clone());
        record
    }

    pub fn allocate_id(&self) -> RecordId {
        RecordId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Store `record` as-is, replacing any record with the same id.
    pub fn insert(&self, record: Record) {
        let id = record.id.0;
        self.next_id.fetch_max(id + 1, Ordering::Relaxed);
        self.lock().insert(record.id, record);
    }

    pub fn snapshot(&self, id: RecordId) -> Option<Record> {
        self.lock().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Record> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<RecordId, Record>> {
        // A poisoned map still holds consistent records; each write replaces
        // a whole entry.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, id: RecordId) -> Result<Option<Record>> {
        Ok(self.snapshot(id))
    }

    async fn save(&self, record: &Record) -> Result<()> {
        self.insert(record.clone());
        Ok(())
    }

    async fn children(&self, id: RecordId) -> Result<Vec<Record>> {
        Ok(self
            .lock()
            .values()
            .filter(|r| r.parent_id == Some(id))
            .filter(|r| matches!(r.kind, RecordKind::Attachment | RecordKind::Note))
            .cloned()
            .collect())
    }

    async fn add_related(&self, a: RecordId, b: RecordId) -> Result<()> {
        let mut records = self.lock();
        if !records.contains_key(&a) {
            return Err(CoreError::RecordNotFound(a.to_string()));
        }
        if !records.contains_key(&b) {
            return Err(CoreError::RecordNotFound(b.to_string()));
        }
        if let Some(left) = records.get_mut(&a) {
            left.related.insert(b);
        }
        if let Some(right) = records.get_mut(&b) {
            right.related.insert(a);
        }
        Ok(())
    }

    async fn rename_attachment_from_parent(&self, attachment: RecordId) -> Result<()> {
        let mut records = self.lock();
        let record = records
            .get(&attachment)
            .ok_or_else(|| CoreError::RecordNotFound(attachment.to_string()))?;
        let info = record
            .attachment
            .as_ref()
            .ok_or_else(|| CoreError::NotAnAttachment(attachment.to_string()))?;
        let Some(parent_id) = record.parent_id else {
            return Ok(());
        };
        let parent_title = records
            .get(&parent_id)
            .map(|p| p.title.clone())
            .ok_or_else(|| CoreError::RecordNotFound(parent_id.to_string()))?;

        let stem = sanitize_filename(&parent_title);
        if stem.is_empty() {
            return Ok(());
        }
        let filename = match info.filename.rsplit_once('.') {
            Some((_, ext)) => format!("{stem}.{ext}"),
            None => stem,
        };

        if let Some(record) = records.get_mut(&attachment) {
            if let Some(info) = record.attachment.as_mut() {
                info.filename = filename.clone();
            }
            record.title = filename;
        }
        Ok(())
    }
}

fn sanitize_filename(title: &str) -> String {
    title
        .chars()
        .map(|c| if FORBIDDEN_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
