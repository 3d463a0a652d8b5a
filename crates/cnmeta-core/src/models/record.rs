use std::collections::BTreeSet;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Filenames of documents that may be resolved against Chinese databases:
/// at least one CJK unified ideograph and a PDF/CAJ/KDH/NH extension.
static CHINESE_DOCUMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^.*[\u{4e00}-\u{9fff}].*\.(pdf|caj|kdh|nh)$").expect("valid regex")
});

/// Host-assigned record identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-assigned collection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "itemType")]
pub enum RecordKind {
    Attachment,
    Note,
    Webpage,
    /// Any bibliographic item type produced by a converter
    /// (`journalArticle`, `thesis`, ...).
    Regular(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    ImportedFile,
    /// A page stored by the host while saving a web item.
    ImportedUrl,
    LinkedFile,
    LinkedUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub filename: String,
    pub content_type: Option<String>,
    pub link_mode: LinkMode,
    /// Absolute path of the stored file, when the host has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl AttachmentInfo {
    pub fn is_pdf(&self) -> bool {
        self.content_type.as_deref() == Some("application/pdf")
            || self.filename.to_lowercase().ends_with(".pdf")
    }

    pub fn is_snapshot(&self) -> bool {
        self.link_mode == LinkMode::ImportedUrl
            && self.content_type.as_deref().is_none_or(|t| t == "text/html")
    }
}

/// A record as the host library sees it: a bibliographic item, a note or an
/// attachment. This crate only touches identity, links, and soft deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub library_id: u32,
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RecordId>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub collections: BTreeSet<CollectionId>,
    #[serde(default)]
    pub related: BTreeSet<RecordId>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentInfo>,
}

impl Record {
    pub fn new(id: RecordId, kind: RecordKind, title: impl Into<String>) -> Self {
        Self {
            id,
            library_id: 1,
            kind,
            parent_id: None,
            title: title.into(),
            url: None,
            collections: BTreeSet::new(),
            related: BTreeSet::new(),
            deleted: false,
            attachment: None,
        }
    }

    /// A stand-alone attachment record for a stored file.
    pub fn attachment(id: RecordId, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let content_type = filename
            .to_lowercase()
            .ends_with(".pdf")
            .then(|| "application/pdf".to_string());
        let mut record = Self::new(id, RecordKind::Attachment, filename.clone());
        record.attachment = Some(AttachmentInfo {
            filename,
            content_type,
            link_mode: LinkMode::ImportedFile,
            path: None,
        });
        record
    }

    pub fn is_attachment(&self) -> bool {
        self.kind == RecordKind::Attachment
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_webpage(&self) -> bool {
        self.kind == RecordKind::Webpage
    }

    pub fn attachment_filename(&self) -> Option<&str> {
        self.attachment.as_ref().map(|a| a.filename.as_str())
    }

    /// True for top-level attachments whose filename looks like a Chinese
    /// PDF/CAJ/KDH/NH document.
    pub fn is_chinese_top_attachment(&self) -> bool {
        self.is_attachment()
            && self.is_top_level()
            && self
                .attachment_filename()
                .is_some_and(is_chinese_document_filename)
    }
}

/// Filename half of the eligibility test.
pub fn is_chinese_document_filename(filename: &str) -> bool {
    CHINESE_DOCUMENT_RE.is_match(filename)
}
