//! Best-effort document titles for PDF attachments.

use std::path::Path;

use async_trait::async_trait;
use cnmeta_core::Record;
use lopdf::{Document, Object};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static CJK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x{4e00}-\x{9fff}]").expect("valid regex"));
static NOISE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(学报|期刊|摘\s*要|关键词|收稿日期|基金项目|作者简介|中图分类号|文献标识码|文章编号|DOI|ISSN|CN\s*\d|第\s*\d+\s*[卷期]|www\.|https?://)",
    )
    .expect("valid regex")
});

#[async_trait]
pub trait TitleExtractor: Send + Sync {
    /// Title of the attachment's document, if one can be found.
    async fn extract_title(&self, attachment: &Record) -> Option<String>;
}

/// Reads the PDF Info `Title`, falling back to the most title-like line of
/// the first page.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTitleExtractor;

#[async_trait]
impl TitleExtractor for PdfTitleExtractor {
    async fn extract_title(&self, attachment: &Record) -> Option<String> {
        let info = attachment.attachment.as_ref()?;
        if !info.is_pdf() {
            return None;
        }
        let path = info.path.clone()?;
        match tokio::task::spawn_blocking(move || extract_pdf_title(&path)).await {
            Ok(title) => title,
            Err(err) => {
                debug!("title extraction task failed: {err}");
                None
            }
        }
    }
}

/// Never extracts anything; used when titles should come from filenames only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTitles;

#[async_trait]
impl TitleExtractor for NoTitles {
    async fn extract_title(&self, _attachment: &Record) -> Option<String> {
        None
    }
}

pub fn extract_pdf_title(pdf_path: &Path) -> Option<String> {
    let document = match Document::load(pdf_path) {
        Ok(document) => document,
        Err(err) => {
            debug!("lopdf failed to open {}: {err}", pdf_path.display());
            return None;
        }
    };

    if let Some(title) = info_title(&document).filter(|t| is_plausible_title(t)) {
        return Some(title);
    }

    let first_page = document.get_pages().keys().next().copied()?;
    match document.extract_text(&[first_page]) {
        Ok(text) => title_from_page_text(&text),
        Err(err) => {
            debug!(
                "lopdf failed to extract text from {}: {err}",
                pdf_path.display()
            );
            None
        }
    }
}

fn info_title(document: &Document) -> Option<String> {
    let info = document.trailer.get(b"Info").ok()?;
    let info = match info {
        Object::Reference(id) => document.get_object(*id).ok()?,
        other => other,
    };
    let raw = info.as_dict().ok()?.get(b"Title").ok()?.as_str().ok()?;
    let title = normalize_inline_whitespace(&decode_pdf_string(raw));
    (!title.is_empty()).then_some(title)
}

/// PDF text strings are UTF-16BE when they start with a byte-order mark.
fn decode_pdf_string(raw: &[u8]) -> String {
    if let Some(body) = raw.strip_prefix(&[0xFE, 0xFF]) {
        let units = body
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        return String::from_utf16_lossy(&units);
    }
    String::from_utf8_lossy(raw).into_owned()
}

fn normalize_inline_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Chinese titles: some ideographs, no journal furniture, sane length.
pub fn is_plausible_title(value: &str) -> bool {
    let trimmed = value.trim();
    let chars = trimmed.chars().count();
    if !(4..=80).contains(&chars) {
        return false;
    }
    if !CJK_RE.is_match(trimmed) || NOISE_RE.is_match(trimmed) {
        return false;
    }
    let signal = trimmed
        .chars()
        .filter(|ch| ch.is_ascii_digit() || ch.is_ascii_punctuation())
        .count();
    (signal as f32 / chars as f32) < 0.3
}

/// First plausible line among the top of the page.
pub fn title_from_page_text(text: &str) -> Option<String> {
    text.lines()
        .take(20)
        .map(normalize_inline_whitespace)
        .find(|line| is_plausible_title(line))
}
