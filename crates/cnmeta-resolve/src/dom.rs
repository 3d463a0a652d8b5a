//! Small helpers over `scraper` for reading and amending fetched pages.

use scraper::{ElementRef, Html, Selector};

use crate::error::{ResolveError, Result};

pub fn parse_selector(input: &str) -> Result<Selector> {
    Selector::parse(input)
        .map_err(|e| ResolveError::Parse(format!("invalid selector {input}: {e}")))
}

pub fn element_text(element: &ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scoped lookups relative to one element, returning empty strings for
/// anything missing.
pub struct DocTools<'a> {
    root: ElementRef<'a>,
}

impl<'a> DocTools<'a> {
    pub fn new(root: ElementRef<'a>) -> Self {
        Self { root }
    }

    fn first(&self, selector: &str) -> Result<Option<ElementRef<'a>>> {
        let selector = parse_selector(selector)?;
        Ok(self.root.select(&selector).next())
    }

    /// Normalized text of the first match of `selector`.
    pub fn text(&self, selector: &str) -> Result<String> {
        Ok(self
            .first(selector)?
            .map(|el| element_text(&el))
            .unwrap_or_default())
    }

    /// Trimmed attribute `name` of the first match of `selector`.
    pub fn attr(&self, selector: &str, name: &str) -> Result<String> {
        Ok(self
            .first(selector)?
            .and_then(|el| el.value().attr(name))
            .map(|v| v.trim().to_string())
            .unwrap_or_default())
    }
}

/// Append a hidden `<input id=… value=…>` to the document body.
///
/// Documents without a closing body tag get the field appended at the end.
pub fn inject_hidden_input(html: &mut String, id: &str, value: &str) {
    let field = format!(
        r#"<input type="hidden" id="{}" value="{}">"#,
        escape_attr(id),
        escape_attr(value)
    );
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => html.insert_str(pos, &field),
        None => html.push_str(&field),
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Parse a full document; `scraper` never fails, it repairs.
pub fn parse_document(html: &str) -> Html {
    Html::parse_document(html)
}
