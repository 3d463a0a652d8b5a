//! Search-term derivation from attachment filenames.
//!
//! Each provider owns a [`FilenameRules`] table. Rules run in order:
//!
//! | step | effect                                                    |
//! |------|-----------------------------------------------------------|
//! | 1    | drop duplicate-copy markers and the extension             |
//! | 2    | drop short annotation tokens glued to either end of the stem |
//! | 3    | split the rest on separators, dropping empty tokens       |
//! | 4    | join tokens with the provider's conjunction operator      |

use once_cell::sync::Lazy;
use regex::Regex;

/// What a provider needs from an attachment to build its search request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryInput {
    pub filename: String,
    /// Best-effort document title, preferred over the filename when present.
    pub title: Option<String>,
}

impl QueryInput {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title.filter(|t| !t.trim().is_empty());
        self
    }
}

pub struct FilenameRules {
    pub strip_suffix: Regex,
    pub strip_annotation: Regex,
    pub separators: Regex,
    pub conjunction: &'static str,
}

impl FilenameRules {
    /// Tokens left after steps 1–3.
    pub fn tokens(&self, filename: &str) -> Vec<String> {
        let stem = self.strip_suffix.replace(filename, "");
        let stem = self.strip_annotation.replace_all(&stem, "");
        self.separators
            .split(&stem)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }

    pub fn derive(&self, filename: &str) -> String {
        self.tokens(filename).join(self.conjunction)
    }
}

/// CNKI: `(2)`-style and ` - 副本` copy markers, 2–4 character CJK author
/// names joined with `_`, and `_省略_`/`...`/`_`/` - ` separators, combined
/// with the fuzzy AND operator ` % `.
pub static CNKI_FILENAME_RULES: Lazy<FilenameRules> = Lazy::new(|| FilenameRules {
    strip_suffix: Regex::new(r"((\(\d+\)| - 副本)+)?\.\w+$").expect("valid regex"),
    strip_annotation: Regex::new(r"_[\x{4e00}-\x{9fff}・·]{2,4}$|^[\x{4e00}-\x{9fff}・·]{2,4}_")
        .expect("valid regex"),
    separators: Regex::new(r"_(?:省略_)?|\.{3}|_|\s?-\s?").expect("valid regex"),
    conjunction: " % ",
});

/// The term a provider searches for: the extracted title when there is one,
/// otherwise the filename run through `rules`.
pub fn derive_search_term(input: &QueryInput, rules: &FilenameRules) -> String {
    match input.title.as_deref().map(str::trim) {
        Some(title) if !title.is_empty() => title.to_string(),
        _ => rules.derive(&input.filename),
    }
}
