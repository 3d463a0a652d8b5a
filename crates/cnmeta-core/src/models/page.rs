use serde::{Deserialize, Serialize};

/// A fetched HTML document together with the URL it was served from.
///
/// Pages are kept as markup so that providers can inject hidden fields
/// before the host converter reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub url: String,
    pub html: String,
}

impl Page {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}
