use cnmeta_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("conversion failed with {converter}: {message}")]
    Conversion { converter: String, message: String },

    #[error("store error: {0}")]
    Store(#[from] CoreError),

    #[error("download of {filename} failed: {message}")]
    Download { filename: String, message: String },

    #[error("provider already registered: {0}")]
    DuplicateProvider(String),

    #[error("provider {0} failed to load: {1}")]
    ProviderUnavailable(String, String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResolveError {
    /// Network-side failures: the request never produced a usable response.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status { .. })
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;
