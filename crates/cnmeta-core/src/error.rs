use thiserror::Error;

/// All errors that can occur in cnmeta-core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Record is not an attachment: {0}")]
    NotAnAttachment(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Preference error: {0}")]
    Preference(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Exit codes used by the CLI.
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    NotFound = 2,
    InvalidArgs = 3,
    FileSystemError = 4,
    NetworkError = 6,
}

pub type Result<T> = std::result::Result<T, CoreError>;
