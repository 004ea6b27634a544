use thiserror::Error;

#[derive(Error, Debug)]
pub enum AtlasError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV read failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("source '{source_name}' unavailable after {attempts} attempts: {message}")]
    SourceUnavailable {
        source_name: String,
        attempts: u32,
        message: String,
    },

    #[error("malformed record from '{source_name}': {message}")]
    MalformedRecord { source_name: String, message: String },

    #[error("schema mismatch in '{source_name}': expected columns {expected:?}, found {found:?}")]
    SchemaMismatch {
        source_name: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("storage write failed for table '{table}': {message}")]
    StorageWriteFailure { table: String, message: String },

    #[error("storage unreachable: {0}")]
    StorageUnreachable(String),

    #[error("prediction model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

pub type Result<T> = std::result::Result<T, AtlasError>;
