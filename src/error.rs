use thiserror::Error;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid catalog: {0}")]
    Catalog(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("BI authentication failed: {0}")]
    UpstreamAuth(String),

    #[error("BI identifier not found: {0}")]
    LookupMiss(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Chat platform error: {0}")]
    Chat(String),

    #[error("Request signature rejected: {0}")]
    Signature(String),
}
