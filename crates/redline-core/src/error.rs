use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedlineError {
    // Model errors
    #[error("Model request failed: {0}")]
    ModelRequest(String),

    #[error("Model response parse error: {0}")]
    ModelParse(String),

    #[error("Model provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("Secondary reasoning failed: {0}")]
    Secondary(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid prompt flow: {0}")]
    InvalidFlow(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RedlineError>;
