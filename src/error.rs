use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandlotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Runtime errors
    #[error("Sandbox boot failed: {0}")]
    Boot(String),

    #[error("Failed to mount project into sandbox: {0}")]
    Mount(String),

    #[error("Failed to spawn '{command}' in sandbox: {reason}")]
    Spawn { command: String, reason: String },

    // Project errors
    #[error("Invalid project path '{path}': {reason}")]
    InvalidProjectPath { path: String, reason: String },

    // Export and preview errors
    #[error("Project export failed: {0}")]
    Export(String),

    #[error("Preview request failed: {0}")]
    Preview(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SandlotError>;
