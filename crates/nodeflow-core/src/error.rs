use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeflowError {
    // Provider errors
    #[error("Provider request failed: {0}")]
    ProviderRequest(String),

    #[error("Provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("Provider response parse error: {0}")]
    ProviderParse(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Run errors
    #[error("Invalid node input: {0}")]
    InvalidInput(String),

    #[error("Run already active: {0}")]
    RunConflict(String),

    #[error("Agent cancelled")]
    Cancelled,

    #[error("Run abandoned before producing a result: {0}")]
    RunAbandoned(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NodeflowError>;
