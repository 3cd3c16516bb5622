/// Shared error type used across all kbask crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// The model backend call failed (network, status code, model error).
    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// A tool executor failed. Surfaced to the model, never fatal to a request.
    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("malformed tool span: {0}")]
    MalformedToolSpan(String),

    #[error("memory: {0}")]
    Memory(String),

    #[error("trace: {0}")]
    Trace(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
