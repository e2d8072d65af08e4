//! OutClaw error types.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, OutClawError>;

/// All errors the orchestration core can surface.
#[derive(Debug, thiserror::Error)]
pub enum OutClawError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Enrichment error: {0}")]
    Enrich(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Store error: {0}")]
    Store(String),

    /// The run was aborted by a cancel-all signal.
    #[error("Run canceled")]
    Canceled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OutClawError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    pub fn executor(msg: impl Into<String>) -> Self {
        Self::Executor(msg.into())
    }

    pub fn enrich(msg: impl Into<String>) -> Self {
        Self::Enrich(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}
