pub type ComposerResult<T> = Result<T, ComposerError>;

#[derive(thiserror::Error, Debug)]
pub enum ComposerError {
    /// Bad job configuration, detected before any filesystem access.
    #[error("config error: {0}")]
    Config(String),

    /// Key/path resolution failures (missing layer image for a key, etc).
    #[error("resolve error: {0}")]
    Resolve(String),

    /// Per-layer image processing failures.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Output encoding/writing failures.
    #[error("encode error: {0}")]
    Encode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ComposerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn resolve(msg: impl Into<String>) -> Self {
        Self::Resolve(msg.into())
    }

    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::Pipeline(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}
