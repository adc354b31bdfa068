use thiserror::Error;

/// Errors surfaced across the engine API boundary.
///
/// Adapter failures are recovered locally (recorded per block, surfaced as
/// `range:failed` events) and never crash the engine. Configuration errors
/// are fatal at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("adapter error: {message}")]
    Adapter {
        message: String,
        code: Option<String>,
    },

    #[error("index {index} is out of bounds (total: {total:?})")]
    OutOfBounds { index: usize, total: Option<usize> },

    #[error("item '{id}' is not loaded")]
    ItemNotLoaded { id: String },

    #[error("engine has been destroyed")]
    Destroyed,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn adapter(message: impl Into<String>) -> Self {
        Self::Adapter {
            message: message.into(),
            code: None,
        }
    }
}
