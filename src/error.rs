use thiserror::Error;

/// Unified result type for the idempotency interceptor.
pub type Result<T> = std::result::Result<T, IdempotencyError>;

/// Errors emitted by the interceptor and its collaborators.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// A dedup key could not be derived from the request.
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// A call to the backing store failed; the invocation is abandoned.
    #[error("idempotency store unavailable during {operation}: {source}")]
    StoreUnavailable {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The wrapped operation failed.
    #[error(transparent)]
    Operation(anyhow::Error),

    /// A cached result exists but does not decode into the expected response type.
    #[error("cached result for {key} could not be decoded: {source}")]
    CorruptCachedResult {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The operation result could not be serialized for caching.
    #[error("result for {key} could not be serialized: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration was rejected during load or validation.
    #[error("invalid idempotency config: {0}")]
    Config(String),
}

impl IdempotencyError {
    pub(crate) fn store(operation: &'static str, source: anyhow::Error) -> Self {
        Self::StoreUnavailable { operation, source }
    }
}
