#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod interceptor;
pub mod key;
pub mod metrics;
pub mod model;
pub mod store;

pub use config::{ConfigResolver, FailurePolicy, IdempotencyConfig, OperationPolicy};
pub use error::{IdempotencyError, Result};
pub use interceptor::{IdempotencyInterceptor, IdempotencyInterceptorBuilder};
pub use key::{DedupKey, build_key};
pub use model::{
    DUPLICATE_SUBMISSION_MESSAGE, IdempotentResponse, OperationRequest, OperationResult,
    STATUS_DUPLICATE_SUBMISSION, STATUS_OK,
};
pub use store::{IdempotencyStore, InMemoryIdempotencyStore};
