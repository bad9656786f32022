use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Status of a successfully executed operation.
pub const STATUS_OK: i32 = 0;

/// Status returned when a request with the same dedup key is still in flight.
pub const STATUS_DUPLICATE_SUBMISSION: i32 = 1010;

/// Message attached to duplicate-submission rejections ("please do not submit repeatedly").
pub const DUPLICATE_SUBMISSION_MESSAGE: &str = "请勿重复提交";

/// Request handed to the interceptor. Only `name`, `kind` and `seq` are read;
/// the payload is passed through to the wrapped operation untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest<P> {
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<String>,
    pub payload: P,
}

impl<P> OperationRequest<P> {
    pub fn new(name: impl Into<String>, payload: P) -> Self {
        Self {
            name: name.into(),
            kind: None,
            seq: None,
            payload,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_seq(mut self, seq: impl Into<String>) -> Self {
        self.seq = Some(seq.into());
        self
    }
}

/// Generic response envelope returned by ledger operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OperationResult<T> {
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> OperationResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: STATUS_OK,
            error: None,
            seq: None,
            data: Some(data),
        }
    }

    pub fn failure(status: i32, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
            seq: None,
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn is_duplicate_rejection(&self) -> bool {
        self.status == STATUS_DUPLICATE_SUBMISSION
    }
}

/// Response types the interceptor can cache, replay, and synthesize.
///
/// `duplicate_rejected` is the constructor used when a request is rejected
/// before the wrapped operation runs, so each response type decides how a
/// rejection is represented.
pub trait IdempotentResponse: Serialize + DeserializeOwned + Send {
    fn duplicate_rejected(status: i32, message: &str) -> Self;

    fn set_seq(&mut self, seq: &str);
}

impl<T> IdempotentResponse for OperationResult<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    fn duplicate_rejected(status: i32, message: &str) -> Self {
        Self::failure(status, message)
    }

    fn set_seq(&mut self, seq: &str) {
        self.seq = Some(seq.to_string());
    }
}
