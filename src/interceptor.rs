use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{FailurePolicy, IdempotencyConfig};
use crate::error::{IdempotencyError, Result};
use crate::key::{DedupKey, build_key, is_blank};
use crate::metrics::IdempotencyMetrics;
use crate::model::{IdempotentResponse, OperationRequest};
use crate::store::{IdempotencyStore, InMemoryIdempotencyStore};

/// Wraps side-effecting operations so each `(name, type, seq)` executes at most once.
///
/// The interceptor keeps no per-request state of its own; every coordination
/// decision goes through the shared [`IdempotencyStore`], so one instance can
/// be shared across tasks behind an `Arc`.
pub struct IdempotencyInterceptor {
    store: Arc<dyn IdempotencyStore>,
    config: IdempotencyConfig,
    metrics: IdempotencyMetrics,
}

impl IdempotencyInterceptor {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        IdempotencyInterceptorBuilder::new().with_store(store).build()
    }

    pub fn builder() -> IdempotencyInterceptorBuilder {
        IdempotencyInterceptorBuilder::new()
    }

    /// Run `operation` for `request` with request deduplication.
    ///
    /// * Blank or missing `seq`, or an operation with idempotency disabled:
    ///   the operation runs directly and the store is never consulted.
    /// * A committed result for the key is replayed without running the operation.
    /// * A key whose lock is held yields `R::duplicate_rejected(..)`.
    /// * Otherwise the operation runs; on success the result gets the seq
    ///   echoed, is cached, and the lock is released.
    ///
    /// Operation failures are returned as [`IdempotencyError::Operation`]. The
    /// lock is then handled according to the operation's [`FailurePolicy`].
    /// A failure while caching the result of a successful operation always
    /// leaves the lock held.
    pub async fn invoke<P, R, F, Fut>(&self, request: OperationRequest<P>, operation: F) -> Result<R>
    where
        R: IdempotentResponse,
        F: FnOnce(OperationRequest<P>) -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        self.metrics.record_invocation();
        let policy = self.config.policy_for(&request.name);

        let seq = request
            .seq
            .as_deref()
            .filter(|seq| policy.enabled && !is_blank(Some(*seq)))
            .map(str::to_string);
        let Some(seq) = seq else {
            debug!(operation = %request.name, enabled = policy.enabled, "idempotency bypassed");
            self.metrics.record_bypass();
            return operation(request).await.map_err(IdempotencyError::Operation);
        };

        let key = build_key(&request.name, request.kind.as_deref(), &seq)?;
        let span = info_span!("idempotency.invoke", operation = %request.name, key = %key);

        async move {
            if let Some(cached) = self.replay::<R>(&key).await? {
                return Ok(cached);
            }

            let acquired = self
                .store
                .try_lock(&key)
                .await
                .map_err(|err| IdempotencyError::store("try_lock", err))?;
            if !acquired {
                warn!("duplicate submission rejected; request still in flight");
                self.metrics.record_rejection();
                return Ok(R::duplicate_rejected(
                    self.config.duplicate_status,
                    &self.config.duplicate_message,
                ));
            }

            let start = Instant::now();
            let mut result = match operation(request).await {
                Ok(result) => result,
                Err(err) => {
                    self.metrics.record_failure();
                    error!(error = %err, "wrapped operation failed");
                    self.abandon(&key, policy.failure_policy).await;
                    return Err(IdempotencyError::Operation(err));
                }
            };

            result.set_seq(&seq);
            // The operation has run; a failed commit keeps the lock under every policy.
            if let Err(err) = self.commit(&key, &result).await {
                self.metrics.record_failure();
                error!(error = %err, "commit failed after execution; lock retained");
                return Err(err);
            }
            self.store
                .unlock(&key)
                .await
                .map_err(|err| IdempotencyError::store("unlock", err))?;

            self.metrics.record_commit(start.elapsed());
            info!("idempotent result committed");
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// Release the lock for a request triple, e.g. to recover a key left
    /// locked by a failed operation under [`FailurePolicy::RetainLock`].
    pub async fn release(&self, name: &str, kind: Option<&str>, seq: &str) -> Result<DedupKey> {
        let key = build_key(name, kind, seq)?;
        self.store
            .unlock(&key)
            .await
            .map_err(|err| IdempotencyError::store("unlock", err))?;
        info!(key = %key, "idempotency lock released manually");
        Ok(key)
    }

    pub fn config(&self) -> &IdempotencyConfig {
        &self.config
    }

    /// Access outcome counters for telemetry export or testing.
    pub fn metrics(&self) -> &IdempotencyMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn IdempotencyStore> {
        &self.store
    }

    async fn replay<R: IdempotentResponse>(&self, key: &DedupKey) -> Result<Option<R>> {
        let cached = self
            .store
            .get_cached_result(key)
            .await
            .map_err(|err| IdempotencyError::store("get_cached_result", err))?;
        let Some(body) = cached.filter(|body| !body.trim().is_empty()) else {
            return Ok(None);
        };
        let result = serde_json::from_str(&body).map_err(|source| {
            IdempotencyError::CorruptCachedResult {
                key: key.to_string(),
                source,
            }
        })?;
        self.metrics.record_replay();
        info!(cached = %body, "idempotent cache matched");
        Ok(Some(result))
    }

    async fn commit<R: IdempotentResponse>(&self, key: &DedupKey, result: &R) -> Result<()> {
        let body = serde_json::to_string(result).map_err(|source| IdempotencyError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.store
            .set_cached_result(key, &body)
            .await
            .map_err(|err| IdempotencyError::store("set_cached_result", err))
    }

    async fn abandon(&self, key: &DedupKey, policy: FailurePolicy) {
        match policy {
            FailurePolicy::RetainLock => {
                warn!("lock retained after failure; key stays blocked until released or expired");
            }
            FailurePolicy::ReleaseLock => {
                if let Err(err) = self.store.unlock(key).await {
                    error!(error = %err, "failed to release lock after failure");
                }
            }
        }
    }
}

/// Builder for configuring an interceptor instance.
#[derive(Default)]
pub struct IdempotencyInterceptorBuilder {
    store: Option<Arc<dyn IdempotencyStore>>,
    config: IdempotencyConfig,
    metrics: Option<IdempotencyMetrics>,
}

impl IdempotencyInterceptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_config(mut self, config: IdempotencyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: IdempotencyMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Without an explicit store, an in-memory store honoring the config's TTLs is used.
    pub fn build(self) -> IdempotencyInterceptor {
        let store = self.store.unwrap_or_else(|| {
            Arc::new(InMemoryIdempotencyStore::from_config(&self.config.store))
        });
        IdempotencyInterceptor {
            store,
            config: self.config,
            metrics: self.metrics.unwrap_or_default(),
        }
    }
}
