#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use hyena_idempotency::{
    DedupKey, IdempotencyStore, InMemoryIdempotencyStore, OperationRequest, OperationResult,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Domain payload used by the fake points operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointOp {
    pub uid: String,
    pub point: u64,
}

/// Balance returned by the fake points operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointBalance {
    pub uid: String,
    pub available: u64,
    pub execution: u32,
}

pub fn point_request(name: &str, kind: &str, seq: &str) -> OperationRequest<PointOp> {
    OperationRequest {
        name: name.to_string(),
        kind: Some(kind.to_string()),
        seq: Some(seq.to_string()),
        payload: PointOp {
            uid: "u-1".into(),
            point: 10,
        },
    }
}

/// Fake ledger operation counting how often it actually runs.
#[derive(Clone, Default)]
pub struct CountingOperation {
    calls: Arc<AtomicU32>,
    fail: Arc<AtomicBool>,
    started: Arc<Notify>,
    gate: Option<Arc<Notify>>,
}

impl CountingOperation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block each execution until `release` is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        let op = Self::default();
        op.fail.store(true, Ordering::SeqCst);
        op
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Resolves once an execution has started (and therefore holds the lock).
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub async fn run(&self, request: OperationRequest<PointOp>) -> Result<OperationResult<PointBalance>> {
        let execution = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            bail!("ledger write failed for {}", request.payload.uid);
        }
        Ok(OperationResult::ok(PointBalance {
            uid: request.payload.uid,
            available: request.payload.point * 10,
            execution,
        }))
    }
}

/// Store wrapper counting calls and optionally failing them.
///
/// `unavailable` fails every call; the per-method counters fail only the next
/// N calls of that method.
#[derive(Default)]
pub struct RecordingStore {
    inner: InMemoryIdempotencyStore,
    calls: AtomicU32,
    pub unavailable: AtomicBool,
    pub fail_set_cached_result: AtomicU32,
    pub fail_unlock: AtomicU32,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryIdempotencyStore {
        &self.inner
    }

    pub fn with_set_failures(self, count: u32) -> Self {
        self.fail_set_cached_result.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_unlock_failures(self, count: u32) -> Self {
        self.fail_unlock.store(count, Ordering::SeqCst);
        self
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(())
    }
}

fn take_failure(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl IdempotencyStore for RecordingStore {
    async fn try_lock(&self, key: &DedupKey) -> Result<bool> {
        self.enter()?;
        self.inner.try_lock(key).await
    }

    async fn get_cached_result(&self, key: &DedupKey) -> Result<Option<String>> {
        self.enter()?;
        self.inner.get_cached_result(key).await
    }

    async fn set_cached_result(&self, key: &DedupKey, result: &str) -> Result<()> {
        self.enter()?;
        if take_failure(&self.fail_set_cached_result) {
            bail!("cache write timeout");
        }
        self.inner.set_cached_result(key, result).await
    }

    async fn unlock(&self, key: &DedupKey) -> Result<()> {
        self.enter()?;
        if take_failure(&self.fail_unlock) {
            bail!("cache delete timeout");
        }
        self.inner.unlock(key).await
    }
}
