use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::BackendError;

/// Abstract atomic-counter backend for quota.
///
/// Every operation is a single atomic step on the backend; the allocator
/// builds decrement-then-compensate on top of these primitives. Object safe,
/// so the allocator can hold whichever backend it settled on at startup as
/// `Arc<dyn CounterStore>`.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Round-trip health check.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Set `key` to `value` only if it does not exist yet.
    ///
    /// Returns `Ok(true)` when the value was written.
    async fn init(&self, key: &str, value: i64) -> Result<bool, BackendError>;

    /// Atomically subtract one and return the new value.
    async fn decrement(&self, key: &str) -> Result<i64, BackendError>;

    /// Atomically add one and return the new value.
    async fn increment(&self, key: &str) -> Result<i64, BackendError>;

    /// Current value, if the key exists.
    async fn get(&self, key: &str) -> Result<Option<i64>, BackendError>;
}

/// In-process counter store.
///
/// Each key owns its own `AtomicI64`; the map lock is only held to find or
/// create the cell, so keys never contend with one another.
#[derive(Default, Clone, Debug)]
pub struct InMemoryCounterStore {
    counters: Arc<RwLock<HashMap<String, Arc<AtomicI64>>>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: &str) -> Arc<AtomicI64> {
        if let Some(cell) = self.counters.read().unwrap_or_else(PoisonError::into_inner).get(key) {
            return Arc::clone(cell);
        }
        let mut guard = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(guard.entry(key.to_string()).or_default())
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn init(&self, key: &str, value: i64) -> Result<bool, BackendError> {
        let mut guard = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        if guard.contains_key(key) {
            return Ok(false);
        }
        guard.insert(key.to_string(), Arc::new(AtomicI64::new(value)));
        Ok(true)
    }

    async fn decrement(&self, key: &str) -> Result<i64, BackendError> {
        Ok(self.cell(key).fetch_sub(1, Ordering::AcqRel) - 1)
    }

    async fn increment(&self, key: &str) -> Result<i64, BackendError> {
        Ok(self.cell(key).fetch_add(1, Ordering::AcqRel) + 1)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, BackendError> {
        let guard = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.get(key).map(|cell| cell.load(Ordering::Acquire)))
    }
}
