//! Over-issue-proof quota allocation.
//!
//! The building blocks:
//! - [`CounterStore`]: atomic counter backend (in-memory here, Redis in `ticketgate-redis`).
//! - [`QuotaAllocator`]: picks a backend once at startup and hands out admissions.
//! - [`Admission`]: the result of one "try admit" (granted or exhausted).
//!
//! # Algorithm
//!
//! Admission is decrement-then-compensate: the counter is decremented
//! atomically and the returned value decides the outcome. A negative value
//! means the quota was already gone, so the unit is handed back with an
//! increment. Because every decrement is totally ordered by the backend,
//! `N` concurrent attempts against capacity `C` grant exactly `min(N, C)`.
//! The counter may dip below zero transiently; readers clamp it.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::CounterError;
use crate::model::Resource;
use crate::timeout::TimeoutPolicy;

pub mod store;
pub use store::{CounterStore, InMemoryCounterStore};

/// Key prefix for per-resource counters.
pub const QUOTA_KEY_PREFIX: &str = "ticket_quota";

/// Which backend the allocator settled on at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// The configured primary counter backend.
    Primary,
    /// In-process counters; used for the life of the process once chosen.
    Fallback,
}

/// Outcome of [`QuotaAllocator::try_admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// One unit was taken; `remaining` is what is left after it.
    Granted { remaining: u64 },
    /// No unit was available. Not an error.
    Exhausted,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Granted { .. })
    }

    pub fn remaining(&self) -> u64 {
        match self {
            Admission::Granted { remaining } => *remaining,
            Admission::Exhausted => 0,
        }
    }
}

/// Listing entry for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceStatus {
    pub id: String,
    pub name: String,
    pub region: String,
    pub capacity: u64,
    /// Clamped at zero.
    #[serde(rename = "quota")]
    pub remaining: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum QuotaError {
    #[error("unknown resource '{0}'")]
    UnknownResource(String),
    #[error(transparent)]
    Counter(#[from] CounterError),
}

/// Hands out admissions against per-resource capacities.
///
/// Construct once and share behind an `Arc`; resources are independent
/// counters and never block each other.
#[derive(Debug)]
pub struct QuotaAllocator {
    store: Arc<dyn CounterStore>,
    mode: BackendMode,
    resources: BTreeMap<String, Resource>,
    timeout: TimeoutPolicy,
}

fn counter_key(resource_id: &str) -> String {
    format!("{QUOTA_KEY_PREFIX}:{resource_id}")
}

impl QuotaAllocator {
    /// Probe `primary`, seed every resource counter with its capacity, and
    /// settle on a backend.
    ///
    /// Counters that already exist on the primary keep their value. When the
    /// primary is absent, unreachable, or slower than `timeout` during this
    /// probe, the allocator switches to in-process counters for the rest of
    /// the process lifetime.
    pub async fn connect(
        primary: Option<Arc<dyn CounterStore>>,
        resources: impl IntoIterator<Item = Resource>,
        timeout: TimeoutPolicy,
    ) -> Result<Self, QuotaError> {
        let resources: BTreeMap<String, Resource> =
            resources.into_iter().map(|r| (r.id.clone(), r)).collect();

        if let Some(store) = primary {
            match Self::seed(store.as_ref(), &resources, &timeout).await {
                Ok(()) => {
                    tracing::info!(
                        target: "ticketgate::quota",
                        backend = store.name(),
                        resources = resources.len(),
                        "quota counters seeded on primary backend"
                    );
                    return Ok(Self { store, mode: BackendMode::Primary, resources, timeout });
                }
                Err(err) => {
                    tracing::warn!(
                        target: "ticketgate::quota",
                        backend = store.name(),
                        error = %err,
                        "primary counter backend unavailable; using in-memory fallback"
                    );
                }
            }
        } else {
            tracing::info!(
                target: "ticketgate::quota",
                "no primary counter backend configured; using in-memory fallback"
            );
        }

        let fallback: Arc<dyn CounterStore> = Arc::new(InMemoryCounterStore::new());
        Self::seed(fallback.as_ref(), &resources, &timeout).await?;
        Ok(Self { store: fallback, mode: BackendMode::Fallback, resources, timeout })
    }

    /// Allocator over in-process counters only.
    pub async fn in_memory(resources: impl IntoIterator<Item = Resource>) -> Result<Self, QuotaError> {
        Self::connect(None, resources, TimeoutPolicy::default()).await
    }

    async fn seed(
        store: &dyn CounterStore,
        resources: &BTreeMap<String, Resource>,
        timeout: &TimeoutPolicy,
    ) -> Result<(), CounterError> {
        timeout.execute(store.ping()).await?;
        for resource in resources.values() {
            let capacity = i64::try_from(resource.capacity).unwrap_or(i64::MAX);
            let created = timeout.execute(store.init(&counter_key(&resource.id), capacity)).await?;
            tracing::debug!(
                target: "ticketgate::quota",
                resource = %resource.id,
                capacity = resource.capacity,
                created,
                "quota counter seeded"
            );
        }
        Ok(())
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    /// Name of the backend in use.
    pub fn backend_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn resource(&self, resource_id: &str) -> Result<&Resource, QuotaError> {
        self.resources
            .get(resource_id)
            .ok_or_else(|| QuotaError::UnknownResource(resource_id.to_string()))
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Try to take one unit of `resource_id`.
    ///
    /// A backend failure on the decrement is returned as is, with no further
    /// backend calls. If the decrement lands below zero the unit is handed
    /// back; a failure of that compensation is logged and the result is still
    /// [`Admission::Exhausted`].
    pub async fn try_admit(&self, resource_id: &str) -> Result<Admission, QuotaError> {
        self.resource(resource_id)?;
        let key = counter_key(resource_id);

        let value = self.timeout.execute(self.store.decrement(&key)).await?;
        if value >= 0 {
            return Ok(Admission::Granted { remaining: value as u64 });
        }

        if let Err(err) = self.timeout.execute(self.store.increment(&key)).await {
            tracing::error!(
                target: "ticketgate::quota",
                resource = %resource_id,
                error = %err,
                "failed to compensate over-decrement; counter stays one below"
            );
        }
        Ok(Admission::Exhausted)
    }

    /// Return one previously granted unit of `resource_id`.
    pub async fn compensate(&self, resource_id: &str) -> Result<u64, QuotaError> {
        self.resource(resource_id)?;
        let value = self.timeout.execute(self.store.increment(&counter_key(resource_id))).await?;
        Ok(value.max(0) as u64)
    }

    /// Units left for `resource_id`, clamped at zero. Does not mutate.
    pub async fn remaining(&self, resource_id: &str) -> Result<u64, QuotaError> {
        self.resource(resource_id)?;
        let value = self.timeout.execute(self.store.get(&counter_key(resource_id))).await?;
        Ok(value.unwrap_or(0).max(0) as u64)
    }

    /// Status of every resource, ordered by id.
    pub async fn snapshot(&self) -> Result<Vec<ResourceStatus>, QuotaError> {
        let mut statuses = Vec::with_capacity(self.resources.len());
        for resource in self.resources.values() {
            let remaining = self.remaining(&resource.id).await?;
            statuses.push(ResourceStatus {
                id: resource.id.clone(),
                name: resource.name.clone(),
                region: resource.region.clone(),
                capacity: resource.capacity,
                remaining,
            });
        }
        Ok(statuses)
    }
}
