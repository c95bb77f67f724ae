#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use ticketgate::model::{Resource, User};
use ticketgate::telemetry::MemorySink;
use ticketgate::{
    AdmissionFlow, BackendError, ChallengeGate, CounterStore, InMemoryCounterStore,
    QuotaAllocator, RecordStore,
};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

pub const SECRET: &str = "integration-secret";

pub fn resource(id: &str, capacity: u64) -> Resource {
    Resource::new(id, format!("Butik {id}"), "jabodetabek", capacity)
}

pub fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        national_id: format!("3171{id:0>12}"),
        name: "PENGUJI".to_string(),
        phone: format!("0812{id:0>8}"),
        email: format!("{id}@example.com"),
        credential_hash: String::new(),
        created_at: chrono::Utc::now(),
    }
}

pub fn gate() -> ChallengeGate {
    ChallengeGate::new(SECRET, Duration::from_secs(300))
}

pub async fn flow(resources: Vec<Resource>, records: RecordStore) -> AdmissionFlow<MemorySink> {
    let quota = QuotaAllocator::in_memory(resources).await.expect("quota");
    AdmissionFlow::new(gate(), quota, records).with_sink(MemorySink::new())
}

/// Counter backend whose every call fails.
#[derive(Debug, Default)]
pub struct UnreachableStore;

#[async_trait]
impl CounterStore for UnreachableStore {
    fn name(&self) -> &'static str {
        "unreachable"
    }
    async fn ping(&self) -> Result<(), BackendError> {
        Err("connection refused".into())
    }
    async fn init(&self, _: &str, _: i64) -> Result<bool, BackendError> {
        Err("connection refused".into())
    }
    async fn decrement(&self, _: &str) -> Result<i64, BackendError> {
        Err("connection refused".into())
    }
    async fn increment(&self, _: &str) -> Result<i64, BackendError> {
        Err("connection refused".into())
    }
    async fn get(&self, _: &str) -> Result<Option<i64>, BackendError> {
        Err("connection refused".into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flake {
    Healthy,
    Failing,
    Stalled,
    Slow(Duration),
}

/// In-memory counters that can be switched to fail, stall or lag after startup.
#[derive(Debug)]
pub struct FlakyStore {
    inner: InMemoryCounterStore,
    mode: Mutex<Flake>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: InMemoryCounterStore::new(), mode: Mutex::new(Flake::Healthy) })
    }

    pub fn set(&self, mode: Flake) {
        *self.mode.lock().unwrap() = mode;
    }

    async fn gate(&self) -> Result<(), BackendError> {
        let mode = *self.mode.lock().unwrap();
        match mode {
            Flake::Healthy => Ok(()),
            Flake::Failing => Err("connection reset".into()),
            Flake::Stalled => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Flake::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl CounterStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }
    async fn ping(&self) -> Result<(), BackendError> {
        self.gate().await?;
        self.inner.ping().await
    }
    async fn init(&self, key: &str, value: i64) -> Result<bool, BackendError> {
        self.gate().await?;
        self.inner.init(key, value).await
    }
    async fn decrement(&self, key: &str) -> Result<i64, BackendError> {
        self.gate().await?;
        self.inner.decrement(key).await
    }
    async fn increment(&self, key: &str) -> Result<i64, BackendError> {
        self.gate().await?;
        self.inner.increment(key).await
    }
    async fn get(&self, key: &str) -> Result<Option<i64>, BackendError> {
        self.gate().await?;
        self.inner.get(key).await
    }
}

#[derive(Clone)]
pub struct SharedWriter(pub Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

pub struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Capture log output on the current thread while the guard lives.
pub fn capture_logs() -> (Arc<Mutex<Vec<u8>>>, tracing::subscriber::DefaultGuard) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
        .with_target(true)
        .without_time()
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}

pub fn logs(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
}
