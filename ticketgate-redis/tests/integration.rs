use std::sync::Arc;
use std::time::Duration;
use ticketgate::model::Resource;
use ticketgate::{Admission, BackendMode, CounterStore, QuotaAllocator, TimeoutPolicy};
use ticketgate_redis::RedisCounterStore;

// Requires Redis running. If TICKETGATE_TEST_REDIS_URL is unset, the test skips.
#[tokio::test]
async fn admits_through_redis() {
    let url = match std::env::var("TICKETGATE_TEST_REDIS_URL") {
        Ok(v) => v,
        Err(_) => {
            eprintln!("skipping: set TICKETGATE_TEST_REDIS_URL (e.g. redis://127.0.0.1:6379)");
            return;
        }
    };
    let store = RedisCounterStore::connect(&url)
        .await
        .unwrap_or_else(|e| panic!("Failed to connect to redis at '{}': {}", url, e));
    let primary: Arc<dyn CounterStore> = Arc::new(store.clone());

    let id = format!("it-{}", uuid::Uuid::new_v4());
    let resource = Resource::new(id.clone(), "Integration", "jabodetabek", 2);
    let quota = QuotaAllocator::connect(
        Some(primary),
        [resource],
        TimeoutPolicy::new(Duration::from_secs(2)).expect("valid timeout"),
    )
    .await
    .expect("quota");
    assert_eq!(quota.mode(), BackendMode::Primary);

    assert_eq!(quota.try_admit(&id).await.unwrap(), Admission::Granted { remaining: 1 });
    assert_eq!(quota.try_admit(&id).await.unwrap(), Admission::Granted { remaining: 0 });
    assert_eq!(quota.try_admit(&id).await.unwrap(), Admission::Exhausted);
    assert_eq!(quota.remaining(&id).await.unwrap(), 0);

    // compensation left the raw counter at zero, not below
    let raw = store.get(&format!("ticket_quota:{id}")).await.unwrap();
    assert_eq!(raw, Some(0));

    // Cleanup
    let client = redis::Client::open(url.as_str()).expect("client");
    let mut conn = client.get_multiplexed_async_connection().await.expect("connection");
    let _: i64 = redis::cmd("DEL")
        .arg(format!("ticket_quota:{id}"))
        .query_async(&mut conn)
        .await
        .expect("cleanup failed");
}
