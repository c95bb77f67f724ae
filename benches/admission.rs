use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Duration;
use ticketgate::model::{Resource, User};
use ticketgate::telemetry::NullSink;
use ticketgate::{
    AdmissionFlow, ChallengeGate, ChallengeKind, IssueRequest, QuotaAllocator, RecordStore,
};

fn gate() -> ChallengeGate {
    ChallengeGate::new("bench-secret", Duration::from_secs(300))
}

fn challenge_verify(c: &mut Criterion) {
    let gate = gate();
    let challenge = gate.issue_math_with(3, 4);

    c.bench_function("challenge_issue_math", |b| {
        b.iter(|| black_box(gate.issue_math()));
    });
    c.bench_function("challenge_verify_math", |b| {
        b.iter(|| black_box(gate.verify(black_box(&challenge.token), ChallengeKind::Math, "7")));
    });
}

fn quota_admit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    // Large enough that the counter never runs dry during measurement.
    let quota = rt
        .block_on(QuotaAllocator::in_memory(vec![Resource::new("a", "A", "jabodetabek", u64::MAX / 2)]))
        .unwrap();

    c.bench_function("quota_try_admit_in_memory", |b| {
        b.to_async(&rt).iter(|| async {
            let _ = black_box(quota.try_admit(black_box("a")).await);
        });
    });
}

fn issue_ticket(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let flow = rt.block_on(async {
        let quota = QuotaAllocator::in_memory(vec![Resource::new("a", "A", "jabodetabek", u64::MAX / 2)])
            .await
            .unwrap();
        let flow = AdmissionFlow::new(gate(), quota, RecordStore::in_memory()).with_sink(NullSink);
        flow.records().put_user(User {
            id: "u1".into(),
            national_id: "3171000000000001".into(),
            name: "BENCH".into(),
            phone: "081200000001".into(),
            email: "bench@example.com".into(),
            credential_hash: String::new(),
            created_at: chrono::Utc::now(),
        });
        Arc::new(flow)
    });

    c.bench_function("issue_ticket_end_to_end", |b| {
        b.to_async(&rt).iter(|| async {
            let request = IssueRequest::new("u1", "a", "08:00-09:00");
            let _ = black_box(flow.issue_ticket(request).await);
        });
    });
}

criterion_group!(benches, challenge_verify, quota_admit, issue_ticket);
criterion_main!(benches);
