//! Convenient re-exports for common ticketgate types.
pub use crate::{
    admission::{
        AdmissionFlow, Credentials, IssueOutcome, IssueRequest, PreOpenRequest, QuotaStatus,
        Registration, StartupError,
    },
    challenge::{Challenge, ChallengeAnswer, ChallengeError, ChallengeGate, ChallengeKind},
    config::{EngineConfig, PreOpenConfig},
    error::{AdmissionError, BackendError, CounterError},
    model::{PublicUser, Resource, Ticket, User},
    quota::{Admission, BackendMode, CounterStore, QuotaAllocator, QuotaError, ResourceStatus},
    records::{ConflictField, RecordStore, StoreError},
    telemetry::{AdmissionEvent, TelemetrySink},
    timeout::TimeoutPolicy,
};
