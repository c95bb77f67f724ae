#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # ticketgate
//!
//! Admission and issuance engine for scarce, timed-release tickets: many
//! concurrent requesters, a small fixed capacity per pickup location, and a
//! bot-resistance challenge in front of it all.
//!
//! ## Features
//!
//! - **Stateless challenges**: HMAC-signed math and image captchas, verifiable by any instance
//! - **Over-issue-proof quota**: atomic decrement-then-compensate on a shared counter,
//!   with an in-process fallback chosen once at startup
//! - **Readable identifiers**: globally ordered `PPP-DDD` ticket numbers and random redemption codes
//! - **Record store**: lock-protected user and ticket tables, snapshotted in the background
//! - **Telemetry**: admission events delivered to `tower::Service` sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use ticketgate::{AdmissionFlow, ChallengeGate, IssueRequest, QuotaAllocator, RecordStore};
//! use ticketgate::model::{Resource, User};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let gate = ChallengeGate::new("change-me", Duration::from_secs(300));
//!     let quota = QuotaAllocator::in_memory([Resource::new("juanda", "Juanda", "jabodetabek", 25)])
//!         .await
//!         .unwrap();
//!     let flow = AdmissionFlow::new(gate, quota, RecordStore::in_memory());
//!
//!     flow.records().put_user(User {
//!         id: "u1".into(),
//!         national_id: "3171000000000001".into(),
//!         name: "SITI".into(),
//!         phone: "081200000001".into(),
//!         email: "siti@example.com".into(),
//!         credential_hash: String::new(),
//!         created_at: chrono::Utc::now(),
//!     });
//!
//!     let outcome = flow.issue_ticket(IssueRequest::new("u1", "juanda", "08:00")).await.unwrap();
//!     assert!(outcome.is_issued());
//! }
//! ```

pub mod admission;
pub mod challenge;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod ident;
pub mod model;
pub mod preopen;
pub mod prelude;
pub mod quota;
pub mod records;
pub mod telemetry;
pub mod timeout;

// Re-exports
pub use admission::{AdmissionFlow, IssueOutcome, IssueRequest, PreOpenRequest};
pub use challenge::{ChallengeAnswer, ChallengeError, ChallengeGate, ChallengeKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{AdmissionError, BackendError, CounterError};
pub use ident::IdentifierGenerator;
pub use quota::{Admission, BackendMode, CounterStore, InMemoryCounterStore, QuotaAllocator};
pub use records::RecordStore;
pub use timeout::TimeoutPolicy;
