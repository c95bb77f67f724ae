use serde::Serialize;
use std::fmt;

use crate::challenge::{ChallengeKind, RejectReason};

/// Events emitted by the admission flow.
///
/// Serializes with a `kind` tag, e.g.
/// `{"kind":"granted","resource_id":"juanda","ticket_number":"AAA-001","remaining":24}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum AdmissionEvent {
    /// A ticket was issued.
    Granted {
        resource_id: String,
        ticket_number: String,
        /// Units left after this grant.
        remaining: u64,
    },
    /// The resource had no units left.
    Exhausted { resource_id: String },
    /// A granted unit was handed back because the ticket could not be recorded.
    Compensated { resource_id: String, reason: String },
    /// The counter backend failed or timed out.
    BackendFailure { resource_id: String, error: String },
    /// A challenge answer was rejected.
    ChallengeRejected { challenge: ChallengeKind, reason: RejectReason },
    /// A new user was registered.
    UserRegistered { user_id: String },
}

impl AdmissionEvent {
    /// Snake-case name of the variant, as used in the `kind` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionEvent::Granted { .. } => "granted",
            AdmissionEvent::Exhausted { .. } => "exhausted",
            AdmissionEvent::Compensated { .. } => "compensated",
            AdmissionEvent::BackendFailure { .. } => "backend_failure",
            AdmissionEvent::ChallengeRejected { .. } => "challenge_rejected",
            AdmissionEvent::UserRegistered { .. } => "user_registered",
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Granted { resource_id, ticket_number, remaining } => {
                write!(f, "Granted({resource_id}, {ticket_number}, remaining={remaining})")
            }
            AdmissionEvent::Exhausted { resource_id } => write!(f, "Exhausted({resource_id})"),
            AdmissionEvent::Compensated { resource_id, reason } => {
                write!(f, "Compensated({resource_id}, reason={reason})")
            }
            AdmissionEvent::BackendFailure { resource_id, error } => {
                write!(f, "BackendFailure({resource_id}, error={error})")
            }
            AdmissionEvent::ChallengeRejected { challenge, reason } => {
                write!(f, "ChallengeRejected({challenge}, reason={reason})")
            }
            AdmissionEvent::UserRegistered { user_id } => write!(f, "UserRegistered({user_id})"),
        }
    }
}
