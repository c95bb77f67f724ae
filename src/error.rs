//! Error types for the admission engine
use std::time::Duration;

use crate::challenge::ChallengeError;
use crate::ident::IdentError;
use crate::quota::QuotaError;
use crate::records::{ConflictField, StoreError};

/// Boxed error returned by pluggable backends (counter stores, sinks).
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Failure talking to a counter backend.
#[derive(thiserror::Error, Debug)]
pub enum CounterError {
    /// The backend did not answer within the configured bound.
    #[error("counter backend timed out after {elapsed:?} (limit: {timeout:?})")]
    Timeout { elapsed: Duration, timeout: Duration },
    /// The backend answered with an error (connection refused, protocol error, ...).
    #[error("counter backend error: {0}")]
    Backend(#[source] BackendError),
}

impl CounterError {
    /// Check if this error is due to timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Unified error returned by [`AdmissionFlow`](crate::admission::AdmissionFlow) operations.
///
/// Quota exhaustion is deliberately *not* an error: it is reported as
/// [`IssueOutcome::Exhausted`](crate::admission::IssueOutcome::Exhausted).
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum AdmissionError {
    /// Malformed or incomplete input.
    #[error("invalid request: {0}")]
    Validation(String),
    /// Invalid, expired, forged or mismatched challenge.
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
    /// A uniqueness constraint on users was violated.
    #[error("{0} already registered")]
    DataConflict(ConflictField),
    /// The requested record does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Unknown identifier or wrong password on login.
    #[error("invalid credentials")]
    Unauthenticated,
    /// The request is understood but not allowed (e.g. region restricted).
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Pre-open issuance was attempted outside its window.
    #[error("pre-open window is not open")]
    TooEarly,
    /// The counter backend failed or timed out.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[source] BackendError),
    /// Randomness, hashing or task failures.
    #[error("internal error: {0}")]
    Internal(#[source] BackendError),
}

impl AdmissionError {
    /// HTTP status code the routing layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Challenge(_) => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::DataConflict(_) => 409,
            Self::TooEarly => 425,
            Self::Internal(_) => 500,
            Self::BackendUnavailable(_) => 503,
        }
    }

    /// Short human-readable message that is safe to show to the caller.
    ///
    /// Internal causes (network errors, decode failures) never appear here.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::Forbidden(msg) => msg.clone(),
            Self::Challenge(_) => "invalid captcha".to_string(),
            Self::DataConflict(field) => format!("{field} already registered"),
            Self::NotFound(what) => format!("{what} not found"),
            Self::Unauthenticated => "invalid credentials".to_string(),
            Self::TooEarly => "pre-open has not started".to_string(),
            Self::BackendUnavailable(_) => "service temporarily unavailable".to_string(),
            Self::Internal(_) => "internal error".to_string(),
        }
    }

    /// Check if this error is a challenge rejection
    pub fn is_challenge(&self) -> bool {
        matches!(self, Self::Challenge(_))
    }

    /// Check if this error is a uniqueness conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::DataConflict(_))
    }

    /// Check if this error came from an unavailable backend
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}

impl From<QuotaError> for AdmissionError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::UnknownResource(id) => Self::Validation(format!("unknown resource '{id}'")),
            QuotaError::Counter(inner) => Self::BackendUnavailable(Box::new(inner)),
        }
    }
}

impl From<StoreError> for AdmissionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(field) => Self::DataConflict(field),
            other => Self::Internal(Box::new(other)),
        }
    }
}

impl From<IdentError> for AdmissionError {
    fn from(err: IdentError) -> Self {
        Self::Internal(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::RejectReason;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct MessageError(String);

    impl fmt::Display for MessageError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for MessageError {}

    #[test]
    fn counter_timeout_display() {
        let err = CounterError::Timeout {
            elapsed: Duration::from_millis(510),
            timeout: Duration::from_millis(500),
        };
        let msg = err.to_string();
        assert!(msg.contains("timed out"));
        assert!(msg.contains("500ms"));
        assert!(err.is_timeout());
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AdmissionError::Validation("x".into()).status_code(), 400);
        assert_eq!(
            AdmissionError::Challenge(ChallengeError::new(RejectReason::Expired)).status_code(),
            400
        );
        assert_eq!(AdmissionError::DataConflict(ConflictField::NationalId).status_code(), 409);
        assert_eq!(AdmissionError::NotFound("ticket").status_code(), 404);
        assert_eq!(AdmissionError::Unauthenticated.status_code(), 401);
        assert_eq!(AdmissionError::TooEarly.status_code(), 425);
        let backend = AdmissionError::BackendUnavailable(Box::new(MessageError("down".into())));
        assert_eq!(backend.status_code(), 503);
        assert!(backend.is_backend_unavailable());
    }

    #[test]
    fn user_message_hides_internal_causes() {
        let err = AdmissionError::BackendUnavailable(Box::new(MessageError(
            "connection refused 10.0.0.7:6379".into(),
        )));
        assert_eq!(err.user_message(), "service temporarily unavailable");
        assert!(!err.user_message().contains("10.0.0.7"));
        assert!(err.source().is_some(), "cause stays reachable for logging");

        let err = AdmissionError::Internal(Box::new(MessageError("getrandom failed".into())));
        assert_eq!(err.user_message(), "internal error");
    }

    #[test]
    fn challenge_rejections_share_one_message() {
        for reason in [RejectReason::Signature, RejectReason::Expired, RejectReason::WrongAnswer] {
            let err = AdmissionError::from(ChallengeError::new(reason));
            assert!(err.is_challenge());
            assert_eq!(err.user_message(), "invalid captcha");
            assert_eq!(err.to_string(), "invalid captcha");
        }
    }

    #[test]
    fn quota_errors_translate() {
        let err = AdmissionError::from(QuotaError::UnknownResource("nowhere".into()));
        assert_eq!(err.status_code(), 400);
        assert!(err.user_message().contains("nowhere"));

        let err = AdmissionError::from(QuotaError::Counter(CounterError::Backend(Box::new(
            MessageError("boom".into()),
        ))));
        assert!(err.is_backend_unavailable());
    }

    #[test]
    fn conflicts_translate_from_store() {
        let err = AdmissionError::from(StoreError::Conflict(ConflictField::Email));
        assert!(err.is_conflict());
        assert_eq!(err.user_message(), "email already registered");
    }
}
