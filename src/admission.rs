//! The admission flow: challenge, quota, identifiers, records.
//!
//! [`AdmissionFlow`] is what an HTTP layer calls. One issuance request runs
//! these steps:
//!
//! 1. validate the request and verify the challenge (when one is required or supplied)
//! 2. confirm the user exists
//! 3. take one unit of quota from the resource
//! 4. mint a ticket number, redemption code and record id
//! 5. store the ticket (the snapshot is written in the background)
//!
//! Steps 3 to 5 run on their own task, so a caller that goes away mid-request
//! cannot leave a unit taken without a ticket. If step 4 fails the unit is
//! handed back before the error is returned.
//!
//! Quota exhaustion is not an error: it is [`IssueOutcome::Exhausted`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::challenge::{
    ChallengeAnswer, ChallengeError, ChallengeGate, ChallengeKind, ImageChallenge, MathChallenge,
    RejectReason,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, EngineConfig};
use crate::credentials;
use crate::error::AdmissionError;
use crate::ident::IdentifierGenerator;
use crate::model::{PublicUser, Resource, Ticket, User};
use crate::preopen::PreOpenWindow;
use crate::quota::{Admission, BackendMode, CounterStore, QuotaAllocator, QuotaError, ResourceStatus};
use crate::records::{RecordStore, StoreError};
use crate::telemetry::{emit_best_effort, AdmissionEvent, LogSink, TelemetrySink};

/// Message carried by [`IssueOutcome::Exhausted`].
pub const EXHAUSTED_MESSAGE: &str = "quota exhausted";

/// A regular issuance request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub user_id: String,
    #[serde(rename = "location_id")]
    pub resource_id: String,
    pub time_slot: String,
    /// Math challenge answer; required when the flow is configured to require one.
    #[serde(default, rename = "captcha", skip_serializing_if = "Option::is_none")]
    pub challenge: Option<ChallengeAnswer>,
}

impl IssueRequest {
    pub fn new(
        user_id: impl Into<String>,
        resource_id: impl Into<String>,
        time_slot: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            resource_id: resource_id.into(),
            time_slot: time_slot.into(),
            challenge: None,
        }
    }

    pub fn with_challenge(mut self, answer: ChallengeAnswer) -> Self {
        self.challenge = Some(answer);
        self
    }
}

/// A pre-open issuance request: a regular request plus the order size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreOpenRequest {
    #[serde(flatten)]
    pub issue: IssueRequest,
    pub size_gram: f64,
}

/// Result of an issuance attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status")]
pub enum IssueOutcome {
    #[serde(rename = "success")]
    Issued { ticket: Ticket, remaining: u64 },
    #[serde(rename = "failed")]
    Exhausted { message: String },
}

impl IssueOutcome {
    fn exhausted() -> Self {
        IssueOutcome::Exhausted { message: EXHAUSTED_MESSAGE.to_string() }
    }

    pub fn is_issued(&self) -> bool {
        matches!(self, IssueOutcome::Issued { .. })
    }

    pub fn ticket(&self) -> Option<&Ticket> {
        match self {
            IssueOutcome::Issued { ticket, .. } => Some(ticket),
            IssueOutcome::Exhausted { .. } => None,
        }
    }

    pub fn into_ticket(self) -> Option<Ticket> {
        match self {
            IssueOutcome::Issued { ticket, .. } => Some(ticket),
            IssueOutcome::Exhausted { .. } => None,
        }
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct Registration {
    #[serde(rename = "nik")]
    pub national_id: String,
    #[serde(rename = "nama")]
    pub name: String,
    #[serde(rename = "whatsapp")]
    pub phone: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "captcha_math")]
    pub math: ChallengeAnswer,
    #[serde(rename = "captcha_image")]
    pub image: ChallengeAnswer,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("national_id", &self.national_id)
            .field("name", &self.name)
            .field("phone", &self.phone)
            .field("email", &self.email)
            .field("password", &"<REDACTED>")
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    /// Email or phone.
    pub identifier: String,
    pub password: String,
    #[serde(rename = "captcha_math")]
    pub math: ChallengeAnswer,
    #[serde(rename = "captcha_image")]
    pub image: ChallengeAnswer,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("password", &"<REDACTED>")
            .finish_non_exhaustive()
    }
}

/// Totals across every resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub mode: BackendMode,
    pub backend: &'static str,
    pub capacity: u64,
    #[serde(rename = "quota_remaining")]
    pub remaining: u64,
    pub resources: Vec<ResourceStatus>,
}

/// Failure to assemble a flow from configuration.
#[derive(thiserror::Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open record store: {0}")]
    Store(#[from] StoreError),
    #[error("failed to initialise quota: {0}")]
    Quota(#[from] QuotaError),
}

/// Admission and issuance entry point shared by all request handlers.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct AdmissionFlow<S = LogSink> {
    gate: ChallengeGate,
    quota: Arc<QuotaAllocator>,
    ids: Arc<IdentifierGenerator>,
    records: Arc<RecordStore>,
    clock: Arc<dyn Clock>,
    preopen: PreOpenWindow,
    require_issue_challenge: bool,
    sink: S,
}

impl<S> fmt::Debug for AdmissionFlow<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionFlow")
            .field("gate", &self.gate)
            .field("quota", &self.quota)
            .field("issued", &self.ids.issued())
            .field("preopen", &self.preopen)
            .field("require_issue_challenge", &self.require_issue_challenge)
            .finish_non_exhaustive()
    }
}

impl AdmissionFlow<LogSink> {
    /// Assemble a flow. Ticket numbering continues after the highest number
    /// already in `records`.
    pub fn new(gate: ChallengeGate, quota: QuotaAllocator, records: RecordStore) -> Self {
        let ids = IdentifierGenerator::resume_after(records.highest_ticket_sequence());
        Self {
            gate,
            quota: Arc::new(quota),
            ids: Arc::new(ids),
            records: Arc::new(records),
            clock: Arc::new(SystemClock),
            preopen: PreOpenWindow::default(),
            require_issue_challenge: false,
            sink: LogSink,
        }
    }

    /// Open the snapshot file, connect the counters and build the gate from `cfg`.
    ///
    /// `primary` is the counter backend named by `cfg.counter_addr`, already
    /// constructed by the caller; `None` runs on in-process counters.
    pub async fn from_config(
        cfg: &EngineConfig,
        primary: Option<Arc<dyn CounterStore>>,
    ) -> Result<Self, StartupError> {
        cfg.validate()?;
        let gate = ChallengeGate::new(cfg.captcha_secret.as_bytes(), cfg.challenge_ttl());
        let records = RecordStore::open(&cfg.database_path).await?;
        let quota =
            QuotaAllocator::connect(primary, cfg.resources.clone(), cfg.counter_timeout()?).await?;
        let flow = Self::new(gate, quota, records)
            .with_preopen(PreOpenWindow::from_config(&cfg.preopen)?)
            .require_issue_challenge(cfg.require_issue_challenge);
        tracing::info!(
            target: "ticketgate::admission",
            mode = ?flow.quota.mode(),
            resources = cfg.resources.len(),
            resumed_after = flow.ids.issued(),
            "admission flow ready"
        );
        Ok(flow)
    }
}

impl<S> AdmissionFlow<S> {
    /// Replace the telemetry sink.
    pub fn with_sink<T>(self, sink: T) -> AdmissionFlow<T> {
        AdmissionFlow {
            gate: self.gate,
            quota: self.quota,
            ids: self.ids,
            records: self.records,
            clock: self.clock,
            preopen: self.preopen,
            require_issue_challenge: self.require_issue_challenge,
            sink,
        }
    }

    /// Clock used for record timestamps and the pre-open window.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_preopen(mut self, window: PreOpenWindow) -> Self {
        self.preopen = window;
        self
    }

    /// Require a math challenge answer on every issuance request.
    pub fn require_issue_challenge(mut self, required: bool) -> Self {
        self.require_issue_challenge = required;
        self
    }

    pub fn gate(&self) -> &ChallengeGate {
        &self.gate
    }

    pub fn quota(&self) -> &QuotaAllocator {
        &self.quota
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn issue_math_challenge(&self) -> MathChallenge {
        self.gate.issue_math()
    }

    pub fn issue_image_challenge(&self) -> ImageChallenge {
        self.gate.issue_image()
    }

    /// Look up one ticket.
    pub fn ticket(&self, id: &str) -> Result<Ticket, AdmissionError> {
        self.records.get_ticket(id).ok_or(AdmissionError::NotFound("ticket"))
    }

    pub fn tickets_for_user(&self, user_id: &str) -> Vec<Ticket> {
        self.records.tickets_for_user(user_id)
    }

    /// Every resource with its remaining quota.
    pub async fn resources(&self) -> Result<Vec<ResourceStatus>, AdmissionError> {
        Ok(self.quota.snapshot().await?)
    }

    pub async fn quota_status(&self) -> Result<QuotaStatus, AdmissionError> {
        let resources = self.quota.snapshot().await?;
        Ok(QuotaStatus {
            mode: self.quota.mode(),
            backend: self.quota.backend_name(),
            capacity: resources.iter().map(|r| r.capacity).sum(),
            remaining: resources.iter().map(|r| r.remaining).sum(),
            resources,
        })
    }

    /// Whether the pre-open window is open right now.
    pub fn preopen_is_open(&self) -> bool {
        self.preopen.is_open(self.clock.now())
    }

    /// Flush pending record writes and stop the snapshot worker.
    pub async fn shutdown(&self) -> Result<(), AdmissionError> {
        Ok(self.records.shutdown().await?)
    }
}

impl<S> AdmissionFlow<S>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    async fn emit(&self, event: AdmissionEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }

    async fn check(
        &self,
        kind: ChallengeKind,
        outcome: Result<(), ChallengeError>,
    ) -> Result<(), AdmissionError> {
        if let Err(err) = outcome {
            tracing::debug!(
                target: "ticketgate::admission",
                challenge = %kind,
                reason = %err.reason(),
                "challenge rejected"
            );
            self.emit(AdmissionEvent::ChallengeRejected { challenge: kind, reason: err.reason() })
                .await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn check_pair(
        &self,
        math: &ChallengeAnswer,
        image: &ChallengeAnswer,
    ) -> Result<(), AdmissionError> {
        self.check(ChallengeKind::Math, self.gate.verify(&math.token, ChallengeKind::Math, &math.answer))
            .await?;
        self.check(
            ChallengeKind::Image,
            self.gate.verify(&image.token, ChallengeKind::Image, &image.answer),
        )
        .await
    }

    /// Issue one ticket for `request.resource_id`.
    ///
    /// # Errors
    /// - [`AdmissionError::Validation`] for empty fields or an unknown resource
    /// - [`AdmissionError::Challenge`] when the challenge is missing (if required) or wrong
    /// - [`AdmissionError::NotFound`] when the user does not exist
    /// - [`AdmissionError::BackendUnavailable`] when the counter backend fails
    /// - [`AdmissionError::Internal`] when identifiers cannot be minted
    pub async fn issue_ticket(&self, request: IssueRequest) -> Result<IssueOutcome, AdmissionError> {
        let resource = self.validate_issue(&request)?.clone();
        self.issue_checked(request, resource).await
    }

    /// Issue one ticket during the pre-open window.
    ///
    /// On top of [`issue_ticket`](Self::issue_ticket): outside the window the
    /// request is [`AdmissionError::TooEarly`], orders below the minimum size
    /// are [`AdmissionError::Validation`], and resources outside the pre-open
    /// region are [`AdmissionError::Forbidden`].
    pub async fn issue_preopen_ticket(
        &self,
        request: PreOpenRequest,
    ) -> Result<IssueOutcome, AdmissionError> {
        if !self.preopen_is_open() {
            return Err(AdmissionError::TooEarly);
        }
        let resource = self.validate_issue(&request.issue)?.clone();
        if !self.preopen.admits_size(request.size_gram) {
            return Err(AdmissionError::Validation(format!(
                "minimum size for pre-open is {:.1} gram",
                self.preopen.min_size_gram()
            )));
        }
        if !self.preopen.admits_region(&resource.region) {
            return Err(AdmissionError::Forbidden(format!(
                "only {} resources are open during pre-open",
                self.preopen.region()
            )));
        }
        self.issue_checked(request.issue, resource).await
    }

    fn validate_issue(&self, request: &IssueRequest) -> Result<&Resource, AdmissionError> {
        for (field, value) in [
            ("user_id", &request.user_id),
            ("location_id", &request.resource_id),
            ("time_slot", &request.time_slot),
        ] {
            if value.trim().is_empty() {
                return Err(AdmissionError::Validation(format!("{field} is required")));
            }
        }
        Ok(self.quota.resource(&request.resource_id)?)
    }

    async fn issue_checked(
        &self,
        request: IssueRequest,
        resource: Resource,
    ) -> Result<IssueOutcome, AdmissionError> {
        match &request.challenge {
            Some(answer) => {
                let verdict = self.gate.verify(&answer.token, ChallengeKind::Math, &answer.answer);
                self.check(ChallengeKind::Math, verdict).await?;
            }
            None if self.require_issue_challenge => {
                let missing = Err(ChallengeError::new(RejectReason::MissingAnswer));
                self.check(ChallengeKind::Math, missing).await?;
            }
            None => {}
        }

        if self.records.get_user(&request.user_id).is_none() {
            return Err(AdmissionError::NotFound("user"));
        }

        let critical = CriticalSection {
            quota: Arc::clone(&self.quota),
            ids: Arc::clone(&self.ids),
            records: Arc::clone(&self.records),
            created_at: self.clock.now(),
            sink: self.sink.clone(),
        };
        let resource_id = resource.id.clone();
        tokio::spawn(critical.run(request, resource)).await.map_err(|join| {
            tracing::error!(
                target: "ticketgate::admission",
                resource = %resource_id,
                error = %join,
                "admission task failed"
            );
            AdmissionError::Internal(Box::new(join))
        })?
    }

    /// Register a user. Both a math and an image challenge must pass.
    ///
    /// The display name is reduced to letters, spaces, dots and hyphens and
    /// upper-cased. National id, email and phone must all be unused.
    pub async fn register(&self, registration: Registration) -> Result<PublicUser, AdmissionError> {
        let Registration { national_id, name, phone, email, password, math, image } = registration;
        let national_id = national_id.trim().to_string();
        let phone = phone.trim().to_string();
        let email = email.trim().to_string();
        let name = display_name(&name);
        for (field, value) in [
            ("nik", &national_id),
            ("nama", &name),
            ("whatsapp", &phone),
            ("email", &email),
            ("password", &password),
        ] {
            if value.is_empty() {
                return Err(AdmissionError::Validation(format!("{field} is required")));
            }
        }

        self.check_pair(&math, &image).await?;

        let credential_hash = blocking(move || credentials::hash_password(&password)).await?;
        let user = User {
            id: self.ids.next_record_id(),
            national_id,
            name,
            phone,
            email,
            credential_hash,
            created_at: self.clock.now(),
        };
        let public = PublicUser::from(&user);
        self.records.insert_user_unique(user).map_err(|err| {
            tracing::debug!(target: "ticketgate::admission", error = %err, "registration rejected");
            AdmissionError::from(err)
        })?;

        tracing::info!(target: "ticketgate::admission", user_id = %public.id, "user registered");
        self.emit(AdmissionEvent::UserRegistered { user_id: public.id.clone() }).await;
        Ok(public)
    }

    /// Log in by email or phone. Both a math and an image challenge must pass.
    pub async fn login(&self, credentials: Credentials) -> Result<PublicUser, AdmissionError> {
        let Credentials { identifier, password, math, image } = credentials;
        let identifier = identifier.trim();
        if identifier.is_empty() || password.is_empty() {
            return Err(AdmissionError::Validation("identifier and password are required".into()));
        }

        self.check_pair(&math, &image).await?;

        // Unknown identifiers still pay for one argon2 verification.
        let user = self.records.find_user_by_email_or_phone(identifier);
        let stored = user.as_ref().map(|user| user.credential_hash.clone());
        let matches = blocking(move || match stored {
            Some(stored) => credentials::verify_password(&password, &stored),
            None => credentials::verify_absent(&password),
        })
        .await?;
        match user {
            Some(user) if matches => Ok(PublicUser::from(&user)),
            _ => Err(AdmissionError::Unauthenticated),
        }
    }
}

/// The part of issuance that must run to completion once quota is taken.
struct CriticalSection<S> {
    quota: Arc<QuotaAllocator>,
    ids: Arc<IdentifierGenerator>,
    records: Arc<RecordStore>,
    created_at: DateTime<Utc>,
    sink: S,
}

impl<S> CriticalSection<S>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    async fn run(self, request: IssueRequest, resource: Resource) -> Result<IssueOutcome, AdmissionError> {
        let CriticalSection { quota, ids, records, created_at, sink } = self;

        let remaining = match quota.try_admit(&resource.id).await {
            Ok(Admission::Granted { remaining }) => remaining,
            Ok(Admission::Exhausted) => {
                tracing::debug!(target: "ticketgate::admission", resource = %resource.id, "quota exhausted");
                let event = AdmissionEvent::Exhausted { resource_id: resource.id.clone() };
                emit_best_effort(sink, event).await;
                return Ok(IssueOutcome::exhausted());
            }
            Err(err) => {
                tracing::warn!(
                    target: "ticketgate::admission",
                    resource = %resource.id,
                    error = %err,
                    "quota backend failed"
                );
                let event = AdmissionEvent::BackendFailure {
                    resource_id: resource.id.clone(),
                    error: err.to_string(),
                };
                emit_best_effort(sink, event).await;
                return Err(err.into());
            }
        };

        let ticket = match mint(&ids, &request, &resource, created_at) {
            Ok(ticket) => ticket,
            Err(err) => {
                hand_back(&quota, sink, &resource.id, &err).await;
                return Err(err);
            }
        };

        records.put_ticket(ticket.clone());
        tracing::info!(
            target: "ticketgate::admission",
            resource = %resource.id,
            ticket_number = %ticket.ticket_number,
            remaining,
            "ticket issued"
        );
        let event = AdmissionEvent::Granted {
            resource_id: resource.id.clone(),
            ticket_number: ticket.ticket_number.clone(),
            remaining,
        };
        emit_best_effort(sink, event).await;
        Ok(IssueOutcome::Issued { ticket, remaining })
    }
}

fn mint(
    ids: &IdentifierGenerator,
    request: &IssueRequest,
    resource: &Resource,
    created_at: DateTime<Utc>,
) -> Result<Ticket, AdmissionError> {
    let code = ids.next_redemption_code()?;
    let ticket_number = ids.next_ticket_number()?;
    Ok(Ticket {
        id: ids.next_record_id(),
        user_id: request.user_id.clone(),
        resource_id: resource.id.clone(),
        resource_name: resource.name.clone(),
        ticket_number,
        code,
        time_slot: request.time_slot.clone(),
        created_at,
    })
}

async fn hand_back<S>(quota: &QuotaAllocator, sink: S, resource_id: &str, cause: &AdmissionError)
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    match quota.compensate(resource_id).await {
        Ok(remaining) => tracing::warn!(
            target: "ticketgate::admission",
            resource = %resource_id,
            remaining,
            error = %cause,
            "ticket not recorded; quota unit returned"
        ),
        Err(err) => tracing::error!(
            target: "ticketgate::admission",
            resource = %resource_id,
            error = %err,
            cause = %cause,
            "ticket not recorded and quota unit could not be returned"
        ),
    }
    let event = AdmissionEvent::Compensated {
        resource_id: resource_id.to_string(),
        reason: cause.to_string(),
    };
    emit_best_effort(sink, event).await;
}

async fn blocking<T, F>(work: F) -> Result<T, AdmissionError>
where
    F: FnOnce() -> Result<T, credentials::CredentialError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|join| AdmissionError::Internal(Box::new(join)))?
        .map_err(|err| AdmissionError::Internal(Box::new(err)))
}

fn display_name(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || matches!(c, ' ' | '.' | '-'))
        .collect();
    kept.trim().to_ascii_uppercase()
}
