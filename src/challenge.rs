//! Stateless signed challenges ("captcha").
//!
//! A challenge token carries everything needed to verify an answer: the expiry,
//! the challenge kind and the expected-answer encoding, bound together by an
//! HMAC-SHA256 signature under a server-held secret. Nothing is stored server
//! side, so any instance holding the secret can verify any token.
//!
//! Token layout (before the outer base64url encoding):
//!
//! ```text
//! {expiry_unix}|{kind}|{data}|{base64url(hmac_sha256(secret, "{expiry_unix}|{kind}|{data}"))}
//! ```
//!
//! Tokens are not single-use: a token and its answer may be replayed until the
//! token expires.
//!
//! ```rust
//! use ticketgate::challenge::{ChallengeGate, ChallengeKind};
//! use std::time::Duration;
//!
//! let gate = ChallengeGate::new("dev-secret", Duration::from_secs(300));
//! let challenge = gate.issue_math_with(3, 4);
//! assert!(gate.verify(&challenge.token, ChallengeKind::Math, "7").is_ok());
//! assert!(gate.verify(&challenge.token, ChallengeKind::Math, "8").is_err());
//! ```

use crate::clock::{Clock, SystemClock};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Default lifetime of an issued challenge.
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);

/// Operand range for arithmetic challenges (inclusive).
const MATH_OPERANDS: std::ops::RangeInclusive<u8> = 1..=9;

/// Option ids shown for every image challenge.
const IMAGE_OPTIONS: [&str; 4] = ["goldbar", "coin", "ring", "wallet"];

struct ImagePrompt {
    prompt: &'static str,
    correct: &'static str,
}

const IMAGE_PROMPTS: [ImagePrompt; 3] = [
    ImagePrompt { prompt: "Select the gold bar", correct: "goldbar" },
    ImagePrompt { prompt: "Select the coin", correct: "coin" },
    ImagePrompt { prompt: "Select the ring", correct: "ring" },
];

/// Kind of challenge; also the endpoint a token is valid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// Sum of two small integers.
    Math,
    /// Pick the named picture out of a shuffled option set.
    Image,
}

impl ChallengeKind {
    /// Wire label embedded in tokens.
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::Math => "math",
            ChallengeKind::Image => "image",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeKind {
    type Err = ChallengeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "math" => Ok(ChallengeKind::Math),
            "image" => Ok(ChallengeKind::Image),
            _ => Err(ChallengeError::new(RejectReason::Malformed)),
        }
    }
}

/// Arithmetic challenge body returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MathChallenge {
    pub a: u8,
    pub b: u8,
    pub token: String,
    pub expires_at: i64,
}

/// Multiple-choice picture challenge body returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageChallenge {
    pub prompt: String,
    pub options: Vec<String>,
    pub token: String,
    pub expires_at: i64,
}

/// Either challenge body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Challenge {
    Math(MathChallenge),
    Image(ImageChallenge),
}

impl Challenge {
    /// The signed token for this challenge.
    pub fn token(&self) -> &str {
        match self {
            Challenge::Math(c) => &c.token,
            Challenge::Image(c) => &c.token,
        }
    }

    /// Unix second after which the token is rejected.
    pub fn expires_at(&self) -> i64 {
        match self {
            Challenge::Math(c) => c.expires_at,
            Challenge::Image(c) => c.expires_at,
        }
    }
}

/// Which check rejected a token. Kept for logs and telemetry only; callers see
/// one uniform message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Not base64, wrong field count, unparseable expiry or data.
    Malformed,
    /// Signature does not match the embedded fields.
    Signature,
    /// Token was issued for a different challenge kind.
    KindMismatch,
    /// Token is past its expiry.
    Expired,
    /// No answer supplied.
    MissingAnswer,
    /// Answer does not match.
    WrongAnswer,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::Malformed => "malformed token",
            RejectReason::Signature => "signature mismatch",
            RejectReason::KindMismatch => "kind mismatch",
            RejectReason::Expired => "expired",
            RejectReason::MissingAnswer => "missing answer",
            RejectReason::WrongAnswer => "wrong answer",
        };
        f.write_str(s)
    }
}

/// Uniform challenge rejection. `Display` never reveals which check failed.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid captcha")]
pub struct ChallengeError {
    reason: RejectReason,
}

impl ChallengeError {
    /// Build a rejection for `reason`.
    pub fn new(reason: RejectReason) -> Self {
        Self { reason }
    }

    /// The failed check, for logging.
    pub fn reason(&self) -> RejectReason {
        self.reason
    }
}

/// Issues and verifies signed challenges.
///
/// Holds only immutable configuration and is cheap to clone.
#[derive(Clone)]
pub struct ChallengeGate {
    keyed: HmacSha256,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ChallengeGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeGate")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .field("clock", &self.clock)
            .finish()
    }
}

impl ChallengeGate {
    /// Create a gate signing with `secret`; tokens live for `ttl`.
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> Self {
        let keyed =
            HmacSha256::new_from_slice(secret.as_ref()).expect("HMAC can take key of any size");
        Self { keyed, ttl, clock: Arc::new(SystemClock) }
    }

    /// Replace the clock (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configured token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh challenge of `kind`.
    pub fn issue(&self, kind: ChallengeKind) -> Challenge {
        match kind {
            ChallengeKind::Math => Challenge::Math(self.issue_math()),
            ChallengeKind::Image => Challenge::Image(self.issue_image()),
        }
    }

    /// Issue an arithmetic challenge with random operands.
    pub fn issue_math(&self) -> MathChallenge {
        let mut rng = rand::rng();
        let a = rng.random_range(MATH_OPERANDS);
        let b = rng.random_range(MATH_OPERANDS);
        self.issue_math_with(a, b)
    }

    /// Issue an arithmetic challenge for fixed operands.
    pub fn issue_math_with(&self, a: u8, b: u8) -> MathChallenge {
        let expires_at = self.expiry();
        let token = self.seal(expires_at, ChallengeKind::Math, &format!("{a},{b}"));
        MathChallenge { a, b, token, expires_at }
    }

    /// Issue a picture challenge with a shuffled option list.
    pub fn issue_image(&self) -> ImageChallenge {
        let mut rng = rand::rng();
        let picked = &IMAGE_PROMPTS[rng.random_range(0..IMAGE_PROMPTS.len())];
        let mut options: Vec<String> = IMAGE_OPTIONS.iter().map(|o| o.to_string()).collect();
        options.shuffle(&mut rng);

        let expires_at = self.expiry();
        let token = self.seal(expires_at, ChallengeKind::Image, picked.correct);
        ImageChallenge { prompt: picked.prompt.to_string(), options, token, expires_at }
    }

    /// Verify `answer` against `token` for the endpoint of `kind`.
    ///
    /// Checks run in order: encoding, signature, kind, expiry, answer. A token is
    /// accepted only strictly before its expiry second.
    pub fn verify(
        &self,
        token: &str,
        kind: ChallengeKind,
        answer: &str,
    ) -> Result<(), ChallengeError> {
        let claims = self.open(token).map_err(ChallengeError::new)?;
        if claims.kind != kind {
            return Err(ChallengeError::new(RejectReason::KindMismatch));
        }
        if self.clock.now_unix() >= claims.expires_at {
            return Err(ChallengeError::new(RejectReason::Expired));
        }

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(ChallengeError::new(RejectReason::MissingAnswer));
        }

        let correct = match kind {
            ChallengeKind::Math => {
                let expected = math_sum(&claims.data)?;
                answer.parse::<i64>().map(|given| given == expected).unwrap_or(false)
            }
            ChallengeKind::Image => answer.to_lowercase() == claims.data.to_lowercase(),
        };
        if correct {
            Ok(())
        } else {
            Err(ChallengeError::new(RejectReason::WrongAnswer))
        }
    }

    /// Verify a math and an image answer together; both must pass.
    pub fn verify_pair(
        &self,
        math: &ChallengeAnswer,
        image: &ChallengeAnswer,
    ) -> Result<(), ChallengeError> {
        self.verify(&math.token, ChallengeKind::Math, &math.answer)?;
        self.verify(&image.token, ChallengeKind::Image, &image.answer)
    }

    fn expiry(&self) -> i64 {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        self.clock.now_unix().saturating_add(ttl)
    }

    fn seal(&self, expires_at: i64, kind: ChallengeKind, data: &str) -> String {
        let payload = format!("{expires_at}|{kind}|{data}");
        let mut mac = self.keyed.clone();
        mac.update(payload.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        URL_SAFE_NO_PAD.encode(format!("{payload}|{sig}"))
    }

    fn open(&self, token: &str) -> Result<Claims, RejectReason> {
        let raw = URL_SAFE_NO_PAD.decode(token.trim()).map_err(|_| RejectReason::Malformed)?;
        let raw = String::from_utf8(raw).map_err(|_| RejectReason::Malformed)?;
        let (payload, sig) = raw.rsplit_once('|').ok_or(RejectReason::Malformed)?;
        let sig = URL_SAFE_NO_PAD.decode(sig).map_err(|_| RejectReason::Malformed)?;

        // Signature first: nothing inside an unauthenticated payload is trusted.
        let mut mac = self.keyed.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).map_err(|_| RejectReason::Signature)?;

        let mut fields = payload.splitn(3, '|');
        let (Some(exp), Some(kind), Some(data)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(RejectReason::Malformed);
        };
        let expires_at = exp.parse::<i64>().map_err(|_| RejectReason::Malformed)?;
        let kind = kind.parse::<ChallengeKind>().map_err(|_| RejectReason::Malformed)?;
        Ok(Claims { expires_at, kind, data: data.to_string() })
    }
}

/// A token together with the caller's answer to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeAnswer {
    pub token: String,
    pub answer: String,
}

impl ChallengeAnswer {
    pub fn new(token: impl Into<String>, answer: impl Into<String>) -> Self {
        Self { token: token.into(), answer: answer.into() }
    }
}

struct Claims {
    expires_at: i64,
    kind: ChallengeKind,
    data: String,
}

fn math_sum(data: &str) -> Result<i64, ChallengeError> {
    let malformed = || ChallengeError::new(RejectReason::Malformed);
    let (a, b) = data.split_once(',').ok_or_else(malformed)?;
    let a = a.parse::<i64>().map_err(|_| malformed())?;
    let b = b.parse::<i64>().map_err(|_| malformed())?;
    Ok(a + b)
}
