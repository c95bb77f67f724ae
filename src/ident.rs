//! Ticket numbers, redemption codes and record ids.
//!
//! Ticket numbers come from one process-wide atomic counter, so they are
//! pairwise distinct and follow issuance order across every resource. The
//! counter value `n` renders as `PPP-DDD`: `PPP` is `n / 1000` written in base
//! 24 over [`TICKET_ALPHABET`] (most significant letter first) and `DDD` is
//! `n % 1000`. Because the alphabet is in ascending order, plain string order
//! equals issuance order for the first [`TICKET_NUMBER_SPAN`] numbers.

use rand::rngs::OsRng;
use rand::TryRngCore;
use std::sync::atomic::{AtomicU64, Ordering};

/// Letters used for the ticket-number prefix; `I` and `O` are left out.
pub const TICKET_ALPHABET: &[u8; 24] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Random bytes behind one redemption code (two hex characters each).
pub const CODE_BYTES: usize = 3;

const SUFFIX_SPAN: u64 = 1_000;
const PREFIX_SPAN: u64 = 24 * 24 * 24;

/// Count of distinct ticket numbers before the format wraps.
pub const TICKET_NUMBER_SPAN: u64 = PREFIX_SPAN * SUFFIX_SPAN;

/// Minting failed. Fatal to the request that hit it, nothing else.
#[derive(thiserror::Error, Debug)]
pub enum IdentError {
    #[error("randomness source failed: {0}")]
    Randomness(#[from] rand::rand_core::OsError),
    #[error("ticket number space exhausted after {issued} numbers")]
    Exhausted { issued: u64 },
}

/// Mints ticket numbers, redemption codes and record ids.
#[derive(Debug)]
pub struct IdentifierGenerator {
    counter: AtomicU64,
    code_bytes: usize,
}

impl Default for IdentifierGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifierGenerator {
    /// Start numbering at 1.
    pub fn new() -> Self {
        Self::resume_after(0)
    }

    /// Continue numbering after `last`, e.g. the highest sequence already persisted.
    pub fn resume_after(last: u64) -> Self {
        Self { counter: AtomicU64::new(last), code_bytes: CODE_BYTES }
    }

    /// Use `bytes` random bytes per redemption code instead of [`CODE_BYTES`].
    pub fn with_code_bytes(mut self, bytes: usize) -> Self {
        self.code_bytes = bytes.max(1);
        self
    }

    /// Number of ticket numbers handed out so far (including any resumed offset).
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Next ticket number, e.g. `AAA-001`.
    ///
    /// The last number is `ZZZ-999` (sequence `TICKET_NUMBER_SPAN - 1`). Past
    /// it every call fails with [`IdentError::Exhausted`] rather than reusing
    /// a number.
    pub fn next_ticket_number(&self) -> Result<String, IdentError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        if n >= TICKET_NUMBER_SPAN {
            return Err(IdentError::Exhausted { issued: TICKET_NUMBER_SPAN - 1 });
        }
        Ok(format_ticket_number(n))
    }

    /// Next redemption code: upper-case hex of fresh OS randomness.
    ///
    /// No uniqueness check is made against codes already issued.
    pub fn next_redemption_code(&self) -> Result<String, IdentError> {
        let mut buf = vec![0u8; self.code_bytes];
        OsRng.try_fill_bytes(&mut buf)?;
        Ok(hex::encode_upper(buf))
    }

    /// Opaque, globally unique record id.
    pub fn next_record_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Render sequence value `n` as a ticket number.
pub fn format_ticket_number(n: u64) -> String {
    let mut high = (n / SUFFIX_SPAN) % PREFIX_SPAN;
    let mut prefix = [b'A'; 3];
    for slot in prefix.iter_mut().rev() {
        *slot = TICKET_ALPHABET[(high % 24) as usize];
        high /= 24;
    }
    let prefix: String = prefix.iter().map(|&b| b as char).collect();
    format!("{prefix}-{:03}", n % SUFFIX_SPAN)
}

/// Recover the sequence value (modulo [`TICKET_NUMBER_SPAN`]) from a ticket number.
pub fn decode_ticket_number(number: &str) -> Option<u64> {
    let (prefix, suffix) = number.split_once('-')?;
    if prefix.len() != 3 || suffix.len() != 3 || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut high = 0u64;
    for letter in prefix.bytes() {
        let digit = TICKET_ALPHABET.iter().position(|&l| l == letter)?;
        high = high * 24 + digit as u64;
    }
    let low: u64 = suffix.parse().ok()?;
    Some(high * SUFFIX_SPAN + low)
}
