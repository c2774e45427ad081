use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::errors::Result;
use crate::models::otp::{normalize_email, otp_ttl, OtpRecord, VerifyOutcome, MAX_OTP_ATTEMPTS};
use crate::services::clock::{Clock, SystemClock};

/// Keyed storage for pending verification codes.
///
/// Every method normalizes the email it is given. Implementations must make
/// each call atomic with respect to other calls on the same key, so that two
/// concurrent verifications can neither both succeed nor push the attempt
/// counter past the ceiling.
#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Replaces any pending code for `email` with a fresh record. Callers run
    /// `sweep_expired` beforehand.
    async fn issue(&self, email: &str, code: &str) -> Result<OtpRecord>;

    async fn lookup(&self, email: &str) -> Result<Option<OtpRecord>>;

    /// Counts a wrong submission and returns how many are left. The record is
    /// dropped once the ceiling is reached.
    async fn record_failed_attempt(&self, email: &str) -> Result<u32>;

    async fn consume(&self, email: &str) -> Result<()>;

    async fn sweep_expired(&self) -> Result<()>;

    /// Runs the whole check (presence, expiry, attempt ceiling, comparison,
    /// consume or count) as a single step.
    async fn verify(&self, email: &str, code: &str) -> Result<VerifyOutcome>;

    /// Same as `verify`, and on success leaves a verified marker for `email`
    /// within that same step. The marker lives for one code window.
    async fn verify_and_mark(&self, email: &str, code: &str) -> Result<VerifyOutcome>;

    /// Removes the pending code for `email`, or every code when `None`.
    async fn clear(&self, email: Option<&str>) -> Result<usize>;

    /// Returns whether `email` was recently verified, removing the marker.
    async fn take_verified(&self, email: &str) -> Result<bool>;

    fn backend(&self) -> &'static str;
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, OtpRecord>,
    verified: HashMap<String, DateTime<Utc>>,
}

impl Inner {
    fn sweep(&mut self, now: DateTime<Utc>) {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        self.verified.retain(|_, until| now < *until);

        let swept = before - self.records.len();
        if swept > 0 {
            tracing::debug!("Swept {} expired OTP record(s)", swept);
        }
    }

    fn fail_attempt(&mut self, key: &str) -> u32 {
        let Some(record) = self.records.get_mut(key) else {
            return 0;
        };

        record.attempts = (record.attempts + 1).min(MAX_OTP_ATTEMPTS);
        let remaining = record.remaining_attempts();
        if remaining == 0 {
            self.records.remove(key);
        }
        remaining
    }

    // Expired records are reported as such rather than swept first, so the
    // caller learns why the code stopped working.
    fn check(&mut self, key: &str, code: &str, now: DateTime<Utc>) -> VerifyOutcome {
        let checked = self.records.get(key).map(|record| {
            (
                record.is_expired(now),
                record.attempts >= MAX_OTP_ATTEMPTS,
                record.code == code,
            )
        });
        let Some((expired, exhausted, matches)) = checked else {
            return VerifyOutcome::NotFound;
        };

        if expired {
            self.records.remove(key);
            VerifyOutcome::Expired
        } else if exhausted {
            self.records.remove(key);
            VerifyOutcome::TooManyAttempts
        } else if matches {
            self.records.remove(key);
            VerifyOutcome::Verified
        } else {
            VerifyOutcome::Mismatch {
                remaining: self.fail_attempt(key),
            }
        }
    }
}

/// Process-local store for single-instance deployments.
pub struct InMemoryOtpStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl InMemoryOtpStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }
}

impl Default for InMemoryOtpStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OtpStore for InMemoryOtpStore {
    async fn issue(&self, email: &str, code: &str) -> Result<OtpRecord> {
        let key = normalize_email(email);
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        inner.verified.remove(&key);
        if inner.records.remove(&key).is_some() {
            tracing::debug!("Replacing pending OTP for {}", key);
        }

        let record = OtpRecord::new(key.clone(), code.to_string(), now);
        inner.records.insert(key, record.clone());
        Ok(record)
    }

    async fn lookup(&self, email: &str) -> Result<Option<OtpRecord>> {
        let key = normalize_email(email);
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        inner.sweep(now);
        Ok(inner.records.get(&key).cloned())
    }

    async fn record_failed_attempt(&self, email: &str) -> Result<u32> {
        let key = normalize_email(email);
        let mut inner = self.inner.lock().await;
        Ok(inner.fail_attempt(&key))
    }

    async fn consume(&self, email: &str) -> Result<()> {
        let key = normalize_email(email);
        self.inner.lock().await.records.remove(&key);
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<()> {
        let now = self.clock.now();
        self.inner.lock().await.sweep(now);
        Ok(())
    }

    async fn verify(&self, email: &str, code: &str) -> Result<VerifyOutcome> {
        let key = normalize_email(email);
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let outcome = inner.check(&key, code, now);
        inner.sweep(now);
        Ok(outcome)
    }

    async fn verify_and_mark(&self, email: &str, code: &str) -> Result<VerifyOutcome> {
        let key = normalize_email(email);
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let outcome = inner.check(&key, code, now);
        if outcome == VerifyOutcome::Verified {
            inner.verified.insert(key, now + otp_ttl());
        }
        inner.sweep(now);
        Ok(outcome)
    }

    async fn clear(&self, email: Option<&str>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let cleared = match email {
            Some(email) => {
                let key = normalize_email(email);
                inner.verified.remove(&key);
                usize::from(inner.records.remove(&key).is_some())
            }
            None => {
                let count = inner.records.len();
                inner.records.clear();
                inner.verified.clear();
                count
            }
        };
        Ok(cleared)
    }

    async fn take_verified(&self, email: &str) -> Result<bool> {
        let key = normalize_email(email);
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        Ok(matches!(inner.verified.remove(&key), Some(until) if now < until))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
