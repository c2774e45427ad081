use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const OTP_TTL_MINUTES: i64 = 10;
pub const MAX_OTP_ATTEMPTS: u32 = 3;

pub fn otp_ttl() -> Duration {
    Duration::minutes(OTP_TTL_MINUTES)
}

/// Store key for an email: surrounding whitespace dropped, lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OtpRecord {
    pub email: String,
    pub code: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OtpRecord {
    pub fn new(email: String, code: String, now: DateTime<Utc>) -> Self {
        Self {
            email,
            code,
            attempts: 0,
            created_at: now,
            expires_at: now + otp_ttl(),
        }
    }

    /// A record stops being valid at `expires_at` itself.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn remaining_attempts(&self) -> u32 {
        MAX_OTP_ATTEMPTS.saturating_sub(self.attempts)
    }
}

/// Result of one atomic verification step against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    NotFound,
    Expired,
    TooManyAttempts,
    Mismatch { remaining: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_lowercases_and_trims() {
        assert_eq!(normalize_email("  User@Co.COM "), "user@co.com");
    }

    #[test]
    fn new_record_expires_after_window() {
        let now = Utc::now();
        let record = OtpRecord::new("a@b.co".into(), "123456".into(), now);

        assert_eq!(record.attempts, 0);
        assert_eq!(record.expires_at - record.created_at, Duration::minutes(10));
        assert!(!record.is_expired(now + Duration::minutes(10) - Duration::milliseconds(1)));
        assert!(record.is_expired(now + Duration::minutes(10)));
        assert_eq!(record.remaining_attempts(), 3);
    }
}
