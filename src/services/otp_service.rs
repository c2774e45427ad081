use std::sync::Arc;

use rand::Rng;

use crate::errors::{OtpError, Result};
use crate::models::otp::{normalize_email, OtpRecord, VerifyOutcome};
use crate::services::email_service::EmailService;
use crate::services::otp_store::OtpStore;

/// Result of an issuance request. The record is kept even when delivery
/// fails, so a resend simply goes through issuance again.
pub struct IssuedOtp {
    pub record: OtpRecord,
    pub delivery: std::result::Result<String, crate::errors::DeliveryError>,
}

#[derive(Clone)]
pub struct OTPService {
    store: Arc<dyn OtpStore>,
    email: EmailService,
}

impl OTPService {
    pub fn new(store: Arc<dyn OtpStore>, email: EmailService) -> Self {
        Self { store, email }
    }

    // 6-digit code, uniform over 100000..=999999
    pub fn generate_otp() -> String {
        let mut rng = rand::thread_rng();
        rng.gen_range(100_000..=999_999).to_string()
    }

    pub fn store(&self) -> &Arc<dyn OtpStore> {
        &self.store
    }

    pub async fn issue_otp(&self, email: &str) -> Result<IssuedOtp> {
        let email = normalize_email(email);
        let code = Self::generate_otp();

        self.store.sweep_expired().await?;
        let record = self.store.issue(&email, &code).await?;
        tracing::info!("Issued verification code for {} (expires {})", email, record.expires_at);

        let delivery = self.email.send_verification_code(&email, &code).await;
        match &delivery {
            Ok(id) => tracing::info!("Verification email sent to {} (id {})", email, id),
            Err(e) => tracing::warn!("Verification email to {} failed: {}", email, e),
        }

        Ok(IssuedOtp { record, delivery })
    }

    /// Checks `code` against the pending record for `email` and consumes it on
    /// success. Both the verify endpoint and registration go through here. The
    /// code is compared exactly as submitted.
    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<()> {
        let email = normalize_email(email);

        // The store sweeps other keys itself; this key is checked first so an
        // expired code is reported as expired.
        let outcome = self.store.verify(&email, code).await?;
        Self::check_outcome(&email, outcome)
    }

    /// Verifies and, in the same store step, leaves a short-lived marker that
    /// registration can redeem.
    pub async fn verify_and_mark(&self, email: &str, code: &str) -> Result<()> {
        let email = normalize_email(email);
        let outcome = self.store.verify_and_mark(&email, code).await?;
        Self::check_outcome(&email, outcome)
    }

    fn check_outcome(email: &str, outcome: VerifyOutcome) -> Result<()> {
        match outcome {
            VerifyOutcome::Verified => {
                tracing::info!("Verification code accepted for {}", email);
                Ok(())
            }
            VerifyOutcome::NotFound => Err(OtpError::NotFound.into()),
            VerifyOutcome::Expired => Err(OtpError::Expired.into()),
            VerifyOutcome::TooManyAttempts => Err(OtpError::AttemptsExhausted.into()),
            VerifyOutcome::Mismatch { remaining } => {
                tracing::warn!("Wrong verification code for {} ({} left)", email, remaining);
                Err(OtpError::Mismatch { remaining }.into())
            }
        }
    }

    pub async fn take_verified(&self, email: &str) -> Result<bool> {
        self.store.take_verified(email).await
    }

    pub async fn clear(&self, email: Option<&str>) -> Result<usize> {
        self.store.clear(email).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AppError, DeliveryError};
    use crate::services::clock::ManualClock;
    use crate::services::email_service::testing::RecordingSender;
    use crate::services::otp_store::InMemoryOtpStore;
    use chrono::{Duration, Utc};

    fn service_with(sender: Arc<RecordingSender>) -> (OTPService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(InMemoryOtpStore::with_clock(clock.clone()));
        (OTPService::new(store, EmailService::new(sender)), clock)
    }

    fn code_from(sender: &RecordingSender) -> String {
        let html = sender.last().unwrap().html;
        html.split(|c: char| !c.is_ascii_digit())
            .find(|part| part.len() == 6)
            .unwrap()
            .to_string()
    }

    fn otp_err(result: Result<()>) -> OtpError {
        match result {
            Err(AppError::Otp(e)) => e,
            other => panic!("expected OTP error, got {:?}", other),
        }
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..1000 {
            let code = OTPService::generate_otp();
            assert_eq!(code.len(), 6);
            let n: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&n));
        }
    }

    #[tokio::test]
    async fn issued_code_matches_sent_code() {
        let sender = Arc::new(RecordingSender::default());
        let (service, _) = service_with(sender.clone());

        let issued = service.issue_otp("User@Co.com").await.unwrap();
        assert!(issued.delivery.is_ok());
        assert_eq!(issued.record.email, "user@co.com");
        assert_eq!(issued.record.code, code_from(&sender));
        assert_eq!(sender.last().unwrap().to, "user@co.com");
    }

    #[tokio::test]
    async fn wrong_code_reports_remaining_then_right_code_succeeds() {
        let sender = Arc::new(RecordingSender::default());
        let (service, _) = service_with(sender.clone());

        let issued = service.issue_otp("user@co.com").await.unwrap();
        let wrong = if issued.record.code == "000000" { "111111" } else { "000000" };

        let err = otp_err(service.verify_otp("user@co.com", wrong).await);
        assert_eq!(err.to_string(), "Invalid verification code. 2 attempts remaining.");

        service.verify_otp("user@co.com", &issued.record.code).await.unwrap();
        assert_eq!(
            otp_err(service.verify_otp("user@co.com", &issued.record.code).await),
            OtpError::NotFound
        );
    }

    #[tokio::test]
    async fn second_issue_invalidates_first_code() {
        let sender = Arc::new(RecordingSender::default());
        let (service, _) = service_with(sender);

        let first = service.issue_otp("user@co.com").await.unwrap().record.code;
        let mut second = service.issue_otp("user@co.com").await.unwrap().record.code;
        while second == first {
            second = service.issue_otp("user@co.com").await.unwrap().record.code;
        }

        assert!(matches!(
            otp_err(service.verify_otp("user@co.com", &first).await),
            OtpError::Mismatch { .. }
        ));
        service.verify_otp("user@co.com", &second).await.unwrap();
    }

    #[tokio::test]
    async fn code_fails_as_expired_once_window_has_elapsed() {
        let sender = Arc::new(RecordingSender::default());
        let (service, clock) = service_with(sender);

        let code = service.issue_otp("user@co.com").await.unwrap().record.code;
        clock.advance(Duration::minutes(10));

        assert_eq!(
            otp_err(service.verify_otp("user@co.com", &code).await),
            OtpError::Expired
        );
        assert!(service.store().lookup("user@co.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fourth_attempt_after_three_failures_is_not_found() {
        let sender = Arc::new(RecordingSender::default());
        let (service, _) = service_with(sender);

        let code = service.issue_otp("user@co.com").await.unwrap().record.code;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..3 {
            assert!(matches!(
                otp_err(service.verify_otp("user@co.com", wrong).await),
                OtpError::Mismatch { .. }
            ));
        }
        assert_eq!(
            otp_err(service.verify_otp("user@co.com", &code).await),
            OtpError::NotFound
        );
    }

    #[tokio::test]
    async fn delivery_failure_keeps_the_record() {
        let sender = Arc::new(RecordingSender::failing(DeliveryError::Provider("timeout".into())));
        let (service, _) = service_with(sender);

        let issued = service.issue_otp("user@co.com").await.unwrap();
        assert!(issued.delivery.is_err());

        let stored = service.store().lookup("user@co.com").await.unwrap().unwrap();
        assert_eq!(stored.code, issued.record.code);
    }

    #[tokio::test]
    async fn verify_and_mark_leaves_single_use_marker() {
        let sender = Arc::new(RecordingSender::default());
        let (service, _) = service_with(sender);

        let code = service.issue_otp("user@co.com").await.unwrap().record.code;
        service.verify_and_mark("User@co.com", &code).await.unwrap();

        assert!(service.take_verified("user@co.com").await.unwrap());
        assert!(!service.take_verified("user@co.com").await.unwrap());
    }

    #[tokio::test]
    async fn padded_code_is_not_accepted() {
        let sender = Arc::new(RecordingSender::default());
        let (service, _) = service_with(sender);

        let code = service.issue_otp("user@co.com").await.unwrap().record.code;
        assert_eq!(
            otp_err(service.verify_otp("user@co.com", &format!(" {} ", code)).await),
            OtpError::Mismatch { remaining: 2 }
        );
        service.verify_otp("user@co.com", &code).await.unwrap();
    }

    #[tokio::test]
    async fn failed_verify_and_mark_leaves_no_marker() {
        let sender = Arc::new(RecordingSender::default());
        let (service, _) = service_with(sender);

        let code = service.issue_otp("user@co.com").await.unwrap().record.code;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        assert!(service.verify_and_mark("user@co.com", wrong).await.is_err());
        assert!(!service.take_verified("user@co.com").await.unwrap());

        // A reissue after marking withdraws the earlier proof.
        service.verify_and_mark("user@co.com", &code).await.unwrap();
        service.issue_otp("user@co.com").await.unwrap();
        assert!(!service.take_verified("user@co.com").await.unwrap());
    }
}
