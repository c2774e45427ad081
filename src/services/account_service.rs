use std::sync::Arc;

use bcrypt::{hash, DEFAULT_COST};
use validator::Validate;

use crate::database::accounts::AccountRepository;
use crate::dtos::auth_dtos::RegisterRequest;
use crate::errors::{AppError, OtpError, Result};
use crate::models::otp::normalize_email;
use crate::models::user::{Account, NewAccount, NewProfile, Role};
use crate::services::otp_service::OTPService;

/// Consumer mail providers that organizations may not register with.
const PERSONAL_EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "yahoo.co.in",
    "yahoo.co.uk",
    "ymail.com",
    "hotmail.com",
    "outlook.com",
    "live.com",
    "msn.com",
    "aol.com",
    "icloud.com",
    "me.com",
    "mac.com",
    "protonmail.com",
    "proton.me",
    "gmx.com",
    "mail.com",
    "zoho.com",
    "yandex.com",
    "rediffmail.com",
];

pub fn is_personal_email_domain(email: &str) -> bool {
    email
        .rsplit_once('@')
        .map(|(_, domain)| {
            let domain = domain.trim().to_lowercase();
            PERSONAL_EMAIL_DOMAINS.contains(&domain.as_str())
        })
        .unwrap_or(false)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountRepository>,
    otp: OTPService,
    bcrypt_cost: u32,
}

impl AccountService {
    pub fn new(accounts: Arc<dyn AccountRepository>, otp: OTPService) -> Self {
        Self {
            accounts,
            otp,
            bcrypt_cost: DEFAULT_COST,
        }
    }

    #[cfg(test)]
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    pub async fn ping(&self) -> Result<()> {
        self.accounts.ping().await
    }

    /// Checks that `email` has passed OTP verification, either inline with the
    /// submitted code or through a marker left by the verify endpoint.
    async fn ensure_email_verified(&self, email: &str, req: &RegisterRequest) -> Result<()> {
        if req.is_otp_verified {
            return match self.otp.take_verified(email).await? {
                true => Ok(()),
                false => Err(AppError::VerificationRequired),
            };
        }

        let otp = match req.otp.as_deref() {
            Some(otp) if !otp.trim().is_empty() => otp,
            _ => return Err(AppError::VerificationRequired),
        };

        match self.otp.verify_otp(email, otp).await {
            Err(AppError::Otp(OtpError::NotFound)) => Err(AppError::VerificationRequired),
            other => other,
        }
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<Account> {
        req.validate()?;

        if !req.role.is_self_service() {
            return Err(AppError::invalid_data(format!(
                "Accounts with the {} role cannot be self-registered",
                req.role.as_str()
            )));
        }

        let organization_name = non_empty(req.organization_name.clone());
        if req.role == Role::Organization && organization_name.is_none() {
            return Err(AppError::invalid_data("Organization name is required"));
        }

        let email = normalize_email(&req.email);
        self.ensure_email_verified(&email, &req).await?;

        if req.role == Role::Organization && is_personal_email_domain(&email) {
            return Err(AppError::PersonalEmailDomain);
        }

        if self.accounts.email_exists(&email).await? {
            return Err(AppError::conflict("An account with this email already exists."));
        }

        let password = req.password.clone();
        let cost = self.bcrypt_cost;
        let password_hash = tokio::task::spawn_blocking(move || hash(password, cost))
            .await
            .map_err(|e| AppError::internal(format!("Password hashing task failed: {}", e)))??;

        let profile = match req.role {
            Role::Organization => NewProfile::Organization {
                organization_name: organization_name.unwrap_or_default(),
                phone: non_empty(req.phone),
                website: non_empty(req.website),
            },
            _ => NewProfile::Freelancer {
                phone: non_empty(req.phone),
                headline: non_empty(req.headline),
            },
        };

        self.accounts
            .create_account(NewAccount {
                name: req.name.trim().to_string(),
                email,
                password_hash,
                role: req.role,
                profile,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::accounts::testing::InMemoryAccountRepository;
    use crate::services::email_service::testing::RecordingSender;
    use crate::services::email_service::EmailService;
    use crate::services::otp_store::InMemoryOtpStore;

    const TEST_COST: u32 = 4;

    fn setup() -> (AccountService, OTPService, Arc<InMemoryAccountRepository>) {
        let store = Arc::new(InMemoryOtpStore::new());
        let otp = OTPService::new(store, EmailService::new(Arc::new(RecordingSender::default())));
        let repo = Arc::new(InMemoryAccountRepository::default());
        let service = AccountService::new(repo.clone(), otp.clone()).with_bcrypt_cost(TEST_COST);
        (service, otp, repo)
    }

    fn organization_request(email: &str, otp: Option<String>, verified: bool) -> RegisterRequest {
        RegisterRequest {
            name: "Ada Lovelace".into(),
            email: email.into(),
            password: "correct-horse".into(),
            role: Role::Organization,
            organization_name: Some("Analytical Engines Ltd".into()),
            phone: None,
            website: None,
            headline: None,
            otp,
            is_otp_verified: verified,
        }
    }

    #[test]
    fn personal_domains_are_detected() {
        assert!(is_personal_email_domain("someone@gmail.com"));
        assert!(is_personal_email_domain("someone@Outlook.COM"));
        assert!(!is_personal_email_domain("someone@acme.io"));
        assert!(!is_personal_email_domain("not-an-email"));
    }

    #[tokio::test]
    async fn registration_without_code_requires_verification() {
        let (service, _, repo) = setup();

        let err = service
            .register(organization_request("user@co.com", None, false))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email verification required.");

        let err = service
            .register(organization_request("user@co.com", Some("123456".into()), false))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email verification required.");
        assert_eq!(repo.count(), 0);
    }

    #[tokio::test]
    async fn registration_with_inline_code_creates_account() {
        let (service, otp, repo) = setup();
        let code = otp.issue_otp("Founder@Acme.io").await.unwrap().record.code;

        let account = service
            .register(organization_request("founder@acme.io", Some(code.clone()), false))
            .await
            .unwrap();

        assert_eq!(account.email, "founder@acme.io");
        assert_eq!(account.role, Role::Organization);
        assert!(account.email_verified);
        assert_eq!(repo.count(), 1);

        let stored = repo.password_hash("founder@acme.io").unwrap();
        assert!(bcrypt::verify("correct-horse", &stored).unwrap());

        // The code was consumed by registration.
        assert!(otp.verify_otp("founder@acme.io", &code).await.is_err());
    }

    #[tokio::test]
    async fn pre_verified_flag_needs_verify_endpoint_marker() {
        let (service, otp, _) = setup();

        let err = service
            .register(organization_request("founder@acme.io", None, true))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::VerificationRequired));

        let code = otp.issue_otp("founder@acme.io").await.unwrap().record.code;
        otp.verify_and_mark("founder@acme.io", &code).await.unwrap();

        service
            .register(organization_request("founder@acme.io", None, true))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wrong_inline_code_surfaces_mismatch() {
        let (service, otp, _) = setup();
        otp.issue_otp("founder@acme.io").await.unwrap();

        let err = service
            .register(organization_request("founder@acme.io", Some("000000".into()), false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Otp(OtpError::Mismatch { remaining: 2 })));
    }

    #[tokio::test]
    async fn inline_code_must_match_exactly() {
        let (service, otp, repo) = setup();
        let code = otp.issue_otp("founder@acme.io").await.unwrap().record.code;

        let err = service
            .register(organization_request("founder@acme.io", Some(format!("{} ", code)), false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Otp(OtpError::Mismatch { remaining: 2 })));

        let err = service
            .register(organization_request("founder@acme.io", Some("   ".into()), false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::VerificationRequired));
        assert_eq!(repo.count(), 0);
    }

    #[tokio::test]
    async fn organizations_cannot_use_personal_email() {
        let (service, otp, repo) = setup();
        let code = otp.issue_otp("founder@gmail.com").await.unwrap().record.code;

        let err = service
            .register(organization_request("founder@gmail.com", Some(code), false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PersonalEmailDomain));
        assert_eq!(repo.count(), 0);
    }

    #[tokio::test]
    async fn freelancers_may_use_personal_email() {
        let (service, otp, _) = setup();
        let code = otp.issue_otp("dev@gmail.com").await.unwrap().record.code;

        let mut req = organization_request("dev@gmail.com", Some(code), false);
        req.role = Role::Freelancer;
        req.organization_name = None;
        req.headline = Some("Rust trainer".into());

        let account = service.register(req).await.unwrap();
        assert_eq!(account.role, Role::Freelancer);
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let (service, otp, _) = setup();

        let code = otp.issue_otp("founder@acme.io").await.unwrap().record.code;
        service
            .register(organization_request("founder@acme.io", Some(code), false))
            .await
            .unwrap();

        let code = otp.issue_otp("founder@acme.io").await.unwrap().record.code;
        let err = service
            .register(organization_request("founder@acme.io", Some(code), false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn internal_roles_and_missing_fields_are_rejected() {
        let (service, _, _) = setup();

        let mut req = organization_request("ops@acme.io", None, false);
        req.role = Role::Admin;
        assert!(matches!(
            service.register(req).await.unwrap_err(),
            AppError::ValidationError(_)
        ));

        let mut req = organization_request("ops@acme.io", None, false);
        req.organization_name = Some("   ".into());
        assert!(matches!(
            service.register(req).await.unwrap_err(),
            AppError::ValidationError(msg) if msg == "Organization name is required"
        ));

        let mut req = organization_request("ops@acme.io", None, false);
        req.password = "short".into();
        assert!(matches!(
            service.register(req).await.unwrap_err(),
            AppError::ValidationError(msg) if msg.contains("at least 8 characters")
        ));
    }
}
