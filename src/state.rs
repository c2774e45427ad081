use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::accounts::AccountRepository;
use crate::services::account_service::AccountService;
use crate::services::email_service::{EmailSender, EmailService};
use crate::services::otp_service::OTPService;
use crate::services::otp_store::OtpStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub otp_service: OTPService,
    pub account_service: AccountService,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        otp_store: Arc<dyn OtpStore>,
        email_sender: Arc<dyn EmailSender>,
        accounts: Arc<dyn AccountRepository>,
    ) -> Self {
        let otp_service = OTPService::new(otp_store, EmailService::new(email_sender));
        let account_service = AccountService::new(accounts, otp_service.clone());

        AppState {
            config: Arc::new(config),
            otp_service,
            account_service,
        }
    }

    #[cfg(test)]
    pub fn with_account_service(mut self, account_service: AccountService) -> Self {
        self.account_service = account_service;
        self
    }
}
