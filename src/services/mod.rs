pub mod account_service;
pub mod clock;
pub mod email_service;
pub mod otp_service;
pub mod otp_store;
pub mod redis_otp_store;
