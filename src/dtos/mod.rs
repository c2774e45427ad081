pub mod auth_dtos;
pub mod otp_dtos;
