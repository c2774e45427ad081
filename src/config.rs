// config.rs
use std::env;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "development" | "dev" | "local" | "test" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(AppError::configuration(format!("Unknown APP_ENV: {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub redis_url: Option<String>,
    pub email_api_key: String,
    pub email_from: String,
    pub email_api_base_url: String,
    pub otp_debug: bool,
    pub debug_routes: bool,
}

fn parse_bool(name: &str, value: Option<String>) -> Result<bool> {
    match value.as_deref().map(|v| v.trim().to_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "" | "0" | "false" | "no" | "off" => Ok(false),
            "1" | "true" | "yes" | "on" => Ok(true),
            other => Err(AppError::configuration(format!("{} must be a boolean, got '{}'", name, other))),
        },
    }
}

fn required(name: &str) -> Result<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::configuration(format!("{} must be set", name)))
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let environment = Environment::parse(&env::var("APP_ENV").unwrap_or_default())?;

        let port = match env::var("PORT") {
            Ok(port) => port
                .trim()
                .parse()
                .map_err(|_| AppError::configuration(format!("PORT must be a number, got '{}'", port)))?,
            Err(_) => 10000,
        };

        Ok(AppConfig {
            environment,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            email_api_key: required("EMAIL_API_KEY")?,
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Training Marketplace <no-reply@localhost>".to_string()),
            email_api_base_url: env::var("EMAIL_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.resend.com".to_string()),
            otp_debug: parse_bool("OTP_DEBUG", env::var("OTP_DEBUG").ok())?,
            debug_routes: parse_bool("DEBUG_ROUTES", env::var("DEBUG_ROUTES").ok())?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Raw codes in issuance responses. Never on in production.
    pub fn expose_otp(&self) -> bool {
        self.otp_debug && !self.is_production()
    }

    /// The OTP cleanup endpoint. Never mounted in production.
    pub fn debug_routes_enabled(&self) -> bool {
        self.debug_routes && !self.is_production()
    }

    pub fn get_config_info(&self) -> serde_json::Value {
        serde_json::json!({
            "environment": self.environment.as_str(),
            "host": self.host,
            "port": self.port,
            "otp_store": if self.redis_url.is_some() { "redis" } else { "memory" },
            "email_api_base_url": self.email_api_base_url,
            "email_api_key_set": !self.email_api_key.is_empty(),
            "expose_otp": self.expose_otp(),
            "debug_routes": self.debug_routes_enabled(),
        })
    }
}

#[cfg(test)]
pub fn test_config() -> AppConfig {
    AppConfig {
        environment: Environment::Development,
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: "postgres://localhost/marketplace_test".to_string(),
        redis_url: None,
        email_api_key: "test-key".to_string(),
        email_from: "Training Marketplace <no-reply@test.local>".to_string(),
        email_api_base_url: "http://localhost".to_string(),
        otp_debug: false,
        debug_routes: false,
    }
}
