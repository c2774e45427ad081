use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};

use crate::errors::{AppError, Result};
use crate::models::otp::{normalize_email, otp_ttl, OtpRecord, VerifyOutcome, MAX_OTP_ATTEMPTS};
use crate::services::clock::{Clock, SystemClock};
use crate::services::otp_store::OtpStore;

const DEFAULT_NAMESPACE: &str = "otp";

// Keys outlive expires_at by this much so a late submission still reads as
// expired instead of missing.
const EXPIRY_GRACE_MS: i64 = 60_000;

// Outcome codes returned by VERIFY_SCRIPT.
const OUTCOME_NOT_FOUND: i64 = 0;
const OUTCOME_VERIFIED: i64 = 1;
const OUTCOME_EXPIRED: i64 = 2;
const OUTCOME_TOO_MANY: i64 = 3;
const OUTCOME_MISMATCH: i64 = 4;

// KEYS[1] record hash, KEYS[2] verified marker, ARGV[1] submitted code,
// ARGV[2] now (ms), ARGV[3] max attempts, ARGV[4] marker TTL (ms, 0 = no marker)
const VERIFY_SCRIPT: &str = r#"
local code = redis.call('HGET', KEYS[1], 'code')
if not code then
  return {0, 0}
end
local max = tonumber(ARGV[3])
if tonumber(ARGV[2]) >= tonumber(redis.call('HGET', KEYS[1], 'expires_at')) then
  redis.call('DEL', KEYS[1])
  return {2, 0}
end
if tonumber(redis.call('HGET', KEYS[1], 'attempts')) >= max then
  redis.call('DEL', KEYS[1])
  return {3, 0}
end
if code == ARGV[1] then
  redis.call('DEL', KEYS[1])
  local marker_ttl = tonumber(ARGV[4])
  if marker_ttl > 0 then
    redis.call('SET', KEYS[2], '1', 'PX', marker_ttl)
  end
  return {1, 0}
end
local attempts = redis.call('HINCRBY', KEYS[1], 'attempts', 1)
if attempts >= max then
  redis.call('DEL', KEYS[1])
  return {4, 0}
end
return {4, max - attempts}
"#;

// KEYS[1] record hash, ARGV[1] max attempts
const FAIL_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
local max = tonumber(ARGV[1])
local attempts = redis.call('HINCRBY', KEYS[1], 'attempts', 1)
if attempts >= max then
  redis.call('DEL', KEYS[1])
  return 0
end
return max - attempts
"#;

fn store_key(namespace: &str, kind: &str, email: &str) -> String {
    format!("{}:{}:{}", namespace, kind, normalize_email(email))
}

fn outcome_from_script(status: i64, remaining: i64) -> Result<VerifyOutcome> {
    match status {
        OUTCOME_NOT_FOUND => Ok(VerifyOutcome::NotFound),
        OUTCOME_VERIFIED => Ok(VerifyOutcome::Verified),
        OUTCOME_EXPIRED => Ok(VerifyOutcome::Expired),
        OUTCOME_TOO_MANY => Ok(VerifyOutcome::TooManyAttempts),
        OUTCOME_MISMATCH => Ok(VerifyOutcome::Mismatch {
            remaining: u32::try_from(remaining).unwrap_or(0),
        }),
        other => Err(AppError::redis(format!("Unexpected verify outcome {}", other))),
    }
}

fn millis_to_datetime(ms: &str) -> Result<DateTime<Utc>> {
    let ms: i64 = ms
        .parse()
        .map_err(|_| AppError::redis(format!("Invalid timestamp in OTP record: {}", ms)))?;
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| AppError::redis(format!("Timestamp out of range in OTP record: {}", ms)))
}

fn record_from_hash(email: String, mut fields: HashMap<String, String>) -> Result<Option<OtpRecord>> {
    if fields.is_empty() {
        return Ok(None);
    }

    let mut take = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| AppError::redis(format!("OTP record missing field '{}'", name)))
    };

    let code = take("code")?;
    let attempts = take("attempts")?
        .parse::<u32>()
        .map_err(|e| AppError::redis(format!("Invalid attempts in OTP record: {}", e)))?;
    let created_at = millis_to_datetime(&take("created_at")?)?;
    let expires_at = millis_to_datetime(&take("expires_at")?)?;

    Ok(Some(OtpRecord {
        email,
        code,
        attempts,
        created_at,
        expires_at,
    }))
}

/// Redis-backed store for deployments running several instances. Records are
/// hashes under `<namespace>:code:<email>` with a key TTL, so expired codes
/// disappear without a sweep. Verified markers live under
/// `<namespace>:verified:<email>`.
pub struct RedisOtpStore {
    conn: MultiplexedConnection,
    clock: Arc<dyn Clock>,
    namespace: String,
    verify_script: Script,
    fail_script: Script,
}

impl RedisOtpStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        Self::connect_with_clock(redis_url, Arc::new(SystemClock)).await
    }

    pub async fn connect_with_clock(redis_url: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        tracing::info!("✅ Connected to Redis OTP store");

        Ok(Self {
            conn,
            clock,
            namespace: DEFAULT_NAMESPACE.to_string(),
            verify_script: Script::new(VERIFY_SCRIPT),
            fail_script: Script::new(FAIL_SCRIPT),
        })
    }

    #[cfg(test)]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn code_key(&self, email: &str) -> String {
        store_key(&self.namespace, "code", email)
    }

    fn verified_key(&self, email: &str) -> String {
        store_key(&self.namespace, "verified", email)
    }

    fn key_ttl_ms(&self) -> i64 {
        otp_ttl().num_milliseconds() + EXPIRY_GRACE_MS
    }

    async fn run_verify(&self, email: &str, code: &str, marker_ttl_ms: i64) -> Result<VerifyOutcome> {
        let mut conn = self.conn.clone();
        let (status, remaining): (i64, i64) = self
            .verify_script
            .key(self.code_key(email))
            .key(self.verified_key(email))
            .arg(code)
            .arg(self.clock.now().timestamp_millis())
            .arg(MAX_OTP_ATTEMPTS)
            .arg(marker_ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        outcome_from_script(status, remaining)
    }

    async fn scan_keys(&self, pattern: String) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }
}

#[async_trait]
impl OtpStore for RedisOtpStore {
    async fn issue(&self, email: &str, code: &str) -> Result<OtpRecord> {
        let record = OtpRecord::new(normalize_email(email), code.to_string(), self.clock.now());
        let key = self.code_key(email);
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .del(&key)
            .del(self.verified_key(email))
            .hset_multiple(
                &key,
                &[
                    ("code", record.code.clone()),
                    ("attempts", "0".to_string()),
                    ("created_at", record.created_at.timestamp_millis().to_string()),
                    ("expires_at", record.expires_at.timestamp_millis().to_string()),
                ],
            )
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(self.key_ttl_ms())
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(record)
    }

    async fn lookup(&self, email: &str) -> Result<Option<OtpRecord>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(self.code_key(email)).await?;
        let record = record_from_hash(normalize_email(email), fields)?;

        Ok(record.filter(|r| !r.is_expired(self.clock.now())))
    }

    async fn record_failed_attempt(&self, email: &str) -> Result<u32> {
        let mut conn = self.conn.clone();
        let remaining: i64 = self
            .fail_script
            .key(self.code_key(email))
            .arg(MAX_OTP_ATTEMPTS)
            .invoke_async(&mut conn)
            .await?;

        Ok(u32::try_from(remaining).unwrap_or(0))
    }

    async fn consume(&self, email: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.code_key(email)).await?;
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<()> {
        // Key TTLs evict expired records.
        Ok(())
    }

    async fn verify(&self, email: &str, code: &str) -> Result<VerifyOutcome> {
        self.run_verify(email, code, 0).await
    }

    async fn verify_and_mark(&self, email: &str, code: &str) -> Result<VerifyOutcome> {
        self.run_verify(email, code, otp_ttl().num_milliseconds()).await
    }

    async fn clear(&self, email: Option<&str>) -> Result<usize> {
        let mut conn = self.conn.clone();

        if let Some(email) = email {
            let removed: usize = conn.del(self.code_key(email)).await?;
            conn.del::<_, ()>(self.verified_key(email)).await?;
            return Ok(removed);
        }

        let codes = self.scan_keys(store_key(&self.namespace, "code", "*")).await?;
        let markers = self.scan_keys(store_key(&self.namespace, "verified", "*")).await?;

        if !markers.is_empty() {
            conn.del::<_, ()>(&markers).await?;
        }
        if codes.is_empty() {
            return Ok(0);
        }
        let removed: usize = conn.del(&codes).await?;
        Ok(removed)
    }

    async fn take_verified(&self, email: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let marker: Option<String> = redis::cmd("GETDEL")
            .arg(self.verified_key(email))
            .query_async(&mut conn)
            .await?;
        Ok(marker.is_some())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
