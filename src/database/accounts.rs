use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::user::{Account, NewAccount, NewProfile};

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn email_exists(&self, email: &str) -> Result<bool>;

    /// Writes the user row and its role profile together; either both land or neither.
    async fn create_account(&self, account: NewAccount) -> Result<Account>;

    async fn ping(&self) -> Result<()>;
}

fn map_insert_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::conflict("An account with this email already exists.")
        }
        _ => AppError::Database(err),
    }
}

#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn email_exists(&self, email: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO users (id, name, email, password_hash, role, email_verified) \
             VALUES ($1, $2, $3, $4, $5, TRUE) \
             RETURNING created_at",
        )
        .bind(id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.role.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(map_insert_error)?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;

        match &account.profile {
            NewProfile::Organization {
                organization_name,
                phone,
                website,
            } => {
                sqlx::query(
                    "INSERT INTO organization_profiles (user_id, organization_name, phone, website) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(id)
                .bind(organization_name)
                .bind(phone)
                .bind(website)
                .execute(&mut *tx)
                .await?;
            }
            NewProfile::Freelancer { phone, headline } => {
                sqlx::query(
                    "INSERT INTO freelancer_profiles (user_id, phone, headline) VALUES ($1, $2, $3)",
                )
                .bind(id)
                .bind(phone)
                .bind(headline)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        tracing::info!("Created {} account {}", account.role.as_str(), id);

        Ok(Account {
            id,
            name: account.name,
            email: account.email,
            role: account.role,
            email_verified: true,
            created_at,
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
