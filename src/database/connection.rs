use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::errors::Result;

pub async fn get_db_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("✅ Connected to database and applied migrations");

    Ok(pool)
}
