use axum::{http::Method, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod config;
mod database;
mod dtos;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::AppConfig;
use database::accounts::PgAccountRepository;
use database::connection::get_db_pool;
use services::email_service::ResendEmailService;
use services::otp_store::{InMemoryOtpStore, OtpStore};
use services::redis_otp_store::RedisOtpStore;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("🌐 Environment: {}", config.environment.as_str());
    tracing::debug!("Config: {}", config.get_config_info());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let app_state = initialize_app_state(config).await?;
    let app = build_router(app_state);
    start_server(app, addr).await
}

async fn initialize_app_state(config: AppConfig) -> anyhow::Result<AppState> {
    let pool = get_db_pool(&config.database_url).await?;
    let accounts = Arc::new(PgAccountRepository::new(pool));

    let otp_store: Arc<dyn OtpStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisOtpStore::connect(url).await?),
        None => {
            tracing::warn!("REDIS_URL not set; OTP codes are kept in process memory");
            Arc::new(InMemoryOtpStore::new())
        }
    };

    let email_sender = Arc::new(ResendEmailService::new(
        config.email_api_key.clone(),
        config.email_from.clone(),
        config.email_api_base_url.clone(),
    ));

    if config.expose_otp() {
        tracing::warn!("⚠️ OTP_DEBUG is on: issued codes are returned in API responses");
    }

    tracing::info!("✅ OTP ({}), email and account services initialized", otp_store.backend());
    Ok(AppState::new(config, otp_store, email_sender, accounts))
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_credentials(false);

    let debug_routes = app_state.config.debug_routes_enabled();

    Router::new()
        .route("/", get(handlers::health::root_handler))
        .route("/health", get(handlers::health::health_check))
        .route("/api/health", get(handlers::health::api_health_check))
        .nest("/api/otp", routes::otp::otp_routes(debug_routes))
        .nest("/api/auth", routes::auth::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("🚀 Server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        e
    })?;
    axum::serve(listener, app).await?;
    Ok(())
}
