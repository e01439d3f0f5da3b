use anyhow::Result;
use huddle_server::{api, db, state};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let config = state::Config::load()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "huddle_server=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Huddle server...");
    if config.uses_dev_secret() {
        tracing::warn!("JWT_SECRET not set, using default (insecure for production!)");
    }

    // Initialize database
    let db_pool = db::init_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;

    // Create application state
    let state = state::AppState::new(config.clone(), db_pool);

    // Build the router
    let app = api::create_router(state);

    // Start the server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
