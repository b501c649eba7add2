//! Agora - community forum backend

use anyhow::Result;
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agora::{
    api::{self, AppState},
    cache::create_cache,
    config::Config,
    db,
    views::ViewEngine,
};

/// How often expired sessions are purged
const SESSION_CLEANUP_INTERVAL_SECS: u64 = 3600;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agora=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Agora...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");
    if config.site.uses_default_secret() {
        tracing::warn!(
            "site.secret is the shipped default; set AGORA_SITE_SECRET so cookies and flood tokens cannot be forged"
        );
    }

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {}", config.database.url);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let cache = create_cache(&config.cache);
    let views = ViewEngine::new(config.views.path.as_deref())?;
    tracing::info!("Views loaded");

    let state = AppState::new(&config, pool.clone(), cache, views)?;

    bootstrap_moderator(&state).await?;

    // Purge expired sessions periodically
    {
        let user_service = state.user_service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                SESSION_CLEANUP_INTERVAL_SECS,
            ));
            loop {
                interval.tick().await;
                match user_service.cleanup_expired_sessions().await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!("Removed {} expired sessions", n),
                    Err(e) => tracing::warn!("Session cleanup failed: {}", e),
                }
            }
        });
    }

    // Build router
    let app = api::build_router(state, &config.server.cors_origin);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    Ok(())
}

/// Create the first moderator from `AGORA_ADMIN_NICK` / `AGORA_ADMIN_PASSWORD`
async fn bootstrap_moderator(state: &AppState) -> Result<()> {
    let (Ok(nick), Ok(password)) = (
        std::env::var("AGORA_ADMIN_NICK"),
        std::env::var("AGORA_ADMIN_PASSWORD"),
    ) else {
        return Ok(());
    };

    if state.user_service.get_by_nick(&nick).await?.is_some() {
        return Ok(());
    }

    let user = state.user_service.register(&nick, &password, None).await?;
    state.user_service.grant_moderator(user.id).await?;
    tracing::info!("Created moderator {}", user.nick);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
