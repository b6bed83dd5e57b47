use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use social_feed_service::config::Config;
use social_feed_service::handlers::{self, AppState};
use social_feed_service::store::{PgStore, StoreGateway};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(config.app.json_logs);

    info!("🔧 Starting social-feed-service");
    info!(
        "✅ Configuration loaded: env={}, http_port={}",
        config.app.env, config.app.http_port
    );

    let pg_store = PgStore::connect(&config.database)
        .await
        .context("Failed to connect to database")?;

    pg_store
        .migrate()
        .await
        .context("Failed to run database migrations")?;
    info!("✅ Database migrations completed");

    let store: Arc<dyn StoreGateway> = Arc::new(pg_store);
    let state = web::Data::new(AppState::new(store, &config.feed, &config.vote));
    info!(
        feed_max_limit = config.feed.max_limit,
        loader_max_batch_size = config.feed.loader_max_batch_size,
        vote_timeout_ms = config.vote.store_timeout_ms,
        "✅ AppState created"
    );

    let http_addr = format!("{}:{}", config.app.host, config.app.http_port);
    info!("🚀 Starting HTTP server on http://{}", http_addr);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .bind(&http_addr)
    .context("Failed to bind HTTP server")?
    .disable_signals()
    .run();

    let handle = server.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, draining connections");
        handle.stop(true).await;
    });

    server
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    info!("🛑 social-feed-service shutting down");
    Ok(())
}
