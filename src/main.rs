use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crosslink_server::config::Config;
use crosslink_server::context::AppContext;
use crosslink_server::member::PostgresMemberStore;
use crosslink_server::propagate::HttpTransport;
use crosslink_server::retry::RetryWorker;
use crosslink_server::session::HeadlessSession;
use crosslink_server::store::{PostgresSyncStore, SyncStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env()?);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Crosslink Sync Server Starting ===");
    info!("Site URL: {}", config.site_url);
    info!(
        "Role: {}",
        if config.is_slave() { "slave" } else { "master-capable" }
    );

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Connected to database");

    let store: Arc<dyn SyncStore> = Arc::new(PostgresSyncStore::new(pool.clone()));
    // The denormalized role-gate input must survive restarts honestly.
    let enabled = store.recount_enabled().await?;
    info!("Enabled slave sites: {}", enabled);

    let transport = Arc::new(
        HttpTransport::new(config.http_timeout_secs)
            .context("Failed to build outbound HTTP client")?,
    );

    let ctx = Arc::new(AppContext::new(
        config.clone(),
        store.clone(),
        Arc::new(PostgresMemberStore::new(pool)),
        Arc::new(HeadlessSession),
        transport.clone(),
    ));

    tokio::spawn(RetryWorker::new(config.clone(), store, transport).run());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .context("Failed to parse bind address")?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    crosslink_server::run_server(ctx, listener).await
}
