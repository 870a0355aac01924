use anyhow::{Context, Result};
use archive_relay::{
    config::{AppConfig, StoreBackend},
    routes::routes::router,
    services::{
        http_store::HttpBlobStore, local_store::LocalObjectStore, object_store::ObjectStore,
        session_store::SessionStore,
    },
    state::AppState,
};
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting archive-relay with config: {:?}", cfg);

    // --- Initialize object store ---
    let store: Arc<dyn ObjectStore> = match cfg.backend {
        StoreBackend::Local => {
            let public_base_url = cfg.public_base_url();
            tracing::debug!(
                "Connecting local store => db={} dir={} url={}",
                cfg.database_url,
                cfg.storage_dir,
                public_base_url
            );
            Arc::new(
                LocalObjectStore::connect(&cfg.database_url, &cfg.storage_dir, public_base_url)
                    .await
                    .context("opening local object store")?,
            )
        }
        StoreBackend::Http => {
            let token = cfg
                .blob_token
                .clone()
                .context("BLOB_READ_WRITE_TOKEN is not set")?;
            Arc::new(HttpBlobStore::new(&cfg.blob_api_url, token)?)
        }
    };

    // --- Initialize upload sessions ---
    let sessions = Arc::new(
        SessionStore::open(&cfg.scratch_dir)
            .await
            .with_context(|| format!("preparing scratch directory {}", cfg.scratch_dir))?,
    );
    spawn_sweeper(sessions.clone(), Duration::from_secs(cfg.session_max_age_secs));

    // --- Build router ---
    let app = router(AppState::new(&cfg, store, sessions));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically release sessions whose clients went away mid-upload.
fn spawn_sweeper(sessions: Arc<SessionStore>, max_age: Duration) {
    if max_age.is_zero() {
        tracing::info!("Stale session sweeper disabled");
        return;
    }
    let period = (max_age / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let swept = sessions.sweep_stale(max_age).await;
            if swept > 0 {
                tracing::info!("Released {} stale upload sessions", swept);
            }
        }
    });
}
