use anyhow::Result;
use axum::Router;
use scan_store::{
    config::AppConfig,
    routes,
    services::{
        analyzer::HttpAnalyzer,
        cache_service::{AnalysisCache, CacheConfig},
        session_service::SessionService,
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

    tracing::info!("Starting scan-store with config: {:?}", cfg);

    // --- Initialize core services (once per process) ---
    let cache = AnalysisCache::new(CacheConfig {
        max_total_bytes: cfg.max_cache_bytes,
        ttl: chrono::Duration::hours(cfg.file_ttl_hours),
        sweep_interval: Duration::from_secs(cfg.sweep_interval_secs),
    });

    let sessions = SessionService::new();
    sessions.start_cleanup_task(Duration::from_secs(cfg.sweep_interval_secs));

    let analyzer = Arc::new(HttpAnalyzer::new(cfg.analyzer_url.clone()));

    let state = AppState::new(sessions, cache, analyzer);

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

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
