use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use pageflow_server::state::AppState;

/// `pageflow health`: liveness check for container health checks.
///
/// Calls `GET http://localhost:$PAGEFLOW_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("PAGEFLOW_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }

    // Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pageflow=info".parse()?),
        )
        .json()
        .init();

    let cfg = pageflow_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/pageflow.db", cfg.data_dir);
    let db = pageflow_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    if cfg.admin_token.is_none() {
        info!("PAGEFLOW_ADMIN_TOKEN unset; /api/query serves strict mode only");
    }
    if !cfg.excluded_ips.is_empty() {
        info!(ranges = cfg.excluded_ips.len(), "Excluding hits from configured addresses");
    }

    let state = Arc::new(AppState::new(db, cfg.clone()));

    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state.run_beacon_worker().await;
        });
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = pageflow_server::app::build_app(Arc::clone(&state));

    info!(
        port = cfg.port,
        track_url_changes = cfg.track_url_changes,
        filter_by_domain = cfg.filter_by_domain,
        "Pageflow listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::signal::ctrl_c().await.ok();
    })
    .await?;

    Ok(())
}
