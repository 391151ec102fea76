use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use pulse_server::config::{generate_config_template, Config};
use pulse_server::{db, reaper, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pulse_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "pulse_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("pulse-server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Build application state: registry, presence tracker, dispatcher
    let app_state = state::AppState::new(db);

    // Spawn the idle reaper's sweep loops with a cooperative stop token
    let realtime_config = config.realtime.clone().unwrap_or_default();
    let shutdown = CancellationToken::new();
    let reaper_handles = reaper::spawn_reaper(app_state.clone(), &realtime_config, shutdown.clone());

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    })
    .await?;

    // Stop the reaper loops and wait for in-flight sweeps
    shutdown.cancel();
    for handle in reaper_handles {
        let _ = handle.await;
    }

    Ok(())
}
