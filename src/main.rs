//! Portcullis binary entry point

use portcullis::{
    AppState,
    config::{self, LogFormat},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging from `logging.*`
/// 3. Validate configuration
/// 4. Initialize metrics
/// 5. Initialize AppState
/// 6. Build Axum router
/// 7. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging (RUST_LOG overrides logging.level)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.filter_directives().into());

    match config.logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init(),
    }

    tracing::info!("Starting Portcullis...");

    // 3. Validate configuration
    config.validate()?;
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        link_to_current_session = config.auth.link_to_current_session,
        "Configuration loaded"
    );

    // 4. Initialize metrics
    portcullis::metrics::init_metrics();

    // 5. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 6. Build Axum router
    let app = portcullis::build_router(state);

    // 7. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app).await?;

    Ok(())
}
