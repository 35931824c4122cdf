use std::sync::Arc;

use tracing::{error, info};
use vendor_engine::engine::LogNotifier;
use vendor_engine::frontends::router;
use vendor_engine::{setup_tracing, Config, FulfillmentSystem};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    setup_tracing();

    let config = Config::from_env()?;
    info!(environment = %config.environment, port = config.http_port, "Starting vendor engine");

    let system = FulfillmentSystem::start(&config, Arc::new(LogNotifier));
    let app = router(system.web_state());

    let addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "HTTP server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
    {
        error!("HTTP server error: {e}");
    }

    system.shutdown().await?;
    Ok(())
}
