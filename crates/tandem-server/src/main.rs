use tracing::info;
use tracing_subscriber::EnvFilter;

use tandem_server::api::{self, AppState};
use tandem_server::config::ServerConfig;
use tandem_store::StoreHandle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tandem_server=debug,tandem_store=debug")),
        )
        .init();

    info!("Starting Tandem chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store and wire the services
    // -----------------------------------------------------------------------
    let store = StoreHandle::open_at(&config.database_path)?;
    let http_addr = config.http_addr;
    let app_state = AppState::new(config, store).await?;

    // -----------------------------------------------------------------------
    // 4. Run the HTTP and WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
