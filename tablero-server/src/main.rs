//! Tablero server: WebSocket sync plus the HTTP room API over one store.

use std::future::IntoFuture;
use std::sync::Arc;
use log::info;
use tablero_collab::{router, ApiState, RoomStore, ServerConfig, SyncServer};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env()?;
    info!("Opening room store at {}", config.store.path.display());
    let store = Arc::new(RoomStore::open(config.store.clone())?);

    let sync = SyncServer::new(config.clone(), store.clone());
    let ws_listener = sync.bind().await?;

    let api = router(ApiState {
        store: store.clone(),
        authenticator: sync.authenticator().clone(),
        bcrypt_cost: config.bcrypt_cost,
    });
    let http_listener = TcpListener::bind(&config.http_addr).await?;
    info!("HTTP API listening on {}", http_listener.local_addr()?);

    tokio::select! {
        result = sync.serve(ws_listener) => {
            if let Err(e) = result {
                log::error!("Sync server stopped: {e}");
            }
        }
        result = axum::serve(http_listener, api).into_future() => {
            if let Err(e) = result {
                log::error!("HTTP server stopped: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
        }
    }

    store.close()?;
    info!("Goodbye");
    Ok(())
}
