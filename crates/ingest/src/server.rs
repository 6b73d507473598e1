use std::net::SocketAddr;

use pathwatch_core::error::{PathwatchError, Result};

use crate::http::{CollectorState, router};

pub async fn run_ingest_server(state: CollectorState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PathwatchError::Io(format!("failed to bind collector on {addr}: {e}")))?;
    tracing::info!(addr = %addr, "collector listening");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| PathwatchError::Io(format!("collector server failed: {e}")))
}
