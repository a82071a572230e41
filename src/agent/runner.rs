//! Bridge runner
//!
//! Wires the connection, the agent and the maintenance task together and
//! serves until the editor closes the stream.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::core::BridgeAgent;
use crate::backend::Backend;
use crate::client::{ConnectionClient, EditorClient};
use crate::transport::Connection;
use crate::types::BridgeConfig;

/// Serve one editor connection over `reader`/`writer`
///
/// Returns once the inbound stream ends; every session is destroyed before
/// returning.
pub async fn serve<R, W>(
    backend: Arc<dyn Backend>,
    config: BridgeConfig,
    reader: R,
    writer: W,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    config.validate()?;

    let connection = Connection::new(&config.transport);
    let client: Arc<dyn EditorClient> = Arc::new(ConnectionClient::new(connection.handle()));
    let agent = Arc::new(BridgeAgent::new(config, backend, client));

    let stop = CancellationToken::new();
    let maintenance = spawn_maintenance(Arc::clone(&agent), stop.clone());

    let result = connection.serve(reader, writer, Arc::clone(&agent)).await;

    stop.cancel();
    if let Err(e) = maintenance.await {
        tracing::warn!(error = %e, "Maintenance task failed");
    }
    let destroyed = agent.shutdown();
    tracing::info!(destroyed, "Bridge stopped");
    result
}

/// Serve over stdin/stdout
pub async fn serve_stdio(backend: Arc<dyn Backend>, config: BridgeConfig) -> anyhow::Result<()> {
    let started = Instant::now();
    {
        let startup_span = tracing::info_span!(
            "bridge_startup",
            version = %env!("CARGO_PKG_VERSION"),
            pid = %std::process::id(),
        );
        let _enter = startup_span.enter();
        tracing::info!(
            max_sessions = config.sessions.max_sessions,
            idle_timeout_secs = config.sessions.idle_timeout_secs,
            "Waiting for protocol messages on stdin"
        );
    }

    let result = serve(backend, config, tokio::io::stdin(), tokio::io::stdout()).await;

    tracing::info!(uptime_secs = started.elapsed().as_secs(), "Bridge shutdown complete");
    result
}

/// Periodic reaping and cache sweeps until `stop` fires
fn spawn_maintenance(agent: Arc<BridgeAgent>, stop: CancellationToken) -> JoinHandle<()> {
    let period = agent.config().sessions.reap_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                _ = ticker.tick() => {
                    agent.run_maintenance();
                }
            }
        }
        tracing::debug!("Maintenance task stopped");
    })
}
