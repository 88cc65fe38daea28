use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::workspace::WorkspaceManager;

/// Periodically remove expired workspaces until `shutdown` fires.
pub async fn run_janitor(
    manager: WorkspaceManager,
    interval: Duration,
    retention: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(
        base_dir = %manager.base_dir().display(),
        interval_secs = interval.as_secs(),
        retention_secs = retention.as_secs(),
        "Workspace janitor started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match manager.sweep(retention).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "Swept expired workspaces"),
            Err(e) => tracing::warn!(error = %e, "Workspace sweep failed"),
        }
    }

    tracing::info!("Workspace janitor stopped");
}
