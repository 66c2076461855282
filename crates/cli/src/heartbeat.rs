//! Periodic liveness reporting for both relay halves.

use std::time::Duration;

use {tokio::time::interval, tokio_util::sync::CancellationToken, tracing::debug};

use {
    mirrelay_api::ApiClient, mirrelay_common::types::ConnectionState,
    mirrelay_config::HeartbeatConfig,
};

const COMPONENTS: &[&str] = &["watcher", "sender"];

/// Report both components connected on a fixed cadence until cancelled.
///
/// Failures are expected whenever the backend blips; the next beat repairs
/// the status row, so they only warrant debug logging.
pub async fn run(api: ApiClient, config: HeartbeatConfig, cancel: CancellationToken) {
    let mut ticker = interval(Duration::from_secs(config.interval_secs));
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }
        for component in COMPONENTS {
            if let Err(err) = api
                .report_status(component, ConnectionState::Connected, None)
                .await
            {
                debug!(component, error = %err, "heartbeat report failed");
            }
        }
    }
}
