//! Process assembly: wire the watcher, sender, and heartbeat together and
//! run until a shutdown signal arrives.

use {
    secrecy::ExposeSecret,
    teloxide::Bot,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use {
    mirrelay_api::ApiClient,
    mirrelay_common::types::ConnectionState,
    mirrelay_config::RelayConfig,
    mirrelay_sender::RelaySender,
    mirrelay_watcher::{BrowserHandle, Reconciler},
};

use crate::heartbeat;

pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let api = ApiClient::new(&config.backend)?;
    let browser = BrowserHandle::launch(&config.browser).await?;
    let bot = Bot::new(config.sender.bot_token.expose_secret());

    let cancel = CancellationToken::new();

    let reconciler = Reconciler::new(api.clone(), browser.clone(), config.watcher.clone());
    let reconciler_task = tokio::spawn(reconciler.run(cancel.child_token()));

    let sender = RelaySender::new(bot, api.clone(), config.sender.clone());
    let sender_task = tokio::spawn(sender.run(cancel.child_token()));

    let heartbeat_task = tokio::spawn(heartbeat::run(
        api.clone(),
        config.heartbeat.clone(),
        cancel.child_token(),
    ));

    let _ = api.log("info", "Relay started", None, None).await;
    info!("relay running; press Ctrl-C to stop");

    shutdown_signal().await;
    info!("shutdown signal received, stopping");
    cancel.cancel();

    for (name, task) in [
        ("reconciler", reconciler_task),
        ("sender", sender_task),
        ("heartbeat", heartbeat_task),
    ] {
        if let Err(err) = task.await {
            warn!(task = name, error = %err, "task join failed");
        }
    }
    browser.shutdown();

    for component in ["watcher", "sender"] {
        api.report_status(component, ConnectionState::Disconnected, None)
            .await
            .ok();
    }
    let _ = api.log("info", "Relay stopped", None, None).await;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable, Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            },
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
