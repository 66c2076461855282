//! One watch session per enabled source: navigate, arm the collector, and
//! pump observed events through the change-detection state machine.

use std::time::{Duration, Instant};

use {
    chromiumoxide::{
        Page,
        cdp::js_protocol::runtime::{AddBindingParams, EventBindingCalled},
    },
    futures::StreamExt,
    tokio::time::{interval, sleep},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    mirrelay_api::{ApiClient, retry},
    mirrelay_common::types::{ConnectionState, NewMessage, RawEvent, Source},
    mirrelay_config::WatcherConfig,
};

use crate::{
    browser::BrowserHandle,
    collect::{self, InjectOutcome},
    error::{Context, Error, Result},
    fingerprint::fingerprint,
    observer::{ChangeObserver, ObserverConfig},
    ordinal::LongestNumericToken,
};

/// Poll cadence while parked on a login wall.
const LOGIN_POLL: Duration = Duration::from_secs(5);

/// Cadence at which the observer's clock advances without an observation,
/// so the baseline locks even when the view goes silent.
const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Outcome of a bounded readiness wait during attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    Ready,
    Cancelled,
    TimedOut,
}

/// Probe until ready, bounded by attempt count, aborting the instant the
/// token fires. Probe errors propagate immediately.
async fn poll_until<F, Fut>(
    cancel: &CancellationToken,
    every: Duration,
    attempts: u32,
    mut probe: F,
) -> Result<WaitOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for _ in 0..attempts {
        if probe().await? {
            return Ok(WaitOutcome::Ready);
        }
        tokio::select! {
            () = cancel.cancelled() => return Ok(WaitOutcome::Cancelled),
            () = sleep(every) => {},
        }
    }
    Ok(WaitOutcome::TimedOut)
}

/// Build the queue payload for an observed event, unless the source cursor
/// already covers it (first node re-observed after a reattach).
fn prepare_push(source: &Source, raw: &RawEvent) -> Option<NewMessage> {
    let fp = fingerprint(&source.id, &raw.native_id);
    if source.last_message_fingerprint.as_ref() == Some(&fp) {
        return None;
    }
    let attachments = if source.mirror_attachments {
        raw.attachments.clone()
    } else {
        Vec::new()
    };
    Some(NewMessage {
        fingerprint: fp,
        native_id: raw.native_id.clone(),
        author: raw.author.clone(),
        text: raw.text.clone(),
        attachments,
    })
}

/// A single attach-and-pump lifecycle for one source.
///
/// The session never retries internally past its attach sequence: any error
/// is reported and bubbles up, and the reconciler restarts the session on
/// its next pass.
pub struct WatchSession {
    source: Source,
    api: ApiClient,
    browser: BrowserHandle,
    config: WatcherConfig,
    cancel: CancellationToken,
}

impl WatchSession {
    pub fn new(
        source: Source,
        api: ApiClient,
        browser: BrowserHandle,
        config: WatcherConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            api,
            browser,
            config,
            cancel,
        }
    }

    /// Run until cancelled or failed. Errors are reported to the backend;
    /// the caller only learns that the session ended.
    pub async fn run(self) {
        let api = self.api.clone();
        let name = self.source.name.clone();
        match self.attach_and_pump().await {
            Ok(()) => info!(source = %name, "watch session stopped"),
            Err(err) => {
                warn!(source = %name, error = %err, "watch session failed");
                api.report_status("watcher", ConnectionState::Error, Some(&err.to_string()))
                    .await
                    .ok();
                let _ = api
                    .log(
                        "error",
                        "Watch session failed",
                        Some(&name),
                        Some(&err.to_string()),
                    )
                    .await;
            },
        }
    }

    async fn attach_and_pump(mut self) -> Result<()> {
        let page = self.browser.new_page().await?;
        let result = self.attach(&page).await;
        // The page belongs to this session alone; close it no matter how the
        // pump ended. Close failures mean the browser is already gone.
        if let Err(err) = page.close().await {
            debug!(error = %err, "page close failed");
        }
        result
    }

    async fn attach(&mut self, page: &Page) -> Result<()> {
        info!(source = %self.source.name, url = %self.source.url, "attaching to source");

        page.goto(self.source.url.as_str())
            .await
            .map_err(|e| Error::NavigationFailed(e.to_string()))?;
        if let Err(err) = page.wait_for_navigation().await {
            // Single-page apps often settle without a load event; the
            // container wait below is the real readiness check.
            debug!(error = %err, "navigation wait ended early");
        }

        if self.pass_login_wall(page).await? == WaitOutcome::Cancelled {
            return Ok(());
        }
        if self.wait_for_container(page).await? == WaitOutcome::Cancelled {
            return Ok(());
        }

        // The binding and its event stream must both exist before the
        // collector is injected, or the initial scan's reports are lost.
        page.execute(AddBindingParams::new(collect::BINDING_NAME))
            .await?;
        let mut events = page.event_listener::<EventBindingCalled>().await?;

        let outcome = self.inject_collector(page).await?;
        if outcome == InjectOutcome::NoBinding {
            return Err(Error::JsEvalFailed(
                "collector found no binding after injection".into(),
            ));
        }

        self.api
            .report_status("watcher", ConnectionState::Connected, None)
            .await
            .ok();
        let _ = self
            .api
            .log(
                "info",
                "Watching source",
                Some(&self.source.name),
                Some(&self.source.url),
            )
            .await;

        let mut observer = ChangeObserver::new(
            ObserverConfig {
                quiet_period: Duration::from_millis(self.config.quiet_period_ms),
                warmup: Duration::from_millis(self.config.warmup_ms),
            },
            Box::new(LongestNumericToken),
            Instant::now(),
        );

        let mut tick = interval(TICK_INTERVAL);
        let mut reinject = interval(Duration::from_secs(self.config.reinject_interval_secs));
        reinject.tick().await; // fires immediately otherwise

        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.api
                        .report_status("watcher", ConnectionState::Disconnected, None)
                        .await
                        .ok();
                    return Ok(());
                },
                event = events.next() => {
                    let Some(event) = event else {
                        return Err(Error::Protocol("binding event stream closed".into()));
                    };
                    if event.name != collect::BINDING_NAME {
                        continue;
                    }
                    match collect::parse_event(&event.payload) {
                        Ok(raw) => {
                            if let Some(fresh) = observer.observe(raw, Instant::now()) {
                                self.forward(fresh).await;
                            }
                        },
                        Err(err) => debug!(error = %err, "discarding collector payload"),
                    }
                },
                _ = tick.tick() => {
                    observer.tick(Instant::now());
                },
                _ = reinject.tick() => {
                    // The collector evaporates when the SPA swaps views; the
                    // injection is idempotent, so blind re-evaluation is safe.
                    match self.inject_collector(page).await? {
                        InjectOutcome::Active => {},
                        InjectOutcome::Installed => {
                            info!(source = %self.source.name, "view replaced, observer reset");
                            observer.reset(Instant::now());
                        },
                        InjectOutcome::NoBinding => {
                            // Full navigation wiped the binding with it; only
                            // a fresh attach restores the bridge.
                            return Err(Error::Protocol(
                                "collector binding lost, reattach required".into(),
                            ));
                        },
                    }
                },
            }
        }
    }

    /// Detect a login wall and wait, bounded, for a manual login to finish.
    async fn pass_login_wall(&self, page: &Page) -> Result<WaitOutcome> {
        if !on_login_wall(page).await {
            return Ok(WaitOutcome::Ready);
        }

        warn!(source = %self.source.name, "login required; waiting for manual login");
        self.api
            .report_status(
                "watcher",
                ConnectionState::Disconnected,
                Some("login required"),
            )
            .await
            .ok();
        let _ = self
            .api
            .log(
                "warning",
                "Login required; waiting for manual login",
                Some(&self.source.name),
                None,
            )
            .await;

        let attempts =
            u32::try_from(self.config.login_wait_secs / LOGIN_POLL.as_secs()).unwrap_or(u32::MAX);
        let outcome = poll_until(&self.cancel, LOGIN_POLL, attempts.max(1), move || async move {
            Ok(!on_login_wall(page).await)
        })
        .await?;
        match outcome {
            WaitOutcome::Ready => {
                info!(source = %self.source.name, "login completed");
                Ok(WaitOutcome::Ready)
            },
            WaitOutcome::Cancelled => Ok(WaitOutcome::Cancelled),
            WaitOutcome::TimedOut => Err(Error::LoginRequired {
                waited_secs: self.config.login_wait_secs,
            }),
        }
    }

    /// Wait for the view to render its message container.
    async fn wait_for_container(&self, page: &Page) -> Result<WaitOutcome> {
        let name = self.source.name.as_str();
        let outcome = poll_until(
            &self.cancel,
            Duration::from_millis(self.config.container_retry_ms),
            self.config.container_retry_attempts,
            move || async move {
                let found = page
                    .evaluate(collect::CONTAINER_CHECK_JS)
                    .await?
                    .value()
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if !found {
                    debug!(source = %name, "message container not yet rendered");
                }
                Ok(found)
            },
        )
        .await?;
        match outcome {
            WaitOutcome::TimedOut => Err(Error::ContainerNotFound {
                attempts: self.config.container_retry_attempts,
            }),
            other => Ok(other),
        }
    }

    async fn inject_collector(&self, page: &Page) -> Result<InjectOutcome> {
        let result = page.evaluate(collect::COLLECTOR_JS).await?;
        let value = result.value().context("collector returned no value")?;
        InjectOutcome::from_value(value)
    }

    /// Push one genuinely new message to the backend queue.
    async fn forward(&mut self, raw: RawEvent) {
        // The cursor marks the last message already pushed; observing it
        // again (first message after a reattach) is expected, not new.
        let Some(message) = prepare_push(&self.source, &raw) else {
            debug!(source = %self.source.name, native_id = %raw.native_id, "cursor match, skipping");
            return;
        };
        let fp = message.fingerprint.clone();

        info!(
            source = %self.source.name,
            author = %message.author,
            fingerprint = %fp,
            "new message observed"
        );

        // At-least-once: the push retries until the backend accepts it (the
        // fingerprint makes a duplicate accept harmless), but never past
        // shutdown. An abandoned push leaves the cursor behind, so the next
        // attach re-observes and re-pushes this message.
        let pushed = retry::forever_or_cancelled("push message", &self.cancel, || {
            self.api.push_message(&self.source.id, &message)
        })
        .await;
        if pushed.is_none() {
            return;
        }

        // Cursor advance is best-effort; a lost cursor only costs one
        // duplicate-suppressed push after the next reattach.
        if let Err(err) = self
            .api
            .set_cursor(&self.source.id, &fp, raw.timestamp.as_deref())
            .await
        {
            warn!(source = %self.source.name, error = %err, "cursor update failed");
        }
        self.source.last_message_fingerprint = Some(fp);

        let _ = self
            .api
            .log(
                "info",
                &format!("Queued message from {}", message.author),
                Some(&self.source.name),
                None,
            )
            .await;
    }
}

/// The watched site redirects unauthenticated views to a login page.
async fn on_login_wall(page: &Page) -> bool {
    match page.url().await {
        Ok(Some(url)) => url.contains("login"),
        _ => false,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn source(cursor: Option<&str>, mirror_attachments: bool) -> Source {
        Source {
            id: "src-1".into(),
            url: "https://chat.example.com/channels/1/2".into(),
            name: "general".into(),
            enabled: true,
            last_message_fingerprint: cursor.map(|c| {
                mirrelay_common::types::Fingerprint(c.into())
            }),
            last_seen_at: None,
            topic_id: None,
            mirror_attachments,
        }
    }

    fn event(native_id: &str) -> RawEvent {
        RawEvent {
            native_id: native_id.into(),
            author: "alice".into(),
            text: "hello".into(),
            attachments: vec!["https://cdn.example.com/attachments/1/a.png".into()],
            timestamp: None,
        }
    }

    #[test]
    fn prepare_push_builds_payload_with_fingerprint() {
        let raw = event("chat-messages-100000000000000001");
        let message = prepare_push(&source(None, true), &raw).unwrap();
        assert_eq!(
            message.fingerprint,
            fingerprint("src-1", "chat-messages-100000000000000001")
        );
        assert_eq!(message.author, "alice");
        assert_eq!(message.attachments.len(), 1);
    }

    #[test]
    fn prepare_push_skips_the_cursor_message() {
        let raw = event("chat-messages-100000000000000001");
        let fp = fingerprint("src-1", &raw.native_id);
        assert!(prepare_push(&source(Some(fp.as_str()), true), &raw).is_none());

        // A different message still goes through.
        let other = event("chat-messages-100000000000000002");
        assert!(prepare_push(&source(Some(fp.as_str()), true), &other).is_some());
    }

    #[test]
    fn prepare_push_honors_attachment_policy() {
        let raw = event("chat-messages-100000000000000001");
        let message = prepare_push(&source(None, false), &raw).unwrap();
        assert!(message.attachments.is_empty());
    }

    #[tokio::test]
    async fn poll_until_stops_the_moment_the_token_fires() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = poll_until(&cancel, Duration::from_secs(3600), 100, || async { Ok(false) })
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Cancelled);
    }

    #[tokio::test]
    async fn poll_until_reports_readiness_and_exhaustion() {
        let cancel = CancellationToken::new();

        let mut probes = 0u32;
        let outcome = poll_until(&cancel, Duration::from_millis(1), 10, || {
            probes += 1;
            let ready = probes == 3;
            async move { Ok(ready) }
        })
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Ready);

        let outcome = poll_until(&cancel, Duration::from_millis(1), 2, || async { Ok(false) })
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);

        let err = poll_until(&cancel, Duration::from_millis(1), 5, || async {
            Err(Error::Protocol("probe broke".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
