//! The delivery loop: pending queue in, Telegram messages out.

use std::{collections::HashMap, time::Duration};

use {
    teloxide::{
        Bot, RequestError,
        payloads::{SendDocumentSetters, SendMessageSetters, SendPhotoSetters},
        prelude::Requester,
        types::{InputFile, MessageId, ThreadId},
    },
    tokio::time::sleep,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    mirrelay_api::{ApiClient, retry::Backoff},
    mirrelay_common::types::{ConnectionState, OutboundMessage, Source},
    mirrelay_config::SenderConfig,
};

use crate::{
    destination::{self, ResolvedDestination},
    error::{Error, Result},
    format::{format_message, is_image_url},
};

/// How many times a rate-limited request is replayed before the error is
/// surfaced to the caller.
const RETRY_AFTER_MAX_RETRIES: usize = 4;

/// Drains the backend's pending queue and delivers to the single configured
/// Telegram destination. Every queued message ends terminal: sent or failed.
pub struct RelaySender {
    bot: Bot,
    api: ApiClient,
    config: SenderConfig,
}

impl RelaySender {
    pub fn new(bot: Bot, api: ApiClient, config: SenderConfig) -> Self {
        Self { bot, api, config }
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::default();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let pending = match self.api.fetch_pending_messages().await {
                Ok(pending) => {
                    backoff.reset();
                    pending
                },
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(error = %err, retry_in_secs = delay.as_secs(), "pending fetch failed");
                    pause(&cancel, delay).await;
                    continue;
                },
            };

            if pending.is_empty() {
                pause(&cancel, Duration::from_millis(self.config.empty_backoff_ms)).await;
                continue;
            }

            // Resolve the destination before touching any message: without a
            // usable destination nothing is sent and nothing is marked, so
            // the queue survives intact until an operator fixes the config.
            let dest = match self.resolve_destination().await {
                Ok(dest) => dest,
                Err(err) => {
                    warn!(error = %err, "no usable destination, holding queue");
                    self.api
                        .report_status("sender", ConnectionState::Error, Some(&err.to_string()))
                        .await
                        .ok();
                    pause(
                        &cancel,
                        Duration::from_millis(self.config.destination_backoff_ms),
                    )
                    .await;
                    continue;
                },
            };

            // Source metadata (name, topic routing, attachment policy) is
            // nice-to-have; a fetch failure degrades formatting, not delivery.
            let sources: HashMap<String, Source> = match self.api.list_sources().await {
                Ok(sources) => sources.into_iter().map(|s| (s.id.clone(), s)).collect(),
                Err(err) => {
                    debug!(error = %err, "source metadata unavailable for this batch");
                    HashMap::new()
                },
            };

            info!(count = pending.len(), "delivering pending messages");
            for message in pending {
                if cancel.is_cancelled() {
                    break;
                }
                match self.deliver(&message, &dest, sources.get(&message.source_id)).await {
                    Ok(()) => {
                        if let Err(err) = self.api.mark_sent(&message.id).await {
                            warn!(message_id = %message.id, error = %err, "mark-sent failed");
                        }
                        let _ = self
                            .api
                            .log(
                                "info",
                                &format!("Relayed message from {}", message.author),
                                sources.get(&message.source_id).map(|s| s.name.as_str()),
                                None,
                            )
                            .await;
                    },
                    Err(err) => {
                        warn!(message_id = %message.id, error = %err, "delivery failed");
                        if let Err(mark_err) =
                            self.api.mark_failed(&message.id, &err.to_string()).await
                        {
                            warn!(message_id = %message.id, error = %mark_err, "mark-failed failed");
                        }
                        let _ = self
                            .api
                            .log(
                                "error",
                                &format!("Failed to relay message from {}", message.author),
                                sources.get(&message.source_id).map(|s| s.name.as_str()),
                                Some(&err.to_string()),
                            )
                            .await;
                    },
                }
            }
        }

        self.api
            .report_status("sender", ConnectionState::Disconnected, None)
            .await
            .ok();
        info!("relay sender stopped");
    }

    async fn resolve_destination(&self) -> Result<ResolvedDestination> {
        let config = self
            .api
            .get_destination_config()
            .await?
            .ok_or_else(|| Error::Destination("no destination configured".into()))?;
        destination::resolve(&config)
    }

    /// Deliver one queued message: the text first, then up to the configured
    /// number of attachments. A lost attachment degrades the mirror; a lost
    /// text message fails it.
    async fn deliver(
        &self,
        message: &OutboundMessage,
        dest: &ResolvedDestination,
        source: Option<&Source>,
    ) -> Result<()> {
        if message.is_empty() {
            return Err(Error::Undeliverable("empty message".into()));
        }

        let thread = thread_for(dest, source);
        let text = format_message(message, source.map(|s| s.name.as_str()));

        run_request_with_retry("send_message", || {
            let mut req = self.bot.send_message(dest.recipient.clone(), text.as_str());
            if let Some(thread) = thread {
                req = req.message_thread_id(thread);
            }
            async move { req.await }
        })
        .await?;

        if source.is_some_and(|s| !s.mirror_attachments) {
            return Ok(());
        }

        for attachment in message.attachments.iter().take(self.config.max_attachments) {
            let Ok(url) = attachment.parse::<url::Url>() else {
                warn!(message_id = %message.id, url = %attachment, "skipping unparseable attachment URL");
                continue;
            };
            let input = InputFile::url(url);

            let result = if is_image_url(attachment) {
                run_request_with_retry("send_photo", || {
                    let mut req = self.bot.send_photo(dest.recipient.clone(), input.clone());
                    if let Some(thread) = thread {
                        req = req.message_thread_id(thread);
                    }
                    async move { req.await }
                })
                .await
                .map(|_| ())
            } else {
                run_request_with_retry("send_document", || {
                    let mut req = self.bot.send_document(dest.recipient.clone(), input.clone());
                    if let Some(thread) = thread {
                        req = req.message_thread_id(thread);
                    }
                    async move { req.await }
                })
                .await
                .map(|_| ())
            };

            if let Err(err) = result {
                warn!(
                    message_id = %message.id,
                    url = %attachment,
                    error = %err,
                    "attachment delivery failed, continuing"
                );
            }
        }

        Ok(())
    }
}

/// Sub-thread routing: only when the destination enables it and the source
/// carries a parseable topic id.
fn thread_for(dest: &ResolvedDestination, source: Option<&Source>) -> Option<ThreadId> {
    if !dest.use_sub_threads {
        return None;
    }
    source?
        .topic_id
        .as_deref()?
        .parse::<i32>()
        .ok()
        .map(|id| ThreadId(MessageId(id)))
}

/// Replay a Telegram request while it is being rate limited, honoring the
/// server-provided wait.
async fn run_request_with_retry<T, F, Fut>(
    operation: &'static str,
    mut request: F,
) -> std::result::Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RequestError>>,
{
    let mut retries = 0usize;
    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(wait) = retry_after_duration(&err) else {
                    return Err(err);
                };
                if retries >= RETRY_AFTER_MAX_RETRIES {
                    warn!(
                        operation,
                        retries,
                        retry_after_secs = wait.as_secs(),
                        "telegram rate limit persisted after retries"
                    );
                    return Err(err);
                }
                retries += 1;
                warn!(
                    operation,
                    retries,
                    retry_after_secs = wait.as_secs(),
                    "telegram rate limited, waiting before retry"
                );
                sleep(wait).await;
            },
        }
    }
}

fn retry_after_duration(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(wait) => Some(wait.duration()),
        _ => None,
    }
}

/// Sleep that wakes early on cancellation.
async fn pause(cancel: &CancellationToken, duration: Duration) {
    tokio::select! {
        () = cancel.cancelled() => {},
        () = sleep(duration) => {},
    }
}
