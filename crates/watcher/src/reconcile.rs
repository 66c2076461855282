//! Source-set reconciliation: keep one running watch session per enabled
//! source, following the backend's configuration as it changes.

use std::{collections::HashMap, time::Duration};

use {
    tokio::{task::JoinHandle, time::interval},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use {mirrelay_api::ApiClient, mirrelay_common::types::Source, mirrelay_config::WatcherConfig};

use crate::{browser::BrowserHandle, session::WatchSession};

struct SessionHandle {
    url: String,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Periodically diffs the backend's enabled sources against the running
/// sessions, starting and stopping sessions to converge.
pub struct Reconciler {
    api: ApiClient,
    browser: BrowserHandle,
    config: WatcherConfig,
    sessions: HashMap<String, SessionHandle>,
}

impl Reconciler {
    pub fn new(api: ApiClient, browser: BrowserHandle, config: WatcherConfig) -> Self {
        Self {
            api,
            browser,
            config,
            sessions: HashMap::new(),
        }
    }

    /// Run until cancelled; stops every session on the way out.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.config.reconcile_interval_secs));
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {},
            }

            self.reap_finished();

            let sources = match self.api.list_sources().await {
                Ok(sources) => sources,
                Err(err) => {
                    // Transient backend failure leaves the running set as-is.
                    warn!(error = %err, "source listing failed, keeping current sessions");
                    continue;
                },
            };
            self.reconcile(&sources);
        }

        self.stop_all().await;
    }

    /// Drop handles of sessions that ended on their own (attach failures,
    /// lost bindings); the next pass restarts them.
    fn reap_finished(&mut self) {
        self.sessions.retain(|id, handle| {
            if handle.join.is_finished() {
                info!(source_id = %id, "session ended, eligible for restart");
                false
            } else {
                true
            }
        });
    }

    fn reconcile(&mut self, sources: &[Source]) {
        let active: HashMap<String, String> = self
            .sessions
            .iter()
            .map(|(id, handle)| (id.clone(), handle.url.clone()))
            .collect();
        let (to_start, to_stop) = plan(sources, &active);

        for id in to_stop {
            if let Some(handle) = self.sessions.remove(&id) {
                info!(source_id = %id, "stopping watch session");
                handle.cancel.cancel();
            }
        }

        for source in to_start {
            info!(source_id = %source.id, name = %source.name, "starting watch session");
            let cancel = CancellationToken::new();
            let session = WatchSession::new(
                source.clone(),
                self.api.clone(),
                self.browser.clone(),
                self.config.clone(),
                cancel.clone(),
            );
            let join = tokio::spawn(session.run());
            self.sessions.insert(
                source.id.clone(),
                SessionHandle {
                    url: source.url.clone(),
                    cancel,
                    join,
                },
            );
        }
    }

    async fn stop_all(&mut self) {
        for handle in self.sessions.values() {
            handle.cancel.cancel();
        }
        for (id, handle) in self.sessions.drain() {
            if let Err(err) = handle.join.await {
                warn!(source_id = %id, error = %err, "session task join failed");
            }
        }
        info!("all watch sessions stopped");
    }
}

/// Compute the session changes needed to converge on the desired set.
///
/// A source whose URL changed is both stopped and restarted; everything else
/// already running is left untouched.
fn plan<'a>(
    desired: &'a [Source],
    active: &HashMap<String, String>,
) -> (Vec<&'a Source>, Vec<String>) {
    let enabled: HashMap<&str, &Source> = desired
        .iter()
        .filter(|s| s.enabled)
        .map(|s| (s.id.as_str(), s))
        .collect();

    let to_stop: Vec<String> = active
        .iter()
        .filter(|(id, url)| {
            enabled
                .get(id.as_str())
                .is_none_or(|source| source.url != **url)
        })
        .map(|(id, _)| id.clone())
        .collect();

    let to_start: Vec<&Source> = enabled
        .values()
        .filter(|source| {
            active
                .get(&source.id)
                .is_none_or(|url| *url != source.url)
        })
        .copied()
        .collect();

    (to_start, to_stop)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: &str, url: &str, enabled: bool) -> Source {
        Source {
            id: id.into(),
            url: url.into(),
            name: id.into(),
            enabled,
            last_message_fingerprint: None,
            last_seen_at: None,
            topic_id: None,
            mirror_attachments: true,
        }
    }

    #[test]
    fn starts_new_and_stops_removed_sources() {
        let desired = vec![
            source("a", "https://x/a", true),
            source("b", "https://x/b", true),
        ];
        let active = HashMap::from([
            ("b".to_string(), "https://x/b".to_string()),
            ("c".to_string(), "https://x/c".to_string()),
        ]);

        let (to_start, to_stop) = plan(&desired, &active);
        assert_eq!(
            to_start.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            vec!["a"]
        );
        assert_eq!(to_stop, vec!["c".to_string()]);
    }

    #[test]
    fn disabled_source_is_stopped_not_started() {
        let desired = vec![source("a", "https://x/a", false)];
        let active = HashMap::from([("a".to_string(), "https://x/a".to_string())]);

        let (to_start, to_stop) = plan(&desired, &active);
        assert!(to_start.is_empty());
        assert_eq!(to_stop, vec!["a".to_string()]);
    }

    #[test]
    fn url_change_restarts_the_session() {
        let desired = vec![source("a", "https://x/a-moved", true)];
        let active = HashMap::from([("a".to_string(), "https://x/a".to_string())]);

        let (to_start, to_stop) = plan(&desired, &active);
        assert_eq!(to_start.len(), 1);
        assert_eq!(to_stop, vec!["a".to_string()]);
    }

    #[test]
    fn steady_state_is_a_no_op() {
        let desired = vec![source("a", "https://x/a", true)];
        let active = HashMap::from([("a".to_string(), "https://x/a".to_string())]);

        let (to_start, to_stop) = plan(&desired, &active);
        assert!(to_start.is_empty());
        assert!(to_stop.is_empty());
    }
}
