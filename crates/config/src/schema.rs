//! Config schema types (backend, browser, watcher, sender, heartbeat).

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub backend: BackendConfig,
    pub browser: BrowserConfig,
    pub watcher: WatcherConfig,
    pub sender: SenderConfig,
    pub heartbeat: HeartbeatConfig,
}

/// Backend queue/API collaborator.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend (edge functions live under
    /// `{base_url}/functions/v1`).
    pub base_url: String,
    /// Worker API key, sent as a bearer token.
    #[serde(serialize_with = "serialize_secret")]
    pub worker_key: Secret<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("worker_key", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            worker_key: Secret::new(String::new()),
            timeout_secs: 30,
        }
    }
}

/// Chrome/Chromium launch settings for the watched views.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run without a visible window. Disable to log in manually.
    pub headless: bool,
    /// Explicit Chrome/Chromium executable path (auto-detected when unset).
    pub chrome_path: Option<String>,
    /// Persistent profile directory, so the watched site's login session
    /// survives restarts.
    pub profile_dir: String,
    /// User agent presented to the watched site.
    pub user_agent: Option<String>,
    /// Navigation/request timeout in milliseconds.
    pub navigation_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            profile_dir: "./relay_profile".into(),
            user_agent: Some(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .into(),
            ),
            navigation_timeout_ms: 30_000,
        }
    }
}

/// Watch-session and change-detection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Seconds between source-set reconciliation cycles.
    pub reconcile_interval_secs: u64,
    /// Quiet period (ms) the observer waits after the last hydration burst
    /// before locking the baseline.
    pub quiet_period_ms: u64,
    /// Warm-up window (ms) from attach during which no node is forwarded
    /// even after lock.
    pub warmup_ms: u64,
    /// Seconds between idempotent collector re-injections.
    pub reinject_interval_secs: u64,
    /// Backoff (ms) between retries when the message container is missing.
    pub container_retry_ms: u64,
    /// Attempts to locate the message container before giving up for the
    /// current reconciliation pass.
    pub container_retry_attempts: u32,
    /// Bounded wait (seconds) for a manual login when the view lands on a
    /// login wall.
    pub login_wait_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: 5,
            quiet_period_ms: 1_000,
            warmup_ms: 1_500,
            reinject_interval_secs: 15,
            container_retry_ms: 2_000,
            container_retry_attempts: 10,
            login_wait_secs: 300,
        }
    }
}

/// Outbound Telegram delivery.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Bot token from @BotFather.
    #[serde(serialize_with = "serialize_secret")]
    pub bot_token: Secret<String>,
    /// Backoff (ms) when the pending queue is empty.
    pub empty_backoff_ms: u64,
    /// Backoff (ms) when the destination cannot be resolved.
    pub destination_backoff_ms: u64,
    /// Maximum attachments delivered per message.
    pub max_attachments: usize,
}

impl std::fmt::Debug for SenderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderConfig")
            .field("bot_token", &"[REDACTED]")
            .field("empty_backoff_ms", &self.empty_backoff_ms)
            .field("max_attachments", &self.max_attachments)
            .finish_non_exhaustive()
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            bot_token: Secret::new(String::new()),
            empty_backoff_ms: 2_000,
            destination_backoff_ms: 10_000,
            max_attachments: 5,
        }
    }
}

/// Periodic liveness reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl RelayConfig {
    /// Validate the fields the relay cannot run without.
    pub fn validate(&self) -> Result<(), String> {
        if self.backend.base_url.is_empty() {
            return Err("backend.base_url is required".into());
        }
        if self.backend.worker_key.expose_secret().is_empty() {
            return Err("backend.worker_key is required".into());
        }
        if self.sender.bot_token.expose_secret().is_empty() {
            return Err("sender.bot_token is required".into());
        }
        Ok(())
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}
