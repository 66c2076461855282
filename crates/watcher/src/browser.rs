//! Shared browser process. One Chrome instance serves every watch session;
//! each session gets its own page.

use std::{sync::Arc, time::Duration};

use {
    chromiumoxide::{Browser, BrowserConfig as CdpBrowserConfig, Page},
    futures::StreamExt,
    tokio::task::JoinHandle,
    tracing::{debug, info, warn},
};

use mirrelay_config::BrowserConfig;

use crate::error::{Error, Result};

/// Handle to the shared browser process. Cheap to clone; the underlying
/// browser and its event handler task are shared.
#[derive(Clone)]
pub struct BrowserHandle {
    inner: Arc<Inner>,
}

struct Inner {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserHandle {
    /// Launch Chrome with a persistent profile directory so cookies and
    /// sessions survive restarts.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let mut builder = CdpBrowserConfig::builder();

        // chromiumoxide runs headless by default; with_head() opts out.
        if !config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .user_data_dir(&config.profile_dir)
            .request_timeout(Duration::from_millis(config.navigation_timeout_ms));

        if let Some(ref ua) = config.user_agent {
            builder = builder.arg(format!("--user-agent={ua}"));
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        builder = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");

        let cdp_config = builder
            .build()
            .map_err(|e| Error::LaunchFailed(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| Error::LaunchFailed(e.to_string()))?;

        // Drain CDP events for the lifetime of the browser; the connection
        // stalls if nobody polls this stream.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(?err, "browser event error");
                }
            }
            warn!("browser event stream ended");
        });

        info!(
            headless = config.headless,
            profile_dir = %config.profile_dir,
            "browser launched"
        );

        Ok(Self {
            inner: Arc::new(Inner { browser, handler }),
        })
    }

    /// Open a fresh blank page for a watch session.
    pub async fn new_page(&self) -> Result<Page> {
        let page = self.inner.browser.new_page("about:blank").await?;
        Ok(page)
    }

    /// Abort the event handler task. The browser process exits when the
    /// connection drops.
    pub fn shutdown(&self) {
        self.inner.handler.abort();
    }
}
