//! In-page collector script and the host-side half of the event bridge.
//!
//! The collector runs inside the rendered view's execution context. It is
//! deliberately dumb: it reports every message-like node exactly once per
//! DOM identity through a single CDP binding, and makes no old-vs-new
//! decisions — those belong to [`crate::observer`]. The host deserializes
//! and validates every payload before acting on it.

use std::collections::HashSet;

use serde_json::Value;
use url::Url;

use mirrelay_common::types::RawEvent;

use crate::error::{Error, Result};

/// Name of the CDP binding the collector calls with one JSON event per node.
/// The only entry point the host exposes into the view's context, besides
/// injecting the collector itself.
pub const BINDING_NAME: &str = "__relayEmit";

/// Check whether the view has rendered its message container yet.
pub const CONTAINER_CHECK_JS: &str = r#"
(() => {
    const containers = [
        '[data-list-id="chat-messages"]',
        '[class*="chatContent"]',
        '[id^="chat-messages-"]',
        '[class*="messageListItem"]',
    ];
    return containers.some((s) => document.querySelector(s) !== null);
})()
"#;

/// The collector. Idempotent per view identity: re-evaluating it under the
/// same `location.href` is a no-op ("active"); a changed href tears the old
/// observer down and reinstalls fresh ("installed"), which the host treats
/// as a view replacement.
pub const COLLECTOR_JS: &str = r#"
(() => {
    const MESSAGE_SELECTORS = [
        '[id^="chat-messages-"]',
        'li[id^="chat-messages-"]',
        '[class*="messageListItem"]',
        '[data-list-item-id^="chat-messages-"]',
    ];

    const existing = window.__relayCollector;
    if (existing && existing.href === location.href) return 'active';
    if (existing && existing.observer) existing.observer.disconnect();

    const emit = window.__relayEmit;
    if (typeof emit !== 'function') return 'no-binding';

    function trustedAttachment(raw) {
        if (!raw) return false;
        try {
            const u = new URL(raw, location.href);
            if (u.protocol !== 'https:') return false;
            return u.pathname.includes('/attachments/')
                || u.hostname.startsWith('cdn.')
                || u.hostname.startsWith('media.');
        } catch (e) {
            return false;
        }
    }

    function extract(el) {
        const id = el.id || el.getAttribute('data-list-item-id');
        if (!id) return null;
        const authorEl = el.querySelector('[class*="username"]');
        const author = authorEl ? authorEl.textContent.trim() : '';
        const contentEl = el.querySelector('[class*="messageContent"]');
        const text = contentEl ? contentEl.textContent.trim() : '';
        const attachments = [];
        for (const node of el.querySelectorAll('img[src], a[href]')) {
            const src = node.getAttribute('src') || node.getAttribute('href');
            if (trustedAttachment(src) && !attachments.includes(src)) {
                attachments.push(src);
            }
        }
        const timeEl = el.querySelector('time');
        const timestamp = timeEl ? timeEl.getAttribute('datetime') : null;
        return { native_id: id, author, text, attachments, timestamp };
    }

    function report(el) {
        if (!el.matches || !MESSAGE_SELECTORS.some((s) => el.matches(s))) return;
        if (el.dataset.relayReported) return;
        el.dataset.relayReported = '1';
        try {
            const event = extract(el);
            if (event) emit(JSON.stringify(event));
        } catch (e) {
            // One unparseable node must not abort the batch.
        }
    }

    function scan(root) {
        for (const sel of MESSAGE_SELECTORS) {
            for (const el of root.querySelectorAll(sel)) report(el);
        }
    }

    scan(document);

    const observer = new MutationObserver((mutations) => {
        for (const m of mutations) {
            for (const added of m.addedNodes) {
                if (added.nodeType !== 1) continue;
                report(added);
                if (added.querySelectorAll) scan(added);
            }
        }
    });
    observer.observe(document.body, { childList: true, subtree: true });

    window.__relayCollector = { href: location.href, observer };
    return 'installed';
})()
"#;

/// Result of evaluating [`COLLECTOR_JS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    /// Fresh install: the view identity changed (or first injection).
    Installed,
    /// Collector already active for the same effective view; no-op.
    Active,
    /// Binding missing in this context (page navigated very recently).
    NoBinding,
}

impl InjectOutcome {
    pub fn from_value(value: &Value) -> Result<Self> {
        match value.as_str() {
            Some("installed") => Ok(Self::Installed),
            Some("active") => Ok(Self::Active),
            Some("no-binding") => Ok(Self::NoBinding),
            other => Err(Error::JsEvalFailed(format!(
                "unexpected collector result: {other:?}"
            ))),
        }
    }
}

/// Deserialize and validate one binding payload from the collector.
///
/// The view's context is untrusted: the payload is re-validated here even
/// though the collector already filtered it.
pub fn parse_event(payload: &str) -> Result<RawEvent> {
    let mut event: RawEvent = serde_json::from_str(payload)
        .map_err(|e| Error::Protocol(format!("malformed collector payload: {e}")))?;

    if event.native_id.trim().is_empty() {
        return Err(Error::Protocol("collector payload without native id".into()));
    }

    event.author = event.author.trim().to_string();
    event.text = strip_author_prefix(&event.author, event.text.trim()).to_string();

    let mut seen = HashSet::new();
    event
        .attachments
        .retain(|u| is_trusted_attachment(u) && seen.insert(u.clone()));

    Ok(event)
}

/// Some renderings duplicate the author name into the message body
/// (`"alice: hi"`). Strip that prefix once, never more.
fn strip_author_prefix<'a>(author: &str, text: &'a str) -> &'a str {
    if author.is_empty() {
        return text;
    }
    let Some(rest) = text.strip_prefix(author) else {
        return text;
    };
    rest.strip_prefix(':').map_or(text, str::trim_start)
}

/// Host-side copy of the collector's trusted-attachment policy.
fn is_trusted_attachment(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if url.scheme() != "https" {
        return false;
    }
    let host = url.host_str().unwrap_or_default();
    url.path().contains("/attachments/") || host.starts_with("cdn.") || host.starts_with("media.")
}
