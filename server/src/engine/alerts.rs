use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::json;
use tracing::{error, warn};

/// Operator alerting for failures no caller can fix: store outages,
/// identity provider failures, and broken relation invariants.
///
/// Every alert is logged at error level. When a webhook is configured the
/// alert is also posted to it from a background task, so raising an alert
/// never blocks or fails the operation that hit the problem.
#[derive(Clone)]
pub struct Alerter {
    webhook_url: Option<String>,
    client: reqwest::Client,
    raised: Arc<AtomicU64>,
}

impl Alerter {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            webhook_url: webhook_url.filter(|u| !u.is_empty()),
            client: reqwest::Client::new(),
            raised: Arc::new(AtomicU64::new(0)),
        }
    }

    /// An alerter that only logs.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn alert(&self, message: &str) {
        self.raised.fetch_add(1, Ordering::Relaxed);
        error!(alert = true, "{message}");

        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let client = self.client.clone();
        let body = json!({ "content": format!("ALERT:\n{message}") });
        runtime.spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    warn!(status = %resp.status(), "alert webhook rejected alert");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to deliver alert"),
            }
        });
    }

    /// Number of alerts raised since startup.
    pub fn raised(&self) -> u64 {
        self.raised.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Alerter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Alerter")
            .field("webhook", &self.webhook_url.is_some())
            .field("raised", &self.raised())
            .finish()
    }
}
