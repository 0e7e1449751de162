use crate::core::config::SessionConfig;
use crate::core::Page;
use crate::errors::{AgentError, Result};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct NavigationResult {
    pub url: String,
    pub attempts: u32,
    pub time_taken_ms: u64,
}

pub struct NavigationManager;

impl NavigationManager {
    /// Resolve `target` against `current` so relative paths work.
    pub fn resolve_url(current: &str, target: &str) -> String {
        match url::Url::parse(target) {
            Ok(absolute) => absolute.to_string(),
            Err(_) => url::Url::parse(current)
                .and_then(|base| base.join(target))
                .map(|u| u.to_string())
                .unwrap_or_else(|_| target.to_string()),
        }
    }

    /// `goto` with bounded retries, backing off exponentially from
    /// `retry_backoff_ms` between attempts.
    pub async fn goto_with_retry(
        page: &dyn Page,
        url: &str,
        session: &SessionConfig,
    ) -> Result<NavigationResult> {
        let start_time = Instant::now();
        let attempts = session.retry_attempts.max(1);
        let mut backoff = session.retry_backoff_ms;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match page.goto(url, session.navigation_timeout_ms).await {
                Ok(()) => {
                    let landed = page.url().await.unwrap_or_else(|_| url.to_string());
                    debug!(url = %landed, attempt, "navigation complete");
                    return Ok(NavigationResult {
                        url: landed,
                        attempts: attempt,
                        time_taken_ms: start_time.elapsed().as_millis() as u64,
                    });
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "navigation attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        page.wait_for_timeout(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AgentError::NavigationTimeout(format!("{} after {} attempts", url, attempts))
        }))
    }

    /// Wait until the URL differs from `previous`. Polls every 100ms.
    pub async fn wait_for_url_change(page: &dyn Page, previous: &str, timeout_ms: u64) -> Result<String> {
        let polls = (timeout_ms / 100).max(1);
        for _ in 0..polls {
            let current = page.url().await?;
            if current != previous {
                return Ok(current);
            }
            page.wait_for_timeout(100).await;
        }
        Err(AgentError::NavigationTimeout(format!(
            "url stayed at {} for {}ms",
            previous, timeout_ms
        )))
    }

    /// Let a submitted form take effect. Returns as soon as the URL leaves
    /// `previous`; pages that update in place get `settle_ms` once the
    /// URL wait runs out.
    pub async fn settle_after_submit(
        page: &dyn Page,
        previous: &str,
        url_change_timeout_ms: u64,
        settle_ms: u64,
    ) -> Option<String> {
        if url_change_timeout_ms > 0 {
            match Self::wait_for_url_change(page, previous, url_change_timeout_ms).await {
                Ok(landed) => {
                    debug!(from = previous, to = %landed, "url changed after submit");
                    return Some(landed);
                }
                Err(e) => debug!(error = %e, "no url change after submit"),
            }
        }
        page.wait_for_timeout(settle_ms).await;
        None
    }
}
