use crate::dom::BoundingBox;
use crate::errors::{AgentError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Browser-control capability set the agent drives.
///
/// Locators are CSS selectors, or XPath expressions prefixed with `xpath=`.
/// Every method resolves only once the underlying browser operation has
/// finished or failed.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate and wait for the load to finish
    async fn goto(&self, url: &str, timeout_ms: u64) -> Result<()>;

    async fn click(&self, locator: &str, timeout_ms: u64) -> Result<()>;

    /// Clear the field, then type `text` into it
    async fn fill(&self, locator: &str, text: &str, timeout_ms: u64) -> Result<()>;

    /// Press a single key (`Enter`, `Tab`, ...) on the focused element
    async fn press(&self, key: &str) -> Result<()>;

    /// Insert text into whatever element currently has focus
    async fn type_text(&self, text: &str) -> Result<()>;

    async fn hover(&self, locator: &str) -> Result<()>;

    async fn select_option(&self, locator: &str, value: &str) -> Result<()>;

    async fn set_input_files(&self, locator: &str, paths: &[String]) -> Result<()>;

    /// PNG bytes
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>>;

    /// Evaluate `script`. With args, `script` must be a function expression
    /// that is invoked with them.
    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value>;

    async fn wait_for_selector(&self, locator: &str, timeout_ms: u64) -> Result<()>;

    async fn bounding_box(&self, locator: &str) -> Result<Option<BoundingBox>>;

    async fn url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    async fn wait_for_timeout(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Wait until the current URL contains `fragment`
    async fn wait_for_url(&self, fragment: &str, timeout_ms: u64) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.url().await?.contains(fragment) {
                return Ok(());
            }
            if start.elapsed() >= Duration::from_millis(timeout_ms) {
                return Err(AgentError::NavigationTimeout(format!(
                    "url never matched '{}' within {}ms",
                    fragment, timeout_ms
                )));
            }
            self.wait_for_timeout(100).await;
        }
    }
}
