use crate::core::config::BrowserConfig;
use crate::core::Page;
use crate::dom::BoundingBox;
use crate::errors::{AgentError, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::{CaptureScreenshotFormatOption, Viewport};
use headless_chrome::{Browser, Element, LaunchOptions, Tab};
use serde_json::{json, Value};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const BOUNDING_BOX_SCRIPT: &str = r#"(loc) => {
    const el = loc.startsWith('xpath=')
        ? document.evaluate(loc.slice(6), document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue
        : document.querySelector(loc);
    if (!el) return null;
    const r = el.getBoundingClientRect();
    return { x: r.x, y: r.y, width: r.width, height: r.height };
}"#;

const DOCUMENT_SIZE_SCRIPT: &str =
    "({ width: document.documentElement.scrollWidth, height: document.documentElement.scrollHeight })";

/// A launched Chrome process. Pages stay usable only while this is alive.
pub struct ChromeBrowser {
    browser: Browser,
    config: BrowserConfig,
}

impl ChromeBrowser {
    pub fn launch(config: &BrowserConfig) -> Result<Self> {
        let window_size_arg = format!("--window-size={},{}", config.viewport.width, config.viewport.height);
        let user_agent_arg = config.user_agent.as_ref().map(|ua| format!("--user-agent={}", ua));

        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(&window_size_arg),
        ];
        if let Some(ref ua_arg) = user_agent_arg {
            args.push(OsStr::new(ua_arg));
        }
        if config.disable_images {
            args.push(OsStr::new("--blink-settings=imagesEnabled=false"));
        }
        for arg in &config.args {
            args.push(OsStr::new(arg));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .args(args)
            .idle_browser_timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AgentError::LaunchFailed(e.to_string()))?;

        let browser = Browser::new(launch_options).map_err(|e| AgentError::LaunchFailed(e.to_string()))?;
        info!(headless = config.headless, "chrome launched");

        Ok(Self {
            browser,
            config: config.clone(),
        })
    }

    pub fn new_page(&self) -> Result<ChromePage> {
        let tab = self.browser.new_tab().map_err(AgentError::browser)?;
        let default_timeout = Duration::from_millis(self.config.timeout_ms);
        tab.set_default_timeout(default_timeout);
        Ok(ChromePage { tab, default_timeout })
    }
}

/// [`Page`] over one Chrome tab.
pub struct ChromePage {
    tab: Arc<Tab>,
    default_timeout: Duration,
}

impl ChromePage {
    fn find(&self, locator: &str, timeout_ms: u64) -> Result<Element<'_>> {
        let timeout = Duration::from_millis(timeout_ms);
        let found = match locator.strip_prefix("xpath=") {
            Some(xpath) => self.tab.wait_for_xpath_with_custom_timeout(xpath, timeout),
            None => self.tab.wait_for_element_with_custom_timeout(locator, timeout),
        };
        found.map_err(|e| AgentError::ElementNotFound(format!("{}: {}", locator, e)))
    }

    fn decode(value: Option<Value>) -> Result<Value> {
        match value {
            Some(Value::String(encoded)) => Ok(serde_json::from_str(&encoded)?),
            _ => Ok(Value::Null),
        }
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn goto(&self, url: &str, timeout_ms: u64) -> Result<()> {
        debug!(url, "navigating");
        self.tab.set_default_timeout(Duration::from_millis(timeout_ms));
        let navigated = self
            .tab
            .navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated().map(|_| ()));
        self.tab.set_default_timeout(self.default_timeout);
        navigated.map_err(|e| {
            let message = e.to_string();
            let lowered = message.to_lowercase();
            if lowered.contains("timeout") || lowered.contains("timed out") {
                AgentError::NavigationTimeout(format!("{}: {}", url, message))
            } else {
                AgentError::Browser(message)
            }
        })
    }

    async fn click(&self, locator: &str, timeout_ms: u64) -> Result<()> {
        self.find(locator, timeout_ms)?.click().map_err(AgentError::browser)?;
        Ok(())
    }

    async fn fill(&self, locator: &str, text: &str, timeout_ms: u64) -> Result<()> {
        let element = self.find(locator, timeout_ms)?;
        element
            .call_js_fn("function() { this.focus(); this.value = ''; }", vec![], false)
            .map_err(AgentError::browser)?;
        element.type_into(text).map_err(AgentError::browser)?;
        Ok(())
    }

    async fn press(&self, key: &str) -> Result<()> {
        self.tab.press_key(key).map_err(AgentError::browser)?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.tab.type_str(text).map_err(AgentError::browser)?;
        Ok(())
    }

    async fn hover(&self, locator: &str) -> Result<()> {
        self.find(locator, self.default_timeout.as_millis() as u64)?
            .move_mouse_over()
            .map_err(AgentError::browser)?;
        Ok(())
    }

    async fn select_option(&self, locator: &str, value: &str) -> Result<()> {
        self.find(locator, self.default_timeout.as_millis() as u64)?
            .call_js_fn(
                "function(v) { this.value = v; this.dispatchEvent(new Event('change', { bubbles: true })); }",
                vec![json!(value)],
                false,
            )
            .map_err(AgentError::browser)?;
        Ok(())
    }

    async fn set_input_files(&self, locator: &str, paths: &[String]) -> Result<()> {
        let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
        self.find(locator, self.default_timeout.as_millis() as u64)?
            .set_input_files(&paths)
            .map_err(AgentError::browser)?;
        Ok(())
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        let clip = if full_page {
            let size = self.evaluate(DOCUMENT_SIZE_SCRIPT, vec![]).await?;
            Some(Viewport {
                x: 0.0,
                y: 0.0,
                width: size["width"].as_f64().unwrap_or(1280.0),
                height: size["height"].as_f64().unwrap_or(720.0),
                scale: 1.0,
            })
        } else {
            None
        };
        self.tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, clip, true)
            .map_err(AgentError::browser)
    }

    /// Results travel through `JSON.stringify`, so anything returned must
    /// be JSON-serialisable. Scripts that are not a single expression fall
    /// back to a raw evaluation that only yields primitive values.
    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        if !args.is_empty() {
            let args = args.iter().map(Value::to_string).collect::<Vec<_>>().join(", ");
            let expression = format!("JSON.stringify(({})({}) ?? null)", script, args);
            let result = self.tab.evaluate(&expression, true).map_err(AgentError::browser)?;
            return Self::decode(result.value);
        }

        let wrapped = format!("JSON.stringify(({}) ?? null)", script);
        match self.tab.evaluate(&wrapped, true) {
            Ok(result) if matches!(result.value, Some(Value::String(_))) => Self::decode(result.value),
            _ => {
                let result = self.tab.evaluate(script, true).map_err(AgentError::browser)?;
                Ok(result.value.unwrap_or(Value::Null))
            }
        }
    }

    async fn wait_for_selector(&self, locator: &str, timeout_ms: u64) -> Result<()> {
        self.find(locator, timeout_ms).map(|_| ())
    }

    async fn bounding_box(&self, locator: &str) -> Result<Option<BoundingBox>> {
        let rect = self.evaluate(BOUNDING_BOX_SCRIPT, vec![json!(locator)]).await?;
        if rect.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(rect)?))
    }

    async fn url(&self) -> Result<String> {
        Ok(self.tab.get_url())
    }

    async fn title(&self) -> Result<String> {
        self.tab.get_title().map_err(AgentError::browser)
    }
}
