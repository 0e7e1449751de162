use crate::auth::AuthStrategy;
use crate::core::config::SessionConfig;
use crate::core::Page;
use crate::dom::{DomElement, DomProcessor, IndexedDom};
use crate::errors::Result;
use crate::utils::javascript::{
    BODY_TEXT_SCRIPT, FOCUSED_ELEMENT_SCRIPT, OUTER_HTML_SCRIPT, SUBMIT_FORM_SCRIPT,
};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

const SUBMIT_VERBS: &[&str] = &["sign in", "log in", "login", "signin", "submit", "continue"];
const NEXT_VERBS: &[&str] = &["next", "continue"];
const LOGIN_KEYWORDS: &[&str] = &["sign in", "log in", "login", "password", "username", "email"];

/// Identifier selectors, most specific first.
const IDENTIFIER_SELECTORS: &[&str] = &[
    "input[type='email']",
    "input[autocomplete='username']",
    "input[autocomplete='email']",
    "input[name*='email']",
    "input[id*='email']",
    "input[name*='user']",
    "input[id*='user']",
    "input[name*='login']",
    "input[type='text']",
    "input:not([type])",
];

const PASSWORD_SELECTORS: &[&str] = &[
    "input[type='password']",
    "input[name*='pass']",
    "input[autocomplete='current-password']",
];

/// What every strategy needs besides the page.
#[derive(Clone)]
pub struct StrategyEnv {
    pub processor: Arc<DomProcessor>,
    pub session: SessionConfig,
}

impl StrategyEnv {
    pub fn new(processor: Arc<DomProcessor>, session: SessionConfig) -> Self {
        Self { processor, session }
    }
}

fn step(debug: bool, strategy: &str, message: &str) {
    if debug {
        info!(strategy, "{}", message);
    } else {
        debug!(strategy, "{}", message);
    }
}

fn first_password(dom: &IndexedDom) -> Option<&DomElement> {
    dom.visible_interactive().find(|e| e.is_password_input())
}

fn matches_any(text: &str, needles: &[&str]) -> bool {
    let text = text.to_lowercase();
    needles.iter().any(|n| text.contains(n))
}

/// Tab presses allowed while looking for each field.
const MAX_TABS: usize = 15;

#[derive(Debug, Deserialize)]
struct Focused {
    tag: String,
    #[serde(rename = "type", default)]
    input_type: String,
}

impl Focused {
    fn takes_identifier(&self) -> bool {
        self.tag == "input" && matches!(self.input_type.as_str(), "" | "text" | "email" | "tel")
    }

    fn takes_password(&self) -> bool {
        self.tag == "input" && self.input_type == "password"
    }
}

/// Clicks the body, then walks keyboard focus: Tab until an identifier
/// input has focus, type, Tab until the password input has focus, type,
/// Enter from the password field to submit its form.
pub struct TabOrderStrategy {
    env: StrategyEnv,
}

impl TabOrderStrategy {
    pub fn new(env: StrategyEnv) -> Self {
        Self { env }
    }

    /// Press Tab until `wanted` accepts the focused element. `false` once
    /// [`MAX_TABS`] presses found nothing.
    async fn tab_to(&self, page: &dyn Page, wanted: fn(&Focused) -> bool) -> Result<bool> {
        for _ in 0..MAX_TABS {
            page.press("Tab").await?;
            let focused = page.evaluate(FOCUSED_ELEMENT_SCRIPT, vec![]).await?;
            let focused: Option<Focused> = serde_json::from_value(focused).unwrap_or(None);
            if focused.as_ref().map(wanted).unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl AuthStrategy for TabOrderStrategy {
    fn name(&self) -> &'static str {
        "tab_order"
    }

    async fn execute(&self, page: &dyn Page, email: &str, password: &str, debug: bool) -> Result<bool> {
        let dom = self.env.processor.index_page(page).await?;
        if !dom.shows_login_form() {
            step(debug, self.name(), "no identifier and password pair on page");
            return Ok(false);
        }

        page.click("body", self.env.session.element_timeout_ms).await?;
        if !self.tab_to(page, Focused::takes_identifier).await? {
            step(debug, self.name(), "no identifier input in tab order");
            return Ok(false);
        }
        page.type_text(email).await?;
        step(debug, self.name(), "typed identifier");
        if !self.tab_to(page, Focused::takes_password).await? {
            step(debug, self.name(), "no password input after the identifier");
            return Ok(false);
        }
        page.type_text(password).await?;
        step(debug, self.name(), "typed password");
        page.press("Enter").await?;
        Ok(true)
    }
}

/// Treats the top-most text input as the identifier and the first password
/// input as the secret, then looks for a submit control below and in line
/// with the last input.
pub struct VisualProximityStrategy {
    env: StrategyEnv,
}

impl VisualProximityStrategy {
    pub fn new(env: StrategyEnv) -> Self {
        Self { env }
    }

    fn submit_below<'a>(dom: &'a IndexedDom, last_input: &DomElement) -> Option<&'a DomElement> {
        let anchor = &last_input.bounding_box;
        let tolerance = anchor.width.max(100.0);
        dom.visible_interactive()
            .filter(|e| e.is_button_like())
            .filter(|e| e.bounding_box.y >= anchor.bottom())
            .filter(|e| (e.bounding_box.center_x() - anchor.center_x()).abs() <= tolerance)
            .min_by(|a, b| {
                a.bounding_box
                    .y
                    .partial_cmp(&b.bounding_box.y)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

#[async_trait]
impl AuthStrategy for VisualProximityStrategy {
    fn name(&self) -> &'static str {
        "visual_proximity"
    }

    async fn execute(&self, page: &dyn Page, email: &str, password: &str, debug: bool) -> Result<bool> {
        let dom = self.env.processor.index_page(page).await?;

        let mut inputs: Vec<&DomElement> = dom
            .visible_interactive()
            .filter(|e| e.is_text_entry() || e.is_password_input())
            .collect();
        inputs.sort_by(|a, b| {
            a.bounding_box
                .y
                .partial_cmp(&b.bounding_box.y)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let identifier = match inputs.iter().find(|e| e.is_text_entry()) {
            Some(e) => *e,
            None => {
                step(debug, self.name(), "no text inputs");
                return Ok(false);
            }
        };
        let secret = inputs
            .iter()
            .find(|e| e.is_password_input())
            .or_else(|| inputs.iter().find(|e| e.index != identifier.index))
            .copied();
        let secret = match secret {
            Some(e) => e,
            None => {
                step(debug, self.name(), "no second input");
                return Ok(false);
            }
        };

        let timeout = self.env.session.element_timeout_ms;
        page.fill(&identifier.locator(), email, timeout).await?;
        page.fill(&secret.locator(), password, timeout).await?;
        step(debug, self.name(), "filled fields by position");

        let last_input = if secret.bounding_box.y >= identifier.bounding_box.y {
            secret
        } else {
            identifier
        };
        match Self::submit_below(&dom, last_input) {
            Some(submit) => {
                step(debug, self.name(), "clicking aligned submit control");
                page.click(&submit.locator(), timeout).await?;
            }
            None => {
                step(debug, self.name(), "no aligned submit control, pressing Enter");
                page.press("Enter").await?;
            }
        }
        Ok(true)
    }
}

/// Scopes everything to the `<form>` holding a password field.
pub struct FormDetectionStrategy {
    env: StrategyEnv,
}

impl FormDetectionStrategy {
    pub fn new(env: StrategyEnv) -> Self {
        Self { env }
    }
}

#[async_trait]
impl AuthStrategy for FormDetectionStrategy {
    fn name(&self) -> &'static str {
        "form_detection"
    }

    async fn execute(&self, page: &dyn Page, email: &str, password: &str, debug: bool) -> Result<bool> {
        let dom = self.env.processor.index_page(page).await?;

        let found = dom.find_by_tag("form").into_iter().find_map(|form| {
            let secret = dom
                .visible_interactive()
                .find(|e| e.is_password_input() && e.is_descendant_of(form))?;
            Some((form, secret))
        });
        let (form, secret) = match found {
            Some(pair) => pair,
            None => {
                step(debug, self.name(), "no form with a password field");
                return Ok(false);
            }
        };

        let timeout = self.env.session.element_timeout_ms;
        if let Some(identifier) = dom
            .visible_interactive()
            .find(|e| e.is_text_entry() && e.is_descendant_of(form))
        {
            page.fill(&identifier.locator(), email, timeout).await?;
        }
        page.fill(&secret.locator(), password, timeout).await?;
        step(debug, self.name(), "filled form fields");

        let submit = dom
            .visible_interactive()
            .find(|e| e.is_submit_control() && e.is_descendant_of(form));
        match submit {
            Some(control) => {
                step(debug, self.name(), "clicking the form's submit control");
                page.click(&control.locator(), timeout).await?;
            }
            None => {
                step(debug, self.name(), "submitting the form directly");
                page.evaluate(SUBMIT_FORM_SCRIPT, vec![json!(form.xpath)]).await?;
            }
        }
        Ok(true)
    }
}

/// Keyword-driven: checks the page reads like a login page, fills fields
/// from a prioritized selector list and clicks the control whose text looks
/// like a submit verb. Handles identifier-first flows where the password
/// field only appears after a "Next" step.
pub struct HeuristicStrategy {
    env: StrategyEnv,
}

impl HeuristicStrategy {
    pub fn new(env: StrategyEnv) -> Self {
        Self { env }
    }

    /// The subset of `selectors` matching something in the current
    /// markup, so absent ones never wait out the element timeout.
    async fn present<'s>(page: &dyn Page, selectors: &[&'s str]) -> Result<Vec<&'s str>> {
        let html = page.evaluate(OUTER_HTML_SCRIPT, vec![]).await?;
        let document = Html::parse_document(html.as_str().unwrap_or_default());
        Ok(selectors
            .iter()
            .copied()
            .filter(|selector| {
                Selector::parse(selector)
                    .map(|parsed| document.select(&parsed).next().is_some())
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn fill_first(&self, page: &dyn Page, selectors: &[&str], text: &str) -> Result<Option<String>> {
        for selector in Self::present(page, selectors).await? {
            if page.fill(selector, text, self.env.session.element_timeout_ms).await.is_ok() {
                return Ok(Some(selector.to_string()));
            }
        }
        Ok(None)
    }

    async fn click_verb(&self, page: &dyn Page, verbs: &[&str]) -> Result<bool> {
        let dom = self.env.processor.index_page(page).await?;
        let control = dom
            .visible_interactive()
            .find(|e| e.is_button_like() && matches_any(&e.accessible_text(), verbs))
            .or_else(|| {
                dom.visible_interactive()
                    .find(|e| e.tag == "a" && matches_any(&e.accessible_text(), verbs))
            });
        match control {
            Some(control) => {
                page.click(&control.locator(), self.env.session.element_timeout_ms)
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl AuthStrategy for HeuristicStrategy {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn execute(&self, page: &dyn Page, email: &str, password: &str, debug: bool) -> Result<bool> {
        let body = page.evaluate(BODY_TEXT_SCRIPT, vec![]).await?;
        let body = body.as_str().unwrap_or_default();
        let dom = self.env.processor.index_page(page).await?;
        if !matches_any(body, LOGIN_KEYWORDS) && first_password(&dom).is_none() {
            step(debug, self.name(), "page does not read like a login page");
            return Ok(false);
        }

        let identifier = self.fill_first(page, IDENTIFIER_SELECTORS, email).await?;
        if let Some(selector) = &identifier {
            step(debug, self.name(), &format!("filled identifier via {}", selector));
        }

        let mut secret = self.fill_first(page, PASSWORD_SELECTORS, password).await?;
        if secret.is_none() && identifier.is_some() {
            step(debug, self.name(), "no password field yet, advancing identifier step");
            if !self.click_verb(page, NEXT_VERBS).await? {
                page.press("Enter").await?;
            }
            page.wait_for_timeout(self.env.session.settle_ms).await;
            secret = self.fill_first(page, PASSWORD_SELECTORS, password).await?;
        }
        if secret.is_none() {
            step(debug, self.name(), "no password field found");
            return Ok(false);
        }

        if !self.click_verb(page, SUBMIT_VERBS).await? {
            step(debug, self.name(), "no submit verb on page, pressing Enter");
            page.press("Enter").await?;
        }
        Ok(true)
    }
}

/// The fixed cascade order.
pub fn default_strategies(env: StrategyEnv) -> Vec<Box<dyn AuthStrategy>> {
    vec![
        Box::new(TabOrderStrategy::new(env.clone())),
        Box::new(VisualProximityStrategy::new(env.clone())),
        Box::new(FormDetectionStrategy::new(env.clone())),
        Box::new(HeuristicStrategy::new(env)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DomConfig;
    use crate::testing::{MockPage, Trigger};

    fn env() -> StrategyEnv {
        StrategyEnv::new(
            Arc::new(DomProcessor::new(DomConfig::default())),
            SessionConfig::default(),
        )
    }

    const LOGIN: &str = r#"<html><body><form id="f">
        <input type="text" name="login"><input type="password" name="pw">
        <button type="submit">Sign in</button>
    </form></body></html>"#;

    #[tokio::test]
    async fn tab_order_types_into_focus_chain() {
        let page = MockPage::new("http://localhost/login", LOGIN);
        let ran = TabOrderStrategy::new(env())
            .execute(&page, "me@x.test", "pw", false)
            .await
            .unwrap();
        assert!(ran);
        assert_eq!(page.typed(), vec!["me@x.test", "pw"]);
        assert_eq!(page.filled_value("input[name='login']").as_deref(), Some("me@x.test"));
        assert_eq!(page.filled_value("input[name='pw']").as_deref(), Some("pw"));
        assert_eq!(page.calls().last().unwrap(), "press Enter");
    }

    #[tokio::test]
    async fn tab_order_skips_links_before_the_form() {
        let html = r#"<html><body>
            <nav><a href="/">Home</a><a href="/help">Help</a></nav>
            <form><input type="email" name="email"><a href="/forgot">Forgot password?</a>
            <input type="password" name="pw"><button type="submit">Sign in</button></form>
        </body></html>"#;
        let page = MockPage::new("http://localhost/login", html);
        let ran = TabOrderStrategy::new(env())
            .execute(&page, "me@x.test", "pw", false)
            .await
            .unwrap();

        assert!(ran);
        assert_eq!(page.filled_value("input[name='email']").as_deref(), Some("me@x.test"));
        assert_eq!(page.filled_value("input[name='pw']").as_deref(), Some("pw"));
        let tabs = page.calls().iter().filter(|c| *c == "press Tab").count();
        assert_eq!(tabs, 5);
    }

    #[tokio::test]
    async fn tab_order_gives_up_without_a_reachable_password() {
        // The password input is disabled, so focus never lands on it.
        let html = r#"<html><body><form>
            <input type="text" name="user"><input type="password" name="pw" disabled>
        </form></body></html>"#;
        let page = MockPage::new("http://localhost/login", html);
        let ran = TabOrderStrategy::new(env())
            .execute(&page, "me", "pw", false)
            .await
            .unwrap();

        assert!(!ran);
        assert!(!page.calls().iter().any(|c| c == "press Enter"));
    }

    #[tokio::test]
    async fn visual_proximity_clicks_aligned_button() {
        let page = MockPage::new("http://localhost/login", LOGIN);
        VisualProximityStrategy::new(env())
            .execute(&page, "me@x.test", "pw", true)
            .await
            .unwrap();
        assert_eq!(page.filled_value("input[name='login']").as_deref(), Some("me@x.test"));
        assert_eq!(page.filled_value("input[name='pw']").as_deref(), Some("pw"));
        assert_eq!(page.calls().last().unwrap(), "click xpath=/html/body/form/button");
    }

    #[tokio::test]
    async fn form_detection_needs_a_form() {
        let page = MockPage::new(
            "http://localhost/login",
            r#"<html><body><input type="text"><input type="password"></body></html>"#,
        );
        let ran = FormDetectionStrategy::new(env())
            .execute(&page, "a", "b", false)
            .await
            .unwrap();
        assert!(!ran);
        assert!(page.calls().is_empty());
    }

    #[tokio::test]
    async fn heuristic_handles_identifier_first_flow() {
        let step_one = r#"<html><body><h1>Sign in</h1>
            <input type="email" name="email"><button type="button">Next</button></body></html>"#;
        let step_two = r#"<html><body><h1>Sign in</h1>
            <input type="password" name="password"><button>Sign in</button></body></html>"#;
        let page = MockPage::new("http://localhost/login", step_one).on(
            Trigger::Click("button[type='button']".into()),
            "http://localhost/login/password",
            step_two,
        );
        let ran = HeuristicStrategy::new(env())
            .execute(&page, "me@x.test", "pw", false)
            .await
            .unwrap();
        assert!(ran);
        assert_eq!(page.filled_value("input[name='password']").as_deref(), Some("pw"));
        // Selectors absent from the markup are never tried.
        assert!(page.missed().is_empty(), "{:?}", page.missed());
    }
}
