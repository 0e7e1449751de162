//! Actions that find their target by description instead of selector.

use crate::actions::base::{ActionDefinition, ActionHandler, ActionResult, AgentContext, ParamType};
use crate::actions::registry::ActionRegistry;
use crate::auth::{AttemptOutcome, AuthCascade, AuthResult, StrategyAttempt};
use crate::browser::navigation::NavigationManager;
use crate::core::config::SessionConfig;
use crate::dom::{DomElement, DomProcessor, IndexedDom};
use crate::errors::RegistryError;
use crate::scorer::ElementScorer;
use crate::security::GateCheck;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const IDENTIFIER_DESCRIPTIONS: &[&str] = &["email", "username", "login"];
const PASSWORD_DESCRIPTIONS: &[&str] = &["password"];
const SUBMIT_DESCRIPTIONS: &[&str] = &["sign in button", "log in button", "submit button", "continue button"];

/// Shared collaborators of the smart actions.
#[derive(Clone)]
pub struct SmartEnv {
    pub scorer: Arc<ElementScorer>,
    pub processor: Arc<DomProcessor>,
    pub cascade: Arc<AuthCascade>,
    pub session: SessionConfig,
    pub settle_ms: u64,
    pub url_change_timeout_ms: u64,
}

enum Located {
    Scored { element: DomElement, confidence: u8 },
    Fallback(String),
}

impl Located {
    fn locator(&self) -> String {
        match self {
            Located::Scored { element, .. } => element.locator(),
            Located::Fallback(locator) => locator.clone(),
        }
    }

    fn annotate(&self, result: ActionResult) -> ActionResult {
        match self {
            Located::Scored { element, confidence } => result
                .with_element_index(element.index)
                .with_data(json!({ "confidence": confidence, "matched": element.describe(60) })),
            Located::Fallback(locator) => result.with_data(json!({ "fallback": locator })),
        }
    }
}

fn looks_like_selector(description: &str) -> bool {
    description.starts_with('#')
        || description.starts_with('.')
        || description.starts_with('[')
        || description.starts_with("xpath=")
}

/// Scorer first; below threshold, plain text search, then the description
/// itself when it reads as a selector.
fn locate(scorer: &ElementScorer, dom: &IndexedDom, description: &str, screenshot: Option<&[u8]>) -> Option<Located> {
    if let Some(best) = scorer.find_element(dom, description, screenshot) {
        debug!(description, confidence = best.confidence, reasons = ?best.reasons, "scored match");
        return Some(Located::Scored {
            element: best.element,
            confidence: best.confidence,
        });
    }
    if let Some(element) = dom
        .find_by_text(description)
        .into_iter()
        .find(|e| e.is_visible && e.is_interactive)
    {
        return Some(Located::Fallback(element.locator()));
    }
    if looks_like_selector(description) {
        return Some(Located::Fallback(description.to_string()));
    }
    None
}

async fn screenshot_if_asked(params: &Value, context: &AgentContext) -> Option<Vec<u8>> {
    if params.get("use_screenshot").and_then(|v| v.as_bool()) != Some(true) {
        return None;
    }
    context.page.screenshot(false).await.ok()
}

pub struct SmartClick {
    env: SmartEnv,
}

#[async_trait]
impl ActionHandler for SmartClick {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let description = params.get("description").and_then(|v| v.as_str()).unwrap_or_default();
        let screenshot = screenshot_if_asked(params, context).await;
        let target = match locate(&self.env.scorer, &context.dom, description, screenshot.as_deref()) {
            Some(t) => t,
            None => return ActionResult::failure(format!("ElementNotFound: nothing matches '{}'", description)),
        };
        match context
            .page
            .click(&target.locator(), self.env.session.element_timeout_ms)
            .await
        {
            Ok(()) => target.annotate(ActionResult::success()),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct SmartType {
    env: SmartEnv,
}

#[async_trait]
impl ActionHandler for SmartType {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let description = params.get("description").and_then(|v| v.as_str()).unwrap_or_default();
        let text = params.get("text").and_then(|v| v.as_str()).unwrap_or_default();
        let screenshot = screenshot_if_asked(params, context).await;
        let target = match locate(&self.env.scorer, &context.dom, description, screenshot.as_deref()) {
            Some(t) => t,
            None => return ActionResult::failure(format!("ElementNotFound: nothing matches '{}'", description)),
        };
        match context
            .page
            .fill(&target.locator(), text, self.env.session.element_timeout_ms)
            .await
        {
            Ok(()) => target.annotate(ActionResult::success()),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct SmartLogin {
    env: SmartEnv,
}

impl SmartLogin {
    fn best_of<'a>(
        &self,
        dom: &'a IndexedDom,
        descriptions: &[&str],
        exclude: &[usize],
    ) -> Option<&'a DomElement> {
        let threshold = self.env.scorer.config().login_threshold;
        descriptions.iter().find_map(|description| {
            self.env
                .scorer
                .rank(dom, description, None)
                .into_iter()
                .find(|s| !exclude.contains(&s.element.index))
                .filter(|s| s.confidence >= threshold)
                .and_then(|s| dom.by_index(s.element.index))
        })
    }

    /// Fill identifier and password and click submit, all found by score.
    /// `Err` carries why the direct path could not be completed.
    async fn direct(
        &self,
        context: &AgentContext,
        email: &str,
        password: &str,
    ) -> std::result::Result<crate::auth::Verdict, String> {
        let dom = context.dom.clone();
        let secret = self
            .best_of(&dom, PASSWORD_DESCRIPTIONS, &[])
            .ok_or("no password field above the login threshold")?;
        let identifier = self
            .best_of(&dom, IDENTIFIER_DESCRIPTIONS, &[secret.index])
            .ok_or("no identifier field above the login threshold")?;
        let submit = self
            .best_of(&dom, SUBMIT_DESCRIPTIONS, &[secret.index, identifier.index])
            .ok_or("no submit control above the login threshold")?;

        let page = context.page.as_ref();
        let before = page.url().await.map_err(|e| e.to_string())?;
        let timeout = self.env.session.element_timeout_ms;
        page.fill(&identifier.locator(), email, timeout)
            .await
            .map_err(|e| e.to_string())?;
        page.fill(&secret.locator(), password, timeout)
            .await
            .map_err(|e| e.to_string())?;
        page.click(&submit.locator(), timeout)
            .await
            .map_err(|e| e.to_string())?;
        info!(
            identifier = identifier.index,
            password = secret.index,
            submit = submit.index,
            "submitted login form by score"
        );

        NavigationManager::settle_after_submit(
            page,
            &before,
            self.env.url_change_timeout_ms,
            self.env.settle_ms,
        )
        .await;
        let verdict = self
            .env
            .cascade
            .oracle()
            .verify(page)
            .await
            .map_err(|e| format!("verification error: {}", e))?;
        if verdict.success {
            Ok(verdict)
        } else {
            Err(verdict.detail)
        }
    }
}

#[async_trait]
impl ActionHandler for SmartLogin {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let email = params.get("email").and_then(|v| v.as_str()).unwrap_or_default();
        let password = params.get("password").and_then(|v| v.as_str()).unwrap_or_default();
        let debug = params.get("debug").and_then(|v| v.as_bool()).unwrap_or(false);

        if let Some(url) = params.get("url").and_then(|v| v.as_str()) {
            let url = NavigationManager::resolve_url(&context.state.current_url, url);
            if let Err(e) = NavigationManager::goto_with_retry(context.page.as_ref(), &url, &self.env.session).await {
                return ActionResult::failure(e.to_string());
            }
        }
        if let Err(e) = context.refresh_dom(&self.env.processor).await {
            return ActionResult::failure(e.to_string());
        }

        let started = Instant::now();
        let mut auth = match self.direct(context, email, password).await {
            Ok(verdict) => AuthResult {
                success: true,
                strategy: Some("smart_login".to_string()),
                verification_method: Some(verdict.method),
                attempts: vec![StrategyAttempt {
                    strategy: "smart_login".to_string(),
                    outcome: AttemptOutcome::Verified,
                    cause: None,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }],
            },
            Err(cause) => {
                info!(%cause, "scored login did not authenticate, running strategy cascade");
                let direct_attempt = StrategyAttempt {
                    strategy: "smart_login".to_string(),
                    outcome: AttemptOutcome::VerificationFailed,
                    cause: Some(cause),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                let mut cascaded = self
                    .env
                    .cascade
                    .run(context.page.as_ref(), email, password, debug)
                    .await;
                cascaded.attempts.insert(0, direct_attempt);
                cascaded
            }
        };

        if let Err(e) = context.refresh_dom(&self.env.processor).await {
            auth.attempts.push(StrategyAttempt {
                strategy: "snapshot".to_string(),
                outcome: AttemptOutcome::StrategyError,
                cause: Some(e.to_string()),
                elapsed_ms: 0,
            });
        }

        let data = serde_json::to_value(&auth).unwrap_or(Value::Null);
        if auth.success {
            ActionResult::success_with_data(data)
        } else {
            ActionResult::failure(format!("AuthenticationFailure: {}", auth.failure_summary())).with_data(data)
        }
    }
}

pub fn register_smart(registry: &mut ActionRegistry, env: SmartEnv) -> Result<(), RegistryError> {
    registry.register(
        ActionDefinition::new("smart_click", "Click the element best matching a description")
            .param("description", ParamType::String, true, "e.g. 'sign in button'")
            .param("use_screenshot", ParamType::Boolean, false, "Score against a fresh screenshot")
            .example(json!({"description": "Add to cart button"})),
        SmartClick { env: env.clone() },
    )?;
    registry.register(
        ActionDefinition::new("smart_type", "Type into the field best matching a description")
            .param("description", ParamType::String, true, "e.g. 'email field'")
            .param("text", ParamType::String, true, "Text to type")
            .param("use_screenshot", ParamType::Boolean, false, "Score against a fresh screenshot")
            .gated("text", GateCheck::Text)
            .example(json!({"description": "search box", "text": "rust"})),
        SmartType { env: env.clone() },
    )?;
    registry.register(
        ActionDefinition::new(
            "smart_login",
            "Log in with credentials, falling back through every login strategy",
        )
        .param("email", ParamType::String, true, "Email or username")
        .param("password", ParamType::String, true, "Password")
        .param("url", ParamType::String, false, "Login page to open first")
        .param("debug", ParamType::Boolean, false, "Log each strategy step")
        .gated("email", GateCheck::Text)
        .gated("url", GateCheck::Navigation),
        SmartLogin { env },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Config, DomConfig};
    use crate::testing::{MockPage, Trigger};

    fn env(config: &Config) -> SmartEnv {
        let processor = Arc::new(DomProcessor::new(DomConfig::default()));
        SmartEnv {
            scorer: Arc::new(ElementScorer::new(config.scorer.clone(), config.browser.viewport.clone())),
            cascade: Arc::new(AuthCascade::new(&config.auth, &config.session, processor.clone())),
            processor,
            session: config.session.clone(),
            settle_ms: 0,
            url_change_timeout_ms: config.auth.url_change_timeout_ms,
        }
    }

    async fn context_for(page: Arc<MockPage>) -> AgentContext {
        let dom = DomProcessor::new(DomConfig::default())
            .index_page(page.as_ref())
            .await
            .unwrap();
        AgentContext::new(page, dom)
    }

    #[tokio::test]
    async fn smart_type_and_click_by_description() {
        let html = r#"<html><body>
            <input type="search" name="q" placeholder="Search products">
            <button>Search</button><a href="/cart">Cart</a></body></html>"#;
        let page = Arc::new(MockPage::new("http://localhost/", html));
        let mut registry = ActionRegistry::new();
        register_smart(&mut registry, env(&Config::default())).unwrap();
        let mut context = context_for(page.clone()).await;

        let typed = registry
            .execute("smart_type", json!({"description": "search box", "text": "boots"}), &mut context)
            .await
            .unwrap();
        assert!(typed.success, "{:?}", typed.error);
        assert_eq!(page.filled_value("input[name='q']").as_deref(), Some("boots"));

        let clicked = registry
            .execute("smart_click", json!({"description": "cart link"}), &mut context)
            .await
            .unwrap();
        assert!(clicked.success, "{:?}", clicked.error);
        assert_eq!(clicked.element_index, Some(2));
    }

    #[tokio::test]
    async fn smart_click_reports_missing_target() {
        let page = Arc::new(MockPage::new("http://localhost/", "<html><body><p>Empty</p></body></html>"));
        let mut registry = ActionRegistry::new();
        register_smart(&mut registry, env(&Config::default())).unwrap();
        let mut context = context_for(page.clone()).await;
        let result = registry
            .execute("smart_click", json!({"description": "checkout button"}), &mut context)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error_message().starts_with("ElementNotFound"));
    }

    #[tokio::test]
    async fn smart_login_falls_back_to_cascade() {
        // No submit control: the scored path cannot finish, form detection can.
        let html = r#"<html><body><form>
            <input type="text" name="user"><input type="password" name="pass">
        </form></body></html>"#;
        let page = Arc::new(
            MockPage::new("http://localhost/login", html).on(
                Trigger::Script("requestSubmit".into()),
                "http://localhost/home",
                "<html><body><h1>Welcome</h1></body></html>",
            ),
        );
        let mut registry = ActionRegistry::new();
        register_smart(&mut registry, env(&Config::default())).unwrap();
        let mut context = context_for(page.clone()).await;

        let result = registry
            .execute("smart_login", json!({"email": "me", "password": "pw"}), &mut context)
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        let auth: AuthResult = serde_json::from_value(result.data.unwrap()).unwrap();
        assert_eq!(auth.strategy.as_deref(), Some("form_detection"));
        assert_eq!(auth.attempts[0].strategy, "smart_login");
        assert!(auth
            .attempts[0]
            .cause
            .as_deref()
            .unwrap()
            .contains("no submit control"));
        assert_eq!(context.dom.url, "http://localhost/home");
    }

    fn gated_registry() -> ActionRegistry {
        let mut registry =
            ActionRegistry::new().with_security_gate(Arc::new(crate::security::SecurityGate::default()));
        register_smart(&mut registry, env(&Config::default())).unwrap();
        registry
    }

    #[tokio::test]
    async fn smart_type_text_is_screened() {
        let html = r#"<html><body><input type="search" name="q" placeholder="Search"></body></html>"#;
        let page = Arc::new(MockPage::new("http://localhost/", html));
        let registry = gated_registry();
        let mut context = context_for(page.clone()).await;

        let result = registry
            .execute(
                "smart_type",
                json!({"description": "search box", "text": "<script>alert(document.cookie)</script>"}),
                &mut context,
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error_message().starts_with("SecurityPolicyViolation"));
        assert!(page.calls().is_empty());
        assert_eq!(page.filled_value("input[name='q']"), None);
    }

    #[tokio::test]
    async fn smart_login_url_is_screened() {
        let page = Arc::new(MockPage::new("http://localhost/", "<html><body></body></html>"));
        let registry = gated_registry();
        let mut context = context_for(page.clone()).await;

        let result = registry
            .execute(
                "smart_login",
                json!({"email": "me", "password": "pw", "url": "file:///etc/passwd"}),
                &mut context,
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error_message().contains("scheme 'file'"));
        assert!(page.calls().is_empty());
        assert_eq!(page.current_url(), "http://localhost/");
    }
}
