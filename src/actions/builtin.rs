use crate::actions::base::{
    ActionDefinition, ActionHandler, ActionResult, AgentContext, ParamType,
};
use crate::actions::registry::ActionRegistry;
use crate::browser::navigation::NavigationManager;
use crate::core::config::SessionConfig;
use crate::errors::RegistryError;
use crate::security::GateCheck;
use crate::utils::javascript::{EXTRACT_TEXT_SCRIPT, SCROLL_SCRIPT};
use crate::utils::screenshot::{save_to_file, take_base64};
use async_trait::async_trait;
use serde_json::{json, Value};

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Locator for the element a step targets, from either a `selector` or an
/// `index` into the snapshot the plan was made against. Index targets are
/// reconciled into the current snapshot so a re-render cannot redirect them.
pub(crate) fn resolve_target(
    params: &Value,
    context: &AgentContext,
) -> std::result::Result<(String, Option<usize>), String> {
    if let Some(selector) = str_param(params, "selector").filter(|s| !s.trim().is_empty()) {
        return Ok((selector.to_string(), None));
    }

    let index = match params.get("index").and_then(|v| v.as_u64()) {
        Some(i) => i as usize,
        None => return Err("ValidationError: either 'selector' or 'index' is required".to_string()),
    };

    let reference = context.plan_dom.as_ref().unwrap_or(&context.dom);
    let stale = reference
        .by_index(index)
        .ok_or_else(|| format!("ElementNotFound: no element with index {}", index))?;
    let current = context.dom.reconcile(stale).ok_or_else(|| {
        format!(
            "ElementNotFound: element [{}] <{}> '{}' is no longer uniquely on the page",
            index,
            stale.tag,
            stale.accessible_text()
        )
    })?;
    Ok((current.locator(), Some(current.index)))
}

fn targeted(definition: ActionDefinition) -> ActionDefinition {
    definition
        .param("selector", ParamType::String, false, "CSS selector or xpath=...")
        .param("index", ParamType::Integer, false, "Element index from the page snapshot")
}

macro_rules! target_or_fail {
    ($params:expr, $context:expr) => {
        match resolve_target($params, $context) {
            Ok(target) => target,
            Err(message) => return ActionResult::failure(message),
        }
    };
}

fn with_index(result: ActionResult, index: Option<usize>) -> ActionResult {
    match index {
        Some(i) => result.with_element_index(i),
        None => result,
    }
}

pub struct Navigate {
    session: SessionConfig,
}

#[async_trait]
impl ActionHandler for Navigate {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let target = str_param(params, "url").unwrap_or_default();
        let url = NavigationManager::resolve_url(&context.state.current_url, target);
        match NavigationManager::goto_with_retry(context.page.as_ref(), &url, &self.session).await {
            Ok(nav) => {
                context.state.current_url = nav.url.clone();
                ActionResult::success_with_data(json!({ "url": nav.url, "attempts": nav.attempts }))
            }
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct Click {
    session: SessionConfig,
}

#[async_trait]
impl ActionHandler for Click {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let (locator, index) = target_or_fail!(params, context);
        match context.page.click(&locator, self.session.element_timeout_ms).await {
            Ok(()) => with_index(ActionResult::success(), index),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct TypeText {
    session: SessionConfig,
}

#[async_trait]
impl ActionHandler for TypeText {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let (locator, index) = target_or_fail!(params, context);
        let text = str_param(params, "text").unwrap_or_default();
        if let Err(e) = context
            .page
            .fill(&locator, text, self.session.element_timeout_ms)
            .await
        {
            return ActionResult::failure(e.to_string());
        }
        if params.get("press_enter").and_then(|v| v.as_bool()) == Some(true) {
            if let Err(e) = context.page.press("Enter").await {
                return ActionResult::failure(e.to_string());
            }
        }
        with_index(ActionResult::success(), index)
    }
}

pub struct PressKey;

#[async_trait]
impl ActionHandler for PressKey {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let key = str_param(params, "key").unwrap_or_default();
        match context.page.press(key).await {
            Ok(()) => ActionResult::success(),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct Hover;

#[async_trait]
impl ActionHandler for Hover {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let (locator, index) = target_or_fail!(params, context);
        match context.page.hover(&locator).await {
            Ok(()) => with_index(ActionResult::success(), index),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct SelectOption;

#[async_trait]
impl ActionHandler for SelectOption {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let (locator, index) = target_or_fail!(params, context);
        let value = str_param(params, "value").unwrap_or_default();
        match context.page.select_option(&locator, value).await {
            Ok(()) => with_index(ActionResult::success(), index),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct Wait;

#[async_trait]
impl ActionHandler for Wait {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let ms = params.get("ms").and_then(|v| v.as_u64()).unwrap_or(1000);
        context.page.wait_for_timeout(ms).await;
        ActionResult::success()
    }
}

pub struct WaitFor {
    session: SessionConfig,
}

#[async_trait]
impl ActionHandler for WaitFor {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let selector = str_param(params, "selector").unwrap_or_default();
        let timeout = params
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.session.element_timeout_ms);
        match context.page.wait_for_selector(selector, timeout).await {
            Ok(()) => ActionResult::success(),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct Screenshot;

#[async_trait]
impl ActionHandler for Screenshot {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let full_page = params.get("full_page").and_then(|v| v.as_bool()).unwrap_or(false);
        if let Some(path) = str_param(params, "path") {
            return match save_to_file(context.page.as_ref(), path, full_page).await {
                Ok(()) => ActionResult::success_with_data(json!({ "path": path })),
                Err(e) => ActionResult::failure(e.to_string()),
            };
        }
        match take_base64(context.page.as_ref(), full_page).await {
            Ok(encoded) => ActionResult::success().with_screenshot(encoded),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct Evaluate;

#[async_trait]
impl ActionHandler for Evaluate {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let script = str_param(params, "script").unwrap_or_default();
        match context.page.evaluate(script, vec![]).await {
            Ok(value) => ActionResult::success_with_data(value),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct UploadFile;

#[async_trait]
impl ActionHandler for UploadFile {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let (locator, index) = target_or_fail!(params, context);
        let path = str_param(params, "path").unwrap_or_default().to_string();
        match context.page.set_input_files(&locator, &[path]).await {
            Ok(()) => with_index(ActionResult::success(), index),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct ExtractText;

#[async_trait]
impl ActionHandler for ExtractText {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let selector = str_param(params, "selector").map(|s| json!(s)).unwrap_or(Value::Null);
        match context.page.evaluate(EXTRACT_TEXT_SCRIPT, vec![selector]).await {
            Ok(Value::String(text)) => ActionResult::success().with_extracted_content(text),
            Ok(_) => ActionResult::failure("ElementNotFound: nothing to extract text from"),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct Scroll;

#[async_trait]
impl ActionHandler for Scroll {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let amount = params.get("amount").and_then(|v| v.as_i64()).unwrap_or(600);
        match context.page.evaluate(SCROLL_SCRIPT, vec![json!(amount)]).await {
            Ok(position) => ActionResult::success_with_data(json!({ "scroll_y": position })),
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }
}

pub struct Remember;

#[async_trait]
impl ActionHandler for Remember {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let key = str_param(params, "key").unwrap_or_default().to_string();
        let value = params.get("value").cloned().unwrap_or(Value::Null);
        context.state.memory.insert(key, value);
        ActionResult::success()
    }
}

pub struct Recall;

#[async_trait]
impl ActionHandler for Recall {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let key = str_param(params, "key").unwrap_or_default();
        match context.state.memory.get(key) {
            Some(Value::String(s)) => ActionResult::success_with_data(json!(s)).with_extracted_content(s.clone()),
            Some(other) => ActionResult::success_with_data(other.clone())
                .with_extracted_content(other.to_string()),
            None => ActionResult::failure(format!("nothing remembered under '{}'", key)),
        }
    }
}

pub struct WriteFile;

#[async_trait]
impl ActionHandler for WriteFile {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let name = str_param(params, "name").unwrap_or_default().to_string();
        let content = str_param(params, "content").unwrap_or_default().to_string();
        let bytes = content.len();
        context.state.file_system.insert(name, content);
        ActionResult::success_with_data(json!({ "bytes": bytes }))
    }
}

pub struct ReadFile;

#[async_trait]
impl ActionHandler for ReadFile {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult {
        let name = str_param(params, "name").unwrap_or_default();
        match context.state.file_system.get(name) {
            Some(content) => ActionResult::success().with_extracted_content(content.clone()),
            None => ActionResult::failure(format!("no file named '{}'", name)),
        }
    }
}

pub struct Done;

#[async_trait]
impl ActionHandler for Done {
    async fn handle(&self, params: &Value, _context: &mut AgentContext) -> ActionResult {
        let message = str_param(params, "message").unwrap_or("task complete");
        ActionResult::success().with_extracted_content(message)
    }
}

/// Register the page and state primitives.
pub fn register_builtin(
    registry: &mut ActionRegistry,
    session: &SessionConfig,
) -> Result<(), RegistryError> {
    registry.register(
        ActionDefinition::new("navigate", "Open a URL, absolute or relative to the current page")
            .param("url", ParamType::String, true, "Target URL")
            .gated("url", GateCheck::Navigation)
            .example(json!({"url": "https://example.com/login"})),
        Navigate { session: session.clone() },
    )?;
    registry.register(
        targeted(ActionDefinition::new("click", "Click an element"))
            .example(json!({"index": 4})),
        Click { session: session.clone() },
    )?;
    registry.register(
        targeted(ActionDefinition::new("type", "Clear a field and type text into it"))
            .param("text", ParamType::String, true, "Text to type")
            .param("press_enter", ParamType::Boolean, false, "Press Enter afterwards")
            .gated("text", GateCheck::Text)
            .example(json!({"selector": "#email", "text": "user@example.com"})),
        TypeText { session: session.clone() },
    )?;
    registry.register(
        ActionDefinition::new("press_key", "Press a key on the focused element")
            .param("key", ParamType::String, true, "Key name such as Enter or Tab")
            .example(json!({"key": "Enter"})),
        PressKey,
    )?;
    registry.register(
        targeted(ActionDefinition::new("hover", "Move the mouse over an element")),
        Hover,
    )?;
    registry.register(
        targeted(ActionDefinition::new("select_option", "Choose an option in a <select>"))
            .param("value", ParamType::String, true, "Option value"),
        SelectOption,
    )?;
    registry.register(
        ActionDefinition::new("wait", "Pause for a number of milliseconds")
            .param("ms", ParamType::Integer, false, "Milliseconds, default 1000")
            .read_only(),
        Wait,
    )?;
    registry.register(
        ActionDefinition::new("wait_for", "Wait until an element appears")
            .param("selector", ParamType::String, true, "CSS selector or xpath=...")
            .param("timeout", ParamType::Integer, false, "Milliseconds")
            .read_only(),
        WaitFor { session: session.clone() },
    )?;
    registry.register(
        ActionDefinition::new("screenshot", "Capture the page as PNG")
            .param("full_page", ParamType::Boolean, false, "Capture beyond the viewport")
            .param("path", ParamType::String, false, "Write the PNG here instead of returning it")
            .read_only(),
        Screenshot,
    )?;
    registry.register(
        ActionDefinition::new("evaluate", "Run a JavaScript expression in the page")
            .param("script", ParamType::String, true, "Expression to evaluate")
            .gated("script", GateCheck::Script),
        Evaluate,
    )?;
    registry.register(
        targeted(ActionDefinition::new("upload_file", "Attach a file to a file input"))
            .param("path", ParamType::String, true, "Local file path")
            .gated("path", GateCheck::Upload),
        UploadFile,
    )?;
    registry.register(
        ActionDefinition::new("extract_text", "Read the visible text of an element or the page")
            .param("selector", ParamType::String, false, "CSS selector, whole page when absent")
            .read_only(),
        ExtractText,
    )?;
    registry.register(
        ActionDefinition::new("scroll", "Scroll vertically")
            .param("amount", ParamType::Integer, false, "Pixels, negative scrolls up"),
        Scroll,
    )?;
    registry.register(
        ActionDefinition::new("remember", "Store a value for later steps")
            .param("key", ParamType::String, true, "Name")
            .param("value", ParamType::String, true, "Value")
            .read_only(),
        Remember,
    )?;
    registry.register(
        ActionDefinition::new("recall", "Read a stored value")
            .param("key", ParamType::String, true, "Name")
            .read_only(),
        Recall,
    )?;
    registry.register(
        ActionDefinition::new("write_file", "Save text into the task's scratch files")
            .param("name", ParamType::String, true, "File name")
            .param("content", ParamType::String, true, "Content")
            .read_only(),
        WriteFile,
    )?;
    registry.register(
        ActionDefinition::new("read_file", "Read a scratch file")
            .param("name", ParamType::String, true, "File name")
            .read_only(),
        ReadFile,
    )?;
    registry.register(
        ActionDefinition::new("done", "Finish the task")
            .param("message", ParamType::String, false, "Summary")
            .read_only(),
        Done,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DomConfig;
    use crate::dom::DomProcessor;
    use crate::testing::MockPage;
    use std::sync::Arc;

    const FORM: &str = r#"<html><body>
        <input id="q" name="q"><button id="go">Search</button>
    </body></html>"#;

    async fn setup(html: &str) -> (Arc<MockPage>, ActionRegistry, AgentContext) {
        let page = Arc::new(MockPage::new("http://localhost/", html));
        let dom = DomProcessor::new(DomConfig::default())
            .index_page(page.as_ref())
            .await
            .unwrap();
        let mut registry = ActionRegistry::new();
        register_builtin(&mut registry, &SessionConfig::default()).unwrap();
        let context = AgentContext::new(page.clone(), dom);
        (page, registry, context)
    }

    #[tokio::test]
    async fn type_by_index_and_press_enter() {
        let (page, registry, mut context) = setup(FORM).await;
        let result = registry
            .execute("type", json!({"index": 0, "text": "rust", "press_enter": true}), &mut context)
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.element_index, Some(0));
        assert_eq!(page.filled_value("#q").as_deref(), Some("rust"));
        assert_eq!(page.calls().last().unwrap(), "press Enter");
    }

    #[tokio::test]
    async fn missing_target_fails_without_browser_calls() {
        let (page, registry, mut context) = setup(FORM).await;
        let result = registry
            .execute("click", json!({}), &mut context)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error_message().contains("'selector' or 'index'"));
        assert!(page.calls().is_empty());
    }

    #[tokio::test]
    async fn stale_index_is_reconciled() {
        let (page, registry, mut context) = setup(FORM).await;
        context.pin_plan_dom();

        // A banner link pushes everything down one index.
        let shifted = r#"<html><body><a href="/promo">Promo</a>
            <input id="q" name="q"><button id="go">Search</button></body></html>"#;
        let moved = MockPage::new("http://localhost/", shifted);
        let dom = DomProcessor::new(DomConfig::default()).index_page(&moved).await.unwrap();
        context.dom = Arc::new(dom);
        context.page = Arc::new(moved);

        let result = registry
            .execute("click", json!({"index": 1}), &mut context)
            .await
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.element_index, Some(2));
        assert!(page.calls().is_empty());
    }

    #[tokio::test]
    async fn memory_and_files_round_trip() {
        let (_page, registry, mut context) = setup(FORM).await;
        registry
            .execute("remember", json!({"key": "order", "value": "A-17"}), &mut context)
            .await
            .unwrap();
        let recalled = registry
            .execute("recall", json!({"key": "order"}), &mut context)
            .await
            .unwrap();
        assert_eq!(recalled.extracted_content.as_deref(), Some("A-17"));

        let missing = registry
            .execute("read_file", json!({"name": "notes.md"}), &mut context)
            .await
            .unwrap();
        assert!(!missing.success);
    }

    #[tokio::test]
    async fn screenshot_inline_or_to_file() {
        let (_page, registry, mut context) = setup(FORM).await;
        let inline = registry
            .execute("screenshot", json!({}), &mut context)
            .await
            .unwrap();
        assert!(inline.screenshot.unwrap().starts_with("iVBORw0KGgo"));

        let path = std::env::temp_dir().join(format!("shot-{}.png", uuid::Uuid::new_v4()));
        let path = path.to_string_lossy().to_string();
        let saved = registry
            .execute("screenshot", json!({"path": path}), &mut context)
            .await
            .unwrap();
        assert!(saved.success, "{:?}", saved.error);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(crate::utils::png_dimensions(&bytes), Some((1280, 720)));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn evaluate_returns_script_value() {
        let page = Arc::new(
            MockPage::new("http://localhost/", FORM).with_script_result("title.length", json!(7)),
        );
        let dom = DomProcessor::new(DomConfig::default())
            .index_page(page.as_ref())
            .await
            .unwrap();
        let mut registry = ActionRegistry::new();
        register_builtin(&mut registry, &SessionConfig::default()).unwrap();
        let mut context = AgentContext::new(page.clone(), dom);

        let result = registry
            .execute("evaluate", json!({"script": "document.title.length"}), &mut context)
            .await
            .unwrap();
        assert_eq!(result.data, Some(json!(7)));
    }

    #[tokio::test]
    async fn extract_text_reads_page() {
        let (_page, registry, mut context) = setup("<html><body><p id=\"m\">Order placed</p></body></html>").await;
        let result = registry
            .execute("extract_text", json!({"selector": "#m"}), &mut context)
            .await
            .unwrap();
        assert_eq!(result.extracted_content.as_deref(), Some("Order placed"));
    }
}
