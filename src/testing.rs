//! In-memory doubles for driving the agent without a browser.

use crate::core::config::DomConfig;
use crate::core::Page;
use crate::dom::processor::xpath_for;
use crate::dom::{BoundingBox, DomProcessor};
use crate::errors::{AgentError, Result};
use crate::llm::LanguageModel;
use crate::utils::javascript::{
    BODY_TEXT_SCRIPT, EXTRACT_TEXT_SCRIPT, FOCUSED_ELEMENT_SCRIPT, GEOMETRY_SCRIPT, OUTER_HTML_SCRIPT,
};
use crate::utils::screenshot::png_header;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// What makes a [`MockPage`] move to another document.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Clicking whatever element this locator resolves to
    Click(String),
    /// Pressing this key
    Press(String),
    /// Evaluating a script containing this text
    Script(String),
}

#[derive(Debug, Clone)]
struct Transition {
    trigger: Trigger,
    url: String,
    html: String,
}

#[derive(Debug, Default)]
struct MockState {
    url: String,
    html: String,
    routes: HashMap<String, String>,
    transitions: Vec<Transition>,
    geometry: HashMap<String, Value>,
    script_results: Vec<(String, Value)>,
    calls: Vec<String>,
    filled: HashMap<String, String>,
    typed: Vec<String>,
    /// XPath of the focused element
    focus: Option<String>,
    missed: Vec<String>,
    waits: Vec<u64>,
    snapshots: usize,
}

/// Scripted stand-in for a browser page. Serves HTML, answers the snapshot
/// scripts, records every interaction and switches documents when a
/// [`Trigger`] fires.
pub struct MockPage {
    state: Mutex<MockState>,
}

impl MockPage {
    pub fn new(url: &str, html: &str) -> Self {
        let mut routes = HashMap::new();
        routes.insert(url.to_string(), html.to_string());
        Self {
            state: Mutex::new(MockState {
                url: url.to_string(),
                html: html.to_string(),
                routes,
                ..MockState::default()
            }),
        }
    }

    /// Document served when `goto` targets `url`.
    pub fn with_route(self, url: &str, html: &str) -> Self {
        self.lock().routes.insert(url.to_string(), html.to_string());
        self
    }

    pub fn on(self, trigger: Trigger, url: &str, html: &str) -> Self {
        let mut state = self.lock();
        state.routes.insert(url.to_string(), html.to_string());
        state.transitions.push(Transition {
            trigger,
            url: url.to_string(),
            html: html.to_string(),
        });
        drop(state);
        self
    }

    /// Override the geometry reported for `xpath`. `Value::Null` makes the
    /// node look detached.
    pub fn with_geometry(self, xpath: &str, geometry: Value) -> Self {
        self.lock().geometry.insert(xpath.to_string(), geometry);
        self
    }

    pub fn with_script_result(self, needle: &str, result: Value) -> Self {
        self.lock().script_results.push((needle.to_string(), result));
        self
    }

    /// Interactions in order, e.g. `click #submit` or `press Enter`.
    /// Snapshot scripts are not recorded.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn filled_value(&self, locator: &str) -> Option<String> {
        let state = self.lock();
        let xpath = resolve(&state.html, locator)?;
        state.filled.get(&xpath).cloned()
    }

    pub fn typed(&self) -> Vec<String> {
        self.lock().typed.clone()
    }

    /// Locators `fill` could not resolve.
    pub fn missed(&self) -> Vec<String> {
        self.lock().missed.clone()
    }

    /// Every `wait_for_timeout` duration requested, in order.
    pub fn waits(&self) -> Vec<u64> {
        self.lock().waits.clone()
    }

    pub fn snapshot_count(&self) -> usize {
        self.lock().snapshots
    }

    pub fn current_url(&self) -> String {
        self.lock().url.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require(state: &MockState, locator: &str) -> Result<String> {
        resolve(&state.html, locator).ok_or_else(|| AgentError::ElementNotFound(locator.to_string()))
    }

    fn fire(state: &mut MockState, matches: impl Fn(&Trigger, &MockState) -> bool) {
        let fired = state
            .transitions
            .iter()
            .find(|t| matches(&t.trigger, &*state))
            .cloned();
        if let Some(transition) = fired {
            state.url = transition.url;
            state.html = transition.html;
            state.filled.clear();
            state.focus = None;
        }
    }
}

#[async_trait]
impl Page for MockPage {
    async fn goto(&self, url: &str, _timeout_ms: u64) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("goto {}", url));
        let target = match url::Url::parse(&state.url).and_then(|base| base.join(url)) {
            Ok(joined) => joined.to_string(),
            Err(_) => url.to_string(),
        };
        let html = state
            .routes
            .get(&target)
            .or_else(|| state.routes.get(url))
            .cloned()
            .ok_or_else(|| AgentError::Browser(format!("net::ERR_NAME_NOT_RESOLVED at {}", url)))?;
        state.url = target;
        state.html = html;
        state.filled.clear();
        state.focus = None;
        Ok(())
    }

    async fn click(&self, locator: &str, _timeout_ms: u64) -> Result<()> {
        let mut state = self.lock();
        let xpath = Self::require(&state, locator)?;
        state.calls.push(format!("click {}", locator));
        state.focus = focus_order(&state.html)
            .into_iter()
            .find(|f| f.xpath == xpath)
            .map(|f| f.xpath);
        Self::fire(&mut state, |trigger, s| match trigger {
            Trigger::Click(target) => resolve(&s.html, target).as_deref() == Some(xpath.as_str()),
            _ => false,
        });
        Ok(())
    }

    async fn fill(&self, locator: &str, text: &str, _timeout_ms: u64) -> Result<()> {
        let mut state = self.lock();
        let xpath = match Self::require(&state, locator) {
            Ok(xpath) => xpath,
            Err(e) => {
                state.missed.push(locator.to_string());
                return Err(e);
            }
        };
        state.calls.push(format!("fill {}", locator));
        state.focus = Some(xpath.clone());
        state.filled.insert(xpath, text.to_string());
        Ok(())
    }

    async fn press(&self, key: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("press {}", key));
        if key == "Tab" {
            let order = focus_order(&state.html);
            let next = match state.focus.as_ref().and_then(|xp| order.iter().position(|f| &f.xpath == xp)) {
                Some(i) => (i + 1) % order.len(),
                None => 0,
            };
            state.focus = order.get(next).map(|f| f.xpath.clone());
        }
        Self::fire(&mut state, |trigger, _| matches!(trigger, Trigger::Press(k) if k == key));
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push("type_text".to_string());
        state.typed.push(text.to_string());
        let target = state.focus.clone().filter(|xp| {
            focus_order(&state.html)
                .iter()
                .any(|f| &f.xpath == xp && matches!(f.tag.as_str(), "input" | "textarea"))
        });
        if let Some(xpath) = target {
            state.filled.insert(xpath, text.to_string());
        }
        Ok(())
    }

    async fn hover(&self, locator: &str) -> Result<()> {
        let mut state = self.lock();
        Self::require(&state, locator)?;
        state.calls.push(format!("hover {}", locator));
        Ok(())
    }

    async fn select_option(&self, locator: &str, value: &str) -> Result<()> {
        let mut state = self.lock();
        let xpath = Self::require(&state, locator)?;
        state.calls.push(format!("select {}", locator));
        state.filled.insert(xpath, value.to_string());
        Ok(())
    }

    async fn set_input_files(&self, locator: &str, paths: &[String]) -> Result<()> {
        let mut state = self.lock();
        let xpath = Self::require(&state, locator)?;
        state.calls.push(format!("upload {}", locator));
        state.filled.insert(xpath, paths.join(","));
        Ok(())
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>> {
        self.lock().calls.push("screenshot".to_string());
        Ok(png_header(1280, 720))
    }

    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        let mut state = self.lock();

        if script == OUTER_HTML_SCRIPT {
            state.snapshots += 1;
            return Ok(Value::String(state.html.clone()));
        }
        if script == GEOMETRY_SCRIPT {
            let xpaths: Vec<String> = args
                .first()
                .cloned()
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            let order = layout_order(&state.html);
            let boxes = xpaths
                .iter()
                .map(|xp| match state.geometry.get(xp) {
                    Some(overridden) => overridden.clone(),
                    None => default_geometry(&order, xp),
                })
                .collect();
            return Ok(Value::Array(boxes));
        }

        if script == FOCUSED_ELEMENT_SCRIPT {
            let focused = state
                .focus
                .as_ref()
                .and_then(|xp| focus_order(&state.html).into_iter().find(|f| &f.xpath == xp));
            return Ok(match focused {
                Some(f) => json!({ "tag": f.tag, "type": f.input_type }),
                None => Value::Null,
            });
        }

        state.calls.push(format!("evaluate {}", script.chars().take(40).collect::<String>()));

        if script == BODY_TEXT_SCRIPT {
            return Ok(Value::String(body_text(&state.html).to_lowercase()));
        }
        if script == EXTRACT_TEXT_SCRIPT {
            let selector = args.first().and_then(|v| v.as_str()).unwrap_or("body");
            return Ok(text_at(&state.html, selector).map(Value::String).unwrap_or(Value::Null));
        }

        let scripted = state
            .script_results
            .iter()
            .find(|(needle, _)| script.contains(needle.as_str()))
            .map(|(_, v)| v.clone());
        Self::fire(&mut state, |trigger, _| {
            matches!(trigger, Trigger::Script(needle) if script.contains(needle.as_str()))
        });
        Ok(scripted.unwrap_or(Value::Null))
    }

    async fn wait_for_selector(&self, locator: &str, _timeout_ms: u64) -> Result<()> {
        let state = self.lock();
        Self::require(&state, locator).map(|_| ())
    }

    async fn bounding_box(&self, locator: &str) -> Result<Option<BoundingBox>> {
        let state = self.lock();
        let xpath = match resolve(&state.html, locator) {
            Some(xp) => xp,
            None => return Ok(None),
        };
        let geometry = match state.geometry.get(&xpath) {
            Some(overridden) => overridden.clone(),
            None => default_geometry(&layout_order(&state.html), &xpath),
        };
        Ok(serde_json::from_value(geometry).ok())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.lock().url.clone())
    }

    async fn title(&self) -> Result<String> {
        Ok(text_at(&self.lock().html, "title").unwrap_or_default())
    }

    async fn wait_for_timeout(&self, ms: u64) {
        self.lock().waits.push(ms);
        tokio::task::yield_now().await;
    }

    async fn wait_for_url(&self, fragment: &str, timeout_ms: u64) -> Result<()> {
        if self.lock().url.contains(fragment) {
            Ok(())
        } else {
            Err(AgentError::NavigationTimeout(format!(
                "url never matched '{}' within {}ms",
                fragment, timeout_ms
            )))
        }
    }
}

/// XPath of the element a locator selects in `html`.
fn resolve(html: &str, locator: &str) -> Option<String> {
    let document = Html::parse_document(html);
    match locator.strip_prefix("xpath=") {
        Some(xpath) => document
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .map(xpath_for)
            .find(|candidate| candidate == xpath),
        None => {
            let selector = Selector::parse(locator).ok()?;
            document.select(&selector).next().map(xpath_for)
        }
    }
}

struct Focusable {
    xpath: String,
    tag: String,
    input_type: String,
}

/// Elements Tab visits, in document order.
fn focus_order(html: &str) -> Vec<Focusable> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href], button, input, select, textarea") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    document
        .select(&selector)
        .filter(|el| el.value().attr("type") != Some("hidden") && el.value().attr("disabled").is_none())
        .map(|el| Focusable {
            xpath: xpath_for(el),
            tag: el.value().name().to_string(),
            input_type: el.value().attr("type").unwrap_or_default().to_lowercase(),
        })
        .collect()
}

fn layout_order(html: &str) -> Vec<String> {
    DomProcessor::new(DomConfig::default())
        .parse_html(html)
        .into_iter()
        .map(|n| n.xpath)
        .collect()
}

/// Indexed nodes are stacked top to bottom in document order.
fn default_geometry(order: &[String], xpath: &str) -> Value {
    let slot = order.iter().position(|x| x == xpath).unwrap_or(0);
    json!({
        "x": 100.0,
        "y": 20.0 + 40.0 * slot as f64,
        "width": 240.0,
        "height": 32.0,
        "displayed": true,
    })
}

fn text_at(html: &str, selector: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next().map(|el| {
        el.text()
            .flat_map(|t| t.split_whitespace())
            .collect::<Vec<_>>()
            .join(" ")
    })
}

fn body_text(html: &str) -> String {
    text_at(html, "body").unwrap_or_default()
}

/// Language model that replays canned responses in order.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str, _image: Option<&[u8]>) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .ok_or_else(|| AgentError::Llm("no scripted responses left".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>Login</title></head><body>
        <form><input id="user" type="email"><button id="go">Go</button></form>
    </body></html>"#;

    #[tokio::test]
    async fn click_trigger_matches_by_element() {
        let page = MockPage::new("http://localhost/login", PAGE).on(
            Trigger::Click("#go".into()),
            "http://localhost/home",
            "<html><body><p>Home</p></body></html>",
        );
        page.click("xpath=/html/body/form/button", 1000).await.unwrap();
        assert_eq!(page.current_url(), "http://localhost/home");
        assert_eq!(page.calls(), vec!["click xpath=/html/body/form/button"]);
    }

    #[tokio::test]
    async fn geometry_override_hides_nodes() {
        let page = MockPage::new("http://localhost/login", PAGE)
            .with_geometry("/html/body/form/button", Value::Null);
        let dom = DomProcessor::new(DomConfig::default())
            .index_page(&page)
            .await
            .unwrap();
        assert_eq!(page.snapshot_count(), 1);
        assert!(dom.elements.iter().all(|e| e.tag != "button"));
        assert!(dom.elements.iter().any(|e| e.tag == "input"));
    }

    #[tokio::test]
    async fn unknown_locator_is_element_not_found() {
        let page = MockPage::new("http://localhost/login", PAGE);
        let err = page.click("#missing", 1000).await.unwrap_err();
        assert!(matches!(err, AgentError::ElementNotFound(_)));
        assert!(page.calls().is_empty());
    }

    #[tokio::test]
    async fn relative_goto_uses_routes() {
        let page = MockPage::new("http://localhost/", "<html></html>")
            .with_route("http://localhost/login", PAGE);
        page.goto("/login", 1000).await.unwrap();
        assert_eq!(page.title().await.unwrap(), "Login");
        assert!(page.goto("/nowhere", 1000).await.is_err());
    }

    #[tokio::test]
    async fn scripted_model_runs_dry() {
        let model = ScriptedModel::new(["one"]);
        assert_eq!(model.complete("p", None).await.unwrap(), "one");
        assert!(model.complete("p", None).await.is_err());
        assert_eq!(model.prompts().len(), 2);
    }
}
