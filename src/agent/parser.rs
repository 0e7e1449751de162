use crate::dom::element::truncate;
use crate::errors::{AgentError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Step kinds a plan may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Fill,
    Goto,
    Press,
    Wait,
    WaitFor,
    Screenshot,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Goto,
        ActionKind::Click,
        ActionKind::Fill,
        ActionKind::Press,
        ActionKind::Wait,
        ActionKind::WaitFor,
        ActionKind::Screenshot,
    ];

    /// Registry action that carries out this step.
    pub fn registry_action(&self) -> &'static str {
        match self {
            ActionKind::Goto => "navigate",
            ActionKind::Click => "click",
            ActionKind::Fill => "type",
            ActionKind::Press => "press_key",
            ActionKind::Wait => "wait",
            ActionKind::WaitFor => "wait_for",
            ActionKind::Screenshot => "screenshot",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Goto => "goto",
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Press => "press",
            ActionKind::Wait => "wait",
            ActionKind::WaitFor => "wait_for",
            ActionKind::Screenshot => "screenshot",
        }
    }
}

/// One step of a model-produced plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserAction {
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Element index from the snapshot shown to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// A registry invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

impl ActionCall {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

impl BrowserAction {
    pub fn to_call(&self) -> ActionCall {
        let mut params = Map::new();
        let target = |params: &mut Map<String, Value>| {
            if let Some(selector) = &self.selector {
                params.insert("selector".into(), json!(selector));
            }
            if let Some(index) = self.index {
                params.insert("index".into(), json!(index));
            }
        };

        match self.action {
            ActionKind::Goto => {
                if let Some(url) = self.value.as_ref().or(self.selector.as_ref()) {
                    params.insert("url".into(), json!(url));
                }
            }
            ActionKind::Click => target(&mut params),
            ActionKind::Fill => {
                target(&mut params);
                if let Some(value) = &self.value {
                    params.insert("text".into(), json!(value));
                }
            }
            ActionKind::Press => {
                if let Some(key) = &self.value {
                    params.insert("key".into(), json!(key));
                }
            }
            ActionKind::Wait => {
                let ms = self
                    .timeout
                    .or_else(|| self.value.as_deref().and_then(|v| v.trim().parse().ok()))
                    .unwrap_or(1000);
                params.insert("ms".into(), json!(ms));
            }
            ActionKind::WaitFor => {
                if let Some(selector) = &self.selector {
                    params.insert("selector".into(), json!(selector));
                }
                if let Some(timeout) = self.timeout {
                    params.insert("timeout".into(), json!(timeout));
                }
            }
            ActionKind::Screenshot => {}
        }

        ActionCall::new(self.action.registry_action(), Value::Object(params))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanShape {
    List(Vec<BrowserAction>),
    Wrapped { actions: Vec<BrowserAction> },
}

fn parse_candidate(text: &str) -> Option<Vec<BrowserAction>> {
    match serde_json::from_str::<PlanShape>(text.trim()).ok()? {
        PlanShape::List(actions) | PlanShape::Wrapped { actions } => Some(actions),
    }
}

fn fenced_blocks(response: &str) -> Vec<&str> {
    match Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)```") {
        Ok(re) => re
            .captures_iter(response)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn bracketed(response: &str) -> Option<&str> {
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    (end > start).then(|| &response[start..=end])
}

/// Pull a plan out of a model response, trying in order: a fenced JSON
/// block, the whole response (array or `{"actions": [...]}`), then the
/// outermost `[...]` span. Anything else, including an empty plan, is a
/// [`AgentError::ModelResponseParse`].
pub fn parse_plan(response: &str) -> Result<Vec<BrowserAction>> {
    let plan = fenced_blocks(response)
        .into_iter()
        .find_map(parse_candidate)
        .or_else(|| parse_candidate(response))
        .or_else(|| bracketed(response).and_then(parse_candidate));

    match plan {
        Some(actions) if !actions.is_empty() => Ok(actions),
        Some(_) => Err(AgentError::ModelResponseParse("plan contained no actions".to_string())),
        None => Err(AgentError::ModelResponseParse(truncate(response.trim(), 200))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r##"[{"action": "goto", "value": "/login"}, {"action": "fill", "selector": "#email", "value": "a@b.c"}, {"action": "click", "index": 3}]"##;

    #[test]
    fn three_response_shapes_agree() {
        let fenced = format!("Here is the plan:\n```json\n{}\n```\nGood luck.", PLAN);
        let wrapped = format!("{{\"actions\": {}}}", PLAN);
        let embedded = format!("Sure! {} That should do it.", PLAN);

        let expected = parse_plan(PLAN).unwrap();
        assert_eq!(expected.len(), 3);
        assert_eq!(parse_plan(&fenced).unwrap(), expected);
        assert_eq!(parse_plan(&wrapped).unwrap(), expected);
        assert_eq!(parse_plan(&embedded).unwrap(), expected);
    }

    #[test]
    fn prose_is_a_parse_error() {
        let err = parse_plan("I would click the login button.").unwrap_err();
        assert!(matches!(err, AgentError::ModelResponseParse(_)));
        assert!(matches!(parse_plan("[]").unwrap_err(), AgentError::ModelResponseParse(_)));
    }

    #[test]
    fn unknown_step_kind_rejects_the_plan() {
        let err = parse_plan(r#"[{"action": "click", "selector": "a"}, {"action": "teleport"}]"#).unwrap_err();
        assert!(matches!(err, AgentError::ModelResponseParse(_)));
    }

    #[test]
    fn steps_map_to_registry_calls() {
        let plan = parse_plan(PLAN).unwrap();
        assert_eq!(plan[0].to_call(), ActionCall::new("navigate", json!({"url": "/login"})));
        assert_eq!(
            plan[1].to_call(),
            ActionCall::new("type", json!({"selector": "#email", "text": "a@b.c"}))
        );
        assert_eq!(plan[2].to_call(), ActionCall::new("click", json!({"index": 3})));

        let wait = BrowserAction {
            action: ActionKind::Wait,
            selector: None,
            index: None,
            value: Some("250".into()),
            timeout: None,
        };
        assert_eq!(wait.to_call(), ActionCall::new("wait", json!({"ms": 250})));
    }
}
