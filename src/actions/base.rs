use crate::core::Page;
use crate::dom::{DomProcessor, IndexedDom};
use crate::errors::Result;
use crate::security::GateCheck;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Result of an action execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
    /// Base64 PNG
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_index: Option<usize>,
    pub execution_time_ms: u64,
}

impl ActionResult {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn success_with_data(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Self::default()
        }
    }

    /// A failed result always carries a non-empty error.
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.trim().is_empty() {
            "action failed without a reported cause".to_string()
        } else {
            error
        };
        Self {
            success: false,
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_extracted_content(mut self, content: impl Into<String>) -> Self {
        self.extracted_content = Some(content.into());
        self
    }

    pub fn with_screenshot(mut self, base64_png: String) -> Self {
        self.screenshot = Some(base64_png);
        self
    }

    pub fn with_element_index(mut self, index: usize) -> Self {
        self.element_index = Some(index);
        self
    }

    pub fn with_execution_time(mut self, time_ms: u64) -> Self {
        self.execution_time_ms = time_ms;
        self
    }

    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_u64() || value.is_i64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
}

/// Schema of a named action. Also what the planner is shown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: BTreeMap<String, ParamSpec>,
    pub examples: Vec<Value>,
    /// Actions that cannot change the page skip the post-step re-index.
    #[serde(skip)]
    pub read_only: bool,
    /// Parameters screened by the security gate before dispatch.
    #[serde(skip)]
    pub gated: Vec<(String, GateCheck)>,
}

impl ActionDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            examples: Vec::new(),
            read_only: false,
            gated: Vec::new(),
        }
    }

    pub fn param(
        mut self,
        name: &str,
        param_type: ParamType,
        required: bool,
        description: &str,
    ) -> Self {
        self.parameters.insert(
            name.to_string(),
            ParamSpec {
                param_type,
                required,
                description: description.to_string(),
            },
        );
        self
    }

    pub fn example(mut self, example: Value) -> Self {
        self.examples.push(example);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn gated(mut self, param: &str, check: GateCheck) -> Self {
        self.gated.push((param.to_string(), check));
        self
    }

    /// Required parameters present, declared parameters of the right
    /// primitive type. Undeclared keys are ignored.
    pub fn validate(&self, params: &Value) -> std::result::Result<(), String> {
        let empty = serde_json::Map::new();
        let object = match params {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => return Err(format!("parameters must be an object, got {}", other)),
        };

        for (name, spec) in &self.parameters {
            match object.get(name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(format!(
                        "missing required parameter '{}' for action '{}'",
                        name, self.name
                    ));
                }
                Some(value) if !value.is_null() && !spec.param_type.accepts(value) => {
                    return Err(format!(
                        "parameter '{}' of action '{}' must be {:?}, got {}",
                        name, self.name, spec.param_type, value
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Prompt rendering: name, description, parameter list, one example.
    pub fn render(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|(name, spec)| {
                format!(
                    "{}{}: {:?}",
                    name,
                    if spec.required { "" } else { "?" },
                    spec.param_type
                )
                .to_lowercase()
            })
            .collect::<Vec<_>>()
            .join(", ");
        let mut line = format!("- {}({}): {}", self.name, params, self.description);
        if let Some(example) = self.examples.first() {
            line.push_str(&format!(" e.g. {}", example));
        }
        line
    }
}

/// Per-task mutable state owned by one running agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub memory: HashMap<String, Value>,
    pub file_system: HashMap<String, String>,
    pub current_url: String,
}

/// Everything a handler may touch while running.
pub struct AgentContext {
    pub page: Arc<dyn Page>,
    /// Latest snapshot of the page.
    pub dom: Arc<IndexedDom>,
    /// Snapshot the current plan was generated against. Index references
    /// in that plan are reconciled from here into `dom`.
    pub plan_dom: Option<Arc<IndexedDom>>,
    pub state: AgentState,
}

impl AgentContext {
    pub fn new(page: Arc<dyn Page>, dom: IndexedDom) -> Self {
        let current_url = dom.url.clone();
        Self {
            page,
            dom: Arc::new(dom),
            plan_dom: None,
            state: AgentState {
                current_url,
                ..AgentState::default()
            },
        }
    }

    /// Take a fresh snapshot and make it current.
    pub async fn refresh_dom(&mut self, processor: &DomProcessor) -> Result<()> {
        let dom = processor.index_page(self.page.as_ref()).await?;
        self.state.current_url = dom.url.clone();
        self.dom = Arc::new(dom);
        Ok(())
    }

    /// Pin the current snapshot as the one the upcoming plan refers to.
    pub fn pin_plan_dom(&mut self) {
        self.plan_dom = Some(self.dom.clone());
    }
}

/// Executes one registered action. Expected failures (element missing,
/// timeout) come back as `ActionResult::failure`, never as a panic.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, params: &Value, context: &mut AgentContext) -> ActionResult;
}
