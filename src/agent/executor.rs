use crate::actions::{ActionRegistry, ActionResult, AgentContext};
use crate::agent::parser::ActionCall;
use crate::dom::DomProcessor;
use crate::errors::Result;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pseudo-classes a `:` after an id may legitimately introduce.
const PSEUDO_CLASSES: &[&str] = &[
    "hover",
    "focus",
    "focus-within",
    "focus-visible",
    "active",
    "visited",
    "nth-child",
    "nth-of-type",
    "nth-last-child",
    "first-child",
    "last-child",
    "first-of-type",
    "last-of-type",
    "only-child",
    "not",
    "has",
    "is",
    "where",
    "checked",
    "disabled",
    "enabled",
    "empty",
    "visible",
    "required",
    "optional",
    "valid",
    "invalid",
    "in-range",
    "out-of-range",
    "placeholder-shown",
    "read-only",
    "read-write",
    "default",
    "indeterminate",
    "autofill",
    "target",
    "root",
    "link",
    "any-link",
    "defined",
    "lang",
    "dir",
    "only-of-type",
    "nth-last-of-type",
    "first-line",
    "first-letter",
    "before",
    "after",
    "placeholder",
    "marker",
    "selection",
];

fn starts_with_pseudo(rest: &str) -> bool {
    // `::before` and friends
    if rest.starts_with(':') {
        return true;
    }
    PSEUDO_CLASSES.iter().any(|p| {
        rest.starts_with(p)
            && rest[p.len()..]
                .chars()
                .next()
                .map(|c| !(c.is_alphanumeric() || c == '-' || c == '_'))
                .unwrap_or(true)
    })
}

/// Rewrite selectors browsers reject into equivalent ones they accept.
///
/// * Colons inside an id (React's `#:r2:`) become `\:` unless they start a
///   known pseudo-class.
/// * A jQuery-style `tag:contains("text")` becomes an XPath locator.
pub fn escape_selector(selector: &str) -> String {
    if selector.starts_with("xpath=") {
        return selector.to_string();
    }

    if selector.contains(":contains(") {
        if let Ok(re) = Regex::new(r#"^\s*([A-Za-z][\w-]*|\*)?\s*:contains\(\s*['"]?(.*?)['"]?\s*\)\s*$"#) {
            if let Some(caps) = re.captures(selector) {
                let tag = caps.get(1).map(|m| m.as_str()).unwrap_or("*");
                let text = caps.get(2).map(|m| m.as_str()).unwrap_or_default().replace('\'', "");
                return format!("xpath=//{}[contains(normalize-space(.), '{}')]", tag, text);
            }
        }
        warn!(selector, "cannot translate :contains() in a compound selector");
    }

    let mut out = String::with_capacity(selector.len() + 4);
    let mut in_id = false;
    let mut chars = selector.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some((_, escaped)) = chars.next() {
                    out.push(escaped);
                }
            }
            '#' => {
                in_id = true;
                out.push(c);
            }
            ':' if in_id => {
                if starts_with_pseudo(&selector[i + 1..]) {
                    in_id = false;
                    out.push(c);
                } else {
                    out.push_str("\\:");
                }
            }
            ' ' | '>' | '+' | '~' | ',' | '.' | '[' | '(' | ')' => {
                in_id = false;
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Where a plan stopped.
#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    pub step: usize,
    pub action: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub action: String,
    pub result: ActionResult,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub steps: Vec<StepRecord>,
    pub failure: Option<StepFailure>,
    /// A `done` step ended the plan
    pub finished: bool,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn extracted(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.result.extracted_content.clone())
            .collect()
    }
}

/// Runs registry calls strictly in order, stopping at the first failure.
pub struct PlanExecutor {
    registry: Arc<ActionRegistry>,
    processor: Arc<DomProcessor>,
    max_steps: usize,
}

impl PlanExecutor {
    pub fn new(registry: Arc<ActionRegistry>, processor: Arc<DomProcessor>, max_steps: usize) -> Self {
        Self {
            registry,
            processor,
            max_steps,
        }
    }

    fn prepare(call: &ActionCall) -> Value {
        let mut params = call.params.clone();
        if let Some(Value::String(selector)) = params.get_mut("selector") {
            let escaped = escape_selector(selector);
            if escaped != *selector {
                debug!(from = %selector, to = %escaped, "escaped selector");
                *selector = escaped;
            }
        }
        params
    }

    /// Execute `calls` against `context`. Only an unregistered action name
    /// is an `Err`; every other failure is reported in the returned report.
    pub async fn run(&self, calls: &[ActionCall], context: &mut AgentContext) -> Result<ExecutionReport> {
        let mut report = ExecutionReport::default();

        if calls.len() > self.max_steps {
            report.failure = Some(StepFailure {
                step: 0,
                action: String::new(),
                message: format!(
                    "plan has {} steps, more than the limit of {}",
                    calls.len(),
                    self.max_steps
                ),
            });
            return Ok(report);
        }

        for (step, call) in calls.iter().enumerate() {
            let params = Self::prepare(call);
            let result = self.registry.execute(&call.name, params, context).await?;
            let success = result.success;
            let message = result.error_message().to_string();
            report.steps.push(StepRecord {
                step,
                action: call.name.clone(),
                result,
            });

            if !success {
                warn!(step, action = %call.name, %message, "step failed, aborting plan");
                report.failure = Some(StepFailure {
                    step,
                    action: call.name.clone(),
                    message,
                });
                return Ok(report);
            }

            let read_only = self
                .registry
                .definition(&call.name)
                .map(|d| d.read_only)
                .unwrap_or(false);
            if !read_only {
                if let Err(e) = context.refresh_dom(&self.processor).await {
                    report.failure = Some(StepFailure {
                        step,
                        action: call.name.clone(),
                        message: format!("could not re-index page: {}", e),
                    });
                    return Ok(report);
                }
            }

            if call.name == "done" {
                report.finished = true;
                break;
            }
        }

        info!(steps = report.steps.len(), "plan executed");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn react_ids_are_escaped() {
        assert_eq!(escape_selector("#:r2:"), r"#\:r2\:");
        assert_eq!(escape_selector("form #:r2: > input"), r"form #\:r2\: > input");
    }

    #[test]
    fn pseudo_classes_survive() {
        assert_eq!(escape_selector("#menu:hover"), "#menu:hover");
        assert_eq!(escape_selector("#list li:nth-child(2)"), "#list li:nth-child(2)");
        assert_eq!(escape_selector("#a:not(.b)"), "#a:not(.b)");
        assert_eq!(escape_selector(r"#\:r2\:"), r"#\:r2\:");
        assert_eq!(escape_selector("input:focus"), "input:focus");
        assert_eq!(escape_selector("#email:required"), "#email:required");
        assert_eq!(escape_selector("#email:invalid"), "#email:invalid");
        assert_eq!(escape_selector("#q:placeholder-shown"), "#q:placeholder-shown");
        assert_eq!(escape_selector("#badge::before"), "#badge::before");
        assert_eq!(escape_selector("#:r5:-label"), r"#\:r5\:-label");
    }

    #[test]
    fn jquery_contains_becomes_xpath() {
        assert_eq!(
            escape_selector("button:contains('Sign in')"),
            "xpath=//button[contains(normalize-space(.), 'Sign in')]"
        );
        assert_eq!(
            escape_selector(":contains(\"Next\")"),
            "xpath=//*[contains(normalize-space(.), 'Next')]"
        );
    }
}
