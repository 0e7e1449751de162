use crate::actions::ActionRegistry;
use crate::agent::parser::{parse_plan, ActionKind, BrowserAction};
use crate::core::config::AgentConfig;
use crate::core::Page;
use crate::dom::IndexedDom;
use crate::errors::Result;
use crate::llm::LanguageModel;
use std::sync::Arc;
use tracing::{debug, warn};

const RESPONSE_FORMAT: &str = r#"Respond with a JSON array of steps and nothing else. Each step is
{"action": "<kind>", "selector": "<css selector>", "index": <element index>, "value": "<text, url or key>", "timeout": <ms>}
Only "action" is required. Prefer "index" from the element list over "selector".
Example: [{"action": "fill", "index": 3, "value": "hello"}, {"action": "press", "value": "Enter"}]"#;

/// Turns a task and a snapshot into a model prompt and the model's answer
/// into steps.
pub struct Planner {
    model: Arc<dyn LanguageModel>,
    config: AgentConfig,
    max_text: usize,
}

impl Planner {
    pub fn new(model: Arc<dyn LanguageModel>, config: AgentConfig, max_text: usize) -> Self {
        Self {
            model,
            config,
            max_text,
        }
    }

    /// Step kinds with the registry action each maps to.
    pub fn vocabulary(registry: &ActionRegistry) -> String {
        ActionKind::ALL
            .iter()
            .map(|kind| match registry.definition(kind.registry_action()) {
                Some(definition) => format!("- {}, runs {}", kind.name(), definition.render().trim_start_matches("- ")),
                None => format!("- {}", kind.name()),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whatever the snapshot does not fit into `prompt_budget_chars` after
    /// the fixed sections is dropped, element by element.
    pub fn build_prompt(
        &self,
        task: &str,
        vocabulary: &str,
        dom: &IndexedDom,
        previous_failure: Option<&str>,
    ) -> String {
        let mut head = format!(
            "You control a web browser. Task: {}\n\nAvailable step kinds:\n{}\n\n{}\n",
            task, vocabulary, RESPONSE_FORMAT
        );
        if let Some(failure) = previous_failure {
            head.push_str(&format!(
                "\nThe previous plan failed: {}\nPlan again from the current page.\n",
                failure
            ));
        }
        let page_header = format!("\nCurrent page: {} ({})\nElements:\n", dom.url, dom.title);

        let used = head.len() + page_header.len();
        let remaining = self.config.prompt_budget_chars.saturating_sub(used);
        let elements = dom.render(self.max_text, remaining);

        let mut prompt = head;
        prompt.push_str(&page_header);
        prompt.push_str(&elements);
        prompt
    }

    /// Ask the model for a plan. A response with no usable plan is a
    /// `ModelResponseParse` error and nothing from it runs.
    pub async fn plan(
        &self,
        page: &dyn Page,
        task: &str,
        vocabulary: &str,
        dom: &IndexedDom,
        previous_failure: Option<&str>,
    ) -> Result<Vec<BrowserAction>> {
        let prompt = self.build_prompt(task, vocabulary, dom, previous_failure);

        let screenshot = if self.config.include_screenshot {
            match page.screenshot(false).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(error = %e, "planning without screenshot");
                    None
                }
            }
        } else {
            None
        };

        debug!(chars = prompt.len(), screenshot = screenshot.is_some(), "requesting plan");
        let response = self.model.complete(&prompt, screenshot.as_deref()).await?;
        parse_plan(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::DomElement;
    use crate::testing::ScriptedModel;

    fn big_dom() -> IndexedDom {
        let elements = (0..200)
            .map(|i| DomElement::new(i, "button").with_text(format!("Button number {}", i)))
            .collect();
        IndexedDom::new("http://localhost/".into(), "Home".into(), elements)
    }

    #[test]
    fn prompt_respects_budget() {
        let config = AgentConfig {
            prompt_budget_chars: 2000,
            ..AgentConfig::default()
        };
        let planner = Planner::new(Arc::new(ScriptedModel::default()), config, 100);
        let prompt = planner.build_prompt("press every button", "- click: Click", &big_dom(), Some("step 2 failed"));

        assert!(prompt.len() <= 2000 + 64, "prompt was {} chars", prompt.len());
        assert!(prompt.contains("press every button"));
        assert!(prompt.contains("step 2 failed"));
        assert!(prompt.contains("more elements omitted"));
    }

    #[tokio::test]
    async fn plan_parses_model_output() {
        let model = Arc::new(ScriptedModel::new([r#"```json
[{"action": "click", "index": 0}]
```"#]));
        let planner = Planner::new(model.clone(), AgentConfig::default(), 100);
        let page = crate::testing::MockPage::new("http://localhost/", "<html></html>");

        let plan = planner.plan(&page, "click", "", &big_dom(), None).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].action, ActionKind::Click);
        assert!(model.prompts()[0].contains("[0]"));
    }
}
