//! The plan-execute-verify loop.
//!
//! Each attempt captures the page, asks the model for a plan against that
//! snapshot, runs the plan through the registry and checks the outcome.
//! Failed attempts feed their cause into the next prompt until
//! `max_attempts` is used up.

pub mod executor;
pub mod parser;
pub mod planner;

pub use executor::{escape_selector, ExecutionReport, PlanExecutor, StepFailure, StepRecord};
pub use parser::{parse_plan, ActionCall, ActionKind, BrowserAction};
pub use planner::Planner;

use crate::actions::{default_registry, ActionRegistry, AgentContext, SmartEnv};
use crate::auth::{AttemptOutcome, AuthCascade, AuthResult, StrategyAttempt, Verdict};
use crate::core::config::Config;
use crate::core::Page;
use crate::dom::DomProcessor;
use crate::errors::{AgentError, Result};
use crate::llm::LanguageModel;
use crate::scorer::ElementScorer;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

const AUTH_PHRASES: &[&str] = &[
    "log in",
    "login",
    "log-in",
    "sign in",
    "signin",
    "sign-in",
    "authenticate",
];

/// Work handed to [`Agent::run`].
#[derive(Debug, Clone)]
pub enum Task {
    /// Planned by the language model
    Natural(String),
    /// Executed as given, no planning
    Structured(Vec<ActionCall>),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub attempts: u32,
    pub steps_executed: usize,
    /// Last reason an attempt did not succeed
    pub failure: Option<String>,
    /// Oracle verdict for login-type tasks
    pub verdict: Option<Verdict>,
    /// Login result reported by a `smart_login` step
    pub auth: Option<AuthResult>,
    pub extracted: Vec<String>,
    pub final_url: String,
}

/// Whether a task asks to authenticate.
pub fn is_auth_task(task: &str) -> bool {
    let task = task.to_lowercase();
    AUTH_PHRASES.iter().any(|p| task.contains(p))
}

fn describe_failure(failure: &StepFailure) -> String {
    if failure.action.is_empty() {
        failure.message.clone()
    } else {
        format!("step {} ({}) failed: {}", failure.step, failure.action, failure.message)
    }
}

fn auth_from_report(report: &ExecutionReport) -> Option<AuthResult> {
    report
        .steps
        .iter()
        .rev()
        .filter(|s| s.action == "smart_login")
        .find_map(|s| s.result.data.clone())
        .and_then(|data| serde_json::from_value(data).ok())
}

pub struct Agent {
    page: Arc<dyn Page>,
    model: Option<Arc<dyn LanguageModel>>,
    registry: Arc<ActionRegistry>,
    processor: Arc<DomProcessor>,
    cascade: Arc<AuthCascade>,
    config: Config,
    auth_debug: bool,
}

impl Agent {
    /// Agent over `page` with every built-in and smart action registered.
    /// Without a model only structured tasks and the strategy cascade work.
    pub fn new(page: Arc<dyn Page>, model: Option<Arc<dyn LanguageModel>>, config: Config) -> Result<Self> {
        let processor = Arc::new(DomProcessor::new(config.dom.clone()));
        let cascade = Arc::new(AuthCascade::new(&config.auth, &config.session, processor.clone()));
        let env = SmartEnv {
            scorer: Arc::new(ElementScorer::new(config.scorer.clone(), config.browser.viewport.clone())),
            processor: processor.clone(),
            cascade: cascade.clone(),
            session: config.session.clone(),
            settle_ms: config.auth.settle_ms,
            url_change_timeout_ms: config.auth.url_change_timeout_ms,
        };
        let registry = Arc::new(default_registry(&config, env)?);

        Ok(Self {
            page,
            model,
            registry,
            processor,
            cascade,
            config,
            auth_debug: false,
        })
    }

    /// Log every login strategy step at info level.
    pub fn with_auth_debug(mut self, debug: bool) -> Self {
        self.auth_debug = debug;
        self
    }

    pub fn registry(&self) -> Arc<ActionRegistry> {
        self.registry.clone()
    }

    pub async fn run(&self, task: Task) -> Result<TaskOutcome> {
        let dom = self.processor.index_page(self.page.as_ref()).await?;
        let mut context = AgentContext::new(self.page.clone(), dom);
        let executor = PlanExecutor::new(
            self.registry.clone(),
            self.processor.clone(),
            self.config.agent.max_steps,
        );

        let mut outcome = match task {
            Task::Structured(calls) => {
                context.pin_plan_dom();
                let report = executor.run(&calls, &mut context).await?;
                TaskOutcome {
                    success: report.succeeded(),
                    attempts: 1,
                    steps_executed: report.steps.len(),
                    failure: report.failure.as_ref().map(describe_failure),
                    auth: auth_from_report(&report),
                    extracted: report.extracted(),
                    ..TaskOutcome::default()
                }
            }
            Task::Natural(text) => self.run_planned(&text, &executor, &mut context).await?,
        };

        outcome.final_url = self
            .page
            .url()
            .await
            .unwrap_or_else(|_| context.state.current_url.clone());
        if outcome.success {
            info!(attempts = outcome.attempts, steps = outcome.steps_executed, "task succeeded");
        } else {
            error!(attempts = outcome.attempts, failure = ?outcome.failure, "task failed");
        }
        Ok(outcome)
    }

    async fn run_planned(
        &self,
        task: &str,
        executor: &PlanExecutor,
        context: &mut AgentContext,
    ) -> Result<TaskOutcome> {
        let model = self.model.clone().ok_or_else(|| {
            AgentError::Configuration("natural-language tasks need a language model".to_string())
        })?;
        let planner = Planner::new(model, self.config.agent.clone(), self.config.dom.max_text_length);
        let vocabulary = Planner::vocabulary(&self.registry);
        let auth_task = is_auth_task(task);
        let mut outcome = TaskOutcome::default();

        for attempt in 1..=self.config.agent.max_attempts.max(1) {
            outcome.attempts = attempt;
            if attempt > 1 {
                context.refresh_dom(&self.processor).await?;
            }
            context.pin_plan_dom();
            info!(attempt, url = %context.dom.url, elements = context.dom.total_count, "planning");

            let plan = match planner
                .plan(
                    context.page.as_ref(),
                    task,
                    &vocabulary,
                    &context.dom,
                    outcome.failure.as_deref(),
                )
                .await
            {
                Ok(plan) => plan,
                Err(AgentError::ModelResponseParse(response)) => {
                    warn!(attempt, "model response held no plan");
                    outcome.failure = Some(format!("response was not a valid plan: {}", response));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let calls: Vec<ActionCall> = plan.iter().map(BrowserAction::to_call).collect();
            let report = executor.run(&calls, context).await?;
            outcome.steps_executed += report.steps.len();
            outcome.extracted.extend(report.extracted());
            if let Some(auth) = auth_from_report(&report) {
                outcome.auth = Some(auth);
            }

            if let Some(failure) = &report.failure {
                warn!(attempt, step = failure.step, action = %failure.action, "plan aborted");
                outcome.failure = Some(describe_failure(failure));
                continue;
            }

            if !auth_task {
                outcome.success = true;
                outcome.failure = None;
                return Ok(outcome);
            }

            let verdict = self.cascade.oracle().verify(context.page.as_ref()).await?;
            info!(attempt, success = verdict.success, detail = %verdict.detail, "verified login");
            let verified = verdict.success;
            outcome.failure = (!verified).then(|| verdict.detail.clone());
            outcome.verdict = Some(verdict);
            if verified {
                outcome.success = true;
                return Ok(outcome);
            }
        }

        Ok(outcome)
    }

    /// Authenticate with the strategy cascade, then, when a model is
    /// available, with a planned "log in" task as the last resort.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult {
        let mut result = self
            .cascade
            .run(self.page.as_ref(), email, password, self.auth_debug)
            .await;
        if result.success || self.model.is_none() {
            return result;
        }

        info!("strategy cascade exhausted, planning the login instead");
        let started = Instant::now();
        let task = format!(
            "Log in using the email or username '{}' and the password '{}', then submit the form.",
            email, password
        );
        let attempt = match self.run(Task::Natural(task)).await {
            Ok(outcome) => {
                if outcome.success {
                    result.success = true;
                    result.strategy = Some("agent_loop".to_string());
                    result.verification_method = outcome.verdict.as_ref().map(|v| v.method.clone());
                }
                StrategyAttempt {
                    strategy: "agent_loop".to_string(),
                    outcome: if outcome.success {
                        AttemptOutcome::Verified
                    } else {
                        AttemptOutcome::VerificationFailed
                    },
                    cause: outcome.failure,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            }
            Err(e) => StrategyAttempt {
                strategy: "agent_loop".to_string(),
                outcome: AttemptOutcome::StrategyError,
                cause: Some(e.to_string()),
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        };
        result.attempts.push(attempt);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPage, ScriptedModel};
    use serde_json::json;

    const SEARCH: &str = r#"<html><body>
        <input type="search" name="q" placeholder="Search">
        <button>Go</button></body></html>"#;

    fn quiet_config() -> Config {
        let mut config = Config::default();
        config.auth.settle_ms = 0;
        config.session.settle_ms = 0;
        config
    }

    #[test]
    fn auth_tasks_are_recognised() {
        assert!(is_auth_task("Log in as the admin"));
        assert!(is_auth_task("please SIGN-IN"));
        assert!(!is_auth_task("search for boots"));
    }

    #[tokio::test]
    async fn natural_task_without_model_is_a_config_error() {
        let page = Arc::new(MockPage::new("http://localhost/", SEARCH));
        let agent = Agent::new(page, None, quiet_config()).unwrap();
        let err = agent.run(Task::Natural("search".into())).await.unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }

    #[tokio::test]
    async fn bad_response_is_retried() {
        let page = Arc::new(MockPage::new("http://localhost/", SEARCH));
        let model = Arc::new(ScriptedModel::new([
            "I think you should type into the search box.",
            r#"[{"action": "fill", "index": 0, "value": "boots"}]"#,
        ]));
        let agent = Agent::new(page.clone(), Some(model.clone()), quiet_config()).unwrap();

        let outcome = agent.run(Task::Natural("search for boots".into())).await.unwrap();
        assert!(outcome.success, "{:?}", outcome.failure);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.steps_executed, 1);
        assert_eq!(page.filled_value("input[name='q']").as_deref(), Some("boots"));
        assert!(model.prompts()[1].contains("not a valid plan"));
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let page = Arc::new(MockPage::new("http://localhost/", SEARCH));
        let model = Arc::new(ScriptedModel::new([
            r##"[{"action": "click", "selector": "#missing"}]"##,
            r##"[{"action": "click", "selector": "#missing"}]"##,
            r##"[{"action": "click", "selector": "#missing"}]"##,
        ]));
        let agent = Agent::new(page, Some(model.clone()), quiet_config()).unwrap();

        let outcome = agent.run(Task::Natural("click it".into())).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(model.prompts().len(), 3);
        assert!(outcome.failure.unwrap().starts_with("step 0 (click) failed"));
    }

    #[tokio::test]
    async fn structured_plan_over_step_limit_runs_nothing() {
        let page = Arc::new(MockPage::new("http://localhost/", SEARCH));
        let mut config = quiet_config();
        config.agent.max_steps = 2;
        let agent = Agent::new(page.clone(), None, config).unwrap();
        let calls = vec![ActionCall::new("wait", json!({"ms": 1})); 3];

        let outcome = agent.run(Task::Structured(calls)).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.steps_executed, 0);
        assert!(outcome.failure.unwrap().contains("limit of 2"));
    }
}
