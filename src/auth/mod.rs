//! Ordered login strategies sharing one verification oracle.

pub mod oracle;
pub mod strategies;

use crate::browser::navigation::NavigationManager;
use crate::core::config::{AuthConfig, SessionConfig};
use crate::core::Page;
use crate::dom::DomProcessor;
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub use oracle::{Verdict, VerificationOracle, POST_CONDITION};
pub use strategies::{
    default_strategies, FormDetectionStrategy, HeuristicStrategy, StrategyEnv, TabOrderStrategy,
    VisualProximityStrategy,
};

/// One way of filling and submitting a login form.
///
/// `Ok(true)` means credentials were submitted, `Ok(false)` that the
/// strategy found nothing it could act on. Whether the login worked is the
/// oracle's call, not the strategy's.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        page: &dyn Page,
        email: &str,
        password: &str,
        debug: bool,
    ) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Verified,
    NotApplicable,
    StrategyError,
    VerificationFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: String,
    pub outcome: AttemptOutcome,
    /// Why the attempt did not authenticate
    pub cause: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    /// Name of the strategy that got through
    pub strategy: Option<String>,
    pub verification_method: Option<String>,
    pub attempts: Vec<StrategyAttempt>,
}

impl AuthResult {
    /// Why every attempt failed, one line per strategy.
    pub fn failure_summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                format!(
                    "{}: {}",
                    a.strategy,
                    a.cause.as_deref().unwrap_or("no cause recorded")
                )
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub struct AuthCascade {
    strategies: Vec<Box<dyn AuthStrategy>>,
    oracle: Arc<VerificationOracle>,
    settle_ms: u64,
    url_change_timeout_ms: u64,
}

impl AuthCascade {
    pub fn new(
        auth: &AuthConfig,
        session: &SessionConfig,
        processor: Arc<DomProcessor>,
    ) -> Self {
        let oracle = Arc::new(VerificationOracle::new(auth.clone(), processor.clone()));
        let env = StrategyEnv::new(processor, session.clone());
        Self::with_strategies(default_strategies(env), oracle, auth)
    }

    /// Timing comes from `auth`: how long to wait for the URL to move after
    /// a submit, and the settle used when it does not.
    pub fn with_strategies(
        strategies: Vec<Box<dyn AuthStrategy>>,
        oracle: Arc<VerificationOracle>,
        auth: &AuthConfig,
    ) -> Self {
        Self {
            strategies,
            oracle,
            settle_ms: auth.settle_ms,
            url_change_timeout_ms: auth.url_change_timeout_ms,
        }
    }

    pub fn oracle(&self) -> Arc<VerificationOracle> {
        self.oracle.clone()
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order until the oracle confirms a login.
    /// Exhaustion is a `success: false` result, never an error.
    pub async fn run(&self, page: &dyn Page, email: &str, password: &str, debug: bool) -> AuthResult {
        let mut result = AuthResult::default();

        for strategy in &self.strategies {
            let name = strategy.name();
            let started = Instant::now();
            let before = page.url().await.unwrap_or_default();
            info!(strategy = name, "trying login strategy");

            let (outcome, cause, verdict) = match strategy.execute(page, email, password, debug).await {
                Ok(false) => (
                    AttemptOutcome::NotApplicable,
                    Some("nothing on the page this strategy could act on".to_string()),
                    None,
                ),
                Err(e) => (AttemptOutcome::StrategyError, Some(e.to_string()), None),
                Ok(true) => {
                    NavigationManager::settle_after_submit(
                        page,
                        &before,
                        self.url_change_timeout_ms,
                        self.settle_ms,
                    )
                    .await;
                    match self.oracle.verify(page).await {
                        Ok(verdict) if verdict.success => (AttemptOutcome::Verified, None, Some(verdict)),
                        Ok(verdict) => (
                            AttemptOutcome::VerificationFailed,
                            Some(verdict.detail),
                            None,
                        ),
                        Err(e) => (
                            AttemptOutcome::VerificationFailed,
                            Some(format!("verification error: {}", e)),
                            None,
                        ),
                    }
                }
            };

            if let Some(cause) = &cause {
                warn!(strategy = name, ?outcome, %cause, "login strategy did not authenticate");
            }
            result.attempts.push(StrategyAttempt {
                strategy: name.to_string(),
                outcome,
                cause,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });

            if let Some(verdict) = verdict {
                info!(strategy = name, detail = %verdict.detail, "login verified");
                result.success = true;
                result.strategy = Some(name.to_string());
                result.verification_method = Some(verdict.method);
                return result;
            }
        }

        warn!(attempts = result.attempts.len(), "all login strategies exhausted");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DomConfig;
    use crate::errors::AgentError;
    use crate::testing::MockPage;

    struct Failing;

    #[async_trait]
    impl AuthStrategy for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn execute(&self, _: &dyn Page, _: &str, _: &str, _: bool) -> Result<bool> {
            Err(AgentError::ElementNotFound("#login".into()))
        }
    }

    struct NoOp;

    #[async_trait]
    impl AuthStrategy for NoOp {
        fn name(&self) -> &'static str {
            "noop"
        }

        async fn execute(&self, _: &dyn Page, _: &str, _: &str, _: bool) -> Result<bool> {
            Ok(true)
        }
    }

    /// Submits by leaving the login page for `/home`.
    struct Redirects;

    #[async_trait]
    impl AuthStrategy for Redirects {
        fn name(&self) -> &'static str {
            "redirects"
        }

        async fn execute(&self, page: &dyn Page, _: &str, _: &str, _: bool) -> Result<bool> {
            page.goto("http://localhost/home", 1000).await?;
            Ok(true)
        }
    }

    fn oracle() -> Arc<VerificationOracle> {
        Arc::new(VerificationOracle::new(
            AuthConfig::default(),
            Arc::new(DomProcessor::new(DomConfig::default())),
        ))
    }

    #[test]
    fn default_order_is_fixed() {
        let cascade = AuthCascade::new(
            &AuthConfig::default(),
            &SessionConfig::default(),
            Arc::new(DomProcessor::new(DomConfig::default())),
        );
        assert_eq!(
            cascade.strategy_names(),
            vec!["tab_order", "visual_proximity", "form_detection", "heuristic"]
        );
    }

    #[tokio::test]
    async fn exhaustion_records_every_cause() {
        let page = MockPage::new(
            "http://localhost/login",
            r#"<html><body><input type="email"><input type="password"></body></html>"#,
        );
        let auth = AuthConfig {
            settle_ms: 0,
            ..AuthConfig::default()
        };
        let cascade = AuthCascade::with_strategies(vec![Box::new(Failing), Box::new(NoOp)], oracle(), &auth);
        let result = cascade.run(&page, "a", "b", false).await;

        assert!(!result.success);
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[0].outcome, AttemptOutcome::StrategyError);
        assert!(result.attempts[0].cause.as_deref().unwrap().contains("#login"));
        assert_eq!(result.attempts[1].outcome, AttemptOutcome::VerificationFailed);
        assert!(result.failure_summary().contains("noop: still on login path"));
    }

    #[tokio::test]
    async fn url_change_ends_the_settle() {
        let page = MockPage::new("http://localhost/login", r#"<html><body><input type="password"></body></html>"#)
            .with_route("http://localhost/home", "<html><body><h1>Welcome</h1></body></html>");
        let auth = AuthConfig {
            settle_ms: 7_777,
            ..AuthConfig::default()
        };
        let cascade = AuthCascade::with_strategies(vec![Box::new(Redirects)], oracle(), &auth);
        let result = cascade.run(&page, "a", "b", false).await;

        assert!(result.success, "{}", result.failure_summary());
        assert_eq!(result.strategy.as_deref(), Some("redirects"));
        assert!(!page.waits().contains(&7_777));
    }
}
