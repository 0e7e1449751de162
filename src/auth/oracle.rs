use crate::core::config::AuthConfig;
use crate::core::Page;
use crate::dom::DomProcessor;
use crate::errors::Result;
use crate::utils::javascript::BODY_TEXT_SCRIPT;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Post-condition that names what was checked.
pub const POST_CONDITION: &str = "left login path and login form gone";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub success: bool,
    /// What was checked, e.g. `left login path and login form gone`.
    pub method: String,
    pub detail: String,
}

/// Decides whether the page is past authentication.
pub struct VerificationOracle {
    config: AuthConfig,
    processor: Arc<DomProcessor>,
}

impl VerificationOracle {
    pub fn new(config: AuthConfig, processor: Arc<DomProcessor>) -> Self {
        Self { config, processor }
    }

    /// Whether the URL's path still matches one of the login patterns, on
    /// whole path segments (`/auth` matches `/auth/callback` but not
    /// `/authors`).
    pub fn is_login_url(&self, url: &str) -> bool {
        let path = url::Url::parse(url)
            .map(|u| u.path().to_lowercase())
            .unwrap_or_else(|_| url.to_lowercase());
        let path = format!("{}/", path.trim_end_matches('/'));
        self.config.login_path_patterns.iter().any(|pattern| {
            let pattern = format!("{}/", pattern.trim_end_matches('/').to_lowercase());
            path.contains(&pattern)
        })
    }

    /// Success requires both: the URL left the login paths AND a fresh
    /// snapshot no longer shows password and identifier inputs together.
    pub async fn verify(&self, page: &dyn Page) -> Result<Verdict> {
        let url = page.url().await?;
        let dom = self.processor.index_page(page).await?;
        let on_login_path = self.is_login_url(&url);
        let form_visible = dom.shows_login_form();

        let detail = match (on_login_path, form_visible) {
            (false, false) => {
                let body = page
                    .evaluate(BODY_TEXT_SCRIPT, vec![])
                    .await
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                match self
                    .config
                    .success_indicators
                    .iter()
                    .find(|i| body.contains(&i.to_lowercase()))
                {
                    Some(indicator) => format!("now at {} showing '{}'", url, indicator),
                    None => format!("now at {}", url),
                }
            }
            (true, true) => format!("still on login path {} with login form visible", url),
            (true, false) => format!("still on login path {}", url),
            (false, true) => format!("login form still visible at {}", url),
        };

        let verdict = Verdict {
            success: !on_login_path && !form_visible,
            method: POST_CONDITION.to_string(),
            detail,
        };
        debug!(success = verdict.success, detail = %verdict.detail, "verified authentication");
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DomConfig;
    use crate::testing::MockPage;

    fn oracle() -> VerificationOracle {
        VerificationOracle::new(
            AuthConfig::default(),
            Arc::new(DomProcessor::new(DomConfig::default())),
        )
    }

    #[test]
    fn login_paths_match_on_segments() {
        let oracle = oracle();
        assert!(oracle.is_login_url("https://app.test/login"));
        assert!(oracle.is_login_url("https://app.test/login?next=/home"));
        assert!(oracle.is_login_url("https://app.test/account/login/"));
        assert!(oracle.is_login_url("https://app.test/auth/callback"));
        assert!(!oracle.is_login_url("https://app.test/authors"));
        assert!(!oracle.is_login_url("https://app.test/dashboard"));
    }

    #[tokio::test]
    async fn both_conditions_are_required() {
        let oracle = oracle();
        let form = r#"<html><body><input type="email"><input type="password"></body></html>"#;

        let on_login = MockPage::new("http://localhost/login", "<html><body>Hi</body></html>");
        assert!(!oracle.verify(&on_login).await.unwrap().success);

        let form_elsewhere = MockPage::new("http://localhost/welcome", form);
        let verdict = oracle.verify(&form_elsewhere).await.unwrap();
        assert!(!verdict.success);
        assert!(verdict.detail.contains("login form still visible"));

        let done = MockPage::new(
            "http://localhost/dashboard",
            "<html><body><a href=\"/logout\">Log out</a></body></html>",
        );
        let verdict = oracle.verify(&done).await.unwrap();
        assert!(verdict.success);
        assert_eq!(verdict.method, POST_CONDITION);
        assert!(verdict.detail.contains("log out"));
    }
}
