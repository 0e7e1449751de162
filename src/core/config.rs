use crate::errors::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub browser: BrowserConfig,
    pub dom: DomConfig,
    pub session: SessionConfig,
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub scorer: ScorerConfig,
    pub security: SecurityConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    pub disable_images: bool,
    pub args: Vec<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomConfig {
    pub include_hidden_elements: bool,
    /// Element text is cut to this many characters to keep prompts small.
    pub max_text_length: usize,
    pub max_elements: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub navigation_timeout_ms: u64,
    pub element_timeout_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Plan attempts per task before reporting failure.
    pub max_attempts: u32,
    /// Upper bound on actions executed in a single attempt.
    pub max_steps: usize,
    /// Character budget for the whole planning prompt.
    pub prompt_budget_chars: usize,
    pub include_screenshot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Minimum confidence for the scorer to report a match. The two consumers
/// historically disagreed, so each keeps its own floor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub action_threshold: u8,
    pub login_threshold: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_domains: Vec<String>,
    pub max_script_length: usize,
    pub max_text_length: usize,
    pub allowed_upload_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub login_path_patterns: Vec<String>,
    pub settle_ms: u64,
    pub url_change_timeout_ms: u64,
    pub success_indicators: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| AgentError::Configuration(e.to_string()))
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AgentError::Configuration(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("AGENT_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(key) = std::env::var("AGENT_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("AGENT_LLM_MODEL") {
            self.llm.model = model;
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            user_agent: None,
            disable_images: false,
            args: vec![],
            timeout_ms: 30000,
        }
    }
}

impl Default for DomConfig {
    fn default() -> Self {
        Self {
            include_hidden_elements: false,
            max_text_length: 100,
            max_elements: 400,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 30000,
            element_timeout_ms: 5000,
            retry_attempts: 3,
            retry_backoff_ms: 500,
            settle_ms: 1000,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_steps: 25,
            prompt_budget_chars: 12000,
            include_screenshot: false,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 60,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            action_threshold: 50,
            login_threshold: 60,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_domains: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            max_script_length: 10000,
            max_text_length: 5000,
            allowed_upload_extensions: [
                "png", "jpg", "jpeg", "gif", "pdf", "txt", "csv", "json", "docx", "xlsx",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_path_patterns: [
                "/login", "/log-in", "/signin", "/sign-in", "/auth", "/sso", "/session",
                "/account/login",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            settle_ms: 2000,
            url_change_timeout_ms: 5000,
            success_indicators: vec![
                "logout".to_string(),
                "log out".to_string(),
                "sign out".to_string(),
                "dashboard".to_string(),
                "welcome".to_string(),
            ],
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_scale_factor: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.scorer.action_threshold, 50);
        assert_eq!(config.scorer.login_threshold, 60);
        assert_eq!(config.session.retry_attempts, 3);
        assert!(config.browser.headless);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [agent]
            max_attempts = 5

            [security]
            allowed_domains = ["example.com"]
            "#,
        )
        .unwrap();
        assert_eq!(config.agent.max_attempts, 5);
        assert_eq!(config.agent.max_steps, 25);
        assert_eq!(config.security.allowed_domains, vec!["example.com"]);
        assert_eq!(config.security.max_script_length, 10000);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let err = Config::from_toml_str("agent = 3").unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }
}
