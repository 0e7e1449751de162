//! Policy check consulted before dispatching side-effecting actions.

use crate::core::config::SecurityConfig;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Which screen a parameter goes through. Action definitions declare these
/// per parameter, so every action that navigates or types is covered, not
/// just the built-in ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateCheck {
    Navigation,
    Script,
    Text,
    Upload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
}

impl GateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            warnings: Vec::new(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            warnings: Vec::new(),
        }
    }

    fn warn(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

pub struct SecurityGate {
    config: SecurityConfig,
    dangerous_script: Vec<(Regex, &'static str)>,
    sensitive_script: Vec<(Regex, &'static str)>,
    injection: Vec<(Regex, &'static str)>,
}

impl SecurityGate {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config,
            dangerous_script: compile(&[
                (r"\beval\s*\(", "eval"),
                (r"\bnew\s+Function\s*\(|\bFunction\s*\(", "Function constructor"),
                (r"\blocalStorage\b|\bsessionStorage\b|\bindexedDB\b", "storage access"),
                (r"document\s*\.\s*cookie", "cookie access"),
                (r"\bfetch\s*\(|XMLHttpRequest|\bWebSocket\b|sendBeacon", "network call"),
                (r"\b(alert|confirm|prompt)\s*\(", "dialog"),
            ]),
            sensitive_script: compile(&[
                (r"process\s*\.\s*env", "environment access"),
                (r"\brequire\s*\(", "module loading"),
                (r"(?i)\b(api[_-]?key|secret[_-]?key|private[_-]?key)\b", "credential lookup"),
            ]),
            injection: compile(&[
                (r"(?i)<\s*script", "script tag"),
                (r"(?i)javascript\s*:", "javascript: url"),
                (r"(?i)<[^>]+\son[a-z]+\s*=", "inline event handler"),
                (r"(?i)<\s*iframe", "iframe tag"),
            ]),
        }
    }

    /// Decide whether a built-in `action` may run with `params`. Other
    /// actions always pass; the registry screens them through the checks
    /// their definitions declare.
    pub fn validate(&self, action: &str, params: &Value) -> GateDecision {
        let check = match action {
            "navigate" => Some((GateCheck::Navigation, "url")),
            "evaluate" => Some((GateCheck::Script, "script")),
            "type" => Some((GateCheck::Text, "text")),
            "upload_file" => Some((GateCheck::Upload, "path")),
            _ => None,
        };
        match check {
            Some((check, key)) => self.check(action, check, str_param(params, key)),
            None => GateDecision::allow(),
        }
    }

    /// Screen one parameter value of `action`.
    pub fn check(&self, action: &str, check: GateCheck, value: &str) -> GateDecision {
        let decision = match check {
            GateCheck::Navigation => self.check_navigation(value),
            GateCheck::Script => self.check_script(value),
            GateCheck::Text => self.check_text(value),
            GateCheck::Upload => self.check_upload(value),
        };

        if let Some(reason) = &decision.reason {
            warn!(action, %reason, "security gate vetoed action");
        }
        for warning in &decision.warnings {
            warn!(action, %warning, "security gate warning");
        }
        decision
    }

    fn check_navigation(&self, target: &str) -> GateDecision {
        // Relative targets stay on the current origin.
        if target.starts_with('/') && !target.starts_with("//") {
            return GateDecision::allow();
        }
        let parsed = match url::Url::parse(target) {
            Ok(u) => u,
            Err(e) => return GateDecision::deny(format!("invalid url '{}': {}", target, e)),
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return GateDecision::deny(format!("scheme '{}' is not allowed", parsed.scheme()));
        }
        let host = parsed.host_str().unwrap_or_default();
        let known = self
            .config
            .allowed_domains
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{}", d)));
        if known {
            GateDecision::allow()
        } else {
            GateDecision::allow().warn(format!("domain '{}' is not in the allow-list", host))
        }
    }

    fn check_script(&self, script: &str) -> GateDecision {
        if script.len() > self.config.max_script_length {
            return GateDecision::deny(format!(
                "script is {} chars, limit is {}",
                script.len(),
                self.config.max_script_length
            ));
        }
        for (pattern, label) in self.dangerous_script.iter().chain(&self.sensitive_script) {
            if pattern.is_match(script) {
                return GateDecision::deny(format!("script uses {}", label));
            }
        }
        GateDecision::allow()
    }

    fn check_text(&self, text: &str) -> GateDecision {
        if text.chars().count() > self.config.max_text_length {
            return GateDecision::deny(format!(
                "text exceeds {} characters",
                self.config.max_text_length
            ));
        }
        for (pattern, label) in &self.injection {
            if pattern.is_match(text) {
                return GateDecision::deny(format!("text contains {}", label));
            }
        }
        GateDecision::allow()
    }

    fn check_upload(&self, path: &str) -> GateDecision {
        if path.contains("..") || path.contains('~') {
            return GateDecision::deny("path traversal in upload path");
        }
        let extension = std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        match extension {
            Some(ext)
                if self
                    .config
                    .allowed_upload_extensions
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(&ext)) =>
            {
                GateDecision::allow()
            }
            Some(ext) => GateDecision::deny(format!("file type '.{}' is not allowed", ext)),
            None => GateDecision::deny("upload path has no file extension"),
        }
    }
}

impl Default for SecurityGate {
    fn default() -> Self {
        Self::new(SecurityConfig::default())
    }
}

fn compile(patterns: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    patterns
        .iter()
        .filter_map(|(p, label)| Regex::new(p).ok().map(|r| (r, *label)))
        .collect()
}

fn str_param<'a>(params: &'a Value, key: &str) -> &'a str {
    params.get(key).and_then(|v| v.as_str()).unwrap_or_default()
}
