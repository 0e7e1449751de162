pub mod browser;
pub mod config;

pub use browser::Page;
pub use config::{
    AgentConfig, AuthConfig, BrowserConfig, Config, DomConfig, LlmConfig, ScorerConfig,
    SecurityConfig, SessionConfig, Viewport,
};
