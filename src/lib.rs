pub mod actions;
pub mod agent;
pub mod auth;
pub mod browser;
pub mod core;
pub mod dom;
pub mod errors;
pub mod llm;
pub mod scorer;
pub mod security;
pub mod testing;
pub mod utils;

pub use actions::{ActionDefinition, ActionRegistry, ActionResult, AgentContext};
pub use agent::{Agent, Task, TaskOutcome};
pub use auth::{AuthCascade, AuthResult, AuthStrategy};
pub use core::{Config, Page};
pub use dom::{DomElement, DomProcessor, IndexedDom};
pub use errors::{AgentError, RegistryError, Result};
pub use llm::{ChatCompletionClient, LanguageModel};
pub use scorer::ElementScorer;
pub use security::SecurityGate;
