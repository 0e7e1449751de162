pub mod base;
pub mod builtin;
pub mod registry;
pub mod smart;

pub use base::{
    ActionDefinition, ActionHandler, ActionResult, AgentContext, AgentState, ParamSpec, ParamType,
};
pub use registry::ActionRegistry;
pub use smart::SmartEnv;

use crate::core::config::Config;
use crate::errors::RegistryError;
use crate::security::SecurityGate;
use std::sync::Arc;

/// Registry with every built-in and smart action, gated by the configured
/// security policy.
pub fn default_registry(config: &Config, env: SmartEnv) -> Result<ActionRegistry, RegistryError> {
    let mut registry =
        ActionRegistry::new().with_security_gate(Arc::new(SecurityGate::new(config.security.clone())));
    builtin::register_builtin(&mut registry, &config.session)?;
    smart::register_smart(&mut registry, env)?;
    Ok(registry)
}
