use crate::actions::base::{ActionDefinition, ActionHandler, ActionResult, AgentContext};
use crate::errors::RegistryError;
use crate::browser::navigation::NavigationManager;
use crate::security::{GateCheck, SecurityGate};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

struct RegisteredAction {
    definition: ActionDefinition,
    handler: Arc<dyn ActionHandler>,
}

/// Name-keyed catalogue of actions. One instance per agent, passed
/// explicitly to whatever needs to dispatch.
pub struct ActionRegistry {
    actions: HashMap<String, RegisteredAction>,
    /// Registration order, used for listing.
    order: Vec<String>,
    gate: Option<Arc<SecurityGate>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
            order: Vec::new(),
            gate: None,
        }
    }

    /// Screen the parameters each definition marks as gated through `gate`
    /// before handlers run.
    pub fn with_security_gate(mut self, gate: Arc<SecurityGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Register a new action. A name can only be registered once.
    pub fn register<H: ActionHandler + 'static>(
        &mut self,
        definition: ActionDefinition,
        handler: H,
    ) -> Result<(), RegistryError> {
        if self.actions.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateAction(definition.name));
        }
        let name = definition.name.clone();
        debug!(action = %name, "registered action");
        self.order.push(name.clone());
        self.actions.insert(
            name,
            RegisteredAction {
                definition,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn definition(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.get(name).map(|a| &a.definition)
    }

    /// Definitions in registration order.
    pub fn list(&self) -> Vec<&ActionDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.actions.get(name))
            .map(|a| &a.definition)
            .collect()
    }

    /// Vocabulary block shown to the planner.
    pub fn describe(&self) -> String {
        self.list()
            .iter()
            .map(|d| d.render())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Execute an action by name.
    ///
    /// An unregistered name is the only `Err`. Invalid parameters and
    /// security vetoes come back as failed results without the handler
    /// ever touching the page.
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        context: &mut AgentContext,
    ) -> Result<ActionResult, RegistryError> {
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| RegistryError::UnknownAction(name.to_string()))?;

        if let Err(message) = action.definition.validate(&params) {
            warn!(action = name, %message, "rejected action parameters");
            return Ok(ActionResult::failure(format!("ValidationError: {}", message)));
        }

        if let Some(gate) = &self.gate {
            for (param, check) in &action.definition.gated {
                let value = match params.get(param).and_then(|v| v.as_str()) {
                    Some(value) => value,
                    None => continue,
                };
                // Screen the URL the handler will actually open.
                let value = match check {
                    GateCheck::Navigation => NavigationManager::resolve_url(&context.state.current_url, value),
                    _ => value.to_string(),
                };
                let decision = gate.check(name, *check, &value);
                if !decision.allowed {
                    let reason = decision.reason.unwrap_or_default();
                    return Ok(ActionResult::failure(format!(
                        "SecurityPolicyViolation: {}",
                        reason
                    )));
                }
            }
        }

        // Execute action with timing
        let start_time = Instant::now();
        let result = action.handler.handle(&params, context).await;
        let execution_time = start_time.elapsed().as_millis() as u64;

        let result = if result.success {
            result
        } else {
            let error = result.error.clone().unwrap_or_default();
            ActionResult {
                error: ActionResult::failure(error).error,
                ..result
            }
        };

        info!(
            action = name,
            success = result.success,
            elapsed_ms = execution_time,
            "executed action"
        );
        Ok(result.with_execution_time(execution_time))
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
