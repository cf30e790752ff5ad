//! Tool dispatch collaborator interface and the tool catalog.
//!
//! The dispatcher executes named business capabilities (CRM, billing,
//! scheduling, ...) and is opaque to the bridge: every call site wraps it,
//! and a failure is converted into an error-shaped result that flows back
//! into the conversation instead of killing the turn.

use crate::error::ToolError;
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use switchboard_core::UserId;
use tracing::warn;

/// Action used when a tool call does not specify one, including when its
/// arguments failed to parse.
pub const DEFAULT_ACTION: &str = "default";

/// Message placed in synthesized error results.
pub(crate) const TOOL_FAILURE_MESSAGE: &str = "Tool execution failed";

/// External executor of a named business capability.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Executes one tool action on behalf of a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool is unknown, rejects its parameters, or
    /// fails during execution.
    async fn execute_tool(
        &self,
        tool: &str,
        action: &str,
        parameters: &JsonValue,
        user_id: UserId,
    ) -> Result<JsonValue, ToolError>;
}

/// Definition of a tool advertised to the model-driven adapters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    /// Dispatcher tool id.
    pub name: String,
    /// Human-readable description the model routes on.
    pub description: String,
    /// JSON schema for the arguments object (`action` + `parameters`).
    pub input_schema: JsonValue,
}

impl ToolDefinition {
    /// Creates a new tool definition with an open schema.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string" },
                    "parameters": { "type": "object" }
                }
            }),
        }
    }

    /// Sets the input schema.
    #[must_use]
    pub fn with_input_schema(mut self, schema: JsonValue) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Ordered catalog of the tools available to a deployment.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    definitions: Vec<ToolDefinition>,
}

impl ToolCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool definition.
    pub fn register(&mut self, definition: ToolDefinition) {
        self.definitions.push(definition);
    }

    /// Returns all registered definitions in registration order.
    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Returns whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Builds the result fed back into a conversation when a tool call fails.
pub(crate) fn failure_result() -> JsonValue {
    json!({ "status": "error", "message": TOOL_FAILURE_MESSAGE })
}

/// Executes a tool, converting any failure into an error-shaped result so
/// the conversation continues.
pub(crate) async fn dispatch_checked(
    dispatcher: &dyn ToolDispatcher,
    tool: &str,
    action: &str,
    parameters: &JsonValue,
    user_id: UserId,
) -> JsonValue {
    match dispatcher.execute_tool(tool, action, parameters, user_id).await {
        Ok(result) => result,
        Err(err) => {
            warn!(tool, action, error = %err, "tool execution failed");
            failure_result()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingDispatcher;

    #[async_trait]
    impl ToolDispatcher for FailingDispatcher {
        async fn execute_tool(
            &self,
            tool: &str,
            _action: &str,
            _parameters: &JsonValue,
            _user_id: UserId,
        ) -> Result<JsonValue, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool: tool.to_string(),
                reason: "backend offline".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn dispatch_failure_becomes_error_result() {
        let result = dispatch_checked(
            &FailingDispatcher,
            "email",
            "send_one",
            &json!({}),
            UserId::new(),
        )
        .await;

        assert_eq!(result["status"], "error");
        assert_eq!(result["message"], TOOL_FAILURE_MESSAGE);
    }

    #[test]
    fn catalog_keeps_registration_order() {
        let mut catalog = ToolCatalog::new();
        catalog.register(ToolDefinition::new("pipeline", "Sales pipeline queries"));
        catalog.register(ToolDefinition::new("email", "Email operations"));

        let names: Vec<&str> = catalog.definitions().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["pipeline", "email"]);
        assert!(!catalog.is_empty());
    }

    #[test]
    fn default_schema_describes_action_and_parameters() {
        let definition = ToolDefinition::new("billing", "Billing operations");
        assert!(definition.input_schema["properties"]["action"].is_object());
        assert!(definition.input_schema["properties"]["parameters"].is_object());
    }
}
