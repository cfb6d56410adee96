//! Tool registry: the canonical set of callable operations.
//!
//! Operations are contributed by [`ToolProvider`]s at startup and bound
//! into a name -> handler map. Execution never fails past this boundary:
//! unknown tools, bad arguments, and handler errors all become
//! [`FunctionResult`]s with `is_error` set.

mod catalog;
mod coerce;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use datachat_common::{RegistryError, ToolError};

use crate::ToolDefinition;

pub use catalog::{CallToolResult, ContentBlock, ToolCatalogEntry};

/// A bound operation: takes coerced arguments, returns a JSON value.
pub type ToolHandler =
    Arc<dyn Fn(serde_json::Map<String, serde_json::Value>) -> Result<serde_json::Value, ToolError>
        + Send
        + Sync>;

/// One tool contributed by a provider: schema plus the operation it invokes.
pub struct ToolRegistration {
    pub definition: ToolDefinition,
    pub handler: ToolHandler,
}

impl ToolRegistration {
    pub fn new(
        definition: ToolDefinition,
        handler: impl Fn(serde_json::Map<String, serde_json::Value>) -> Result<serde_json::Value, ToolError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            definition,
            handler: Arc::new(handler),
        }
    }
}

/// Contributes a stable list of tools at startup. Handlers must be safe
/// to call concurrently for different arguments.
pub trait ToolProvider: Send + Sync {
    fn tools(&self) -> Vec<ToolRegistration>;
}

/// Outcome of a tool execution. Always serializable; errors are data.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResult {
    pub content: String,
    pub is_error: bool,
}

impl FunctionResult {
    pub fn ok(value: &serde_json::Value) -> Self {
        Self {
            content: value.to_string(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }

    /// Serialized form placed in function-role message content.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.content.clone())
    }
}

struct Binding {
    definition: ToolDefinition,
    handler: ToolHandler,
}

/// Registry of callable operations, built once at startup and read-only
/// for the process lifetime.
pub struct ToolRegistry {
    bindings: HashMap<String, Binding>,
}

impl ToolRegistry {
    /// Build the registry from the given providers, synchronously.
    ///
    /// A duplicate tool name across providers is a startup error, never a
    /// silent override.
    pub fn from_providers(
        providers: &[Arc<dyn ToolProvider>],
    ) -> Result<Self, RegistryError> {
        let mut bindings = HashMap::new();
        for provider in providers {
            for registration in provider.tools() {
                let name = registration.definition.name.clone();
                if bindings.contains_key(&name) {
                    return Err(RegistryError::DuplicateTool(name));
                }
                debug!(tool = %name, "Registered tool");
                bindings.insert(
                    name,
                    Binding {
                        definition: registration.definition,
                        handler: registration.handler,
                    },
                );
            }
        }
        Ok(Self { bindings })
    }

    /// Definitions of all registered tools, sorted by name so the prompt
    /// sent to the model is stable across calls.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self
            .bindings
            .values()
            .map(|b| b.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Execute a named tool with the given arguments.
    ///
    /// 1. Looks up the binding; unknown names become an error result
    /// 2. Rejects missing or empty-string required parameters before the
    ///    operation is invoked
    /// 3. Coerces present arguments to their declared kinds
    /// 4. Invokes the handler; handler errors are captured as data
    pub fn execute(&self, name: &str, arguments: &serde_json::Value) -> FunctionResult {
        let Some(binding) = self.bindings.get(name) else {
            warn!(tool = %name, "Tool not found");
            return FunctionResult::error(ToolError::NotFound(name.to_string()).to_string());
        };

        let args = match as_argument_map(arguments) {
            Ok(map) => map,
            Err(err) => return FunctionResult::error(err.to_string()),
        };

        let mut coerced = serde_json::Map::new();
        for (param_name, spec) in &binding.definition.parameters {
            match args.get(param_name) {
                None | Some(serde_json::Value::Null) => {
                    if spec.required {
                        return FunctionResult::error(
                            ToolError::missing_required(param_name).to_string(),
                        );
                    }
                }
                Some(value) => {
                    if spec.required && is_empty_string(value) {
                        return FunctionResult::error(
                            ToolError::missing_required(param_name).to_string(),
                        );
                    }
                    match coerce::coerce(param_name, value.clone(), spec.kind) {
                        Ok(value) => {
                            coerced.insert(param_name.clone(), value);
                        }
                        Err(err) => return FunctionResult::error(err.to_string()),
                    }
                }
            }
        }
        // Pass through arguments the schema does not know about unchanged.
        for (key, value) in &args {
            if !coerced.contains_key(key) && !binding.definition.parameters.contains_key(key) {
                coerced.insert(key.clone(), value.clone());
            }
        }

        debug!(tool = %name, "Executing tool");
        match (binding.handler)(coerced) {
            Ok(value) => FunctionResult::ok(&value),
            Err(err) => {
                warn!(tool = %name, error = %err, "Tool execution failed");
                FunctionResult::error(err.to_string())
            }
        }
    }
}

fn is_empty_string(value: &serde_json::Value) -> bool {
    matches!(value, serde_json::Value::String(s) if s.trim().is_empty())
}

/// Arguments arrive as a JSON object, or occasionally as a JSON-encoded
/// string of one. Anything else is an invalid-argument error.
fn as_argument_map(
    arguments: &serde_json::Value,
) -> Result<serde_json::Map<String, serde_json::Value>, ToolError> {
    match arguments {
        serde_json::Value::Object(map) => Ok(map.clone()),
        serde_json::Value::Null => Ok(serde_json::Map::new()),
        serde_json::Value::String(s) => {
            serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(s).map_err(|_| {
                ToolError::InvalidArgument {
                    name: "arguments".to_string(),
                    reason: "not a JSON object".to_string(),
                }
            })
        }
        _ => Err(ToolError::InvalidArgument {
            name: "arguments".to_string(),
            reason: "not a JSON object".to_string(),
        }),
    }
}
