//! Tool catalog surface for generic JSON-RPC-style callers.
//!
//! Wraps the registry in the `listTools` / `callTool` wire shapes an
//! external dispatch surface expects. This is the only place engine
//! internals are serialized to an external wire format.

use super::ToolRegistry;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCatalogEntry {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ContentBlock {
    fn text(text: String) -> Self {
        Self {
            kind: "text".to_string(),
            text,
        }
    }
}

impl ToolRegistry {
    /// Catalog of registered tools with JSON-schema input descriptions.
    pub fn list_tools(&self) -> Vec<ToolCatalogEntry> {
        self.definitions()
            .into_iter()
            .map(|def| ToolCatalogEntry {
                input_schema: def.json_schema(),
                name: def.name,
                description: def.description,
            })
            .collect()
    }

    /// Execute a tool on behalf of an external caller, wrapping the
    /// result in a single text content block.
    pub fn call_tool(&self, name: &str, arguments: &serde_json::Value) -> CallToolResult {
        let result = self.execute(name, arguments);
        CallToolResult {
            content: vec![ContentBlock::text(result.to_json())],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::registry::{ToolProvider, ToolRegistration};
    use crate::{ParamKind, ParamSpec, ToolDefinition};

    use super::*;

    struct CatalogProvider;

    impl ToolProvider for CatalogProvider {
        fn tools(&self) -> Vec<ToolRegistration> {
            let mut parameters = BTreeMap::new();
            parameters.insert(
                "table".to_string(),
                ParamSpec {
                    kind: ParamKind::String,
                    description: "Table name".to_string(),
                    required: true,
                },
            );
            vec![ToolRegistration::new(
                ToolDefinition {
                    name: "describeTable".to_string(),
                    description: "Describe one table.".to_string(),
                    parameters,
                },
                |args| Ok(serde_json::json!({"table": args["table"], "columns": []})),
            )]
        }
    }

    fn registry() -> ToolRegistry {
        let providers: Vec<Arc<dyn ToolProvider>> = vec![Arc::new(CatalogProvider)];
        ToolRegistry::from_providers(&providers).unwrap()
    }

    #[test]
    fn list_tools_projects_schema() {
        let catalog = registry().list_tools();
        assert_eq!(catalog.len(), 1);
        let entry = &catalog[0];
        assert_eq!(entry.name, "describeTable");
        assert_eq!(entry.input_schema["properties"]["table"]["type"], "string");

        let json = serde_json::to_value(entry).unwrap();
        assert!(json.get("inputSchema").is_some(), "wire key is camelCase");
    }

    #[test]
    fn call_tool_wraps_result_in_text_block() {
        let result = registry().call_tool("describeTable", &serde_json::json!({"table": "users"}));
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.content[0].kind, "text");
        assert!(result.content[0].text.contains("\"isError\":false"));
    }

    #[test]
    fn call_tool_unknown_name_is_error_block() {
        let result = registry().call_tool("nope", &serde_json::json!({}));
        assert!(result.content[0].text.contains("\"isError\":true"));
        assert!(result.content[0].text.contains("tool not found"));
    }
}
