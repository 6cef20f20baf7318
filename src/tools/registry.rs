//! Tool registry - ordered lookup, argument validation and invocation

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use crate::agent::{ToolCallRequest, ToolResult};
use super::Tool;
use super::edit::EditFileTool;
use super::filesystem::{DeleteFileTool, ListDirectoryTool, ReadFileTool, WriteFileTool};
use super::search::SearchFilesTool;
use super::shell::{CommandApproval, RunCommandTool};

/// Tool definition for LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Registry of tools, kept in registration order.
///
/// The order is the order declared to the provider. Registering a name that
/// already exists replaces the earlier tool in its original position.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Create a registry with the built-in file and shell tools.
    ///
    /// `approval` is asked before `run_command` runs a flagged command.
    pub fn new_with_defaults(
        working_dir: &Path,
        command_timeout: Duration,
        approval: Arc<dyn CommandApproval>,
    ) -> Self {
        let mut registry = Self::new();
        let root = working_dir.to_path_buf();

        registry.register(ReadFileTool::new(root.clone()));
        registry.register(WriteFileTool::new(root.clone()));
        registry.register(EditFileTool::new(root.clone()));
        registry.register(DeleteFileTool::new(root.clone()));
        registry.register(ListDirectoryTool::new(root.clone()));
        registry.register(SearchFilesTool::new(root.clone()));
        registry.register(
            RunCommandTool::new(root)
                .with_timeout(command_timeout)
                .with_approval(approval),
        );

        registry
    }

    /// Register a tool, replacing any tool with the same name in place
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        match self.position(&name) {
            Some(idx) => {
                debug!("Replacing tool {}", name);
                self.tools[idx] = Box::new(tool);
            }
            None => self.tools.push(Box::new(tool)),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.tools.iter().position(|t| t.name() == name)
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    /// Registered tools in registration order
    pub fn list(&self) -> impl Iterator<Item = &dyn Tool> + '_ {
        self.tools.iter().map(|t| t.as_ref())
    }

    /// Tool definitions for the provider, in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// Check if a tool exists
    pub fn has(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Registered tool names in registration order
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke the tool a call names.
    ///
    /// Never fails: unknown tools, invalid arguments and handler errors all
    /// come back as a [`ToolResult`] with `is_error` set.
    pub async fn invoke(&self, call: &ToolCallRequest) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            return ToolResult::error(call, format!("Unknown tool: {}", call.name));
        };

        let params = match validate_arguments(&tool.parameters(), &call.arguments) {
            Ok(params) => params,
            Err(message) => {
                debug!("Rejected arguments for {}: {}", call.name, message);
                return ToolResult::error(call, message);
            }
        };

        match tool.execute(params).await {
            Ok(content) => ToolResult::success(call, content),
            Err(e) => ToolResult::error(call, format!("Tool execution failed: {}", e)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural check of `arguments` against a JSON schema.
///
/// Arguments must be an object (null counts as empty) and every key listed
/// in `required` must be present. Keys the schema does not declare are
/// ignored and passed through.
fn validate_arguments(schema: &Value, arguments: &Value) -> std::result::Result<Value, String> {
    let object = match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => return Err(format!("Arguments must be a JSON object, got: {}", other)),
    };

    let missing: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .into_iter()
        .flatten()
        .filter_map(|k| k.as_str())
        .filter(|k| !object.contains_key(*k))
        .collect();

    if !missing.is_empty() {
        return Err(format!("Missing required argument(s): {}", missing.join(", ")));
    }

    Ok(Value::Object(object))
}
