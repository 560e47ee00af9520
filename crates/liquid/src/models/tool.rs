use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A tool that can be offered to a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema of the arguments the tool accepts
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}
