//! Function-calling schema sent to the model.

use serde::{Deserialize, Serialize};

/// Description used when a tool server advertises a tool without one.
pub const DEFAULT_TOOL_DESCRIPTION: &str = "No description provided";

/// One entry of the `tools` array of a chat-completions request:
/// `{type: "function", function: {name, description, parameters}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    /// Build a function tool, falling back to [`DEFAULT_TOOL_DESCRIPTION`].
    pub fn function(
        name: impl Into<String>,
        description: Option<&str>,
        parameters: serde_json::Value,
    ) -> Self {
        let description = description
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_TOOL_DESCRIPTION);
        Self {
            kind: "function".to_string(),
            function: FunctionSpec {
                name: name.into(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}
