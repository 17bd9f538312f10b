//! MCP Tools module
//!
//! Parameter types and descriptors for the tools served by
//! `SshDispatchServer`:
//! - `exec` - run each command of the string on its own exec channel
//! - `shell-exec` - run the whole string in one interactive shell session
//! - `status` - report connection status and the error state

use std::sync::Arc;

use rmcp::model::{JsonObject, Tool};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const EXEC_TOOL: &str = "exec";
pub const SHELL_EXEC_TOOL: &str = "shell-exec";
pub const STATUS_TOOL: &str = "status";

/// Parameters for the exec and shell-exec tools
#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct ExecParams {
    /// Commands to run, separated by the two-character sequence `\n`.
    /// `\\n` stands for a literal `\n` inside a command.
    pub command: String,
}

/// Input schema of a tool as a JSON object
fn input_schema<T: JsonSchema>() -> Arc<JsonObject> {
    let schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default();

    // Convert Value to JsonObject (Map<String, Value>)
    Arc::new(schema.as_object().cloned().unwrap_or_default())
}

/// Build exec tool definition
pub fn exec_tool() -> Tool {
    Tool::new(
        EXEC_TOOL,
        "Run each command of the string on its own exec channel of the persistent SSH \
         connection. Returns once the commands are submitted; use `status` for the outcome.",
        input_schema::<ExecParams>(),
    )
}

/// Build shell-exec tool definition
pub fn shell_exec_tool() -> Tool {
    Tool::new(
        SHELL_EXEC_TOOL,
        "Run the commands of the string in order inside one interactive shell session, \
         which is exited afterwards. Returns once the script is submitted.",
        input_schema::<ExecParams>(),
    )
}

/// Build status tool definition
pub fn status_tool() -> Tool {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {}
    });

    Tool::new(
        STATUS_TOOL,
        "Report the SSH connection status and whether the last dispatch reported an error.",
        Arc::new(schema.as_object().cloned().unwrap_or_default()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_params_deserialize() {
        let json = r#"{"command": "uptime\\nwhoami"}"#;
        let params: ExecParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.command, "uptime\\nwhoami");
    }

    #[test]
    fn test_exec_params_require_command() {
        assert!(serde_json::from_str::<ExecParams>("{}").is_err());
    }

    #[test]
    fn test_exec_schema_lists_command() {
        let schema = input_schema::<ExecParams>();
        assert_eq!(schema.get("type").and_then(|v| v.as_str()), Some("object"));
        assert!(schema["properties"].get("command").is_some());
        assert_eq!(schema["required"], serde_json::json!(["command"]));
    }

    #[test]
    fn test_tool_definitions() {
        assert_eq!(exec_tool().name.as_ref(), "exec");
        assert_eq!(shell_exec_tool().name.as_ref(), "shell-exec");
        assert_eq!(status_tool().name.as_ref(), "status");
        assert!(exec_tool().description.is_some());
    }
}
