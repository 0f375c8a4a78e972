//! C8: inject the `_is_done` completion signal into every tool schema.

use crate::types::Tool;
use serde_json::{json, Value};

const DONE_PROPERTY: &str = "_is_done";

/// Returns a shallow copy of `tools` with `_is_done` added to every
/// `inputSchema.properties` and `required` list. Idempotent: wrapping an
/// already-wrapped tool yields the same schema back.
pub fn wrap_tools(tools: &[Tool]) -> Vec<Tool> {
    tools.iter().map(wrap_tool).collect()
}

fn wrap_tool(tool: &Tool) -> Tool {
    let mut schema = tool.input_schema.clone();
    if let Some(obj) = schema.as_object_mut() {
        let properties = obj
            .entry("properties")
            .or_insert_with(|| json!({}))
            .as_object_mut()
            .map(|m| {
                m.insert(
                    DONE_PROPERTY.to_string(),
                    json!({
                        "type": "boolean",
                        "description": "Whether the task is complete. If false, agentic loop will continue to perform the task."
                    }),
                );
            });
        if properties.is_none() {
            obj.insert(
                "properties".to_string(),
                json!({ DONE_PROPERTY: {
                    "type": "boolean",
                    "description": "Whether the task is complete. If false, agentic loop will continue to perform the task."
                }}),
            );
        }

        let required = obj.entry("required").or_insert_with(|| json!([]));
        if let Some(arr) = required.as_array_mut() {
            if !arr.iter().any(|v| v == DONE_PROPERTY) {
                arr.push(Value::String(DONE_PROPERTY.to_string()));
            }
        } else {
            *required = json!([DONE_PROPERTY]);
        }
    }

    Tool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: schema,
    }
}

/// Reads `_is_done` out of a tool call's arguments object.
pub fn is_done(arguments: &Value) -> bool {
    arguments
        .get(DONE_PROPERTY)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_tool() -> Tool {
        Tool {
            name: "push".to_string(),
            description: "push a number".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "n": { "type": "integer" } },
                "required": ["n"]
            }),
        }
    }

    #[test]
    fn adds_is_done_to_properties_and_required() {
        let wrapped = wrap_tool(&plain_tool());
        assert!(wrapped.input_schema["properties"]["_is_done"].is_object());
        assert_eq!(wrapped.input_schema["required"], json!(["n", "_is_done"]));
    }

    #[test]
    fn wrapping_is_idempotent() {
        let once = wrap_tool(&plain_tool());
        let twice = wrap_tool(&once);
        assert_eq!(once.input_schema, twice.input_schema);
    }

    #[test]
    fn does_not_mutate_original() {
        let original = plain_tool();
        let _ = wrap_tool(&original);
        assert!(original.input_schema["properties"].get("_is_done").is_none());
    }
}
