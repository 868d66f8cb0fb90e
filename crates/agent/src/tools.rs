//! The fixed tool schema the model browses with.

use serde_json::{json, Value};

/// All tools, in OpenAI function format (providers convert as needed).
pub fn tool_schemas() -> Vec<Value> {
    vec![
        tool(
            "navigate",
            "Navigate the browser to a URL.",
            json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Absolute URL to open"}
                },
                "required": ["url"]
            }),
        ),
        tool(
            "click",
            "Click the element with the given ref from the current page snapshot.",
            json!({
                "type": "object",
                "properties": {
                    "ref": {"type": "string", "description": "Element ref, e.g. 'e5'"}
                },
                "required": ["ref"]
            }),
        ),
        tool(
            "fill",
            "Clear the input with the given ref and type the text into it.",
            json!({
                "type": "object",
                "properties": {
                    "ref": {"type": "string", "description": "Element ref, e.g. 'e3'"},
                    "text": {"type": "string", "description": "Text to type"}
                },
                "required": ["ref", "text"]
            }),
        ),
        tool(
            "hover",
            "Move the mouse over the element with the given ref.",
            json!({
                "type": "object",
                "properties": {
                    "ref": {"type": "string"}
                },
                "required": ["ref"]
            }),
        ),
        tool(
            "select_option",
            "Select an option in the dropdown with the given ref, by value or visible text.",
            json!({
                "type": "object",
                "properties": {
                    "ref": {"type": "string"},
                    "value": {"type": "string", "description": "Option value or visible text"}
                },
                "required": ["ref", "value"]
            }),
        ),
        tool(
            "press_key",
            "Press a keyboard key in the page.",
            json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "enum": ["Enter", "Tab", "Escape", "Backspace"]}
                },
                "required": ["key"]
            }),
        ),
        tool(
            "scroll",
            "Scroll the page.",
            json!({
                "type": "object",
                "properties": {
                    "direction": {"type": "string", "enum": ["down", "up"]}
                },
                "required": ["direction"]
            }),
        ),
        tool(
            "screenshot",
            "Capture a PNG screenshot of the current page.",
            json!({"type": "object", "properties": {}}),
        ),
        tool(
            "extract_text",
            "Extract the visible text content of the current page.",
            json!({"type": "object", "properties": {}}),
        ),
        tool(
            "done",
            "Finish the task and report the result.",
            json!({
                "type": "object",
                "properties": {
                    "result": {"type": "string", "description": "Final answer or summary of what was accomplished"}
                },
                "required": ["result"]
            }),
        ),
    ]
}

fn tool(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_covers_the_whole_repertoire() {
        let names: Vec<String> = tool_schemas()
            .iter()
            .map(|t| t["function"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "navigate",
                "click",
                "fill",
                "hover",
                "select_option",
                "press_key",
                "scroll",
                "screenshot",
                "extract_text",
                "done"
            ]
        );
    }

    #[test]
    fn enums_are_closed() {
        let schemas = tool_schemas();
        let press = schemas.iter().find(|t| t["function"]["name"] == "press_key").unwrap();
        let keys = press["function"]["parameters"]["properties"]["key"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(keys.len(), 4);
        let scroll = schemas.iter().find(|t| t["function"]["name"] == "scroll").unwrap();
        let dirs = scroll["function"]["parameters"]["properties"]["direction"]["enum"]
            .as_array()
            .unwrap();
        assert_eq!(dirs.len(), 2);
    }
}
