//! Tool-call parsing
//!
//! Helpers shared by the loop and the provider adapters: fenced ```` ```tool ````
//! blocks for models without native function calling, raw argument strings
//! from vendors that ship arguments as JSON text, and call-id normalization.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::tool::ToolCall;

const TOOL_FENCE: &str = "```tool";
const FENCE_END: &str = "```";

/// Parse every ```` ```tool ```` block in `content`, in order. Falls back to
/// a single inline JSON object with a `"tool"` key.
pub fn extract_fenced_calls(content: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find(TOOL_FENCE) {
        let after_marker = &rest[start + TOOL_FENCE.len()..];
        let Some(end) = after_marker.find(FENCE_END) else {
            break;
        };
        let json_str = after_marker[..end].trim();
        match serde_json::from_str::<ToolCall>(json_str) {
            Ok(call) => calls.push(call),
            Err(e) => tracing::debug!(error = %e, "Ignoring unparseable tool block"),
        }
        rest = &after_marker[end + FENCE_END.len()..];
    }

    if calls.is_empty() {
        calls.extend(parse_inline_tool_call(content));
    }
    calls
}

/// Try to parse inline JSON tool call
fn parse_inline_tool_call(content: &str) -> Option<ToolCall> {
    if !content.contains(r#""tool""#) {
        return None;
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }

    serde_json::from_str::<ToolCall>(&content[start..=end]).ok()
}

/// Text with all tool blocks removed
pub fn strip_fenced_calls(content: &str) -> String {
    let mut text = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find(TOOL_FENCE) {
        text.push_str(&rest[..start]);
        let after_marker = &rest[start + TOOL_FENCE.len()..];
        match after_marker.find(FENCE_END) {
            Some(end) => rest = &after_marker[end + FENCE_END.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    text.push_str(rest);
    text.trim().to_string()
}

/// Decode arguments a vendor sent as JSON text. Blank means no arguments;
/// text that is not JSON is kept as a string so validation reports it.
pub fn parse_arguments(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Give every call a non-empty id that is unique within the round
pub fn normalize_call_ids(calls: &mut [ToolCall]) {
    let mut seen = HashSet::new();
    for call in calls.iter_mut() {
        if call.id.trim().is_empty() || !seen.insert(call.id.clone()) {
            let fresh = format!("call_{}", uuid::Uuid::new_v4().simple());
            tracing::debug!(tool = %call.name, old = %call.id, new = %fresh, "Assigned tool call id");
            call.id.clone_from(&fresh);
            seen.insert(fresh);
        }
    }
}
