//! Hook event input and output shapes, plus the bounded stdin reader.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::Read;

use crate::error::CompassError;
use crate::policy::{Decision, Permission};

/// Hook event names the handler acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    SubagentStop,
    Stop,
    SessionEnd,
    Other(String),
}

impl HookEvent {
    pub fn parse(name: &str) -> Self {
        match name {
            "UserPromptSubmit" => HookEvent::UserPromptSubmit,
            "PreToolUse" => HookEvent::PreToolUse,
            "PostToolUse" => HookEvent::PostToolUse,
            "SubagentStop" => HookEvent::SubagentStop,
            "Stop" => HookEvent::Stop,
            "SessionEnd" => HookEvent::SessionEnd,
            other => HookEvent::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            HookEvent::UserPromptSubmit => "UserPromptSubmit",
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::PostToolUse => "PostToolUse",
            HookEvent::SubagentStop => "SubagentStop",
            HookEvent::Stop => "Stop",
            HookEvent::SessionEnd => "SessionEnd",
            HookEvent::Other(name) => name,
        }
    }
}

/// Claude Code hook input; only the fields the handler reads
#[derive(Debug, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub hook_event_name: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default, deserialize_with = "object_or_empty")]
    pub tool_input: HashMap<String, Value>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

// A non-object tool_input is treated as empty; per-field checks report the rest
fn object_or_empty<'de, D>(deserializer: D) -> Result<HashMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Ok(HashMap::new()),
    }
}

impl HookInput {
    pub fn event(&self) -> HookEvent {
        HookEvent::parse(self.hook_event_name.as_deref().unwrap_or(""))
    }

    pub fn tool_name(&self) -> &str {
        self.tool_name.as_deref().unwrap_or("")
    }

    pub fn prompt(&self) -> &str {
        self.prompt.as_deref().unwrap_or("")
    }

    pub fn tool_call(&self) -> ToolCall<'_> {
        ToolCall {
            tool_name: self.tool_name(),
            tool_input: &self.tool_input,
        }
    }
}

/// Borrowed view of a tool invocation
#[derive(Debug, Clone, Copy)]
pub struct ToolCall<'a> {
    pub tool_name: &'a str,
    pub tool_input: &'a HashMap<String, Value>,
}

impl<'a> ToolCall<'a> {
    pub fn str_field(&self, key: &str) -> Option<&'a str> {
        self.tool_input.get(key).and_then(Value::as_str)
    }

    /// Loose boolean flag: `true`, `"true"` and `1` all count
    pub fn flag(&self, key: &str) -> bool {
        match self.tool_input.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        }
    }

    pub fn subagent_type(&self) -> Option<&'a str> {
        self.str_field("subagent_type")
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Read exactly one JSON object from `reader`, refusing more than `max_bytes`
pub fn read_event<R: Read>(reader: R, max_bytes: usize) -> Result<HookInput, CompassError> {
    let mut buf = Vec::new();
    reader
        .take(max_bytes as u64 + 1)
        .read_to_end(&mut buf)?;
    if buf.len() > max_bytes {
        return Err(CompassError::InputTooLarge { limit: max_bytes });
    }
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Err(CompassError::EmptyInput);
    }

    let value: Value = serde_json::from_slice(&buf).map_err(CompassError::MalformedInput)?;
    let kind = match &value {
        Value::Object(_) => None,
        Value::Null => Some("null"),
        Value::Bool(_) => Some("a boolean"),
        Value::Number(_) => Some("a number"),
        Value::String(_) => Some("a string"),
        Value::Array(_) => Some("an array"),
    };
    if let Some(kind) = kind {
        return Err(CompassError::NotAnObject(kind));
    }
    serde_json::from_value(value).map_err(CompassError::MalformedInput)
}

/// Extract written content from tool input based on tool type
pub fn extract_content_from_tool_input(
    tool_name: &str,
    tool_input: &HashMap<String, Value>,
) -> String {
    let field = |key: &str| {
        tool_input
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    };
    match tool_name {
        "Write" => field("content"),
        "Edit" => field("new_string"),
        "NotebookEdit" => field("new_source"),
        "MultiEdit" => tool_input
            .get("edits")
            .and_then(|v| v.as_array())
            .map(|edits| {
                edits
                    .iter()
                    .filter_map(|edit| edit.get("new_string")?.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
        _ => String::new(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HookSpecificOutput {
    #[serde(rename = "hookEventName")]
    pub hook_event_name: String,
    #[serde(rename = "permissionDecision", skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<Permission>,
    #[serde(rename = "permissionDecisionReason", skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
    #[serde(rename = "additionalContext", skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

/// The single JSON object written to stdout. Empty for events without output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HookOutput {
    #[serde(rename = "permissionDecision", skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<Permission>,
    #[serde(rename = "permissionDecisionReason", skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
    #[serde(rename = "hookSpecificOutput", skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

impl HookOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn prompt(additional_context: Option<String>) -> Self {
        Self {
            hook_specific_output: Some(HookSpecificOutput {
                hook_event_name: HookEvent::UserPromptSubmit.as_str().to_string(),
                permission_decision: None,
                permission_decision_reason: None,
                additional_context,
            }),
            ..Self::default()
        }
    }

    pub fn tool(decision: &Decision) -> Self {
        Self {
            permission_decision: Some(decision.permission),
            permission_decision_reason: Some(decision.reason.clone()),
            hook_specific_output: Some(HookSpecificOutput {
                hook_event_name: HookEvent::PreToolUse.as_str().to_string(),
                permission_decision: Some(decision.permission),
                permission_decision_reason: Some(decision.reason.clone()),
                additional_context: decision.context.clone(),
            }),
        }
    }

    pub fn is_deny(&self) -> bool {
        self.permission_decision == Some(Permission::Deny)
    }

    pub fn to_json(&self) -> Result<String, CompassError> {
        serde_json::to_string(self).map_err(CompassError::Serialize)
    }
}
