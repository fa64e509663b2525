use serde::Serialize;
use serde_json::{json, Value};

use super::path_safety::{self, PathVerdict, FILE_TOOLS};
use super::PolicyContext;
use crate::config::CompassConfig;
use crate::error::CompassError;
use crate::hook::{extract_content_from_tool_input, ToolCall};
use crate::paths::CompassPaths;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub reason: String,
    pub suggestions: Vec<String>,
    /// Task request the caller should issue to complete validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_request: Option<Value>,
}

impl ValidationOutcome {
    pub fn passed(reason: impl Into<String>) -> Self {
        Self {
            valid: true,
            reason: reason.into(),
            suggestions: Vec::new(),
            task_request: None,
        }
    }

    pub fn failed(reason: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
            suggestions,
            task_request: None,
        }
    }
}

/// Delegated check run for `double_check` invocations. Implementations may
/// re-enter the policy engine with the same context.
pub trait Validator {
    fn validate(
        &self,
        call: &ToolCall<'_>,
        ctx: &PolicyContext,
    ) -> Result<ValidationOutcome, CompassError>;
}

/// Local parameter and path checks, then hands the deeper review to the
/// validator agent through a prepared Task request
pub struct UpstreamValidator<'a> {
    paths: &'a CompassPaths,
    config: &'a CompassConfig,
}

impl<'a> UpstreamValidator<'a> {
    pub fn new(paths: &'a CompassPaths, config: &'a CompassConfig) -> Self {
        Self { paths, config }
    }

    fn missing_parameters(call: &ToolCall<'_>) -> Vec<&'static str> {
        let required: &[&'static str] = match call.tool_name {
            "Write" => &["file_path", "content"],
            "Edit" => &["file_path", "old_string", "new_string"],
            "MultiEdit" => &["file_path", "edits"],
            "NotebookEdit" => &["notebook_path", "new_source"],
            "Task" => &["prompt"],
            _ => &[],
        };
        required
            .iter()
            .copied()
            .filter(|key| match call.tool_input.get(*key) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => key.ends_with("path") && s.trim().is_empty(),
                _ => false,
            })
            .collect()
    }

    fn task_request(&self, call: &ToolCall<'_>) -> Value {
        let input = serde_json::to_string_pretty(call.tool_input).unwrap_or_default();
        json!({
            "subagent_type": self.config.validator_agent,
            "description": format!("Validate {} against upstream", call.tool_name),
            "prompt": format!(
                "Validate the following tool usage against upstream documentation:\n\n\
                 Tool: {}\nInput: {}\n\n\
                 1. Discover upstream repositories for this project\n\
                 2. Check parameters against current upstream practice\n\
                 3. Report breaking changes or deprecations\n\
                 4. Return a validation result with recommendations",
                call.tool_name, input
            ),
            "validation_request": true,
        })
    }
}

impl Validator for UpstreamValidator<'_> {
    fn validate(
        &self,
        call: &ToolCall<'_>,
        ctx: &PolicyContext,
    ) -> Result<ValidationOutcome, CompassError> {
        tracing::debug!(tool = call.tool_name, depth = ctx.depth(), "Running upstream validation");

        let missing = Self::missing_parameters(call);
        if !missing.is_empty() {
            return Ok(ValidationOutcome::failed(
                format!(
                    "{} is missing required parameters: {}",
                    call.tool_name,
                    missing.join(", ")
                ),
                missing.iter().map(|m| format!("Provide `{}`", m)).collect(),
            ));
        }

        if FILE_TOOLS.contains(&call.tool_name) {
            if let Some(target) = path_safety::target_path(call)? {
                let content = extract_content_from_tool_input(call.tool_name, call.tool_input);
                if let PathVerdict::RootLevel { redirect, .. } =
                    path_safety::check_path(self.paths, self.config, target, &content)
                {
                    return Ok(ValidationOutcome::failed(
                        format!("'{}' would be written to the project root", target),
                        vec![format!("Use {}", self.paths.display_relative(&redirect))],
                    ));
                }
            }
        }

        let mut outcome = ValidationOutcome::passed(format!(
            "Upstream validation delegated to {}",
            self.config.validator_agent
        ));
        outcome.task_request = Some(self.task_request(call));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn input(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn missing_parameters_fail_validation() {
        let cfg = CompassConfig::default();
        let paths = CompassPaths::new("/p", &cfg);
        let validator = UpstreamValidator::new(&paths, &cfg);
        let ctx = PolicyContext::new(cfg.max_validation_depth);
        let tool_input = input(json!({"file_path": "docs/a.md"}));
        let call = ToolCall { tool_name: "Write", tool_input: &tool_input };
        let outcome = validator.validate(&call, &ctx).unwrap();
        assert!(!outcome.valid);
        assert!(outcome.reason.contains("content"));
    }

    #[test]
    fn root_targets_fail_with_redirect_suggestion() {
        let cfg = CompassConfig::default();
        let paths = CompassPaths::new("/p", &cfg);
        let validator = UpstreamValidator::new(&paths, &cfg);
        let ctx = PolicyContext::new(cfg.max_validation_depth);
        let tool_input = input(json!({"file_path": "plan.md", "content": "x"}));
        let call = ToolCall { tool_name: "Write", tool_input: &tool_input };
        let outcome = validator.validate(&call, &ctx).unwrap();
        assert!(!outcome.valid);
        assert_eq!(outcome.suggestions, vec!["Use docs/plan.md".to_string()]);
    }

    #[test]
    fn valid_calls_prepare_validator_task() {
        let cfg = CompassConfig::default();
        let paths = CompassPaths::new("/p", &cfg);
        let validator = UpstreamValidator::new(&paths, &cfg);
        let ctx = PolicyContext::new(cfg.max_validation_depth);
        let tool_input = input(json!({"file_path": "docs/plan.md", "content": "x"}));
        let call = ToolCall { tool_name: "Write", tool_input: &tool_input };
        let outcome = validator.validate(&call, &ctx).unwrap();
        assert!(outcome.valid);
        let task = outcome.task_request.unwrap();
        assert_eq!(task["subagent_type"], "compass-upstream-validator");
        assert_eq!(task["validation_request"], true);
    }

    #[test]
    fn non_string_path_is_an_error() {
        let cfg = CompassConfig::default();
        let paths = CompassPaths::new("/p", &cfg);
        let validator = UpstreamValidator::new(&paths, &cfg);
        let ctx = PolicyContext::new(cfg.max_validation_depth);
        let tool_input = input(json!({"file_path": ["a"], "content": "x"}));
        let call = ToolCall { tool_name: "Write", tool_input: &tool_input };
        assert!(validator.validate(&call, &ctx).is_err());
    }
}
