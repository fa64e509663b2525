//! User-facing guidance text attached to decisions.

use super::path_safety::FileCategory;
use super::validation::ValidationOutcome;

/// Guidance injected on prompts and attached to every tool decision
pub fn coordination_context(coordinator: &str, status_path: &str) -> String {
    format!(
        "🧭 COMPASS METHODOLOGY REQUIRED\n\n\
         This request requires systematic institutional knowledge integration.\n\n\
         MANDATORY: Use the Task tool with subagent_type='{coordinator}' to coordinate the 6-phase COMPASS methodology:\n\
         1. Knowledge Query: search docs/ and maps/ for existing patterns\n\
         2. Pattern Application: apply documented approaches\n\
         3. Gap Analysis: identify what is not yet known\n\
         4. Documentation Planning: plan where new findings will live\n\
         5. Enhanced Analysis: analyse with institutional context\n\
         6. Cross-Reference: link findings back to existing knowledge\n\n\
         Write new documents under docs/, diagrams under maps/, scratch tests under .compass/tests/. \
         Files are never created directly in the project root.\n\n\
         📄 STATUS: Check {status_path} for the current phase and token usage."
    )
}

pub fn coordination_required_message(
    tool_name: &str,
    coordinator: &str,
    status_path: &str,
) -> String {
    format!(
        "🧭 COMPASS METHODOLOGY REQUIRED\n\n\
         The tool '{tool_name}' requires systematic analysis.\n\n\
         REQUIRED ACTION:\n\
         1. Use the Task tool with subagent_type='{coordinator}'\n\
         2. This will coordinate the full 6-phase COMPASS methodology\n\
         3. Check {status_path} for current progress"
    )
}

pub fn root_write_message(original: &str, redirect: &str, category: FileCategory) -> String {
    format!(
        "🚫 ROOT WRITE BLOCKED\n\n\
         '{original}' would be created directly in the project root.\n\
         Classified as {label}; write it to '{redirect}' instead.",
        label = category.label(),
    )
}

pub fn invalid_path_message(detail: &str) -> String {
    format!(
        "🚫 FILE TARGET REJECTED\n\n\
         The file target could not be checked ({detail}). Provide a string path below the project root."
    )
}

pub fn recursion_warning(reason: &str) -> String {
    format!("⚠️ Nested validation not performed: {reason}. Tool allowed without further checks.")
}

pub fn validation_failed_message(outcome: &ValidationOutcome) -> String {
    let mut message = format!("⚠️ Upstream validation failed: {}", outcome.reason);
    if !outcome.suggestions.is_empty() {
        message.push_str("\n\nSuggestions:");
        for suggestion in &outcome.suggestions {
            message.push_str("\n  • ");
            message.push_str(suggestion);
        }
    }
    message
}

pub fn validation_error_message(error: &str) -> String {
    format!("⚠️ Upstream validation failed: validation system error: {error}")
}
