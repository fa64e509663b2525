//! Heuristic token accounting for methodology agents.
//!
//! Estimates are deliberately rough: `chars / 4`, scaled by a per-agent
//! complexity multiplier, plus a capped context-loading overhead for agents in
//! the methodology namespace and a size-based addend for structured input.

pub mod ledger;
pub mod report;

pub use ledger::{TokenLedger, TokenLedgerStore};
pub use report::TokenReport;

use serde_json::Value;
use std::collections::HashMap;

use crate::config::CompassConfig;
use crate::validation_constants::{
    CHARS_PER_TOKEN, CONTEXT_OVERHEAD_RATIO, DELEGATION_OVERHEAD_RATIO,
    EXTRA_INPUT_CHARS_PER_TOKEN, MAX_CONTEXT_OVERHEAD_TOKENS,
};

/// Agents recognised when they are only mentioned in a Task prompt
pub const KNOWN_AGENTS: &[&str] = &[
    "compass-captain",
    "compass-knowledge-query",
    "compass-pattern-apply",
    "compass-gap-analysis",
    "compass-doc-planning",
    "compass-enhanced-analysis",
    "compass-cross-reference",
    "compass-svg-analyst",
    "compass-coder",
    "compass-second-opinion",
    "compass-breakthrough-doc",
    "compass-upstream-validator",
    "compass-dependency-tracker",
    "compass-writing-analyst",
    "compass-academic-analyst",
    "compass-memory-enhanced-writer",
    "compass-data-flow",
    "compass-todo-sync",
];

/// Phrases that imply the coordinator even when no agent is named
const COORDINATOR_PHRASES: &[&str] = &[
    "compass methodology",
    "6-phase",
    "institutional knowledge integration",
    "compass captain",
    "coordinate compass",
    "orchestrate compass",
];

#[derive(Debug, Clone)]
pub struct TokenEstimator {
    multipliers: HashMap<String, f64>,
    namespace: String,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::from_config(&CompassConfig::default())
    }
}

impl TokenEstimator {
    pub fn from_config(config: &CompassConfig) -> Self {
        Self {
            multipliers: config.token_multipliers.clone(),
            namespace: config.agent_namespace.clone(),
        }
    }

    pub fn multiplier(&self, operation: &str) -> f64 {
        self.multipliers.get(operation).copied().unwrap_or(1.0)
    }

    /// Deterministic estimate; empty content costs nothing
    pub fn estimate_tokens(&self, operation: &str, content: &str, extra: Option<&Value>) -> u64 {
        if content.is_empty() {
            return 0;
        }
        let base = content.chars().count() as u64 / CHARS_PER_TOKEN;
        let mut tokens = base as f64 * self.multiplier(operation);

        if operation.starts_with(&self.namespace) {
            tokens += (base as f64 * CONTEXT_OVERHEAD_RATIO).min(MAX_CONTEXT_OVERHEAD_TOKENS);
        }

        let mut total = tokens.max(0.0) as u64;
        if let Some(extra) = extra {
            let size = serde_json::to_string(extra).map(|s| s.len()).unwrap_or(0) as u64;
            total += size / EXTRA_INPUT_CHARS_PER_TOKEN;
        }
        total
    }

    /// Hidden cost of the specialists a coder agent is expected to delegate to
    pub fn delegation_tokens(&self, primary: &str, chain: &[&str]) -> u64 {
        chain
            .iter()
            .map(|specialist| {
                let context = format!(
                    "Delegated task from {} requiring {} expertise",
                    primary, specialist
                );
                let tokens = self.estimate_tokens(specialist, &context, None);
                tokens + (tokens as f64 * DELEGATION_OVERHEAD_RATIO) as u64
            })
            .sum()
    }
}

pub fn map_agent_to_phase(agent: &str) -> Option<&'static str> {
    let phase = match agent {
        "compass-captain" => "coordination",
        "compass-knowledge-query" => "phase1_knowledge_query",
        "compass-pattern-apply" => "phase2_pattern_application",
        "compass-doc-planning" => "phase2_documentation_planning",
        "compass-data-flow" => "phase2_data_flow_analysis",
        "compass-gap-analysis" => "phase3_gap_analysis",
        "compass-enhanced-analysis" => "phase4_enhanced_analysis",
        "compass-cross-reference" => "phase5_cross_reference",
        "compass-svg-analyst" => "phase5_svg_analysis",
        "compass-coder" => "phase6_execution_bridge",
        _ => return None,
    };
    Some(phase)
}

pub fn predict_specialist_delegation(prompt: &str) -> Vec<&'static str> {
    let lower = prompt.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    let mut specialists = Vec::new();

    if mentions(&["code", "function", "class", "implement", "refactor"]) {
        specialists.push("Code");
    }
    if mentions(&["coordinate", "multi-step", "complex", "workflow"]) {
        specialists.push("Task");
    }
    if mentions(&["debug", "error", "issue", "problem", "troubleshoot"]) {
        specialists.push("Debugger");
    }
    if mentions(&["data", "analysis", "query", "sql", "bigquery"]) {
        specialists.push("Data Scientist");
    }
    specialists
}

/// Which methodology agent a Task call targets: explicit `subagent_type`
/// first, then agent names or coordinator phrases inside the prompt.
pub fn detect_agent(
    subagent_type: Option<&str>,
    prompt: &str,
    namespace: &str,
    coordinator: &str,
) -> Option<String> {
    if let Some(agent) = subagent_type.map(str::trim).filter(|s| !s.is_empty()) {
        if agent.starts_with(namespace) {
            return Some(agent.to_string());
        }
    }

    let lower = prompt.to_lowercase();
    // Longest names first so "compass-coder" does not shadow a longer match
    let mut agents: Vec<&str> = KNOWN_AGENTS.to_vec();
    agents.sort_by_key(|a| std::cmp::Reverse(a.len()));
    if let Some(agent) = agents.into_iter().find(|a| lower.contains(a)) {
        return Some(agent.to_string());
    }
    if COORDINATOR_PHRASES.iter().any(|p| lower.contains(p)) {
        return Some(coordinator.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_costs_nothing() {
        let est = TokenEstimator::default();
        assert_eq!(est.estimate_tokens("compass-captain", "", None), 0);
    }

    #[test]
    fn unknown_operation_uses_unit_multiplier() {
        let est = TokenEstimator::default();
        // 400 chars -> 100 base tokens, no namespace overhead
        assert_eq!(est.estimate_tokens("Write", &"a".repeat(400), None), 100);
    }

    #[test]
    fn namespace_agents_get_capped_overhead() {
        let est = TokenEstimator::default();
        // 100 base * 1.2 + min(20, 500)
        assert_eq!(est.estimate_tokens("compass-captain", &"a".repeat(400), None), 140);
        // 100_000 base * 2.0 + 500 cap
        let huge = "a".repeat(400_000);
        assert_eq!(
            est.estimate_tokens("compass-enhanced-analysis", &huge, None),
            200_500
        );
    }

    #[test]
    fn extra_input_adds_size_based_tokens() {
        let est = TokenEstimator::default();
        let extra = serde_json::json!({"prompt": "x".repeat(90)});
        let json_len = serde_json::to_string(&extra).unwrap().len() as u64;
        assert_eq!(
            est.estimate_tokens("Write", &"a".repeat(40), Some(&extra)),
            10 + json_len / 10
        );
    }

    #[test]
    fn phases_map_for_known_agents_only() {
        assert_eq!(map_agent_to_phase("compass-gap-analysis"), Some("phase3_gap_analysis"));
        assert_eq!(map_agent_to_phase("delegation_chain"), None);
    }

    #[test]
    fn specialist_prediction_follows_keywords() {
        let chain = predict_specialist_delegation("Debug the SQL query error in this function");
        assert_eq!(chain, vec!["Code", "Debugger", "Data Scientist"]);
        assert!(predict_specialist_delegation("hello").is_empty());
    }

    #[test]
    fn delegation_adds_hop_overhead() {
        let est = TokenEstimator::default();
        let single = est.estimate_tokens(
            "Code",
            "Delegated task from compass-coder requiring Code expertise",
            None,
        );
        let with_overhead = single + (single as f64 * 0.05) as u64;
        assert_eq!(est.delegation_tokens("compass-coder", &["Code"]), with_overhead);
    }

    #[test]
    fn detect_agent_prefers_subagent_type() {
        let agent = detect_agent(
            Some("compass-gap-analysis"),
            "mentions compass-coder",
            "compass-",
            "compass-captain",
        );
        assert_eq!(agent.as_deref(), Some("compass-gap-analysis"));
    }

    #[test]
    fn detect_agent_scans_prompt_and_phrases() {
        let agent = detect_agent(
            Some("general-purpose"),
            "Run compass-knowledge-query now",
            "compass-",
            "compass-captain",
        );
        assert_eq!(agent.as_deref(), Some("compass-knowledge-query"));
        let agent = detect_agent(
            None,
            "Apply the COMPASS methodology here",
            "compass-",
            "compass-captain",
        );
        assert_eq!(agent.as_deref(), Some("compass-captain"));
        assert!(detect_agent(None, "plain request", "compass-", "compass-captain").is_none());
    }
}
