//! Allow / deny / annotate decisions for prompt and tool events.
//!
//! Tool rules run in order and the first applicable one decides:
//! path safety, recursion guard, double-check escalation, coordination.
//! Path-safety problems fail closed; bookkeeping problems fail open.

pub mod complexity;
pub mod context;
pub mod path_safety;
pub mod validation;

pub use path_safety::{check_path, is_path_safe, FileCategory, PathVerdict};
pub use validation::{UpstreamValidator, ValidationOutcome, Validator};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cell::Cell;

use crate::compass::Compass;
use crate::hook::{extract_content_from_tool_input, ToolCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Allow,
    Deny,
}

/// Which rule produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    PathSafety,
    RecursionGuard,
    DoubleCheck,
    Coordination,
}

impl Rule {
    pub fn as_str(self) -> &'static str {
        match self {
            Rule::PathSafety => "path_safety",
            Rule::RecursionGuard => "recursion_guard",
            Rule::DoubleCheck => "double_check",
            Rule::Coordination => "coordination",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub permission: Permission,
    pub reason: String,
    pub context: Option<String>,
    pub rule: Option<Rule>,
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            permission: Permission::Allow,
            reason: reason.into(),
            context: None,
            rule: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            permission: Permission::Deny,
            reason: reason.into(),
            context: None,
            rule: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn by(mut self, rule: Rule) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn is_allow(&self) -> bool {
        self.permission == Permission::Allow
    }
}

/// Per-invocation policy state. The validation depth starts from
/// `COMPASS_VALIDATION_DEPTH` (set by a parent hook process, if any) and is
/// never written back to the environment.
#[derive(Debug)]
pub struct PolicyContext {
    depth: Cell<u32>,
    max_depth: u32,
}

impl PolicyContext {
    pub fn new(max_depth: u32) -> Self {
        Self::with_depth(0, max_depth)
    }

    pub fn with_depth(depth: u32, max_depth: u32) -> Self {
        Self {
            depth: Cell::new(depth),
            max_depth,
        }
    }

    pub fn from_env(max_depth: u32) -> Self {
        let depth = std::env::var("COMPASS_VALIDATION_DEPTH")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        Self::with_depth(depth, max_depth)
    }

    pub fn depth(&self) -> u32 {
        self.depth.get()
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn at_limit(&self) -> bool {
        self.depth() >= self.max_depth
    }

    /// Increment depth until the guard drops, unwinding included
    pub fn enter(&self) -> DepthGuard<'_> {
        let previous = self.depth.get();
        self.depth.set(previous.saturating_add(1));
        DepthGuard { ctx: self, previous }
    }
}

pub struct DepthGuard<'a> {
    ctx: &'a PolicyContext,
    previous: u32,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.ctx.depth.set(self.previous);
    }
}

pub struct PolicyEngine<'a> {
    compass: &'a Compass,
    validator: &'a dyn Validator,
}

impl<'a> PolicyEngine<'a> {
    pub fn new(compass: &'a Compass, validator: &'a dyn Validator) -> Self {
        Self { compass, validator }
    }

    fn status_display(&self) -> String {
        self.compass
            .paths
            .display_relative(&self.compass.paths.status_file())
    }

    fn coordination_context(&self) -> String {
        context::coordination_context(
            &self.compass.config.coordinator_agent,
            &self.status_display(),
        )
    }

    fn is_namespace_agent(&self, agent: &str) -> bool {
        agent.starts_with(&self.compass.config.agent_namespace)
    }

    /// Additional context to inject for a submitted prompt, if any
    pub fn evaluate_prompt(&self, prompt: &str, now: DateTime<Utc>) -> Option<String> {
        let log = &self.compass.log;
        log.log_at(
            "prompt_analysis",
            &format!("Analyzing: {}", crate::truncate_utf8_safe(prompt, 100)),
            now,
        );

        let oracle = &self.compass.oracle;
        if oracle.is_active_at(now) {
            if let Err(e) = oracle.touch_activity_at(now) {
                tracing::debug!(error = %e, "Failed to refresh session activity");
            }
            return None;
        }

        if self.compass.config.complexity_gate && !complexity::is_complex_prompt(prompt) {
            log.log_at("simple_request", "Simple request, coordination not required", now);
            return None;
        }

        if let Err(e) = oracle.mark_session_active_at(now) {
            log.log_at("session_mark_error", &format!("Failed to mark session: {}", e), now);
        }
        log.log_at("compass_required", "Injecting coordination context", now);
        Some(self.coordination_context())
    }

    pub fn evaluate_tool(
        &self,
        call: &ToolCall<'_>,
        ctx: &PolicyContext,
        now: DateTime<Utc>,
    ) -> Decision {
        self.compass
            .log
            .log_at("tool_intercept", &format!("Intercepted: {}", call.tool_name), now);
        let decision = self.decide_tool(call, ctx, now);
        let action = if decision.is_allow() { "tool_allowed" } else { "tool_denied" };
        self.compass.log.log_at(
            action,
            &format!(
                "{} [{}]",
                call.tool_name,
                decision.rule.map(Rule::as_str).unwrap_or("none")
            ),
            now,
        );
        decision.with_context(self.coordination_context())
    }

    fn decide_tool(
        &self,
        call: &ToolCall<'_>,
        ctx: &PolicyContext,
        now: DateTime<Utc>,
    ) -> Decision {
        if let Some(decision) = self.check_path_safety(call) {
            return decision;
        }
        if let Some(decision) = self.recursion_guard(call, ctx) {
            return decision;
        }

        let mut validation_note = None;
        if call.flag("double_check") {
            match self.double_check(call, ctx, now) {
                Ok(note) => validation_note = note,
                Err(decision) => return decision,
            }
        }

        let mut decision = self.coordination(call, now);
        if let Some(note) = validation_note {
            decision.reason = format!("{}\n\n{}", decision.reason, note);
        }
        decision
    }

    fn check_path_safety(&self, call: &ToolCall<'_>) -> Option<Decision> {
        let target = match path_safety::target_path(call) {
            Ok(Some(target)) => target,
            Ok(None) => return None,
            Err(e) => {
                self.compass
                    .log
                    .log("path_safety_error", &format!("{}: {}", call.tool_name, e));
                let message = context::invalid_path_message(&e.to_string());
                return Some(Decision::deny(message).by(Rule::PathSafety));
            }
        };

        let content = extract_content_from_tool_input(call.tool_name, call.tool_input);
        let paths = &self.compass.paths;
        match check_path(paths, &self.compass.config, target, &content) {
            PathVerdict::RootLevel {
                file_name,
                category,
                redirect,
            } => {
                let redirect = paths.display_relative(&redirect);
                self.compass.log.log(
                    "root_write_blocked",
                    &format!("{} -> {}", file_name, redirect),
                );
                Some(
                    Decision::deny(context::root_write_message(target, &redirect, category))
                        .by(Rule::PathSafety),
                )
            }
            _ => None,
        }
    }

    fn recursion_guard(&self, call: &ToolCall<'_>, ctx: &PolicyContext) -> Option<Decision> {
        let validator_agent = &self.compass.config.validator_agent;
        // Only the validator Task itself is exempt; a bare `validation_request`
        // flag on any other tool does not skip coordination.
        let is_validator_task =
            call.tool_name == "Task" && call.subagent_type() == Some(validator_agent.as_str());
        let reason = if is_validator_task {
            format!("{} is itself the validator", validator_agent)
        } else if ctx.at_limit() {
            format!(
                "validation depth {} reached the limit of {}",
                ctx.depth(),
                ctx.max_depth()
            )
        } else {
            return None;
        };

        tracing::warn!(tool = call.tool_name, depth = ctx.depth(), "{}", reason);
        self.compass.log.log("recursion_guard", &reason);
        Some(Decision::allow(context::recursion_warning(&reason)).by(Rule::RecursionGuard))
    }

    /// `Ok` carries an optional note for the final decision; `Err` is a denial
    fn double_check(
        &self,
        call: &ToolCall<'_>,
        ctx: &PolicyContext,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, Decision> {
        let log = &self.compass.log;
        log.log_at(
            "upstream_validation",
            &format!("Double-check requested for {}", call.tool_name),
            now,
        );

        let result = {
            let _guard = ctx.enter();
            self.validator.validate(call, ctx)
        };

        match result {
            Ok(outcome) if outcome.valid => {
                log.log_at("upstream_validation_prepared", &outcome.reason, now);
                let note = outcome.task_request.as_ref().map(|task| {
                    format!(
                        "🔍 Upstream validation prepared: invoke the Task tool with {}",
                        task
                    )
                });
                Ok(note)
            }
            Ok(outcome) => {
                log.log_at("upstream_validation_failed", &outcome.reason, now);
                let message = context::validation_failed_message(&outcome);
                Err(Decision::deny(message).by(Rule::DoubleCheck))
            }
            Err(e) => {
                log.log_at("upstream_validation_error", &e.to_string(), now);
                let message = context::validation_error_message(&e.to_string());
                Err(Decision::deny(message).by(Rule::DoubleCheck))
            }
        }
    }

    fn coordination(&self, call: &ToolCall<'_>, now: DateTime<Utc>) -> Decision {
        let oracle = &self.compass.oracle;
        let log = &self.compass.log;

        if call.tool_name == "Task" {
            if let Some(agent) = call.subagent_type().filter(|a| self.is_namespace_agent(a)) {
                if let Err(e) = oracle.mark_session_active_at(now) {
                    log.log_at("policy_error", &format!("Failed to mark session: {}", e), now);
                }
                if let Err(e) = oracle.set_active_agent(agent, now) {
                    tracing::debug!(error = %e, "Failed to record active agent");
                }
                return Decision::allow(format!("Coordinated agent {} allowed", agent))
                    .by(Rule::Coordination);
            }
        }

        if oracle.is_active_at(now) {
            if let Err(e) = oracle.touch_activity_at(now) {
                log.log_at(
                    "policy_error",
                    &format!("Activity refresh failed, allowing: {}", e),
                    now,
                );
            }
            return Decision::allow("COMPASS session active").by(Rule::Coordination);
        }

        log.log_at(
            "coordination_required",
            &format!("Blocking {} until coordination begins", call.tool_name),
            now,
        );
        Decision::deny(context::coordination_required_message(
            call.tool_name,
            &self.compass.config.coordinator_agent,
            &self.status_display(),
        ))
        .by(Rule::Coordination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompassConfig;
    use crate::error::CompassError;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn tool_input(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    struct Failing;

    impl Validator for Failing {
        fn validate(
            &self,
            _call: &ToolCall<'_>,
            _ctx: &PolicyContext,
        ) -> Result<ValidationOutcome, CompassError> {
            Ok(ValidationOutcome::failed("nope", vec!["try again".into()]))
        }
    }

    struct Panicking;

    impl Validator for Panicking {
        fn validate(
            &self,
            _call: &ToolCall<'_>,
            _ctx: &PolicyContext,
        ) -> Result<ValidationOutcome, CompassError> {
            panic!("validator blew up")
        }
    }

    #[test]
    fn depth_guard_restores_previous_value() {
        let ctx = PolicyContext::with_depth(1, 3);
        {
            let _a = ctx.enter();
            assert_eq!(ctx.depth(), 2);
            {
                let _b = ctx.enter();
                assert!(ctx.at_limit());
            }
            assert_eq!(ctx.depth(), 2);
        }
        assert_eq!(ctx.depth(), 1);
    }

    #[test]
    fn depth_guard_restores_on_unwind() {
        let td = tempfile::tempdir().unwrap();
        let compass = Compass::open(td.path(), CompassConfig::default());
        let ctx = PolicyContext::new(3);
        let input = tool_input(json!({"double_check": true}));
        let call = ToolCall { tool_name: "Grep", tool_input: &input };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            PolicyEngine::new(&compass, &Panicking).evaluate_tool(&call, &ctx, Utc::now())
        }));
        assert!(result.is_err());
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn root_write_is_denied_before_anything_else() {
        let td = tempfile::tempdir().unwrap();
        let compass = Compass::open(td.path(), CompassConfig::default());
        let validator = UpstreamValidator::new(&compass.paths, &compass.config);
        let engine = PolicyEngine::new(&compass, &validator);
        let input = tool_input(json!({"file_path": "notes.md", "validation_request": true}));
        let call = ToolCall { tool_name: "Write", tool_input: &input };
        let decision = engine.evaluate_tool(&call, &PolicyContext::new(3), Utc::now());
        assert_eq!(decision.permission, Permission::Deny);
        assert_eq!(decision.rule, Some(Rule::PathSafety));
        assert!(decision.reason.contains("docs/notes.md"));
        assert!(decision.context.unwrap().contains("compass-captain"));
    }

    #[test]
    fn malformed_path_fails_closed() {
        let td = tempfile::tempdir().unwrap();
        let compass = Compass::open(td.path(), CompassConfig::default());
        let validator = UpstreamValidator::new(&compass.paths, &compass.config);
        let engine = PolicyEngine::new(&compass, &validator);
        let input = tool_input(json!({"file_path": {"nested": true}}));
        let call = ToolCall { tool_name: "Edit", tool_input: &input };
        let decision = engine.evaluate_tool(&call, &PolicyContext::new(3), Utc::now());
        assert_eq!(decision.permission, Permission::Deny);
        assert_eq!(decision.rule, Some(Rule::PathSafety));
    }

    #[test]
    fn validator_task_is_allowed_with_warning() {
        let td = tempfile::tempdir().unwrap();
        let compass = Compass::open(td.path(), CompassConfig::default());
        let engine = PolicyEngine::new(&compass, &Failing);
        let input = tool_input(json!({
            "subagent_type": "compass-upstream-validator",
            "double_check": true
        }));
        let call = ToolCall { tool_name: "Task", tool_input: &input };
        let decision = engine.evaluate_tool(&call, &PolicyContext::new(3), Utc::now());
        assert!(decision.is_allow());
        assert_eq!(decision.rule, Some(Rule::RecursionGuard));
        assert!(decision.reason.contains("Nested validation not performed"));
    }

    #[test]
    fn failed_double_check_denies_with_suggestions() {
        let td = tempfile::tempdir().unwrap();
        let compass = Compass::open(td.path(), CompassConfig::default());
        let engine = PolicyEngine::new(&compass, &Failing);
        let input = tool_input(json!({"double_check": true, "pattern": "x"}));
        let call = ToolCall { tool_name: "Grep", tool_input: &input };
        let ctx = PolicyContext::new(3);
        let decision = engine.evaluate_tool(&call, &ctx, Utc::now());
        assert_eq!(decision.permission, Permission::Deny);
        assert_eq!(decision.rule, Some(Rule::DoubleCheck));
        assert!(decision.reason.contains("try again"));
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn inactive_session_requires_coordination() {
        let td = tempfile::tempdir().unwrap();
        let compass = Compass::open(td.path(), CompassConfig::default());
        let engine = PolicyEngine::new(&compass, &Failing);
        let input = tool_input(json!({"pattern": "fn main"}));
        let call = ToolCall { tool_name: "Grep", tool_input: &input };
        let decision = engine.evaluate_tool(&call, &PolicyContext::new(3), Utc::now());
        assert_eq!(decision.permission, Permission::Deny);
        assert_eq!(decision.rule, Some(Rule::Coordination));
        assert!(decision.reason.contains("subagent_type='compass-captain'"));
    }

    #[test]
    fn validation_flag_does_not_bypass_coordination() {
        let td = tempfile::tempdir().unwrap();
        let compass = Compass::open(td.path(), CompassConfig::default());
        let engine = PolicyEngine::new(&compass, &Failing);
        let ctx = PolicyContext::new(3);
        for tool in ["Grep", "Bash"] {
            let input = tool_input(json!({"pattern": "x", "validation_request": true}));
            let call = ToolCall { tool_name: tool, tool_input: &input };
            let decision = engine.evaluate_tool(&call, &ctx, Utc::now());
            assert_eq!(decision.permission, Permission::Deny, "{}", tool);
            assert_eq!(decision.rule, Some(Rule::Coordination));
        }
        assert!(!compass.paths.status_file().exists());
    }

    #[test]
    fn namespace_task_starts_session_and_unblocks_tools() {
        let td = tempfile::tempdir().unwrap();
        let compass = Compass::open(td.path(), CompassConfig::default());
        let engine = PolicyEngine::new(&compass, &Failing);
        let ctx = PolicyContext::new(3);
        let now = Utc::now();

        let task = tool_input(json!({"subagent_type": "compass-captain", "prompt": "coordinate"}));
        let call = ToolCall { tool_name: "Task", tool_input: &task };
        assert!(engine.evaluate_tool(&call, &ctx, now).is_allow());
        assert!(compass.paths.status_file().exists());

        let grep = tool_input(json!({"pattern": "fn main"}));
        let call = ToolCall { tool_name: "Grep", tool_input: &grep };
        assert!(engine.evaluate_tool(&call, &ctx, now).is_allow());
    }

    #[test]
    fn prompt_injects_once_per_session() {
        let td = tempfile::tempdir().unwrap();
        let compass = Compass::open(td.path(), CompassConfig::default());
        let engine = PolicyEngine::new(&compass, &Failing);
        let now = Utc::now();
        let first = engine.evaluate_prompt("hello", now).unwrap();
        assert!(first.contains("COMPASS METHODOLOGY REQUIRED"));
        assert!(compass.paths.status_file().exists());
        assert!(engine.evaluate_prompt("hello again", now).is_none());
    }

    #[test]
    fn complexity_gate_lets_simple_prompts_through() {
        let td = tempfile::tempdir().unwrap();
        let mut cfg = CompassConfig::default();
        cfg.complexity_gate = true;
        let compass = Compass::open(td.path(), cfg);
        let engine = PolicyEngine::new(&compass, &Failing);
        let now = Utc::now();
        assert!(engine.evaluate_prompt("hello", now).is_none());
        assert!(!compass.paths.status_file().exists());
        assert!(engine.evaluate_prompt("refactor the session module", now).is_some());
    }
}
