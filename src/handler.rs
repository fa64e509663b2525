//! One hook event in, one output object out. Bookkeeping side effects never
//! change the decision.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::compass::Compass;
use crate::hook::{HookEvent, HookInput, HookOutput, ToolCall};
use crate::policy::{PolicyContext, PolicyEngine, UpstreamValidator};
use crate::status::PhaseState;
use crate::tokens::{detect_agent, predict_specialist_delegation};

/// Project root: explicit flag, then the event's `cwd`, then
/// `CLAUDE_PROJECT_DIR`, then the process working directory
pub fn resolve_project_root(explicit: Option<&Path>, input_cwd: Option<&str>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    if let Some(cwd) = input_cwd.map(str::trim).filter(|c| !c.is_empty()) {
        return PathBuf::from(cwd);
    }
    if let Some(dir) = std::env::var_os("CLAUDE_PROJECT_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn handle_event(compass: &Compass, input: &HookInput, ctx: &PolicyContext) -> HookOutput {
    handle_event_at(compass, input, ctx, Utc::now())
}

pub fn handle_event_at(
    compass: &Compass,
    input: &HookInput,
    ctx: &PolicyContext,
    now: DateTime<Utc>,
) -> HookOutput {
    let event = input.event();
    tracing::debug!(event = event.as_str(), tool = input.tool_name(), "Handling hook event");

    if compass.oracle.cleanup_if_stale_at(now) {
        tracing::debug!("Session inactive, stale state cleared");
    }

    match event {
        HookEvent::UserPromptSubmit => {
            let validator = UpstreamValidator::new(&compass.paths, &compass.config);
            let engine = PolicyEngine::new(compass, &validator);
            HookOutput::prompt(engine.evaluate_prompt(input.prompt(), now))
        }
        HookEvent::PreToolUse => {
            let validator = UpstreamValidator::new(&compass.paths, &compass.config);
            let engine = PolicyEngine::new(compass, &validator);
            let call = input.tool_call();
            let decision = engine.evaluate_tool(&call, ctx, now);
            if decision.is_allow() && call.tool_name == "Task" {
                track_task_tokens(compass, &call, now);
            }
            HookOutput::tool(&decision)
        }
        HookEvent::PostToolUse => {
            if let Err(e) = compass.oracle.touch_activity_at(now) {
                tracing::debug!(error = %e, "Failed to refresh session activity");
            }
            HookOutput::empty()
        }
        HookEvent::SubagentStop => {
            on_subagent_stop(compass, now);
            HookOutput::empty()
        }
        HookEvent::Stop => HookOutput::empty(),
        HookEvent::SessionEnd => {
            on_session_end(compass, now);
            HookOutput::empty()
        }
        HookEvent::Other(name) => {
            let name = if name.is_empty() { "<missing>" } else { name.as_str() };
            compass
                .log
                .log_at("unknown_event", &format!("Ignoring hook event {}", name), now);
            HookOutput::empty()
        }
    }
}

/// Estimate and record tokens for an allowed Task that targets a methodology agent
pub fn track_task_tokens(
    compass: &Compass,
    call: &ToolCall<'_>,
    now: DateTime<Utc>,
) -> Option<u64> {
    let prompt = call.str_field("prompt").unwrap_or("");
    let agent = detect_agent(
        call.subagent_type(),
        prompt,
        &compass.config.agent_namespace,
        &compass.config.coordinator_agent,
    )?;

    if agent == compass.config.coordinator_agent {
        if let Err(e) = compass.status.ensure_layout_at(now) {
            compass.log.log_at(
                "layout_error",
                &format!("Failed to prepare docs/ and maps/: {}", e),
                now,
            );
        }
    }

    let extra = serde_json::to_value(call.tool_input).ok();
    let tokens = compass
        .estimator
        .estimate_tokens(&agent, prompt, extra.as_ref());
    let ledger = compass.ledger.record_tokens_at(&agent, tokens, now)?;
    compass.log.log_at(
        "token_tracking",
        &format!("{}: {} tokens (session total {})", agent, tokens, ledger.total),
        now,
    );
    compass
        .status
        .refresh_status_display_at(&agent, tokens, &ledger, now);
    if compass.status.update_phase(&agent, PhaseState::InProgress, now) {
        record_todo_update(compass, &agent, PhaseState::InProgress, now);
    }

    let mut total = tokens;
    if agent == "compass-coder" {
        let chain = predict_specialist_delegation(prompt);
        if !chain.is_empty() {
            let hidden = compass.estimator.delegation_tokens(&agent, &chain);
            if compass
                .ledger
                .record_tokens_at("delegation_chain", hidden, now)
                .is_some()
            {
                compass.log.log_at(
                    "specialist_delegation",
                    &format!("{} -> {}: {} tokens", agent, chain.join(", "), hidden),
                    now,
                );
                total += hidden;
            }
        }
    }
    Some(total)
}

fn on_subagent_stop(compass: &Compass, now: DateTime<Utc>) {
    match compass.oracle.take_active_agent(now) {
        Ok(Some(agent)) => {
            if compass.status.update_phase(&agent, PhaseState::Completed, now) {
                record_todo_update(compass, &agent, PhaseState::Completed, now);
                compass
                    .log
                    .log_at("phase_completed", &format!("Marked {} complete", agent), now);
            }
        }
        Ok(None) => {}
        Err(e) => tracing::debug!(error = %e, "Failed to read active agent"),
    }
}

fn record_todo_update(compass: &Compass, agent: &str, state: PhaseState, now: DateTime<Utc>) {
    if let Err(e) = compass.status.record_todo_update_at(agent, state, now) {
        tracing::debug!(agent, error = %e, "Failed to append todo update");
    }
}

fn on_session_end(compass: &Compass, now: DateTime<Utc>) {
    let ledger = compass.ledger.read();
    if let Err(e) = compass.status.complete_session_at(ledger.as_ref(), now) {
        compass.log.log_at(
            "status_update_error",
            &format!("Failed to write completion report: {}", e),
            now,
        );
    }
    if let Err(e) = compass.oracle.end_session() {
        tracing::debug!(error = %e, "Failed to remove session state");
    }
    compass.ledger.reset();
    if let Err(e) = compass.status.clear_todo_updates() {
        tracing::debug!(error = %e, "Failed to remove todo updates");
    }
    compass.log.log_at("session_end", "Session ended, state cleared", now);
}
