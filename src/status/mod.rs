//! The human-readable status file. Its fresh existence doubles as the session
//! marker, so every write here also keeps the session alive.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::CompassConfig;
use crate::logging::ActivityLog;
use crate::paths::CompassPaths;
use crate::storage::{self, CappedRead, FileLock};
use crate::tokens::report::estimated_cost;
use crate::tokens::{TokenLedger, TokenReport};

const BORDER: &str = "═══════════════════════════════════════════════════════════════";
const SECTION_HEADER: &str = "📊 TOKEN USAGE (Real-time):";
const UPDATED_PREFIX: &str = "   • Updated: ";

/// Checklist rows, keyed by the agent suffix after the namespace
const PHASES: &[(&str, &str)] = &[
    ("knowledge-query", "Phase 1: Knowledge Query"),
    ("pattern-apply", "Phase 2: Pattern Application"),
    ("gap-analysis", "Phase 3: Gap Analysis"),
    ("doc-planning", "Phase 4: Documentation Plan"),
    ("enhanced-analysis", "Phase 5: Enhanced Analysis"),
    ("cross-reference", "Phase 6: Cross-Reference"),
];

/// What each checklist phase asks of the assistant, by agent suffix
const PHASE_DESCRIPTIONS: &[(&str, &str)] = &[
    ("knowledge-query", "Query existing docs/ and maps/ for relevant patterns"),
    ("pattern-apply", "Apply documented approaches from knowledge base"),
    ("gap-analysis", "Identify knowledge gaps requiring investigation"),
    ("doc-planning", "Plan documentation for new discoveries"),
    ("enhanced-analysis", "Execute enhanced analysis with institutional context"),
    ("cross-reference", "Cross-reference findings with existing patterns"),
];

const MAP_CATEGORIES: &[(&str, &str)] = &[
    ("architectural_patterns", "System architecture and component relationship maps"),
    ("workflow_patterns", "Process flows and automation sequences"),
    ("investigation_patterns", "Root cause analysis and debugging workflows"),
    ("integration_patterns", "Service integrations and API interaction flows"),
];

static SECTION_LINES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?m)^   • Current Agent: (?P<agent>.+?) \(\+(?P<added>\d+) tokens\)\n",
        r"   • Session Total: (?P<total>\d+) tokens\n",
        r"   • Estimated Cost: ~\$[0-9.]+\n",
        r"   • Most Expensive Phase: (?:None yet|(?P<phase>.+?) \((?P<phase_tokens>\d+) tokens\))\n",
        r"   • Updated: (?P<updated>\S+)$",
    ))
    .expect("token section pattern is valid")
});

static DETECTED_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^COMPLEX ANALYTICAL TASK DETECTED: .*$").expect("timestamp pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Pending,
    InProgress,
    Completed,
}

impl PhaseState {
    pub fn symbol(self) -> &'static str {
        match self {
            PhaseState::Pending => "□",
            PhaseState::InProgress => "🔄",
            PhaseState::Completed => "✓",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseState::Pending => "pending",
            PhaseState::InProgress => "in_progress",
            PhaseState::Completed => "completed",
        }
    }
}

fn phase_key(agent: &str) -> &str {
    agent.strip_prefix("compass-").unwrap_or(agent)
}

pub fn phase_description(phase: &str) -> String {
    PHASE_DESCRIPTIONS
        .iter()
        .find(|(key, _)| *key == phase)
        .map(|(_, text)| text.to_string())
        .unwrap_or_else(|| format!("Execute {} phase", phase))
}

/// One line of the todo-update file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TodoUpdate {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub phase: String,
    pub status: &'static str,
    pub instruction: String,
    pub phase_description: String,
}

impl TodoUpdate {
    pub fn new(agent: &str, state: PhaseState, now: DateTime<Utc>) -> Self {
        let phase = phase_key(agent).to_string();
        let instruction = match state {
            PhaseState::Completed => {
                format!("Update TodoWrite: mark COMPASS {} phase as completed", phase)
            }
            _ => format!(
                "Update TodoWrite: mark COMPASS {} phase as {} for {}",
                phase,
                state.as_str(),
                agent
            ),
        };
        Self {
            timestamp: now,
            agent: agent.to_string(),
            phase_description: phase_description(&phase),
            phase,
            status: state.as_str(),
            instruction,
        }
    }
}

/// Empty pattern index written once into `maps/`
pub fn initial_map_index(now: DateTime<Utc>) -> serde_json::Value {
    let categories: serde_json::Map<String, serde_json::Value> = MAP_CATEGORIES
        .iter()
        .map(|(name, description)| {
            (
                name.to_string(),
                serde_json::json!({ "description": description, "maps": [] }),
            )
        })
        .collect();
    serde_json::json!({
        "version": "1.0",
        "created": now.format("%Y-%m-%d").to_string(),
        "description": "COMPASS Pattern Index - Visual Maps and Analysis Patterns",
        "categories": categories,
        "recent_patterns": [],
        "tags": {},
    })
}

/// Real-time token block embedded in the status file
#[derive(Debug, Clone, PartialEq)]
pub struct TokenUsageSection {
    pub agent: String,
    pub added: u64,
    pub session_total: u64,
    pub most_expensive_phase: Option<(String, u64)>,
    pub updated: DateTime<Utc>,
}

impl TokenUsageSection {
    pub fn from_ledger(agent: &str, added: u64, ledger: &TokenLedger, now: DateTime<Utc>) -> Self {
        Self {
            agent: agent.to_string(),
            added,
            session_total: ledger.total,
            most_expensive_phase: ledger
                .most_expensive_phase()
                .map(|(p, t)| (p.to_string(), t)),
            updated: now,
        }
    }

    pub fn render(&self) -> String {
        let phase = match &self.most_expensive_phase {
            Some((name, tokens)) => format!("{} ({} tokens)", name, tokens),
            None => "None yet".to_string(),
        };
        format!(
            "{header}\n   • Current Agent: {agent} (+{added} tokens)\n   • Session Total: {total} tokens\n   • Estimated Cost: ~${cost:.4}\n   • Most Expensive Phase: {phase}\n{updated_prefix}{updated}",
            header = SECTION_HEADER,
            agent = self.agent,
            added = self.added,
            total = self.session_total,
            cost = estimated_cost(self.session_total),
            phase = phase,
            updated_prefix = UPDATED_PREFIX,
            updated = self.updated.to_rfc3339(),
        )
    }

    /// Locate and parse the section inside a whole status file
    pub fn parse(text: &str) -> Option<Self> {
        let start = text.find(SECTION_HEADER)?;
        let caps = SECTION_LINES.captures(&text[start..])?;
        let most_expensive_phase = match (caps.name("phase"), caps.name("phase_tokens")) {
            (Some(p), Some(t)) => Some((p.as_str().to_string(), t.as_str().parse().ok()?)),
            _ => None,
        };
        Some(Self {
            agent: caps["agent"].to_string(),
            added: caps["added"].parse().ok()?,
            session_total: caps["total"].parse().ok()?,
            most_expensive_phase,
            updated: DateTime::parse_from_rfc3339(&caps["updated"])
                .ok()?
                .with_timezone(&Utc),
        })
    }

    /// Byte span of an existing section, header through the Updated line
    fn span(text: &str) -> Option<(usize, usize)> {
        let start = text.find(SECTION_HEADER)?;
        let rel = text[start..].find(UPDATED_PREFIX)?;
        let line_start = start + rel;
        let end = text[line_start..]
            .find('\n')
            .map(|i| line_start + i)
            .unwrap_or(text.len());
        Some((start, end))
    }

    /// Replace an existing section or insert one before the closing border
    pub fn apply_to(&self, text: &str) -> String {
        let rendered = self.render();
        if let Some((start, end)) = Self::span(text) {
            return format!("{}{}{}", &text[..start], rendered, &text[end..]);
        }
        match text.rfind(BORDER) {
            Some(pos) => format!("{}{}\n\n{}", &text[..pos], rendered, &text[pos..]),
            None => {
                let sep = if text.ends_with('\n') || text.is_empty() { "" } else { "\n" };
                format!("{}{}\n{}\n", text, sep, rendered)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusBoard {
    path: PathBuf,
    completion_path: PathBuf,
    todo_path: PathBuf,
    layout_dirs: Vec<PathBuf>,
    map_index: PathBuf,
    max_bytes: u64,
    refresh_interval: Duration,
    coordinator: String,
    log: ActivityLog,
}

impl StatusBoard {
    pub fn new(paths: &CompassPaths, config: &CompassConfig, log: ActivityLog) -> Self {
        Self {
            path: paths.status_file(),
            completion_path: paths.completion_file(),
            todo_path: paths.todo_updates_file(),
            layout_dirs: vec![
                paths.docs_dir().to_path_buf(),
                paths.maps_dir(),
                paths.agents_dir(),
            ],
            map_index: paths.map_index_file(),
            max_bytes: config.status_max_bytes,
            refresh_interval: config.status_refresh_interval,
            coordinator: config.coordinator_agent.clone(),
            log,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn template(&self, now: DateTime<Utc>) -> String {
        let mut checklist = String::new();
        for (suffix, label) in PHASES {
            checklist.push_str(&format!(
                "│ {} {:<30} (compass-{})\n",
                PhaseState::Pending.symbol(),
                label,
                suffix
            ));
        }
        format!(
            "🧭 COMPASS METHODOLOGY ACTIVATED\n{border}\n\n\
             COMPLEX ANALYTICAL TASK DETECTED: {ts}\n\n\
             REQUIRED: Systematic 6-Phase Analysis Coordination\n\n\
             ┌─ PHASE CHECKLIST ─────────────────────────────────────────────┐\n\
             {checklist}\
             └───────────────────────────────────────────────────────────────┘\n\n\
             🎯 NEXT ACTION REQUIRED:\n   \
             Use Task tool with subagent_type='{coordinator}' to begin coordination\n\n\
             📁 DIRECTORIES:\n   \
             docs/  - Institutional memory and investigation frameworks\n   \
             maps/  - Visual pattern recognition and architectural diagrams\n\n\
             {border}\n\
             🔄 This file updates automatically as phases complete\n",
            border = BORDER,
            ts = now.format("%Y-%m-%d %H:%M:%S UTC"),
            checklist = checklist,
            coordinator = self.coordinator,
        )
    }

    pub fn create_status_file(&self) -> std::io::Result<()> {
        self.create_status_file_at(Utc::now())
    }

    pub fn create_status_file_at(&self, now: DateTime<Utc>) -> std::io::Result<()> {
        storage::atomic_write(&self.path, self.template(now).as_bytes())?;
        self.log.log_at(
            "status_file",
            "Created status file with phase checklist",
            now,
        );
        Ok(())
    }

    fn read_bounded(&self) -> Option<String> {
        match storage::read_capped(&self.path, self.max_bytes) {
            Ok(CappedRead::Contents(text)) => Some(text),
            Ok(CappedRead::TooLarge(size)) => {
                tracing::debug!(size, "Status file too large, leaving it alone");
                None
            }
            Ok(CappedRead::Missing) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Status file unreadable");
                None
            }
        }
    }

    pub fn refresh_status_display(&self, agent: &str, added: u64, ledger: &TokenLedger) -> bool {
        self.refresh_status_display_at(agent, added, ledger, Utc::now())
    }

    /// Rewrites the token section; returns whether the file changed
    pub fn refresh_status_display_at(
        &self,
        agent: &str,
        added: u64,
        ledger: &TokenLedger,
        now: DateTime<Utc>,
    ) -> bool {
        let _lock = FileLock::acquire(&self.path);
        let Some(text) = self.read_bounded() else {
            return false;
        };

        if let Some(previous) = TokenUsageSection::parse(&text) {
            let elapsed = now.signed_duration_since(previous.updated);
            let throttled = chrono::Duration::from_std(self.refresh_interval)
                .map(|interval| elapsed >= chrono::Duration::zero() && elapsed < interval)
                .unwrap_or(false);
            if throttled {
                return false;
            }
        }

        let section = TokenUsageSection::from_ledger(agent, added, ledger, now);
        let updated = section.apply_to(&text);
        match storage::atomic_write(&self.path, updated.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                self.log.log_at(
                    "status_update_error",
                    &format!("Failed to update status with tokens: {}", e),
                    now,
                );
                false
            }
        }
    }

    /// Update one checklist row. `phase` is an agent name or its suffix.
    pub fn update_phase(&self, phase: &str, state: PhaseState, now: DateTime<Utc>) -> bool {
        let key = phase_key(phase);
        let Some((_, label)) = PHASES.iter().find(|(suffix, _)| *suffix == key) else {
            return false;
        };

        let _lock = FileLock::acquire(&self.path);
        let Some(text) = self.read_bounded() else {
            return false;
        };

        let pattern = format!(r"│ [□✓🔄] ({}.*)", regex::escape(label));
        let row = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(_) => return false,
        };
        let replacement = format!("│ {} ${{1}}", state.symbol());
        let updated = row.replace(&text, replacement.as_str());
        let stamp = format!(
            "COMPLEX ANALYTICAL TASK DETECTED: {}",
            now.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let updated = DETECTED_LINE.replace(&updated, regex::NoExpand(&stamp));

        if let Err(e) = storage::atomic_write(&self.path, updated.as_bytes()) {
            tracing::debug!(error = %e, "Failed to write phase update");
            return false;
        }
        self.log
            .log_at("phase_update", &format!("Updated {} to {:?}", key, state), now);
        true
    }

    /// Create `docs/`, `maps/` and `agents/` plus an empty map index.
    /// Returns whether the map index had to be written.
    pub fn ensure_layout_at(&self, now: DateTime<Utc>) -> io::Result<bool> {
        for dir in &self.layout_dirs {
            fs::create_dir_all(dir)?;
        }
        if self.map_index.exists() {
            return Ok(false);
        }
        let text = serde_json::to_string_pretty(&initial_map_index(now))?;
        if !storage::write_new(&self.map_index, text.as_bytes())? {
            return Ok(false);
        }
        self.log.log_at("layout_init", "Created docs/, maps/ and map index", now);
        Ok(true)
    }

    pub fn todo_updates_path(&self) -> &Path {
        &self.todo_path
    }

    /// Append one todo instruction for the assistant to pick up
    pub fn record_todo_update_at(
        &self,
        agent: &str,
        state: PhaseState,
        now: DateTime<Utc>,
    ) -> io::Result<TodoUpdate> {
        let update = TodoUpdate::new(agent, state, now);
        let line = serde_json::to_string(&update)?;

        if let Some(parent) = self.todo_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _lock = FileLock::acquire(&self.todo_path);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.todo_path)?;
        writeln!(file, "{}", line)?;

        self.log.log_at(
            "todo_update_generated",
            &format!("{} - {} {}", agent, update.phase, update.status),
            now,
        );
        Ok(update)
    }

    pub fn clear_todo_updates(&self) -> io::Result<bool> {
        storage::remove_if_exists(&self.todo_path)
    }

    /// Text to announce: the live status file, or else the completion report,
    /// which is removed once read.
    pub fn take_announcement(&self) -> Option<String> {
        if let Some(text) = self.read_bounded() {
            return Some(text);
        }
        let text = match storage::read_capped(&self.completion_path, self.max_bytes) {
            Ok(CappedRead::Contents(text)) => text,
            _ => return None,
        };
        if let Err(e) = storage::remove_if_exists(&self.completion_path) {
            tracing::debug!(error = %e, "Failed to remove completion report");
        }
        Some(text)
    }

    /// Write the completion report and retire the status file.
    /// Returns `false` when there was no active status file.
    pub fn complete_session_at(
        &self,
        ledger: Option<&TokenLedger>,
        now: DateTime<Utc>,
    ) -> std::io::Result<bool> {
        if !self.exists() {
            return Ok(false);
        }
        let report = match ledger {
            Some(ledger) => TokenReport::new(ledger).to_string(),
            None => "No token usage recorded for this session.\n".to_string(),
        };
        let content = format!(
            "🧭 COMPASS METHODOLOGY COMPLETED\n{border}\n\n\
             ANALYSIS COMPLETED: {ts}\n\n\
             {report}\n\
             📁 RESULTS AVAILABLE IN:\n   \
             docs/  - Updated investigation frameworks\n   \
             maps/  - New visual pattern diagrams\n\n\
             {border}\n",
            border = BORDER,
            ts = now.format("%Y-%m-%d %H:%M:%S UTC"),
            report = report,
        );
        storage::atomic_write(&self.completion_path, content.as_bytes())?;
        storage::remove_if_exists(&self.path)?;
        self.log
            .log_at("compass_complete", "Analysis completed, status cleaned up", now);
        Ok(true)
    }
}
