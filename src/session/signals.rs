//! Independent liveness signals. Each one degrades to "not recent" on any
//! missing or unreadable input; none of them can fail outward.

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::SessionRecord;
use crate::logging::ActivityLog;
use crate::storage::{self, CappedRead};
use crate::tokens::TokenLedgerStore;

/// Log actions that count as evidence of an ongoing session
pub const LIVENESS_ACTIONS: &[&str] = &[
    "compass_required",
    "coordination_injected",
    "session_marked",
    "agent_active",
    "token_tracking",
];

const SESSION_RECORD_MAX_BYTES: u64 = 64 * 1024;

pub trait SessionSignal {
    fn name(&self) -> &'static str;
    fn is_recent(&self, now: DateTime<Utc>) -> bool;
}

/// `ts` lies within `window` of `now`. Timestamps slightly in the future
/// (clock skew between processes) count as recent up to the same window.
pub fn within_window(ts: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    let Ok(window) = chrono::Duration::from_std(window) else {
        return true;
    };
    let age = now.signed_duration_since(ts);
    age <= window && age >= -window
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

pub(crate) fn read_session_record(path: &Path) -> Option<SessionRecord> {
    match storage::read_capped(path, SESSION_RECORD_MAX_BYTES) {
        Ok(CappedRead::Contents(text)) => serde_json::from_str(&text).ok(),
        _ => None,
    }
}

/// Status file present and recently touched
#[derive(Debug, Clone)]
pub struct MarkerFile {
    pub path: PathBuf,
    pub window: Duration,
}

impl SessionSignal for MarkerFile {
    fn name(&self) -> &'static str {
        "marker_file"
    }

    fn is_recent(&self, now: DateTime<Utc>) -> bool {
        modified_at(&self.path)
            .map(|mtime| within_window(mtime, now, self.window))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct SessionRecordSignal {
    pub path: PathBuf,
    pub window: Duration,
}

impl SessionSignal for SessionRecordSignal {
    fn name(&self) -> &'static str {
        "session_record"
    }

    fn is_recent(&self, now: DateTime<Utc>) -> bool {
        match read_session_record(&self.path) {
            Some(record) => {
                within_window(record.session_start, now, self.window)
                    || within_window(record.last_activity, now, self.window)
            }
            None => false,
        }
    }
}

/// Recent liveness actions in the tail of the activity log
#[derive(Debug, Clone)]
pub struct LogTail {
    pub log: ActivityLog,
    pub entries: usize,
    pub window: Duration,
}

impl SessionSignal for LogTail {
    fn name(&self) -> &'static str {
        "log_tail"
    }

    fn is_recent(&self, now: DateTime<Utc>) -> bool {
        self.log.recent_entries(self.entries).iter().any(|entry| {
            LIVENESS_ACTIONS.contains(&entry.action.as_str())
                && within_window(entry.timestamp, now, self.window)
        })
    }
}

/// Ledger updated recently, or namespace agents recorded within the longer
/// agent-activity window
#[derive(Debug, Clone)]
pub struct TokenLedgerSignal {
    pub store: TokenLedgerStore,
    pub namespace: String,
    pub session_window: Duration,
    pub agent_window: Duration,
}

impl SessionSignal for TokenLedgerSignal {
    fn name(&self) -> &'static str {
        "token_ledger"
    }

    fn is_recent(&self, now: DateTime<Utc>) -> bool {
        let Some(ledger) = self.store.read() else {
            return false;
        };
        if within_window(ledger.last_update, now, self.session_window) {
            return true;
        }
        ledger.has_agent_with_prefix(&self.namespace)
            && within_window(ledger.last_update, now, self.agent_window)
    }
}

/// Markdown under the docs directory edited recently
#[derive(Debug, Clone)]
pub struct DocsMtime {
    pub dir: PathBuf,
    pub window: Duration,
    pub max_depth: usize,
}

impl DocsMtime {
    fn scan(&self, dir: &Path, depth: usize, now: DateTime<Utc>) -> bool {
        let Ok(entries) = fs::read_dir(dir) else {
            return false;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();
            if file_type.is_file() {
                let is_md = path
                    .extension()
                    .map(|e| e.eq_ignore_ascii_case("md"))
                    .unwrap_or(false);
                if is_md
                    && modified_at(&path)
                        .map(|m| within_window(m, now, self.window))
                        .unwrap_or(false)
                {
                    return true;
                }
            } else if file_type.is_dir()
                && depth < self.max_depth
                && self.scan(&path, depth + 1, now)
            {
                return true;
            }
        }
        false
    }
}

impl SessionSignal for DocsMtime {
    fn name(&self) -> &'static str {
        "docs_mtime"
    }

    fn is_recent(&self, now: DateTime<Utc>) -> bool {
        self.max_depth > 0 && self.scan(&self.dir, 1, now)
    }
}
