//! Diagnostics go through `tracing` to stderr; the handler's own activity
//! trail is an append-only JSON-lines file under the state directory that
//! other invocations read back (see `session::signals::LogTail`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::truncate_utf8_safe;
use crate::validation_constants::{
    HANDLER_NAME, LOG_TAIL_READ_BYTES, MAX_LOG_ACTION_LENGTH, MAX_LOG_DETAILS_LENGTH,
};

/// Install the stderr subscriber. Filter comes from `COMPASS_LOG`
/// (default `warn`); `COMPASS_LOG_FORMAT=json` switches to JSON output.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("COMPASS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let json = std::env::var("COMPASS_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub details: String,
    pub handler: String,
    pub version: String,
}

impl LogEntry {
    pub fn new(action: &str, details: &str, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            action: action.to_string(),
            details: truncate_utf8_safe(details, MAX_LOG_DETAILS_LENGTH),
            handler: HANDLER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Minimal replacement for an entry that failed schema validation
    pub fn sanitized(reason: &str, now: DateTime<Utc>) -> Self {
        Self::new("invalid_entry", &format!("rejected log entry: {}", reason), now)
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.action.is_empty() {
            return Err("empty action");
        }
        if self.action.chars().count() > MAX_LOG_ACTION_LENGTH {
            return Err("action too long");
        }
        if !self
            .action
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err("action must be a lowercase identifier");
        }
        if self.details.chars().count() > MAX_LOG_DETAILS_LENGTH {
            return Err("details too long");
        }
        if self.handler.is_empty() || self.version.is_empty() {
            return Err("missing handler metadata");
        }
        Ok(())
    }
}

/// Append-only JSON-lines log with size-based rotation to `<file>.old`.
/// Every failure is swallowed: logging must never change a hook decision.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
    max_bytes: u64,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_bytes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rotated_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".old");
        self.path.with_file_name(name)
    }

    pub fn log(&self, action: &str, details: &str) {
        self.log_at(action, details, Utc::now());
    }

    pub fn log_at(&self, action: &str, details: &str, now: DateTime<Utc>) {
        let mut entry = LogEntry::new(action, details, now);
        if let Err(reason) = entry.validate() {
            tracing::debug!(action = %action, reason, "Log entry failed validation");
            entry = LogEntry::sanitized(reason, now);
        }
        if let Err(e) = self.append(&entry) {
            tracing::debug!(path = %self.path.display(), error = %e, "Activity log write failed");
        }
    }

    fn append(&self, entry: &LogEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed()?;

        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.len() > self.max_bytes => {
                fs::rename(&self.path, self.rotated_path())?;
                tracing::debug!(
                    path = %self.path.display(),
                    size = meta.len(),
                    "Rotated activity log"
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Last `n` parseable entries, reading at most the final 64 KiB of the file
    pub fn recent_entries(&self, n: usize) -> Vec<LogEntry> {
        if n == 0 {
            return Vec::new();
        }
        let text = match read_tail(&self.path, LOG_TAIL_READ_BYTES) {
            Ok(text) => text,
            Err(_) => return Vec::new(),
        };
        let mut entries: Vec<LogEntry> = text
            .lines()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .take(n)
            .collect();
        entries.reverse();
        entries
    }
}

fn read_tail(path: &Path, max_bytes: u64) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf).into_owned();
    if start > 0 {
        // First line is probably cut in half
        Ok(text.split_once('\n').map(|(_, rest)| rest.to_string()).unwrap_or_default())
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_roundtrips_through_json() {
        let entry = LogEntry::new("tool_intercept", "Intercepted: Write", Utc::now());
        let line = serde_json::to_string(&entry).unwrap();
        let back: LogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(entry, back);
    }

    #[test]
    fn invalid_action_is_replaced_with_sanitized_entry() {
        let td = tempfile::tempdir().unwrap();
        let log = ActivityLog::new(td.path().join("h.log"), 1024 * 1024);
        log.log("Not An Action!", "details");
        let entries = log.recent_entries(5);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "invalid_entry");
        assert!(entries[0].details.contains("lowercase identifier"));
    }

    #[test]
    fn long_details_are_truncated_not_rejected() {
        let td = tempfile::tempdir().unwrap();
        let log = ActivityLog::new(td.path().join("h.log"), 1024 * 1024);
        log.log("prompt_analysis", &"x".repeat(MAX_LOG_DETAILS_LENGTH * 2));
        let entries = log.recent_entries(1);
        assert_eq!(entries[0].action, "prompt_analysis");
        assert_eq!(entries[0].details.chars().count(), MAX_LOG_DETAILS_LENGTH);
    }

    #[test]
    fn rotates_past_size_threshold() {
        let td = tempfile::tempdir().unwrap();
        let log = ActivityLog::new(td.path().join("h.log"), 200);
        for i in 0..10 {
            log.log("tool_allowed", &format!("entry {}", i));
        }
        assert!(log.rotated_path().exists());
        let current = fs::metadata(log.path()).unwrap().len();
        assert!(current <= 200 + 400, "current log should restart small");
    }

    #[test]
    fn recent_entries_skips_garbage_lines() {
        let td = tempfile::tempdir().unwrap();
        let log = ActivityLog::new(td.path().join("h.log"), 1024 * 1024);
        log.log("session_marked", "one");
        fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap()
            .write_all(b"not json\n")
            .unwrap();
        log.log("tool_allowed", "two");
        let entries = log.recent_entries(20);
        let actions: Vec<_> = entries.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["session_marked", "tool_allowed"]);
    }

    #[test]
    fn unwritable_location_is_not_an_error() {
        let td = tempfile::tempdir().unwrap();
        let blocker = td.path().join("blocker");
        fs::write(&blocker, "plain file, not a directory").unwrap();
        let log = ActivityLog::new(blocker.join("h.log"), 10);
        log.log("tool_allowed", "ignored");
        assert!(log.recent_entries(3).is_empty());
    }
}
