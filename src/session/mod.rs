//! Session liveness. A session is active when any signal says so; state is
//! only cleaned up when every signal agrees it is stale.

pub mod signals;

pub use signals::{
    DocsMtime, LogTail, MarkerFile, SessionRecordSignal, SessionSignal, TokenLedgerSignal,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use crate::config::CompassConfig;
use crate::logging::ActivityLog;
use crate::paths::CompassPaths;
use crate::status::StatusBoard;
use crate::storage::{self, FileLock};
use crate::tokens::TokenLedgerStore;
use crate::validation_constants::DOCS_SCAN_MAX_DEPTH;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_start: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Agent most recently started through the Task tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl SessionRecord {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            session_start: now,
            last_activity: now,
            active_agent: None,
            session_id: None,
        }
    }
}

pub struct SessionOracle {
    signals: Vec<Box<dyn SessionSignal>>,
    state_dir: PathBuf,
    status_file: PathBuf,
    session_file: PathBuf,
    status: StatusBoard,
    log: ActivityLog,
    session_id: Option<String>,
}

impl SessionOracle {
    pub fn new(
        paths: &CompassPaths,
        config: &CompassConfig,
        log: ActivityLog,
        ledger: TokenLedgerStore,
    ) -> Self {
        let signals: Vec<Box<dyn SessionSignal>> = vec![
            Box::new(MarkerFile {
                path: paths.status_file(),
                window: config.session_timeout,
            }),
            Box::new(SessionRecordSignal {
                path: paths.session_file(),
                window: config.session_timeout,
            }),
            Box::new(LogTail {
                log: log.clone(),
                entries: config.log_tail_entries,
                window: config.session_timeout,
            }),
            Box::new(TokenLedgerSignal {
                store: ledger,
                namespace: config.agent_namespace.clone(),
                session_window: config.session_timeout,
                agent_window: config.agent_activity_window,
            }),
            Box::new(DocsMtime {
                dir: paths.docs_dir().to_path_buf(),
                window: config.docs_recent_window,
                max_depth: DOCS_SCAN_MAX_DEPTH,
            }),
        ];
        Self::with_signals(paths, config, log, signals)
    }

    pub fn with_signals(
        paths: &CompassPaths,
        config: &CompassConfig,
        log: ActivityLog,
        signals: Vec<Box<dyn SessionSignal>>,
    ) -> Self {
        Self {
            signals,
            state_dir: paths.state_dir().to_path_buf(),
            status_file: paths.status_file(),
            session_file: paths.session_file(),
            status: StatusBoard::new(paths, config, log.clone()),
            log,
            session_id: None,
        }
    }

    /// Host-provided session id, stamped into new session records
    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn is_session_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        match self.signals.iter().find(|s| s.is_recent(now)) {
            Some(signal) => {
                tracing::debug!(signal = signal.name(), "Session active");
                true
            }
            None => false,
        }
    }

    /// Names of every signal currently reporting activity
    pub fn active_signals_at(&self, now: DateTime<Utc>) -> Vec<&'static str> {
        self.signals
            .iter()
            .filter(|s| s.is_recent(now))
            .map(|s| s.name())
            .collect()
    }

    pub fn cleanup_if_stale(&self) -> bool {
        self.cleanup_if_stale_at(Utc::now())
    }

    /// Removes the marker, the session record and lock files when no signal
    /// is recent. Returns whether cleanup ran.
    pub fn cleanup_if_stale_at(&self, now: DateTime<Utc>) -> bool {
        if self.is_active_at(now) {
            return false;
        }

        let mut removed = Vec::new();
        for path in [&self.status_file, &self.session_file] {
            match storage::remove_if_exists(path) {
                Ok(true) => removed.push(path.display().to_string()),
                Ok(false) => {}
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "Cleanup failed"),
            }
        }
        if let Ok(entries) = fs::read_dir(&self.state_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let is_lock = path.extension().map(|e| e == "lock").unwrap_or(false);
                if is_lock && storage::remove_if_exists(&path).unwrap_or(false) {
                    removed.push(path.display().to_string());
                }
            }
        }

        if !removed.is_empty() {
            self.log.log_at(
                "session_cleanup",
                &format!("Removed stale state: {}", removed.join(", ")),
                now,
            );
        }
        true
    }

    pub fn mark_session_active(&self) -> io::Result<()> {
        self.mark_session_active_at(Utc::now())
    }

    /// Create or refresh the marker and the session record. An existing
    /// record keeps its `session_start`; a corrupt one is replaced.
    pub fn mark_session_active_at(&self, now: DateTime<Utc>) -> io::Result<()> {
        fs::create_dir_all(&self.state_dir)?;

        if self.status_file.exists() {
            touch(&self.status_file, now)?;
        } else {
            self.status.create_status_file_at(now)?;
        }

        let _lock = FileLock::acquire(&self.session_file);
        let record = match signals::read_session_record(&self.session_file) {
            Some(mut record) => {
                record.last_activity = now;
                if record.session_id.is_none() {
                    record.session_id = self.session_id.clone();
                }
                record
            }
            None => {
                let mut record = SessionRecord::new(now);
                record.session_id = self.session_id.clone();
                record
            }
        };
        self.write_record(&record)?;
        self.log.log_at("session_marked", "Session marked active", now);
        Ok(())
    }

    pub fn read_record(&self) -> Option<SessionRecord> {
        signals::read_session_record(&self.session_file)
    }

    fn write_record(&self, record: &SessionRecord) -> io::Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        storage::atomic_write(&self.session_file, &bytes)
    }

    /// Apply `f` to an existing record; absent or corrupt records are left alone
    fn update_record<F>(&self, f: F) -> io::Result<Option<SessionRecord>>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let _lock = FileLock::acquire(&self.session_file);
        let Some(mut record) = signals::read_session_record(&self.session_file) else {
            return Ok(None);
        };
        f(&mut record);
        self.write_record(&record)?;
        Ok(Some(record))
    }

    pub fn touch_activity_at(&self, now: DateTime<Utc>) -> io::Result<bool> {
        Ok(self
            .update_record(|r| r.last_activity = now)?
            .is_some())
    }

    pub fn set_active_agent(&self, agent: &str, now: DateTime<Utc>) -> io::Result<bool> {
        let updated = self.update_record(|r| {
            r.active_agent = Some(agent.to_string());
            r.last_activity = now;
        })?;
        if updated.is_some() {
            self.log.log_at("agent_active", &format!("Agent started: {}", agent), now);
        }
        Ok(updated.is_some())
    }

    /// Clear and return the active agent
    pub fn take_active_agent(&self, now: DateTime<Utc>) -> io::Result<Option<String>> {
        let mut taken = None;
        self.update_record(|r| {
            taken = r.active_agent.take();
            r.last_activity = now;
        })?;
        Ok(taken)
    }

    /// Unconditional teardown used when the host ends the session
    pub fn end_session(&self) -> io::Result<()> {
        storage::remove_if_exists(&self.status_file)?;
        storage::remove_if_exists(&self.session_file)?;
        Ok(())
    }
}

fn touch(path: &std::path::Path, now: DateTime<Utc>) -> io::Result<()> {
    let file = fs::File::options().write(true).open(path)?;
    file.set_modified(SystemTime::from(now))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle(root: &std::path::Path) -> (SessionOracle, CompassPaths) {
        let cfg = CompassConfig::default();
        let paths = CompassPaths::new(root, &cfg);
        let log = ActivityLog::new(paths.log_file(), cfg.log_max_bytes);
        let ledger = TokenLedgerStore::new(paths.token_ledger_file(), &cfg, log.clone());
        (SessionOracle::new(&paths, &cfg, log, ledger), paths)
    }

    struct Fixed(bool);

    impl SessionSignal for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn is_recent(&self, _now: DateTime<Utc>) -> bool {
            self.0
        }
    }

    #[test]
    fn oracle_is_an_or_of_signals() {
        let td = tempfile::tempdir().unwrap();
        let cfg = CompassConfig::default();
        let paths = CompassPaths::new(td.path(), &cfg);
        let log = ActivityLog::new(paths.log_file(), cfg.log_max_bytes);
        let now = Utc::now();

        let none = SessionOracle::with_signals(
            &paths,
            &cfg,
            log.clone(),
            vec![Box::new(Fixed(false)), Box::new(Fixed(false))],
        );
        assert!(!none.is_active_at(now));
        let one = SessionOracle::with_signals(
            &paths,
            &cfg,
            log,
            vec![Box::new(Fixed(false)), Box::new(Fixed(true))],
        );
        assert!(one.is_active_at(now));
        assert_eq!(one.active_signals_at(now), vec!["fixed"]);
    }

    #[test]
    fn fresh_project_is_inactive() {
        let td = tempfile::tempdir().unwrap();
        let (oracle, _) = oracle(td.path());
        assert!(!oracle.is_session_active());
    }

    #[test]
    fn mark_creates_marker_and_record() {
        let td = tempfile::tempdir().unwrap();
        let (oracle, paths) = oracle(td.path());
        let oracle = oracle.with_session_id(Some("abc".into()));
        let now = Utc::now();
        oracle.mark_session_active_at(now).unwrap();

        assert!(paths.status_file().is_file());
        let record = oracle.read_record().unwrap();
        assert_eq!(record.session_start, now);
        assert_eq!(record.session_id.as_deref(), Some("abc"));
        assert!(oracle.is_active_at(now));
    }

    #[test]
    fn remark_preserves_session_start() {
        let td = tempfile::tempdir().unwrap();
        let (oracle, _) = oracle(td.path());
        let t0 = Utc::now();
        oracle.mark_session_active_at(t0).unwrap();
        let t1 = t0 + chrono::Duration::minutes(5);
        oracle.mark_session_active_at(t1).unwrap();
        let record = oracle.read_record().unwrap();
        assert_eq!(record.session_start, t0);
        assert_eq!(record.last_activity, t1);
    }

    #[test]
    fn corrupt_record_is_replaced() {
        let td = tempfile::tempdir().unwrap();
        let (oracle, paths) = oracle(td.path());
        paths.ensure_state_dir().unwrap();
        fs::write(paths.session_file(), "garbage").unwrap();
        let now = Utc::now();
        oracle.mark_session_active_at(now).unwrap();
        assert_eq!(oracle.read_record().unwrap().session_start, now);
    }

    #[test]
    fn cleanup_keeps_active_session() {
        let td = tempfile::tempdir().unwrap();
        let (oracle, paths) = oracle(td.path());
        let now = Utc::now();
        oracle.mark_session_active_at(now).unwrap();
        assert!(!oracle.cleanup_if_stale_at(now));
        assert!(paths.status_file().exists());
    }

    #[test]
    fn active_agent_roundtrip() {
        let td = tempfile::tempdir().unwrap();
        let (oracle, _) = oracle(td.path());
        let now = Utc::now();
        assert!(!oracle.set_active_agent("compass-coder", now).unwrap());

        oracle.mark_session_active_at(now).unwrap();
        assert!(oracle.set_active_agent("compass-coder", now).unwrap());
        assert_eq!(oracle.take_active_agent(now).unwrap().as_deref(), Some("compass-coder"));
        assert_eq!(oracle.take_active_agent(now).unwrap(), None);
    }

    #[test]
    fn end_session_removes_marker_and_record() {
        let td = tempfile::tempdir().unwrap();
        let (oracle, paths) = oracle(td.path());
        oracle.mark_session_active().unwrap();
        oracle.end_session().unwrap();
        assert!(!paths.status_file().exists());
        assert!(!paths.session_file().exists());
        oracle.end_session().unwrap();
    }
}
