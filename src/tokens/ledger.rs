use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::map_agent_to_phase;
use crate::config::CompassConfig;
use crate::logging::ActivityLog;
use crate::storage::{self, CappedRead, FileLock};

/// Persisted accumulator of token estimates.
///
/// `by_agent` and `by_phase` are accumulated independently of `total`; they
/// are not a partition of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLedger {
    pub total: u64,
    #[serde(default)]
    pub by_agent: BTreeMap<String, u64>,
    #[serde(default)]
    pub by_phase: BTreeMap<String, u64>,
    pub session_start: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl TokenLedger {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            total: 0,
            by_agent: BTreeMap::new(),
            by_phase: BTreeMap::new(),
            session_start: now,
            last_update: now,
        }
    }

    pub fn add(&mut self, operation: &str, count: u64, now: DateTime<Utc>) {
        self.total = self.total.saturating_add(count);
        let agent = self.by_agent.entry(operation.to_string()).or_insert(0);
        *agent = agent.saturating_add(count);
        if let Some(phase) = map_agent_to_phase(operation) {
            let slot = self.by_phase.entry(phase.to_string()).or_insert(0);
            *slot = slot.saturating_add(count);
        }
        self.last_update = now;
    }

    /// Evict the lowest-valued entries of each map until it fits `max_keys`
    pub fn enforce_key_cap(&mut self, max_keys: usize) {
        evict_lowest(&mut self.by_agent, max_keys);
        evict_lowest(&mut self.by_phase, max_keys);
    }

    pub fn most_expensive_phase(&self) -> Option<(&str, u64)> {
        self.by_phase
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(k, v)| (k.as_str(), *v))
    }

    pub fn has_agent_with_prefix(&self, prefix: &str) -> bool {
        self.by_agent.keys().any(|k| k.starts_with(prefix))
    }
}

fn evict_lowest(map: &mut BTreeMap<String, u64>, max_keys: usize) {
    while map.len() > max_keys {
        // Ties resolve to the lexicographically last key
        let victim = map
            .iter()
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(k, _)| k.clone());
        match victim {
            Some(key) => {
                map.remove(&key);
            }
            None => break,
        }
    }
}

/// Locked read-modify-write access to the on-disk ledger
#[derive(Debug, Clone)]
pub struct TokenLedgerStore {
    path: PathBuf,
    max_bytes: u64,
    max_keys: usize,
    log: ActivityLog,
}

impl TokenLedgerStore {
    pub fn new(path: impl Into<PathBuf>, config: &CompassConfig, log: ActivityLog) -> Self {
        Self {
            path: path.into(),
            max_bytes: config.ledger_max_bytes,
            max_keys: config.ledger_max_keys,
            log,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current ledger, or `None` when missing, oversized or corrupt
    pub fn read(&self) -> Option<TokenLedger> {
        match storage::read_capped(&self.path, self.max_bytes) {
            Ok(CappedRead::Contents(text)) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }

    pub fn record_tokens(&self, operation: &str, count: u64) -> Option<TokenLedger> {
        self.record_tokens_at(operation, count, Utc::now())
    }

    /// Never fails outward: I/O problems are logged and yield `None`
    pub fn record_tokens_at(
        &self,
        operation: &str,
        count: u64,
        now: DateTime<Utc>,
    ) -> Option<TokenLedger> {
        let _lock = FileLock::acquire(&self.path);

        let mut ledger = match storage::read_capped(&self.path, self.max_bytes) {
            Ok(CappedRead::Missing) => TokenLedger::empty(now),
            Ok(CappedRead::TooLarge(size)) => {
                self.log.log_at(
                    "token_ledger_reset",
                    &format!(
                        "Ledger exceeded {} bytes ({} bytes), starting fresh",
                        self.max_bytes, size
                    ),
                    now,
                );
                TokenLedger::empty(now)
            }
            Ok(CappedRead::Contents(text)) => match serde_json::from_str::<TokenLedger>(&text) {
                Ok(ledger) => ledger,
                Err(e) => {
                    self.log.log_at(
                        "token_ledger_reset",
                        &format!("Corrupt ledger discarded: {}", e),
                        now,
                    );
                    TokenLedger::empty(now)
                }
            },
            Err(e) => {
                self.log
                    .log_at("token_count_error", &format!("Failed to read ledger: {}", e), now);
                return None;
            }
        };

        ledger.add(operation, count, now);
        ledger.enforce_key_cap(self.max_keys);

        let write = serde_json::to_vec(&ledger)
            .map_err(std::io::Error::from)
            .and_then(|bytes| storage::atomic_write(&self.path, &bytes));
        if let Err(e) = write {
            self.log
                .log_at("token_count_error", &format!("Failed to update token count: {}", e), now);
            return None;
        }
        Some(ledger)
    }

    /// Explicit reset; the only path besides the size cap that lowers `total`
    pub fn reset(&self) {
        let _lock = FileLock::acquire(&self.path);
        if let Err(e) = storage::remove_if_exists(&self.path) {
            tracing::debug!(
                path = %self.path.display(),
                error = %e,
                "Failed to reset token ledger"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accumulates_agent_and_phase() {
        let now = Utc::now();
        let mut ledger = TokenLedger::empty(now);
        ledger.add("compass-coder", 100, now);
        ledger.add("compass-coder", 50, now);
        ledger.add("delegation_chain", 10, now);
        assert_eq!(ledger.total, 160);
        assert_eq!(ledger.by_agent["compass-coder"], 150);
        assert_eq!(ledger.by_phase["phase6_execution_bridge"], 150);
        assert!(!ledger.by_phase.contains_key("delegation_chain"));
    }

    #[test]
    fn key_cap_evicts_lowest_values() {
        let now = Utc::now();
        let mut ledger = TokenLedger::empty(now);
        ledger.add("a", 5, now);
        ledger.add("b", 1, now);
        ledger.add("c", 9, now);
        ledger.enforce_key_cap(2);
        let keys: Vec<_> = ledger.by_agent.keys().cloned().collect();
        assert_eq!(keys, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(ledger.total, 15);
    }

    #[test]
    fn most_expensive_phase_picks_max() {
        let now = Utc::now();
        let mut ledger = TokenLedger::empty(now);
        assert!(ledger.most_expensive_phase().is_none());
        ledger.add("compass-knowledge-query", 10, now);
        ledger.add("compass-gap-analysis", 30, now);
        assert_eq!(ledger.most_expensive_phase(), Some(("phase3_gap_analysis", 30)));
    }
}
