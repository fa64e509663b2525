use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::validation_constants as defaults;

#[derive(Debug, Clone)]
pub struct CompassConfig {
    /// State directory relative to the project root
    pub state_dir: String,
    /// Documentation directory relative to the project root
    pub docs_dir: String,

    pub session_timeout: Duration,
    pub agent_activity_window: Duration,
    pub docs_recent_window: Duration,
    pub log_tail_entries: usize,

    pub max_validation_depth: u32,
    pub max_input_bytes: usize,

    pub ledger_max_bytes: u64,
    pub ledger_max_keys: usize,
    pub status_max_bytes: u64,
    pub status_refresh_interval: Duration,
    pub log_max_bytes: u64,

    pub agent_namespace: String,
    pub coordinator_agent: String,
    pub validator_agent: String,

    /// Run the prompt complexity heuristic before injecting coordination context
    pub complexity_gate: bool,
    /// Report deny decisions through exit code 2 instead of JSON only
    pub deny_exit_code: bool,
    /// Root-level files that may be written despite the root-write guard
    pub allowed_root_globs: Option<GlobSet>,
    pub token_multipliers: HashMap<String, f64>,
}

impl Default for CompassConfig {
    fn default() -> Self {
        Self {
            state_dir: defaults::STATE_DIR.to_string(),
            docs_dir: defaults::DOCS_DIR.to_string(),
            session_timeout: Duration::from_secs(defaults::SESSION_TIMEOUT_SECS),
            agent_activity_window: Duration::from_secs(defaults::AGENT_ACTIVITY_WINDOW_SECS),
            docs_recent_window: Duration::from_secs(defaults::DOCS_RECENT_WINDOW_SECS),
            log_tail_entries: defaults::LOG_TAIL_ENTRIES,
            max_validation_depth: defaults::MAX_VALIDATION_DEPTH,
            max_input_bytes: defaults::MAX_INPUT_BYTES,
            ledger_max_bytes: defaults::LEDGER_MAX_BYTES,
            ledger_max_keys: defaults::LEDGER_MAX_KEYS,
            status_max_bytes: defaults::STATUS_MAX_BYTES,
            status_refresh_interval: Duration::from_secs(defaults::STATUS_REFRESH_INTERVAL_SECS),
            log_max_bytes: defaults::LOG_MAX_BYTES,
            agent_namespace: defaults::AGENT_NAMESPACE.to_string(),
            coordinator_agent: defaults::COORDINATOR_AGENT.to_string(),
            validator_agent: defaults::VALIDATOR_AGENT.to_string(),
            complexity_gate: false,
            deny_exit_code: false,
            allowed_root_globs: None,
            token_multipliers: default_token_multipliers(),
        }
    }
}

/// Per-agent complexity multipliers applied on top of the chars/4 estimate
pub fn default_token_multipliers() -> HashMap<String, f64> {
    [
        ("compass-captain", 1.2),
        ("compass-knowledge-query", 1.5),
        ("compass-pattern-apply", 1.3),
        ("compass-gap-analysis", 1.4),
        ("compass-doc-planning", 1.1),
        ("compass-enhanced-analysis", 2.0),
        ("compass-cross-reference", 1.6),
        ("compass-svg-analyst", 1.4),
        ("compass-coder", 1.8),
        ("compass-auth-analyst", 1.7),
        ("compass-writing-specialist", 1.6),
        ("compass-academic-analyst", 2.2),
        ("compass-data-flow", 1.5),
        ("compass-second-opinion", 1.8),
        ("compass-breakthrough-doc", 1.3),
        ("Code", 1.4),
        ("Task", 1.2),
        ("Debugger", 1.6),
        ("Data Scientist", 1.8),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Optional JSON overrides, read from `COMPASS_CONFIG_FILE` or
/// `<project>/.compass/config.json`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    session_timeout_secs: Option<u64>,
    agent_activity_window_secs: Option<u64>,
    docs_recent_window_secs: Option<u64>,
    log_tail_entries: Option<usize>,
    max_validation_depth: Option<u32>,
    max_input_bytes: Option<usize>,
    ledger_max_bytes: Option<u64>,
    ledger_max_keys: Option<usize>,
    status_max_bytes: Option<u64>,
    status_refresh_interval_secs: Option<u64>,
    log_max_bytes: Option<u64>,
    coordinator_agent: Option<String>,
    docs_dir: Option<String>,
    complexity_gate: Option<bool>,
    deny_exit_code: Option<bool>,
    allowed_root_globs: Option<Vec<String>>,
    token_multipliers: Option<HashMap<String, f64>>,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn build_globset<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let mut any = false;
    for pat in patterns.into_iter().map(str::trim).filter(|s| !s.is_empty()) {
        match Glob::new(pat) {
            Ok(glob) => {
                builder.add(glob);
                any = true;
            }
            Err(e) => tracing::warn!(pattern = %pat, error = %e, "Ignoring invalid root glob"),
        }
    }
    if !any {
        return None;
    }
    builder.build().ok()
}

fn config_file_path(project_root: &Path) -> PathBuf {
    std::env::var("COMPASS_CONFIG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            project_root
                .join(defaults::STATE_DIR)
                .join("config.json")
        })
}

/// Defaults, then environment, then the JSON config file (file wins).
pub fn load_config(project_root: &Path) -> CompassConfig {
    let mut cfg = CompassConfig::default();

    if let Some(secs) = env_parse::<u64>("COMPASS_SESSION_TIMEOUT_SECS") {
        cfg.session_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = env_parse::<u64>("COMPASS_AGENT_ACTIVITY_WINDOW_SECS") {
        cfg.agent_activity_window = Duration::from_secs(secs);
    }
    if let Some(secs) = env_parse::<u64>("COMPASS_DOCS_RECENT_WINDOW_SECS") {
        cfg.docs_recent_window = Duration::from_secs(secs);
    }
    if let Some(depth) = env_parse::<u32>("COMPASS_MAX_VALIDATION_DEPTH") {
        cfg.max_validation_depth = depth;
    }
    if let Some(bytes) = env_parse::<usize>("COMPASS_MAX_INPUT_BYTES") {
        cfg.max_input_bytes = bytes.max(1);
    }
    if let Some(secs) = env_parse::<u64>("COMPASS_STATUS_REFRESH_SECS") {
        cfg.status_refresh_interval = Duration::from_secs(secs);
    }
    if let Some(gate) = env_flag("COMPASS_COMPLEXITY_GATE") {
        cfg.complexity_gate = gate;
    }
    if let Some(deny) = env_flag("COMPASS_DENY_EXIT_CODE") {
        cfg.deny_exit_code = deny;
    }
    if let Ok(val) = std::env::var("COMPASS_ALLOWED_ROOT_GLOBS") {
        cfg.allowed_root_globs = build_globset(val.split(','));
    }

    let cfg_path = config_file_path(project_root);
    let text = match std::fs::read_to_string(&cfg_path) {
        Ok(text) => text,
        Err(_) => return cfg,
    };
    let file: ConfigFile = match serde_json::from_str(&text) {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(
                path = %cfg_path.display(),
                error = %e,
                "Ignoring unreadable config file"
            );
            return cfg;
        }
    };

    if let Some(secs) = file.session_timeout_secs {
        cfg.session_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.agent_activity_window_secs {
        cfg.agent_activity_window = Duration::from_secs(secs);
    }
    if let Some(secs) = file.docs_recent_window_secs {
        cfg.docs_recent_window = Duration::from_secs(secs);
    }
    if let Some(n) = file.log_tail_entries {
        cfg.log_tail_entries = n;
    }
    if let Some(depth) = file.max_validation_depth {
        cfg.max_validation_depth = depth;
    }
    if let Some(bytes) = file.max_input_bytes {
        cfg.max_input_bytes = bytes.max(1);
    }
    if let Some(bytes) = file.ledger_max_bytes {
        cfg.ledger_max_bytes = bytes;
    }
    if let Some(keys) = file.ledger_max_keys {
        cfg.ledger_max_keys = keys.max(1);
    }
    if let Some(bytes) = file.status_max_bytes {
        cfg.status_max_bytes = bytes;
    }
    if let Some(secs) = file.status_refresh_interval_secs {
        cfg.status_refresh_interval = Duration::from_secs(secs);
    }
    if let Some(bytes) = file.log_max_bytes {
        cfg.log_max_bytes = bytes;
    }
    if let Some(agent) = file.coordinator_agent.filter(|a| !a.trim().is_empty()) {
        cfg.coordinator_agent = agent;
    }
    if let Some(dir) = file.docs_dir.filter(|d| !d.trim().is_empty()) {
        cfg.docs_dir = dir;
    }
    if let Some(gate) = file.complexity_gate {
        cfg.complexity_gate = gate;
    }
    if let Some(deny) = file.deny_exit_code {
        cfg.deny_exit_code = deny;
    }
    if let Some(globs) = file.allowed_root_globs {
        cfg.allowed_root_globs = build_globset(globs.iter().map(String::as_str));
    }
    if let Some(table) = file.token_multipliers {
        cfg.token_multipliers.extend(table);
    }

    cfg
}

/// True when a root-level file name matches the configured allow-list
pub fn is_allowed_root_file(cfg: &CompassConfig, file_name: &str) -> bool {
    if file_name.is_empty() {
        return false;
    }
    cfg.allowed_root_globs
        .as_ref()
        .map(|set| set.is_match(Path::new(file_name)))
        .unwrap_or(false)
}
