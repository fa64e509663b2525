/// Default thresholds for session liveness, bookkeeping caps and recursion
/// bounds. `CompassConfig` starts from these and lets env vars or the JSON
/// config file override them.

// Session liveness
pub const SESSION_TIMEOUT_SECS: u64 = 10 * 60;
pub const AGENT_ACTIVITY_WINDOW_SECS: u64 = 2 * 60 * 60;
pub const DOCS_RECENT_WINDOW_SECS: u64 = 10 * 60;
pub const LOG_TAIL_ENTRIES: usize = 20;
pub const DOCS_SCAN_MAX_DEPTH: usize = 2;

// Recursion bound for double-check validation
pub const MAX_VALIDATION_DEPTH: u32 = 3;

// Input limits
pub const MAX_INPUT_BYTES: usize = 1024 * 1024;

// Token ledger
pub const LEDGER_MAX_BYTES: u64 = 256 * 1024;
pub const LEDGER_MAX_KEYS: usize = 50;

// Status file
pub const STATUS_MAX_BYTES: u64 = 64 * 1024;
pub const STATUS_REFRESH_INTERVAL_SECS: u64 = 2;

// Activity log
pub const LOG_MAX_BYTES: u64 = 1024 * 1024;
pub const LOG_TAIL_READ_BYTES: u64 = 64 * 1024;
pub const MAX_LOG_ACTION_LENGTH: usize = 64;
pub const MAX_LOG_DETAILS_LENGTH: usize = 2000;

// Token estimation
pub const CHARS_PER_TOKEN: u64 = 4;
pub const CONTEXT_OVERHEAD_RATIO: f64 = 0.2;
pub const MAX_CONTEXT_OVERHEAD_TOKENS: f64 = 500.0;
pub const EXTRA_INPUT_CHARS_PER_TOKEN: u64 = 10;
pub const DELEGATION_OVERHEAD_RATIO: f64 = 0.05;
pub const COST_PER_TOKEN_USD: f64 = 0.00001;

// Naming
pub const STATE_DIR: &str = ".compass";
pub const DOCS_DIR: &str = "docs";
pub const AGENT_NAMESPACE: &str = "compass-";
pub const COORDINATOR_AGENT: &str = "compass-captain";
pub const VALIDATOR_AGENT: &str = "compass-upstream-validator";
pub const HANDLER_NAME: &str = "compass-handler";
