use std::path::{Path, PathBuf};

use crate::config::CompassConfig;
use crate::logging::ActivityLog;
use crate::paths::CompassPaths;
use crate::session::SessionOracle;
use crate::status::StatusBoard;
use crate::tokens::{TokenEstimator, TokenLedgerStore};

/// Everything one invocation needs, wired to a single project root
pub struct Compass {
    pub config: CompassConfig,
    pub paths: CompassPaths,
    pub log: ActivityLog,
    pub ledger: TokenLedgerStore,
    pub status: StatusBoard,
    pub oracle: SessionOracle,
    pub estimator: TokenEstimator,
}

impl Compass {
    pub fn open(project_root: impl Into<PathBuf>, config: CompassConfig) -> Self {
        let requested = absolute_root(project_root.into());
        let root = std::fs::canonicalize(&requested).unwrap_or_else(|_| requested.clone());
        let paths = CompassPaths::new(root, &config).with_root_alias(requested);
        let log = ActivityLog::new(paths.log_file(), config.log_max_bytes);
        let ledger = TokenLedgerStore::new(paths.token_ledger_file(), &config, log.clone());
        let status = StatusBoard::new(&paths, &config, log.clone());
        let oracle = SessionOracle::new(&paths, &config, log.clone(), ledger.clone());
        let estimator = TokenEstimator::from_config(&config);
        Self {
            config,
            paths,
            log,
            ledger,
            status,
            oracle,
            estimator,
        }
    }

    pub fn with_session_id(self, session_id: Option<String>) -> Self {
        Self {
            oracle: self.oracle.with_session_id(session_id),
            ..self
        }
    }

    pub fn project_root(&self) -> &Path {
        self.paths.project_root()
    }
}

/// Absolute form of the root so absolute tool paths can be compared against it.
/// Symlinks are resolved separately; both spellings stay in `CompassPaths`.
fn absolute_root(root: PathBuf) -> PathBuf {
    if root.is_absolute() {
        return root;
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(&root))
        .unwrap_or(root)
}
