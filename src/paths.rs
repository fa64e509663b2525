use std::path::{Path, PathBuf};

use crate::config::CompassConfig;

/// All project-local file locations used by the handler.
///
/// Every entity is created lazily on first use; nothing here touches the
/// filesystem except `ensure_state_dir`.
#[derive(Debug, Clone)]
pub struct CompassPaths {
    project_root: PathBuf,
    /// The root as it was spelled before symlinks were resolved
    root_alias: Option<PathBuf>,
    state_dir: PathBuf,
    docs_dir: PathBuf,
}

impl CompassPaths {
    pub fn new(project_root: impl Into<PathBuf>, config: &CompassConfig) -> Self {
        let project_root = project_root.into();
        let state_dir = project_root.join(&config.state_dir);
        let docs_dir = project_root.join(&config.docs_dir);
        Self {
            project_root,
            root_alias: None,
            state_dir,
            docs_dir,
        }
    }

    /// Also treat `alias` as the project root when matching absolute paths
    pub fn with_root_alias(mut self, alias: impl Into<PathBuf>) -> Self {
        let alias = alias.into();
        self.root_alias = (alias != self.project_root).then_some(alias);
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Every spelling of the root: canonical first, then the alias if any
    pub fn root_spellings(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.project_root.as_path()).chain(self.root_alias.as_deref())
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn docs_dir(&self) -> &Path {
        &self.docs_dir
    }

    /// Human-readable status file; its fresh existence marks an active session
    pub fn status_file(&self) -> PathBuf {
        self.state_dir.join("compass-status")
    }

    pub fn completion_file(&self) -> PathBuf {
        self.state_dir.join("compass-complete")
    }

    pub fn session_file(&self) -> PathBuf {
        self.state_dir.join("session.json")
    }

    pub fn token_ledger_file(&self) -> PathBuf {
        self.state_dir.join("tokens.json")
    }

    pub fn log_file(&self) -> PathBuf {
        self.state_dir.join("compass-handler.log")
    }

    /// JSON lines consumed by the assistant to keep its todo list in step
    pub fn todo_updates_file(&self) -> PathBuf {
        self.state_dir.join("todo-updates.jsonl")
    }

    pub fn tests_dir(&self) -> PathBuf {
        self.state_dir.join("tests")
    }

    pub fn maps_dir(&self) -> PathBuf {
        self.project_root.join("maps")
    }

    pub fn map_index_file(&self) -> PathBuf {
        self.maps_dir().join("map-index.json")
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.project_root.join("agents")
    }

    pub fn ensure_state_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)
    }

    /// Display form relative to the project root, always with `/` separators
    pub fn display_relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.project_root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}
