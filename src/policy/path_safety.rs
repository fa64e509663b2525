//! Root-write guard: file tools may not create files directly in the
//! project root. Offending targets get a suggested home elsewhere.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Component, Path, PathBuf};

use crate::config::{is_allowed_root_file, CompassConfig};
use crate::error::CompassError;
use crate::hook::ToolCall;
use crate::paths::CompassPaths;

/// Tools that create or modify files
pub const FILE_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "NotebookEdit"];

static TEST_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^a-z])tests?([^a-z]|$)").expect("valid test name pattern"));
static TEST_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(test (plan|case|results?|suite)s?|unit tests?)\b")
        .expect("valid test pattern")
});
static VALIDATION_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bvalidation (report|results?|summary)\b").expect("valid validation pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Test,
    Validation,
    Map,
    Documentation,
}

impl FileCategory {
    /// File name keywords win over content keywords
    pub fn classify(file_name: &str, content: &str) -> Self {
        let name = file_name.to_lowercase();
        if name.ends_with(".svg") || name.starts_with("map") {
            return FileCategory::Map;
        }
        if TEST_NAME.is_match(&name) {
            return FileCategory::Test;
        }
        if name.contains("validation") || name.contains("validate") {
            return FileCategory::Validation;
        }
        if content.trim_start().starts_with("<svg") {
            return FileCategory::Map;
        }
        if TEST_CONTENT.is_match(content) {
            return FileCategory::Test;
        }
        if VALIDATION_CONTENT.is_match(content) {
            return FileCategory::Validation;
        }
        FileCategory::Documentation
    }

    pub fn label(self) -> &'static str {
        match self {
            FileCategory::Test => "test",
            FileCategory::Validation => "validation",
            FileCategory::Map => "map",
            FileCategory::Documentation => "documentation",
        }
    }

    pub fn redirect(self, paths: &CompassPaths, file_name: &str) -> PathBuf {
        match self {
            FileCategory::Test => paths.tests_dir().join(file_name),
            FileCategory::Validation => paths.docs_dir().join("validations").join(file_name),
            FileCategory::Map => paths.maps_dir().join(file_name),
            FileCategory::Documentation => paths.docs_dir().join(file_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathVerdict {
    /// At least one directory below the root
    Nested,
    OutsideProject,
    AllowListed,
    RootLevel {
        file_name: String,
        category: FileCategory,
        redirect: PathBuf,
    },
}

impl PathVerdict {
    pub fn is_safe(&self) -> bool {
        !matches!(self, PathVerdict::RootLevel { .. })
    }
}

/// Resolve `.` and `..` without touching the filesystem
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let ends_in_name =
                    matches!(out.components().next_back(), Some(Component::Normal(_)));
                if ends_in_name {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Path of an absolute candidate below the project root. Tries each spelling
/// of the root lexically, then the candidate with its existing parent
/// directory resolved through symlinks.
pub fn relative_to_root(paths: &CompassPaths, candidate: &Path) -> Option<PathBuf> {
    let normalized = normalize_lexically(candidate);
    for root in paths.root_spellings() {
        if let Ok(rel) = normalized.strip_prefix(normalize_lexically(root)) {
            return Some(rel.to_path_buf());
        }
    }

    let name = normalized.file_name()?;
    let parent = std::fs::canonicalize(normalized.parent()?).ok()?;
    let resolved = parent.join(name);
    paths
        .root_spellings()
        .find_map(|root| resolved.strip_prefix(root).ok())
        .map(Path::to_path_buf)
}

/// The file target of a file tool. A present but non-string path is an error
/// so the caller can fail closed.
pub fn target_path<'a>(call: &ToolCall<'a>) -> Result<Option<&'a str>, CompassError> {
    if !FILE_TOOLS.contains(&call.tool_name) {
        return Ok(None);
    }
    let notebook = call.tool_name == "NotebookEdit" && !call.tool_input.contains_key("file_path");
    let field: &'static str = if notebook { "notebook_path" } else { "file_path" };
    match call.tool_input.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or(CompassError::InvalidToolInput {
                field,
                expected: "a string path",
            }),
    }
}

pub fn check_path(
    paths: &CompassPaths,
    config: &CompassConfig,
    raw: &str,
    content: &str,
) -> PathVerdict {
    let raw = raw.trim();
    if raw.is_empty() {
        return PathVerdict::Nested;
    }

    let candidate = Path::new(raw);
    let relative = if candidate.is_absolute() {
        match relative_to_root(paths, candidate) {
            Some(rel) => rel,
            None => return PathVerdict::OutsideProject,
        }
    } else {
        normalize_lexically(candidate)
    };

    let mut components = relative.components();
    let first = match components.next() {
        Some(Component::Normal(name)) => name.to_string_lossy().into_owned(),
        Some(_) => return PathVerdict::OutsideProject,
        None => return PathVerdict::Nested,
    };
    if components.next().is_some() {
        return PathVerdict::Nested;
    }

    if is_allowed_root_file(config, &first) {
        return PathVerdict::AllowListed;
    }
    let category = FileCategory::classify(&first, content);
    let redirect = category.redirect(paths, &first);
    PathVerdict::RootLevel {
        file_name: first,
        category,
        redirect,
    }
}

/// Convenience wrapper for callers with only a path
pub fn is_path_safe(paths: &CompassPaths, config: &CompassConfig, raw: &str) -> bool {
    check_path(paths, config, raw, "").is_safe()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn setup() -> (CompassPaths, CompassConfig) {
        let cfg = CompassConfig::default();
        (CompassPaths::new("/work/project", &cfg), cfg)
    }

    #[test]
    fn normalizes_dot_segments() {
        assert_eq!(normalize_lexically(Path::new("a/./b/../c.md")), PathBuf::from("a/c.md"));
        assert_eq!(normalize_lexically(Path::new("../x.md")), PathBuf::from("../x.md"));
        assert_eq!(normalize_lexically(Path::new("/a/../../b")), PathBuf::from("/b"));
    }

    #[test]
    fn root_level_targets_are_unsafe() {
        let (paths, cfg) = setup();
        assert!(!is_path_safe(&paths, &cfg, "notes.md"));
        assert!(!is_path_safe(&paths, &cfg, "./notes.md"));
        assert!(!is_path_safe(&paths, &cfg, "docs/../notes.md"));
        assert!(!is_path_safe(&paths, &cfg, "/work/project/notes.md"));
    }

    #[test]
    fn nested_and_outside_targets_are_safe() {
        let (paths, cfg) = setup();
        assert!(is_path_safe(&paths, &cfg, "docs/notes.md"));
        assert!(is_path_safe(&paths, &cfg, "/work/project/src/main.rs"));
        assert_eq!(check_path(&paths, &cfg, "/tmp/notes.md", ""), PathVerdict::OutsideProject);
        assert_eq!(check_path(&paths, &cfg, "../sibling.md", ""), PathVerdict::OutsideProject);
        assert_eq!(
            check_path(&paths, &cfg, "/work/project-other/a.md", ""),
            PathVerdict::OutsideProject
        );
    }

    #[test]
    fn redirect_follows_category() {
        let (paths, cfg) = setup();
        let redirect = |name: &str, content: &str| match check_path(&paths, &cfg, name, content) {
            PathVerdict::RootLevel { redirect, .. } => paths.display_relative(&redirect),
            other => panic!("expected root-level verdict, got {other:?}"),
        };
        assert_eq!(redirect("README.md", "hello"), "docs/README.md");
        assert_eq!(redirect("test_login.md", ""), ".compass/tests/test_login.md");
        assert_eq!(redirect("api-validation.md", ""), "docs/validations/api-validation.md");
        assert_eq!(redirect("flow.svg", ""), "maps/flow.svg");
        assert_eq!(redirect("latest.md", ""), "docs/latest.md");
        assert_eq!(
            redirect("summary.md", "## Test Results\nall green"),
            ".compass/tests/summary.md"
        );
    }

    #[test]
    fn allow_list_exempts_root_files() {
        let (paths, mut cfg) = setup();
        let mut builder = globset::GlobSetBuilder::new();
        builder.add(globset::Glob::new("Cargo.toml").unwrap());
        cfg.allowed_root_globs = Some(builder.build().unwrap());
        assert_eq!(check_path(&paths, &cfg, "Cargo.toml", ""), PathVerdict::AllowListed);
        assert!(!is_path_safe(&paths, &cfg, "Cargo.lock"));
    }

    #[test]
    fn non_string_path_is_an_error() {
        let input: HashMap<String, Value> =
            serde_json::from_value(json!({"file_path": 42})).unwrap();
        let call = ToolCall { tool_name: "Write", tool_input: &input };
        assert!(matches!(
            target_path(&call),
            Err(CompassError::InvalidToolInput { field: "file_path", .. })
        ));
    }

    #[test]
    fn notebook_path_is_recognised() {
        let input: HashMap<String, Value> =
            serde_json::from_value(json!({"notebook_path": "analysis.ipynb"})).unwrap();
        let call = ToolCall { tool_name: "NotebookEdit", tool_input: &input };
        assert_eq!(target_path(&call).unwrap(), Some("analysis.ipynb"));
        let read = ToolCall { tool_name: "Read", tool_input: &input };
        assert_eq!(target_path(&read).unwrap(), None);
    }
}
