//! Tools module - agent capabilities
//!
//! Tools are local actions the model may request: reading, editing and
//! deleting files, listing and searching the working directory, running
//! shell commands.

mod edit;
mod filesystem;
mod registry;
mod search;
mod shell;

pub use edit::EditFileTool;
pub use filesystem::{DeleteFileTool, ListDirectoryTool, ReadFileTool, WriteFileTool};
pub use registry::{ToolDefinition, ToolRegistry};
pub use search::SearchFilesTool;
pub use shell::{check_dangerous_command, CommandApproval, DenyDangerous, RunCommandTool};

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::Content;
use crate::error::Error;
use crate::Result;

/// Directories never descended into by listing and search tools
pub(crate) const SKIP_DIRS: &[&str] = &[
    ".git", ".svn", ".hg", ".bzr",
    "node_modules", "__pycache__", ".pytest_cache", ".mypy_cache", ".ruff_cache",
    "venv", ".venv", "env", ".env", "virtualenv",
    "dist", "build", "target", "out", "bin", "obj",
    ".idea", ".vscode", ".vs",
    "coverage", ".coverage", "htmlcov", ".nyc_output",
    ".tox", ".nox", ".next", ".nuxt", ".output", ".cache", ".parcel-cache",
];

/// Tool trait - interface for all agent tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name used in function calls
    fn name(&self) -> &str;

    /// Description of what the tool does
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters(&self) -> Value;

    /// Execute the tool with already-validated parameters
    async fn execute(&self, params: Value) -> Result<Content>;

    /// Convert to tool definition for LLM
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Required string parameter
pub(crate) fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Tool(format!("Missing '{}' parameter", key)))
}

/// Resolve `path` against `root`, rejecting anything that escapes it.
///
/// `..` components are folded first, then symlinks are followed as far as
/// the path exists on disk. The target itself does not need to exist yet.
pub(crate) fn resolve_path(root: &Path, path: &str) -> Result<PathBuf> {
    let root = canonical(&absolute(root)?)?;
    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let resolved = canonical(&normalize(&joined))?;
    if !resolved.starts_with(&root) {
        return Err(Error::Tool(format!(
            "Access denied: {} is outside allowed directory",
            path
        )));
    }
    Ok(resolved)
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// components below it that do not exist yet.
fn canonical(path: &Path) -> Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();

    loop {
        match std::fs::canonicalize(&existing) {
            Ok(mut base) => {
                for part in missing.iter().rev() {
                    base.push(part);
                }
                return Ok(base);
            }
            Err(_) => {
                // A link whose target is gone would be followed on write
                let dangling = std::fs::symlink_metadata(&existing)
                    .map(|m| m.file_type().is_symlink())
                    .unwrap_or(false);
                if dangling {
                    return Err(Error::Tool(format!(
                        "Access denied: {} is a broken symlink",
                        existing.display()
                    )));
                }

                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        missing.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    _ => return Ok(path.to_path_buf()),
                }
            }
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(normalize(path))
    } else {
        Ok(normalize(&std::env::current_dir()?.join(path)))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Dummy tool for testing
#[cfg(test)]
pub struct DummyTool {
    pub name: String,
    pub result: String,
}

#[cfg(test)]
#[async_trait]
impl Tool for DummyTool {
    fn name(&self) -> &str { &self.name }
    fn description(&self) -> &str { "Dummy tool for testing" }
    fn parameters(&self) -> Value { serde_json::json!({"type": "object"}) }

    async fn execute(&self, _params: Value) -> Result<Content> {
        Ok(Content::Text(self.result.clone()))
    }
}
