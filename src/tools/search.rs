//! Search tool - regex search over file names and contents

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use serde_json::{json, Value};
use regex::Regex;
use crate::agent::Content;
use crate::Result;
use crate::error::Error;
use super::filesystem::is_skipped_dir;
use super::{resolve_path, str_param, Tool};

/// Matches returned to the model; the total is still reported
const MAX_RESULTS: usize = 100;

/// Search file names and contents in the working directory
pub struct SearchFilesTool {
    root: PathBuf,
}

impl SearchFilesTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

fn relative<'a>(root: &Path, path: &'a Path) -> std::path::Display<'a> {
    path.strip_prefix(root).unwrap_or(path).display()
}

/// Walk `dir` collecting name and content matches, displayed relative to `root`.
///
/// Symlinks are not followed.
fn search_tree(root: &Path, dir: &Path, pattern: &Regex, results: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            if !is_skipped_dir(&path) {
                search_tree(root, &path, pattern, results)?;
            }
            continue;
        }

        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        if pattern.is_match(&name) {
            results.push(format!("{}: [file name match]", relative(root, &path)));
        }

        // Binary and unreadable files are skipped
        if let Ok(content) = std::fs::read_to_string(&path) {
            for (i, line) in content.lines().enumerate() {
                if pattern.is_match(line) {
                    results.push(format!("{}:{}: {}", relative(root, &path), i + 1, line.trim()));
                }
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str { "search_files" }
    fn description(&self) -> &str {
        "Search file names AND file contents by regex (e.g. \"def main\", \"TODO\"). \
         Returns path:line: text for content matches."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regex (or literal text) to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Sub-directory to search in (defaults to the working directory)"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Ignore case when matching (default: false)"
                },
                "literal": {
                    "type": "boolean",
                    "description": "Treat pattern as literal text, not regex (default: false)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, params: Value) -> Result<Content> {
        let query = str_param(&params, "pattern")?;
        let sub_path = params.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let case_insensitive = params.get("case_insensitive").and_then(|v| v.as_bool()).unwrap_or(false);
        let literal = params.get("literal").and_then(|v| v.as_bool()).unwrap_or(false);

        let search_path = resolve_path(&self.root, sub_path)?;
        if !search_path.is_dir() {
            return Err(Error::Tool(format!("Not a directory: {}", sub_path)));
        }

        let pattern_str = if literal { regex::escape(query) } else { query.to_string() };
        let pattern_str = if case_insensitive { format!("(?i){}", pattern_str) } else { pattern_str };
        let pattern = Regex::new(&pattern_str).map_err(|e| Error::Tool(format!("Invalid regex: {}", e)))?;

        let root = resolve_path(&self.root, ".")?;
        let mut results = tokio::task::spawn_blocking(move || {
            let mut results = Vec::new();
            search_tree(&root, &search_path, &pattern, &mut results).map(|_| results)
        })
        .await
        .map_err(|e| Error::Tool(format!("Search task failed: {}", e)))?
        .map_err(|e| Error::Tool(format!("Search failed: {}", e)))?;

        let total = results.len();
        results.truncate(MAX_RESULTS);

        Ok(Content::Structured(json!({
            "pattern": query,
            "total_matches": total,
            "truncated": total > MAX_RESULTS,
            "matches": results,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> TempDir {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("src")).unwrap();
        std::fs::write(tmp.path().join("src").join("main.rs"), "fn main() {\n    // TODO: wire up\n}\n").unwrap();
        std::fs::write(tmp.path().join("notes.md"), "todo list\n").unwrap();
        std::fs::create_dir(tmp.path().join("target")).unwrap();
        std::fs::write(tmp.path().join("target").join("out.rs"), "// TODO: generated\n").unwrap();
        tmp
    }

    async fn search(tmp: &TempDir, params: Value) -> Value {
        match SearchFilesTool::new(tmp.path().to_path_buf()).execute(params).await.unwrap() {
            Content::Structured(v) => v,
            Content::Text(t) => panic!("unexpected text: {}", t),
        }
    }

    #[tokio::test]
    async fn test_content_match_skips_build_dirs() {
        let tmp = setup();
        let found = search(&tmp, json!({"pattern": "TODO"})).await;

        assert_eq!(found["total_matches"], json!(1));
        let first = found["matches"][0].as_str().unwrap();
        assert!(first.contains("main.rs:2: // TODO: wire up"));
    }

    #[tokio::test]
    async fn test_case_insensitive() {
        let tmp = setup();
        let found = search(&tmp, json!({"pattern": "todo", "case_insensitive": true})).await;
        assert_eq!(found["total_matches"], json!(2));
    }

    #[tokio::test]
    async fn test_file_name_match() {
        let tmp = setup();
        let found = search(&tmp, json!({"pattern": r"main\.rs$"})).await;
        assert!(found["matches"][0].as_str().unwrap().contains("[file name match]"));
    }

    #[tokio::test]
    async fn test_sub_path_matches_stay_relative_to_root() {
        let tmp = setup();
        let found = search(&tmp, json!({"pattern": "wire", "path": "src"})).await;
        assert_eq!(found["matches"][0], json!("src/main.rs:2: // TODO: wire up"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_dirs_not_followed() {
        let tmp = setup();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("leak.txt"), "TODO: outside\n").unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("link")).unwrap();

        let found = search(&tmp, json!({"pattern": "TODO"})).await;
        assert_eq!(found["total_matches"], json!(1));
    }

    #[tokio::test]
    async fn test_invalid_regex() {
        let tmp = setup();
        let err = SearchFilesTool::new(tmp.path().to_path_buf())
            .execute(json!({"pattern": "("}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid regex"));
    }
}
