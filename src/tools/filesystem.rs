//! Filesystem tools - read, write, delete, and list files

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::{json, Value};
use crate::agent::Content;
use crate::Result;
use crate::error::Error;
use super::{resolve_path, str_param, Tool, SKIP_DIRS};

const DEFAULT_MAX_DEPTH: usize = 10;

/// Read file contents with line numbers
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str { "read_file" }
    fn description(&self) -> &str {
        "Read the contents of a file. Returns the content with line numbers plus the raw content, \
         preserving exact whitespace for accurate editing."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to read"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, params: Value) -> Result<Content> {
        let file_path = str_param(&params, "file_path")?;
        let path = resolve_path(&self.root, file_path)?;

        if !path.exists() {
            return Err(Error::Tool(format!("File not found: {}", file_path)));
        }
        if !path.is_file() {
            return Err(Error::Tool(format!("Not a file: {}", file_path)));
        }

        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Tool(format!("Failed to read {}: {}", file_path, e)))?;
        let content = String::from_utf8(raw)
            .map_err(|_| Error::Tool(format!("Cannot read binary file: {}", file_path)))?;

        let lines: Vec<&str> = content.split('\n').collect();
        let numbered = lines
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:4} | {}", i + 1, line))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Content::Structured(json!({
            "content": numbered,
            "raw_content": content,
            "path": path.display().to_string(),
            "lines": lines.len(),
        })))
    }
}

/// Write content to a file
pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str { "write_file" }
    fn description(&self) -> &str {
        "Write content to a file, creating it (and parent directories) if needed or overwriting it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write (preserve exact indentation)"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    async fn execute(&self, params: Value) -> Result<Content> {
        let file_path = str_param(&params, "file_path")?;
        let content = str_param(&params, "content")?;
        let path = resolve_path(&self.root, file_path)?;

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Tool(format!("Failed to create directory: {}", e)))?;
        }

        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Error::Tool(format!("Failed to write {}: {}", file_path, e)))?;

        Ok(Content::Structured(json!({
            "success": true,
            "path": path.display().to_string(),
            "bytes_written": content.len(),
        })))
    }
}

/// Delete a single file
pub struct DeleteFileTool {
    root: PathBuf,
}

impl DeleteFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str { "delete_file" }
    fn description(&self) -> &str {
        "Delete a file. Directories are not removed by this tool."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to delete"
                }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, params: Value) -> Result<Content> {
        let file_path = str_param(&params, "file_path")?;
        let path = resolve_path(&self.root, file_path)?;

        if !path.exists() {
            return Err(Error::Tool(format!("File not found: {}", file_path)));
        }
        if !path.is_file() {
            return Err(Error::Tool(format!(
                "Not a file (directories cannot be deleted): {}",
                file_path
            )));
        }

        let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| Error::Tool(format!("Failed to delete {}: {}", file_path, e)))?;

        tracing::debug!("Deleted {:?} ({} bytes)", path, size);

        Ok(Content::Structured(json!({
            "success": true,
            "path": path.display().to_string(),
            "message": format!("Deleted {} ({})", file_name(&path), format_size(size)),
        })))
    }
}

/// Directory tree with sizes and modification dates
pub struct ListDirectoryTool {
    root: PathBuf,
}

impl ListDirectoryTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str { "list_directory" }
    fn description(&self) -> &str {
        "Show the directory structure as a tree with file sizes and dates (like ls -la). \
         Skips dependency, build and VCS directories such as node_modules, target and .git."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dir_path": {
                    "type": "string",
                    "description": "Directory to list (defaults to the working directory)",
                    "default": "."
                },
                "max_depth": {
                    "type": "integer",
                    "description": "Maximum depth to traverse (default 10)",
                    "default": DEFAULT_MAX_DEPTH
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: Value) -> Result<Content> {
        let dir_path = params.get("dir_path").and_then(|v| v.as_str()).unwrap_or(".");
        let max_depth = params
            .get("max_depth")
            .and_then(|v| v.as_u64())
            .map(|d| d as usize)
            .unwrap_or(DEFAULT_MAX_DEPTH);

        let path = resolve_path(&self.root, dir_path)?;
        if !path.exists() {
            return Err(Error::Tool(format!("Directory not found: {}", dir_path)));
        }
        if !path.is_dir() {
            return Err(Error::Tool(format!("Not a directory: {}", dir_path)));
        }

        let tree = tokio::task::spawn_blocking(move || build_tree(&path, max_depth))
            .await
            .map_err(|e| Error::Tool(format!("Listing task failed: {}", e)))?;

        Ok(Content::Structured(json!({
            "path": tree.path,
            "tree": tree.lines.join("\n"),
            "total_files": tree.files,
            "total_dirs": tree.dirs,
        })))
    }
}

struct Tree {
    path: String,
    lines: Vec<String>,
    files: usize,
    dirs: usize,
}

fn build_tree(path: &Path, max_depth: usize) -> Tree {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let mut tree = Tree {
        path: path.display().to_string(),
        lines: vec![format!("{}/", name), "=".repeat(60)],
        files: 0,
        dirs: 0,
    };

    add_entries(path, "", 0, max_depth, &mut tree);

    tree.lines.push("=".repeat(60));
    tree.lines.push(format!("Total: {} files, {} directories", tree.files, tree.dirs));
    tree
}

fn add_entries(dir: &Path, prefix: &str, depth: usize, max_depth: usize, tree: &mut Tree) {
    if depth >= max_depth {
        return;
    }

    let Ok(read) = std::fs::read_dir(dir) else {
        return;
    };

    let mut items: Vec<PathBuf> = read
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| !(p.is_dir() && is_skipped_dir(p)))
        .collect();
    items.sort_by_key(|p| (p.is_file(), file_name(p).to_lowercase()));

    let count = items.len();
    for (i, item) in items.iter().enumerate() {
        let last = i + 1 == count;
        let connector = if last { "└── " } else { "├── " };
        tree.lines.push(format_entry(item, prefix, connector));

        if item.is_dir() {
            tree.dirs += 1;
            let extension = if last { "    " } else { "│   " };
            add_entries(item, &format!("{}{}", prefix, extension), depth + 1, max_depth, tree);
        } else {
            tree.files += 1;
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Hidden directories and well-known vendored/build directories
pub(crate) fn is_skipped_dir(path: &Path) -> bool {
    let name = file_name(path);
    name.starts_with('.') || SKIP_DIRS.contains(&name.to_lowercase().as_str())
}

fn format_entry(item: &Path, prefix: &str, connector: &str) -> String {
    let display = if item.is_dir() {
        format!("{}/", file_name(item))
    } else {
        file_name(item)
    };

    match std::fs::metadata(item) {
        Ok(meta) => {
            let size = if meta.is_file() {
                format_size(meta.len())
            } else {
                "<DIR>".to_string()
            };
            let date = meta
                .modified()
                .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|_| "????-??-?? ??:??".to_string());
            format!("{}{}{:>8}  {}  {}", prefix, connector, size, date, display)
        }
        Err(_) => format!("{}{}{:>8}  {}  {}", prefix, connector, "???", "????-??-?? ??:??", display),
    }
}

fn format_size(size: u64) -> String {
    const KB: f64 = 1024.0;
    let size_f = size as f64;
    if size < 1024 {
        format!("{}B", size)
    } else if size_f < KB * KB {
        format!("{:.1}K", size_f / KB)
    } else if size_f < KB * KB * KB {
        format!("{:.1}M", size_f / (KB * KB))
    } else {
        format!("{:.1}G", size_f / (KB * KB * KB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn structured(content: Content) -> Value {
        match content {
            Content::Structured(v) => v,
            Content::Text(t) => panic!("expected structured content, got {}", t),
        }
    }

    #[tokio::test]
    async fn test_read_write_file() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_path_buf();

        let written = structured(
            WriteFileTool::new(root.clone())
                .execute(json!({"file_path": "nested/test.txt", "content": "Hello,\n\tWorld!"}))
                .await
                .unwrap(),
        );
        assert_eq!(written["bytes_written"], json!(14));

        let read = structured(
            ReadFileTool::new(root)
                .execute(json!({"file_path": "nested/test.txt"}))
                .await
                .unwrap(),
        );
        assert_eq!(read["raw_content"], json!("Hello,\n\tWorld!"));
        assert_eq!(read["lines"], json!(2));
        assert!(read["content"].as_str().unwrap().contains("   2 | \tWorld!"));
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = ReadFileTool::new(tmp.path().to_path_buf())
            .execute(json!({"file_path": "nope.txt"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn test_write_outside_root_denied() {
        let tmp = TempDir::new().unwrap();
        let err = WriteFileTool::new(tmp.path().to_path_buf())
            .execute(json!({"file_path": "../escape.txt", "content": "x"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_through_symlink_out_of_root_denied() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "top secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("link")).unwrap();

        let err = ReadFileTool::new(root.path().to_path_buf())
            .execute(json!({"file_path": "link/secret.txt"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }

    #[tokio::test]
    async fn test_delete_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("old.txt"), "12345").unwrap();
        let tool = DeleteFileTool::new(tmp.path().to_path_buf());

        let deleted = structured(tool.execute(json!({"file_path": "old.txt"})).await.unwrap());
        assert_eq!(deleted["success"], json!(true));
        assert!(deleted["message"].as_str().unwrap().contains("old.txt (5B)"));
        assert!(!tmp.path().join("old.txt").exists());

        let err = tool.execute(json!({"file_path": "old.txt"})).await.unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }

    #[tokio::test]
    async fn test_delete_refuses_directories_and_escapes() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("keep")).unwrap();
        let tool = DeleteFileTool::new(tmp.path().join("keep"));
        std::fs::write(tmp.path().join("sibling.txt"), "").unwrap();

        let err = tool.execute(json!({"file_path": "."})).await.unwrap_err();
        assert!(err.to_string().contains("Not a file"));
        assert!(tmp.path().join("keep").is_dir());

        let err = tool.execute(json!({"file_path": "../sibling.txt"})).await.unwrap_err();
        assert!(err.to_string().contains("Access denied"));
        assert!(tmp.path().join("sibling.txt").exists());
    }

    #[tokio::test]
    async fn test_list_directory() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "12345").unwrap();
        std::fs::create_dir(tmp.path().join("subdir")).unwrap();
        std::fs::write(tmp.path().join("subdir").join("c.rs"), "fn main() {}").unwrap();
        std::fs::create_dir(tmp.path().join("node_modules")).unwrap();
        std::fs::write(tmp.path().join("node_modules").join("dep.js"), "").unwrap();

        let listing = structured(
            ListDirectoryTool::new(tmp.path().to_path_buf())
                .execute(json!({}))
                .await
                .unwrap(),
        );
        let tree = listing["tree"].as_str().unwrap();

        assert!(tree.contains("a.txt"));
        assert!(tree.contains("subdir/"));
        assert!(tree.contains("c.rs"));
        assert!(!tree.contains("node_modules"));
        assert_eq!(listing["total_files"], json!(3));
        assert_eq!(listing["total_dirs"], json!(1));
        // Directories sort before files
        assert!(tree.find("subdir/").unwrap() < tree.find("a.txt").unwrap());
    }

    #[tokio::test]
    async fn test_list_directory_depth_limit() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("one").join("two")).unwrap();
        std::fs::write(tmp.path().join("one").join("two").join("deep.txt"), "").unwrap();

        let listing = structured(
            ListDirectoryTool::new(tmp.path().to_path_buf())
                .execute(json!({"max_depth": 1}))
                .await
                .unwrap(),
        );
        assert!(!listing["tree"].as_str().unwrap().contains("two/"));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0K");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0M");
    }
}
