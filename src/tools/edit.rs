//! Edit tool - replace a unique string in a file

use std::path::PathBuf;
use async_trait::async_trait;
use serde_json::{json, Value};
use crate::agent::Content;
use crate::Result;
use crate::error::Error;
use super::{resolve_path, str_param, Tool};

/// Characters of `old_string` echoed back when it is not found
const NOT_FOUND_PREVIEW: usize = 200;

/// Edit file content by exact, single-occurrence replacement
pub struct EditFileTool {
    root: PathBuf,
}

impl EditFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str { "edit_file" }
    fn description(&self) -> &str {
        "Edit a file by replacing an exact string match. old_string must appear exactly once \
         and must match including all whitespace (tabs, spaces, newlines)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to edit"
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact string to replace, including all whitespace"
                },
                "new_string": {
                    "type": "string",
                    "description": "The replacement string, with proper indentation"
                }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, params: Value) -> Result<Content> {
        let file_path = str_param(&params, "file_path")?;
        let old_string = str_param(&params, "old_string")?;
        let new_string = str_param(&params, "new_string")?;
        let path = resolve_path(&self.root, file_path)?;

        if !path.exists() {
            return Err(Error::Tool(format!("File not found: {}", file_path)));
        }
        if old_string.is_empty() {
            return Err(Error::Tool("old_string must not be empty".to_string()));
        }

        let raw = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Tool(format!("Failed to read {}: {}", file_path, e)))?;
        let content = String::from_utf8(raw)
            .map_err(|_| Error::Tool(format!("Cannot edit binary file: {}", file_path)))?;

        match content.matches(old_string).count() {
            0 => {
                let preview: String = old_string.chars().take(NOT_FOUND_PREVIEW).collect();
                return Err(Error::Tool(format!(
                    "String not found in file. Make sure whitespace (tabs, spaces, newlines) matches exactly. Searched for: {:?}",
                    preview
                )));
            }
            1 => {}
            n => {
                return Err(Error::Tool(format!(
                    "String appears {} times in file. Provide more context to make it unique.",
                    n
                )));
            }
        }

        let updated = content.replacen(old_string, new_string, 1);
        tokio::fs::write(&path, &updated)
            .await
            .map_err(|e| Error::Tool(format!("Failed to write {}: {}", file_path, e)))?;

        Ok(Content::Structured(json!({
            "success": true,
            "path": path.display().to_string(),
            "old_length": old_string.len(),
            "new_length": new_string.len(),
        })))
    }
}
