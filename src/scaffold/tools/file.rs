//! File manipulation tools for reading, writing, and editing files.
//!
//! This module provides three file-related tools:
//! - `ReadFileTool`: Read file contents, capped at the output limit
//! - `WriteFileTool`: Create or overwrite files
//! - `StrReplaceTool`: Replace exactly one occurrence of a string in a file
//!
//! I/O failures are reported as failed [`ToolResult`]s naming the path, so
//! the model can correct itself.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;

use super::{truncate_prefix, ExecutionContext, Tool, ToolError, ToolKind, ToolResult};

/// Characters read past the output cap so a cut is always visible.
const READ_SLACK_CHARS: u64 = 100;

fn parse_params<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidParameters(e.to_string()))
}

// ============================================================================
// ReadFileTool
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct ReadFileParams {
    path: String,
}

/// Tool for reading file contents.
#[derive(Debug, Default)]
pub struct ReadFileTool;

impl ReadFileTool {
    /// Create a new ReadFileTool instance.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn kind(&self) -> ToolKind {
        ToolKind::ReadFile
    }

    fn description(&self) -> &str {
        "Read and return the contents of a file."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute path to the file."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult, ToolError> {
        let params: ReadFileParams = parse_params(args)?;

        match read_prefix(&params.path, ctx.max_output_chars).await {
            Ok(FilePrefix { text, complete: true, .. }) => {
                Ok(ToolResult::success(ctx.truncate(&text)))
            }
            Ok(FilePrefix { text, size, .. }) => Ok(ToolResult::success(truncate_prefix(
                &text,
                ctx.max_output_chars,
                usize::try_from(size).unwrap_or(usize::MAX),
            ))),
            Err(e) => Ok(ToolResult::failure(format!(
                "Error reading {}: {}",
                params.path, e
            ))),
        }
    }
}

/// Leading part of a file, decoded lossily.
struct FilePrefix {
    text: String,
    /// File size in bytes.
    size: u64,
    /// Whether `text` covers the whole file.
    complete: bool,
}

/// Read at most enough bytes for `max_chars` characters (plus slack) of UTF-8.
async fn read_prefix(path: &str, max_chars: usize) -> std::io::Result<FilePrefix> {
    let file = fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let budget = (max_chars as u64).saturating_add(READ_SLACK_CHARS) * 4;

    let mut bytes = Vec::new();
    file.take(budget).read_to_end(&mut bytes).await?;

    Ok(FilePrefix {
        text: String::from_utf8_lossy(&bytes).into_owned(),
        size,
        complete: (bytes.len() as u64) >= size,
    })
}

// ============================================================================
// WriteFileTool
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct WriteFileParams {
    path: String,
    content: String,
}

/// Tool for creating or overwriting files.
#[derive(Debug, Default)]
pub struct WriteFileTool;

impl WriteFileTool {
    /// Create a new WriteFileTool instance.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn kind(&self) -> ToolKind {
        ToolKind::WriteFile
    }

    fn description(&self) -> &str {
        "Create or overwrite a file with the given content. Creates parent directories as needed."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute path to the file."
                },
                "content": {
                    "type": "string",
                    "description": "The content to write."
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolResult, ToolError> {
        let params: WriteFileParams = parse_params(args)?;

        if let Some(parent) = Path::new(&params.path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent).await {
                    return Ok(ToolResult::failure(format!(
                        "Error writing {}: {}",
                        params.path, e
                    )));
                }
            }
        }

        match fs::write(&params.path, params.content.as_bytes()).await {
            Ok(()) => Ok(ToolResult::success(format!(
                "Wrote {} bytes to {}",
                params.content.len(),
                params.path
            ))),
            Err(e) => Ok(ToolResult::failure(format!(
                "Error writing {}: {}",
                params.path, e
            ))),
        }
    }
}

// ============================================================================
// StrReplaceTool
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
struct StrReplaceParams {
    path: String,
    old_str: String,
    new_str: String,
}

/// Tool for replacing exactly one occurrence of a string in a file.
#[derive(Debug, Default)]
pub struct StrReplaceTool;

impl StrReplaceTool {
    /// Create a new StrReplaceTool instance.
    pub fn new() -> Self {
        Self
    }
}

/// Replace the single occurrence of `old` in `content`.
///
/// Returns the occurrence count as the error when it is not exactly one.
fn replace_single(content: &str, old: &str, new: &str) -> Result<String, usize> {
    match content.matches(old).count() {
        1 => Ok(content.replacen(old, new, 1)),
        count => Err(count),
    }
}

#[async_trait]
impl Tool for StrReplaceTool {
    fn kind(&self) -> ToolKind {
        ToolKind::StrReplace
    }

    fn description(&self) -> &str {
        "Replace exactly one occurrence of a string in a file. \
         Fails if the string appears zero or more than one time."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute path to the file."
                },
                "old_str": {
                    "type": "string",
                    "description": "The exact string to find (must appear exactly once)."
                },
                "new_str": {
                    "type": "string",
                    "description": "The replacement string."
                }
            },
            "required": ["path", "old_str", "new_str"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ExecutionContext) -> Result<ToolResult, ToolError> {
        let params: StrReplaceParams = parse_params(args)?;

        if params.old_str.is_empty() {
            return Ok(ToolResult::failure(format!(
                "Error: old_str must not be empty (editing {})",
                params.path
            )));
        }

        let content = match fs::read_to_string(&params.path).await {
            Ok(content) => content,
            Err(e) => {
                return Ok(ToolResult::failure(format!(
                    "Error reading {}: {}",
                    params.path, e
                )))
            }
        };

        let updated = match replace_single(&content, &params.old_str, &params.new_str) {
            Ok(updated) => updated,
            Err(0) => {
                return Ok(ToolResult::failure(format!(
                    "Error: old_str not found in {} (0 occurrences)",
                    params.path
                )))
            }
            Err(count) => {
                return Ok(ToolResult::failure(format!(
                    "Error: old_str appears {} times in {} (must be exactly 1)",
                    count, params.path
                )))
            }
        };

        match fs::write(&params.path, updated.as_bytes()).await {
            Ok(()) => Ok(ToolResult::success(format!(
                "Replaced 1 occurrence in {}",
                params.path
            ))),
            Err(e) => Ok(ToolResult::failure(format!(
                "Error writing {}: {}",
                params.path, e
            ))),
        }
    }
}
