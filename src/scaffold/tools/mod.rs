//! Tool definitions and dispatch for the turn loop.
//!
//! The agent has exactly four tools. [`ToolKind`] is the closed set of their
//! names and [`ToolRegistry`] is the ordered table mapping each kind to its
//! implementation. Dispatch never fails: unknown tools, malformed arguments
//! and execution errors all come back as text the model can react to.

pub mod bash;
pub mod file;

pub use bash::BashTool;
pub use file::{ReadFileTool, StrReplaceTool, WriteFileTool};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;

use crate::llm::ToolDefinition;

/// Default cap on characters returned by a single tool stream.
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 5_000;

/// Default timeout for the bash tool.
pub const DEFAULT_BASH_TIMEOUT: Duration = Duration::from_secs(300);

const TRUNCATION_PREFIX: &str = "\n[...TRUNCATED at ";

/// Errors that can occur during tool execution.
///
/// These never reach the model as errors; the registry renders them as text.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Invalid parameters provided to the tool.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Tool execution failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Tool execution timed out.
    #[error("Execution timed out after {seconds} seconds")]
    Timeout { seconds: u64 },
}

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool did what was asked.
    pub success: bool,
    /// Text returned to the model.
    pub output: String,
}

impl ToolResult {
    /// Create a successful tool result.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    /// Create a failed tool result; `output` is the error text shown to the model.
    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Context for tool execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Working directory for shell commands.
    pub working_dir: PathBuf,
    /// Timeout applied to each bash call.
    pub bash_timeout: Duration,
    /// Character cap for each returned stream.
    pub max_output_chars: usize,
}

impl ExecutionContext {
    /// Create a new execution context.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            bash_timeout: DEFAULT_BASH_TIMEOUT,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }

    /// Set the bash timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.bash_timeout = timeout;
        self
    }

    /// Set the output cap.
    pub fn with_max_output_chars(mut self, max: usize) -> Self {
        self.max_output_chars = max;
        self
    }

    /// Truncate `text` to this context's output cap.
    pub fn truncate(&self, text: &str) -> String {
        truncate_output(text, self.max_output_chars)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(".")
    }
}

/// The closed set of tools offered to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Bash,
    ReadFile,
    WriteFile,
    StrReplace,
}

impl ToolKind {
    /// All tools, in declaration order.
    pub const ALL: [ToolKind; 4] = [
        ToolKind::Bash,
        ToolKind::ReadFile,
        ToolKind::WriteFile,
        ToolKind::StrReplace,
    ];

    /// Wire name of the tool.
    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Bash => "bash",
            ToolKind::ReadFile => "read_file",
            ToolKind::WriteFile => "write_file",
            ToolKind::StrReplace => "str_replace",
        }
    }

    /// Look up a tool by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Trait for tools that can be executed by the agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Which of the fixed tools this is.
    fn kind(&self) -> ToolKind;

    /// Returns a description of what the tool does.
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments and context.
    ///
    /// Expected failures (missing file, ambiguous replacement) are returned as
    /// `Ok(ToolResult::failure(..))`; `Err` is reserved for bad arguments and
    /// timeouts.
    async fn execute(&self, args: Value, ctx: &ExecutionContext) -> Result<ToolResult, ToolError>;

    /// Declaration sent to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            self.kind().name(),
            self.description(),
            self.parameters_schema(),
        )
    }
}

/// Ordered lookup table from [`ToolKind`] to implementation.
pub struct ToolRegistry {
    tools: Vec<(ToolKind, Arc<dyn Tool>)>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Create a registry with the four agent tools.
    pub fn with_default_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BashTool::new()));
        registry.register(Arc::new(ReadFileTool::new()));
        registry.register(Arc::new(WriteFileTool::new()));
        registry.register(Arc::new(StrReplaceTool::new()));
        registry
    }

    /// Register a tool, replacing any existing tool of the same kind.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let kind = tool.kind();
        match self.tools.iter_mut().find(|(k, _)| *k == kind) {
            Some(slot) => slot.1 = tool,
            None => self.tools.push((kind, tool)),
        }
    }

    /// Get a tool by kind.
    pub fn get(&self, kind: ToolKind) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, tool)| Arc::clone(tool))
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool declarations for the LLM request, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|(_, tool)| tool.definition()).collect()
    }

    /// Run the tool called `name` and always produce a textual result.
    pub async fn dispatch(&self, name: &str, args: Value, ctx: &ExecutionContext) -> ToolResult {
        let Some(tool) = ToolKind::from_name(name).and_then(|kind| self.get(kind)) else {
            return ToolResult::failure(format!("Unknown tool: {}", name));
        };

        match tool.execute(args, ctx).await {
            Ok(result) => result,
            Err(e) => ToolResult::failure(format!("Error executing {}: {}", name, e)),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a tool call's raw argument string.
///
/// Anything that is not a JSON object becomes an empty object, so the tool
/// reports the missing parameters instead of the turn aborting.
pub fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(serde_json::Map::new()),
    }
}

fn truncation_marker(limit: usize, total: usize) -> String {
    format!(
        "{}{} chars, output was {} chars total]",
        TRUNCATION_PREFIX, limit, total
    )
}

fn marker_regex() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| {
            Regex::new(r"^\n\[\.\.\.TRUNCATED at (\d+) chars, output was (\d+) chars total\]$").ok()
        })
        .as_ref()
}

/// True if `text` is already `limit` chars followed by a marker for `limit`.
fn is_truncated_at(text: &str, limit: usize) -> bool {
    let Some(idx) = text.rfind(TRUNCATION_PREFIX) else {
        return false;
    };
    let (head, marker) = text.split_at(idx);
    if head.chars().count() != limit {
        return false;
    }
    marker_regex()
        .and_then(|re| re.captures(marker))
        .and_then(|caps| caps[1].parse::<usize>().ok())
        == Some(limit)
}

/// Cap `text` at `limit` characters with a marker naming `total`, the length of
/// the full source when `text` is only a prefix of it.
pub fn truncate_prefix(text: &str, limit: usize, total: usize) -> String {
    let head: String = text.chars().take(limit).collect();
    head + &truncation_marker(limit, total)
}

/// Cap `text` at `limit` characters, appending a marker with the original length.
///
/// Applying this twice with the same limit yields the same string.
pub fn truncate_output(text: &str, limit: usize) -> String {
    let total = text.chars().count();
    if total <= limit || is_truncated_at(text, limit) {
        return text.to_string();
    }
    truncate_prefix(text, limit, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_constructors() {
        let ok = ToolResult::success("output text");
        assert!(ok.success);
        assert_eq!(ok.output, "output text");

        let err = ToolResult::failure("Error: boom");
        assert!(!err.success);
        assert_eq!(err.output, "Error: boom");
    }

    #[test]
    fn test_execution_context_defaults() {
        let ctx = ExecutionContext::new("/app");
        assert_eq!(ctx.working_dir, PathBuf::from("/app"));
        assert_eq!(ctx.bash_timeout, Duration::from_secs(300));
        assert_eq!(ctx.max_output_chars, 5_000);

        let ctx = ctx
            .with_timeout(Duration::from_secs(5))
            .with_max_output_chars(10);
        assert_eq!(ctx.bash_timeout, Duration::from_secs(5));
        assert_eq!(ctx.max_output_chars, 10);
    }

    #[test]
    fn test_tool_kind_names() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("edit_file"), None);
        assert_eq!(ToolKind::StrReplace.to_string(), "str_replace");
    }

    #[test]
    fn test_registry_with_default_tools() {
        let registry = ToolRegistry::with_default_tools();
        assert_eq!(registry.len(), 4);
        for kind in ToolKind::ALL {
            assert!(registry.get(kind).is_some());
        }
    }

    #[test]
    fn test_registry_register_replaces_same_kind() {
        let mut registry = ToolRegistry::with_default_tools();
        registry.register(Arc::new(BashTool::new()));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_definitions_order_and_shape() {
        let registry = ToolRegistry::with_default_tools();
        let defs = registry.definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.function.name.as_str()).collect();
        assert_eq!(names, vec!["bash", "read_file", "write_file", "str_replace"]);
        for def in &defs {
            assert_eq!(def.tool_type, "function");
            assert_eq!(def.function.parameters["type"], "object");
            assert!(def.function.parameters["required"].is_array());
        }
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let registry = ToolRegistry::with_default_tools();
        let ctx = ExecutionContext::default();
        let result = registry
            .dispatch("rm_rf", serde_json::json!({}), &ctx)
            .await;
        assert!(!result.success);
        assert_eq!(result.output, "Unknown tool: rm_rf");
    }

    #[tokio::test]
    async fn test_dispatch_missing_arguments_is_textual() {
        let registry = ToolRegistry::with_default_tools();
        let ctx = ExecutionContext::default();
        let result = registry
            .dispatch("bash", parse_arguments("{not json"), &ctx)
            .await;
        assert!(!result.success);
        assert!(result.output.starts_with("Error executing bash: Invalid parameters"));
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(
            parse_arguments(r#"{"path": "/app/a.py"}"#)["path"],
            "/app/a.py"
        );
        assert_eq!(parse_arguments("not json"), serde_json::json!({}));
        assert_eq!(parse_arguments("[1, 2]"), serde_json::json!({}));
        assert_eq!(parse_arguments(""), serde_json::json!({}));
    }

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate_output("hello", 5), "hello");
        assert_eq!(truncate_output("", 0), "");
    }

    #[test]
    fn test_truncate_long_text_has_marker() {
        let text = "a".repeat(12);
        let out = truncate_output(&text, 5);
        assert_eq!(
            out,
            "aaaaa\n[...TRUNCATED at 5 chars, output was 12 chars total]"
        );
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let text = "é".repeat(6);
        let out = truncate_output(&text, 4);
        assert!(out.starts_with("éééé\n[...TRUNCATED at 4 chars"));
        assert!(out.contains("output was 6 chars total"));
    }

    #[test]
    fn test_truncate_is_idempotent() {
        let text = "line\n".repeat(50);
        let once = truncate_output(&text, 17);
        let twice = truncate_output(&once, 17);
        assert_eq!(once, twice);
        assert_eq!(twice.matches("TRUNCATED").count(), 1);
    }

    #[test]
    fn test_truncate_different_cap_still_applies() {
        let once = truncate_output(&"x".repeat(100), 50);
        let again = truncate_output(&once, 10);
        assert!(again.starts_with(&"x".repeat(10)));
        assert!(again.contains("TRUNCATED at 10 chars"));
    }
}
