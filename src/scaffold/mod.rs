//! Scaffold system for agent execution.
//!
//! The scaffold gives the model four tools and drives the turn loop:
//! 1. Send the transcript to the model
//! 2. Record the assistant message
//! 3. Execute requested tools, in order
//! 4. Record each result against its call id
//! 5. Check termination
//!
//! # Example
//!
//! ```ignore
//! use data_tasks::scaffold::{AgentConfig, AgentLoop};
//! use data_tasks::llm::LiteLlmClient;
//!
//! let llm_client = Arc::new(LiteLlmClient::from_env()?);
//! let agent = AgentLoop::new(llm_client, AgentConfig::from_env());
//! let outcome = agent.run(agent.initial_state()).await;
//! println!("{}", outcome.summary());
//! ```

pub mod agent_loop;
pub mod prompts;
pub mod tools;

pub use agent_loop::{
    write_error_log, AgentConfig, AgentLoop, AgentOutcome, RunState, TerminationReason,
    DEFAULT_ERROR_LOG_PATH, DEFAULT_MAX_TURNS,
};
pub use prompts::{build_system_prompt, DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_PROMPT};
pub use tools::{
    truncate_output, BashTool, ExecutionContext, ReadFileTool, StrReplaceTool, Tool, ToolError,
    ToolKind, ToolRegistry, ToolResult, WriteFileTool,
};
