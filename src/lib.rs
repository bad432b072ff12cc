//! data-tasks: sandboxed data-analysis tasks driven by a tool-calling LLM agent.
//!
//! This library provisions one sandbox per task (runtime image, packages,
//! generated data, driver program) and runs a bounded multi-turn agent loop
//! whose artifacts are graded by the task's own verifier.

pub mod cli;
pub mod error;
pub mod llm;
pub mod runner;
pub mod scaffold;

// Re-export commonly used error types
pub use error::{LlmError, ProvisionError, SandboxError, TaskError};
