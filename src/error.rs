//! Error types for data-tasks operations.
//!
//! Defines error types for the major subsystems:
//! - LLM API interactions
//! - Sandbox command execution and file transfer
//! - Task loading from the dataset directory
//! - Sandbox provisioning

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("LLM response contained no choices")]
    EmptyResponse,

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur while talking to a sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox '{id}' not found")]
    NotFound { id: String },

    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Failed to create sandbox: {0}")]
    CreateFailed(String),

    #[error("Command execution failed: {0}")]
    ExecFailed(String),

    #[error("Command timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Failed to upload '{local}' to '{remote}': {reason}")]
    UploadFailed {
        local: PathBuf,
        remote: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while loading tasks from a dataset directory.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Dataset directory '{0}' does not exist")]
    DatasetNotFound(PathBuf),

    #[error("Task '{name}' not found under '{dataset}'")]
    TaskNotFound { name: String, dataset: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort sandbox provisioning.
///
/// Only conditions that leave the sandbox unable to run the driver are
/// represented here; everything else degrades to a logged warning.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Failed to install driver program at '{remote}': {source}")]
    DriverUpload {
        remote: String,
        #[source]
        source: SandboxError,
    },

    #[error("Driver program '{0}' does not exist on the host")]
    DriverMissing(PathBuf),
}
