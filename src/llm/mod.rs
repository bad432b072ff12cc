//! LLM integration for data-tasks.
//!
//! The turn loop depends only on the [`LlmProvider`] trait; [`LiteLlmClient`]
//! is the HTTP implementation for any OpenAI-compatible chat-completions
//! endpoint (OpenAI, OpenRouter, a LiteLLM proxy).
//!
//! ```ignore
//! use data_tasks::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello!")]);
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub use litellm::{
    Choice, FunctionCall, FunctionDefinition, GenerationRequest, GenerationResponse,
    LiteLlmClient, LlmProvider, Message, Role, ToolCallInfo, ToolChoice, ToolDefinition, Usage,
    DEFAULT_API_BASE, DEFAULT_MODEL,
};
