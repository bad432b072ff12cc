//! Agent execution loop for the scaffold system.
//!
//! This module implements the bounded tool-calling loop:
//! 1. Send the full transcript and tool schemas to the model
//! 2. Record the assistant message verbatim
//! 3. Stop if the model asked for no tools
//! 4. Otherwise execute each tool call in order and record its result
//! 5. Stop when the turn limit is reached
//!
//! Every step is awaited in sequence; there is one model call in flight and
//! one tool running at a time.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::prompts::{DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_PROMPT};
use super::tools::{parse_arguments, ExecutionContext, ToolRegistry};
use crate::error::LlmError;
use crate::llm::{GenerationRequest, LlmProvider, Message, DEFAULT_MODEL};

/// Default maximum number of model calls per attempt.
pub const DEFAULT_MAX_TURNS: usize = 60;

/// Default location of the API failure log inside the sandbox.
pub const DEFAULT_ERROR_LOG_PATH: &str = "/app/agent_error.log";

/// Configuration for the agent loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum number of turns (model calls) the agent can take.
    pub max_turns: usize,
    /// Model to use for LLM requests.
    pub model: String,
    /// Sampling temperature; the endpoint default when unset.
    pub temperature: Option<f64>,
    /// Maximum tokens per response; the endpoint default when unset.
    pub max_tokens: Option<u32>,
    pub system_prompt: String,
    pub user_prompt: String,
    /// Where API failures are written before the loop stops.
    pub error_log_path: PathBuf,
    /// Working directory, bash timeout and output cap for the tools.
    pub execution: ExecutionContext,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            max_tokens: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            user_prompt: DEFAULT_USER_PROMPT.to_string(),
            error_log_path: PathBuf::from(DEFAULT_ERROR_LOG_PATH),
            execution: ExecutionContext::default(),
        }
    }
}

impl AgentConfig {
    /// Create a new agent configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with the model taken from `OPENAI_MODEL` when set.
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var("OPENAI_MODEL") {
            Ok(model) if !model.trim().is_empty() => config.with_model(model),
            _ => config,
        }
    }

    /// Set the maximum number of turns.
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the temperature for sampling.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the maximum tokens for responses.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_user_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.user_prompt = prompt.into();
        self
    }

    /// Set the API failure log path.
    pub fn with_error_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_log_path = path.into();
        self
    }

    /// Set the tool execution context.
    pub fn with_execution_context(mut self, execution: ExecutionContext) -> Self {
        self.execution = execution;
        self
    }
}

/// Mutable record of one attempt, owned by a single loop invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub sandbox_id: Option<String>,
    pub task_name: Option<String>,
    /// Append-only transcript.
    pub messages: Vec<Message>,
    /// Completed turns.
    pub turn: usize,
    /// Model calls issued, including a failed final one.
    pub model_calls: usize,
}

impl RunState {
    /// Start an attempt with the system and user prompts from `config`.
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            messages: vec![
                Message::system(config.system_prompt.clone()),
                Message::user(config.user_prompt.clone()),
            ],
            ..Self::default()
        }
    }

    pub fn with_sandbox_id(mut self, sandbox_id: impl Into<String>) -> Self {
        self.sandbox_id = Some(sandbox_id.into());
        self
    }

    pub fn with_task_name(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = Some(task_name.into());
        self
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminationReason {
    /// The model answered without requesting tools.
    NaturalCompletion,
    /// `max_turns` model calls were made.
    TurnLimitExceeded,
    /// The model endpoint failed on `turn`.
    ApiError { turn: usize, message: String },
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::NaturalCompletion => "natural_completion",
            TerminationReason::TurnLimitExceeded => "turn_limit_exceeded",
            TerminationReason::ApiError { .. } => "api_error",
        }
    }

    /// Process exit code for the driver.
    pub fn exit_code(&self) -> i32 {
        match self {
            TerminationReason::ApiError { .. } => 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of agent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub reason: TerminationReason,
    /// Number of completed turns.
    pub turns: usize,
    /// Number of model calls issued.
    pub model_calls: usize,
    /// The model's last text when it finished on its own.
    pub final_answer: Option<String>,
    /// Full conversation at termination.
    pub transcript: Vec<Message>,
}

impl AgentOutcome {
    fn finish(state: RunState, reason: TerminationReason, final_answer: Option<String>) -> Self {
        Self {
            reason,
            turns: state.turn,
            model_calls: state.model_calls,
            final_answer,
            transcript: state.messages,
        }
    }

    /// One-line summary for the driver's stdout.
    pub fn summary(&self) -> String {
        format!(
            "Agent finished: reason={} turns={} model_calls={}",
            self.reason, self.turns, self.model_calls
        )
    }
}

/// Write `message` to `path` with a UTC timestamp, replacing any earlier log.
///
/// Failures are logged and otherwise ignored.
pub async fn write_error_log(path: &Path, message: &str) {
    let entry = format!("[{}] {}\n", chrono::Utc::now().to_rfc3339(), message);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to create error log directory");
            return;
        }
    }
    if let Err(e) = tokio::fs::write(path, entry).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to write error log");
    }
}

/// Main agent loop that drives one model through the tools.
pub struct AgentLoop {
    llm_client: Arc<dyn LlmProvider>,
    tool_registry: ToolRegistry,
    config: AgentConfig,
}

impl AgentLoop {
    /// Create a new agent loop with the four default tools.
    pub fn new(llm_client: Arc<dyn LlmProvider>, config: AgentConfig) -> Self {
        Self::with_tools(llm_client, config, ToolRegistry::with_default_tools())
    }

    /// Create an agent loop with a custom tool registry.
    pub fn with_tools(
        llm_client: Arc<dyn LlmProvider>,
        config: AgentConfig,
        tool_registry: ToolRegistry,
    ) -> Self {
        Self {
            llm_client,
            tool_registry,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Fresh run state for this loop's prompts.
    pub fn initial_state(&self) -> RunState {
        RunState::new(&self.config)
    }

    fn build_request(&self, messages: &[Message]) -> GenerationRequest {
        let mut request = GenerationRequest::new(self.config.model.clone(), messages.to_vec())
            .with_tools(self.tool_registry.definitions())
            .with_parallel_tool_calls(false);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }

    async fn next_message(&self, messages: &[Message]) -> Result<Message, LlmError> {
        let response = self.llm_client.generate(self.build_request(messages)).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or(LlmError::EmptyResponse)
    }

    /// Run the loop to termination.
    ///
    /// Never fails: API errors are a termination reason, and tool errors are
    /// fed back to the model as text.
    pub async fn run(&self, mut state: RunState) -> AgentOutcome {
        let ctx = &self.config.execution;

        loop {
            if state.turn >= self.config.max_turns {
                tracing::info!(max_turns = self.config.max_turns, "Turn limit reached");
                return AgentOutcome::finish(state, TerminationReason::TurnLimitExceeded, None);
            }

            state.model_calls += 1;
            let assistant = match self.next_message(&state.messages).await {
                Ok(message) => message,
                Err(e) => {
                    let message = e.to_string();
                    tracing::error!(turn = state.turn, error = %message, "LLM request failed");
                    write_error_log(
                        &self.config.error_log_path,
                        &format!("API error on turn {}: {}", state.turn, message),
                    )
                    .await;
                    let turn = state.turn;
                    return AgentOutcome::finish(
                        state,
                        TerminationReason::ApiError { turn, message },
                        None,
                    );
                }
            };

            let calls = assistant.requested_tool_calls().to_vec();
            let answer = assistant.content_text().map(str::to_string);
            state.messages.push(assistant);

            if calls.is_empty() {
                tracing::info!(turn = state.turn, "Model finished without tool calls");
                state.turn += 1;
                return AgentOutcome::finish(state, TerminationReason::NaturalCompletion, answer);
            }

            for call in &calls {
                let name = call.function.name.as_str();
                let args = parse_arguments(&call.function.arguments);
                tracing::info!(turn = state.turn, tool = name, call_id = %call.id, "Executing tool");

                let result = self.tool_registry.dispatch(name, args, ctx).await;
                if !result.success {
                    tracing::debug!(tool = name, "Tool reported failure");
                }
                state
                    .messages
                    .push(Message::tool_result(call.id.clone(), result.output));
            }

            state.turn += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Choice, GenerationResponse, ToolCallInfo, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedProvider {
        message: Message,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl LlmProvider for FixedProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            *self.calls.lock().unwrap() += 1;
            Ok(GenerationResponse {
                id: "resp".to_string(),
                model: "test".to_string(),
                choices: vec![Choice {
                    index: 0,
                    message: self.message.clone(),
                    finish_reason: None,
                }],
                usage: Usage::default(),
            })
        }
    }

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert_eq!(config.max_turns, 60);
        assert_eq!(config.model, "openai/gpt-4o");
        assert!(config.temperature.is_none());
        assert_eq!(config.error_log_path, PathBuf::from("/app/agent_error.log"));
        assert_eq!(config.execution.max_output_chars, 5_000);
    }

    #[test]
    fn test_agent_config_builder() {
        let config = AgentConfig::new()
            .with_max_turns(5)
            .with_model("gpt-4")
            .with_temperature(0.5)
            .with_max_tokens(8192)
            .with_user_prompt("go");

        assert_eq!(config.max_turns, 5);
        assert_eq!(config.model, "gpt-4");
        assert_eq!(config.temperature, Some(0.5));
        assert_eq!(config.max_tokens, Some(8192));
        assert_eq!(config.user_prompt, "go");
    }

    #[test]
    fn test_run_state_initial_transcript() {
        let state = RunState::new(&AgentConfig::default()).with_task_name("sales");
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].role, crate::llm::Role::System);
        assert_eq!(state.messages[1].role, crate::llm::Role::User);
        assert_eq!(state.turn, 0);
        assert_eq!(state.task_name.as_deref(), Some("sales"));
    }

    #[test]
    fn test_termination_reason_strings() {
        assert_eq!(TerminationReason::NaturalCompletion.as_str(), "natural_completion");
        assert_eq!(TerminationReason::TurnLimitExceeded.to_string(), "turn_limit_exceeded");
        let api = TerminationReason::ApiError {
            turn: 0,
            message: "boom".to_string(),
        };
        assert_eq!(api.as_str(), "api_error");
        assert_eq!(api.exit_code(), 1);
        assert_eq!(TerminationReason::TurnLimitExceeded.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_zero_turns_makes_no_calls() {
        let provider = Arc::new(FixedProvider {
            message: Message::assistant("done"),
            calls: Mutex::new(0),
        });
        let agent = AgentLoop::new(provider.clone(), AgentConfig::new().with_max_turns(0));
        let outcome = agent.run(agent.initial_state()).await;
        assert_eq!(outcome.reason, TerminationReason::TurnLimitExceeded);
        assert_eq!(outcome.model_calls, 0);
        assert_eq!(*provider.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_result_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FixedProvider {
            message: Message::assistant_with_tool_calls(
                None,
                vec![ToolCallInfo::function("call_1", "launch_rockets", "{}")],
            ),
            calls: Mutex::new(0),
        });
        let config = AgentConfig::new()
            .with_max_turns(1)
            .with_execution_context(ExecutionContext::new(dir.path()));
        let agent = AgentLoop::new(provider, config);
        let outcome = agent.run(agent.initial_state()).await;

        assert_eq!(outcome.reason, TerminationReason::TurnLimitExceeded);
        let last = outcome.transcript.last().unwrap();
        assert_eq!(last.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(last.content.as_deref(), Some("Unknown tool: launch_rockets"));
    }

    #[tokio::test]
    async fn test_write_error_log_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("agent_error.log");
        write_error_log(&path, "API error on turn 0: boom").await;
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with('['));
        assert!(written.contains("API error on turn 0: boom"));
    }

    #[test]
    fn test_outcome_summary() {
        let outcome = AgentOutcome {
            reason: TerminationReason::NaturalCompletion,
            turns: 3,
            model_calls: 3,
            final_answer: Some("done".to_string()),
            transcript: vec![],
        };
        assert_eq!(
            outcome.summary(),
            "Agent finished: reason=natural_completion turns=3 model_calls=3"
        );
    }
}
