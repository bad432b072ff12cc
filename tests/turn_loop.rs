//! Turn-loop behaviour against a scripted model.

use async_trait::async_trait;
use data_tasks::llm::{
    Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Role, ToolCallInfo, Usage,
};
use data_tasks::scaffold::{AgentConfig, AgentLoop, ExecutionContext, TerminationReason};
use data_tasks::LlmError;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// What the scripted model does on one call.
enum Reply {
    Message(Message),
    Empty,
    Fail(String),
}

/// Replays `script` in order, then repeats `fallback` forever.
struct ScriptedProvider {
    script: Mutex<VecDeque<Reply>>,
    fallback: Option<Message>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    fn new(script: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn repeating(message: Message) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(message),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn response(message: Message) -> GenerationResponse {
    GenerationResponse {
        id: "resp".to_string(),
        model: "scripted".to_string(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: None,
        }],
        usage: Usage::default(),
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Reply::Message(message)) => Ok(response(message)),
            Some(Reply::Empty) => Ok(GenerationResponse {
                id: "resp".to_string(),
                model: "scripted".to_string(),
                choices: vec![],
                usage: Usage::default(),
            }),
            Some(Reply::Fail(message)) => Err(LlmError::RequestFailed(message)),
            None => match &self.fallback {
                Some(message) => Ok(response(message.clone())),
                None => Err(LlmError::RequestFailed("script exhausted".to_string())),
            },
        }
    }
}

fn tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCallInfo {
    ToolCallInfo::function(id, name, args.to_string())
}

fn config_in(dir: &Path) -> AgentConfig {
    AgentConfig::new()
        .with_error_log_path(dir.join("agent_error.log"))
        .with_execution_context(ExecutionContext::new(dir))
}

#[tokio::test]
async fn test_answer_without_tools_completes_after_one_call() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![Reply::Message(Message::assistant(
        "The report is in /app/submission/.",
    ))]);
    let agent = AgentLoop::new(provider.clone(), config_in(dir.path()));

    let outcome = agent.run(agent.initial_state()).await;

    assert_eq!(outcome.reason, TerminationReason::NaturalCompletion);
    assert_eq!(outcome.model_calls, 1);
    assert_eq!(provider.calls(), 1);
    assert_eq!(
        outcome.final_answer.as_deref(),
        Some("The report is in /app/submission/.")
    );
    assert_eq!(outcome.transcript.len(), 3);
    assert_eq!(outcome.transcript[2].role, Role::Assistant);
}

#[tokio::test]
async fn test_endless_tool_calls_stop_at_turn_limit() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::repeating(Message::assistant_with_tool_calls(
        None,
        vec![tool_call("call", "bash", serde_json::json!({"command": "true"}))],
    ));
    let agent = AgentLoop::new(provider.clone(), config_in(dir.path()).with_max_turns(60));

    let outcome = agent.run(agent.initial_state()).await;

    assert_eq!(outcome.reason, TerminationReason::TurnLimitExceeded);
    assert_eq!(outcome.model_calls, 60);
    assert_eq!(outcome.turns, 60);
    assert_eq!(provider.calls(), 60);
    assert!(outcome.final_answer.is_none());
    // system + user + 60 * (assistant + tool)
    assert_eq!(outcome.transcript.len(), 2 + 60 * 2);
}

#[tokio::test]
async fn test_every_tool_call_answered_before_next_request() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out").join("result.txt");
    let target_str = target.to_string_lossy().into_owned();

    let provider = ScriptedProvider::new(vec![
        Reply::Message(Message::assistant_with_tool_calls(
            Some("Writing and checking.".to_string()),
            vec![
                tool_call(
                    "call_write",
                    "write_file",
                    serde_json::json!({"path": target_str, "content": "hello"}),
                ),
                tool_call("call_read", "read_file", serde_json::json!({"path": target_str})),
                tool_call("call_bad", "read_file", serde_json::json!("not an object")),
            ],
        )),
        Reply::Message(Message::assistant_with_tool_calls(
            None,
            vec![ToolCallInfo::function("call_broken", "bash", "{not json")],
        )),
        Reply::Message(Message::assistant("done")),
    ]);
    let agent = AgentLoop::new(provider.clone(), config_in(dir.path()));

    let outcome = agent.run(agent.initial_state()).await;
    assert_eq!(outcome.reason, TerminationReason::NaturalCompletion);
    assert_eq!(outcome.model_calls, 3);

    let requests = provider.requests();
    assert_eq!(requests.len(), 3);

    // Every assistant tool call in a request's transcript is followed by its result.
    for request in &requests {
        let messages = &request.messages;
        for (i, message) in messages.iter().enumerate() {
            let calls = message.requested_tool_calls();
            for (offset, call) in calls.iter().enumerate() {
                let answer = messages
                    .get(i + 1 + offset)
                    .expect("tool result must follow its call");
                assert_eq!(answer.role, Role::Tool);
                assert_eq!(answer.tool_call_id.as_deref(), Some(call.id.as_str()));
            }
        }
    }

    // Each request resends the full, append-only transcript.
    assert_eq!(requests[0].messages.len(), 2);
    assert_eq!(requests[1].messages.len(), 2 + 1 + 3);
    assert_eq!(requests[2].messages.len(), 2 + 1 + 3 + 1 + 1);
    assert_eq!(requests[1].messages[..2], requests[0].messages[..]);
    assert_eq!(requests[2].messages[..6], requests[1].messages[..]);

    let transcript = &outcome.transcript;
    assert_eq!(
        transcript[3].content.as_deref(),
        Some(format!("Wrote 5 bytes to {}", target_str).as_str())
    );
    assert_eq!(transcript[4].content.as_deref(), Some("hello"));
    assert!(transcript[5]
        .content
        .as_deref()
        .unwrap()
        .starts_with("Error executing read_file: Invalid parameters"));
    assert!(transcript[7]
        .content
        .as_deref()
        .unwrap()
        .starts_with("Error executing bash: Invalid parameters"));
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
}

#[tokio::test]
async fn test_requests_offer_tools_sequentially() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![Reply::Message(Message::assistant("ok"))]);
    let agent = AgentLoop::new(
        provider.clone(),
        config_in(dir.path()).with_model("openai/gpt-4o-mini"),
    );
    agent.run(agent.initial_state()).await;

    let request = &provider.requests()[0];
    assert_eq!(request.model, "openai/gpt-4o-mini");
    assert_eq!(request.parallel_tool_calls, Some(false));
    let tools = request.tools.as_ref().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.function.name.as_str()).collect();
    assert_eq!(names, vec!["bash", "read_file", "write_file", "str_replace"]);

    let body = serde_json::to_value(request).unwrap();
    assert_eq!(body["tool_choice"], "auto");
}

#[tokio::test]
async fn test_api_failure_writes_log_after_one_call() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![Reply::Fail("connection reset".to_string())]);
    let agent = AgentLoop::new(provider.clone(), config_in(dir.path()));

    let outcome = agent.run(agent.initial_state()).await;

    assert!(matches!(
        outcome.reason,
        TerminationReason::ApiError { turn: 0, ref message } if message.contains("connection reset")
    ));
    assert_eq!(outcome.reason.exit_code(), 1);
    assert_eq!(provider.calls(), 1);
    assert_eq!(outcome.model_calls, 1);

    let log = std::fs::read_to_string(dir.path().join("agent_error.log")).unwrap();
    assert!(log.contains("API error on turn 0"));
    assert!(log.contains("connection reset"));
}

#[tokio::test]
async fn test_empty_choices_is_api_error() {
    let dir = tempfile::tempdir().unwrap();
    let provider = ScriptedProvider::new(vec![
        Reply::Message(Message::assistant_with_tool_calls(
            None,
            vec![tool_call("c1", "bash", serde_json::json!({"command": "echo hi"}))],
        )),
        Reply::Empty,
    ]);
    let agent = AgentLoop::new(provider.clone(), config_in(dir.path()));

    let outcome = agent.run(agent.initial_state()).await;

    assert!(matches!(outcome.reason, TerminationReason::ApiError { turn: 1, .. }));
    assert_eq!(provider.calls(), 2);
    assert!(dir.path().join("agent_error.log").is_file());
    assert_eq!(
        outcome.transcript[3].content.as_deref(),
        Some("stdout:\nhi\n\nexit_code: 0")
    );
}

#[tokio::test]
async fn test_str_replace_through_loop() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("analyze.py");
    std::fs::write(&script, "x = 1\ny = 1\n").unwrap();
    let path = script.to_string_lossy().into_owned();

    let provider = ScriptedProvider::new(vec![
        Reply::Message(Message::assistant_with_tool_calls(
            None,
            vec![
                tool_call(
                    "ambiguous",
                    "str_replace",
                    serde_json::json!({"path": path, "old_str": "= 1", "new_str": "= 2"}),
                ),
                tool_call(
                    "unique",
                    "str_replace",
                    serde_json::json!({"path": path, "old_str": "y = 1", "new_str": "y = 2"}),
                ),
            ],
        )),
        Reply::Message(Message::assistant("fixed")),
    ]);
    let agent = AgentLoop::new(provider, config_in(dir.path()));
    let outcome = agent.run(agent.initial_state()).await;

    assert_eq!(
        outcome.transcript[3].content.as_deref(),
        Some(format!("Error: old_str appears 2 times in {} (must be exactly 1)", path).as_str())
    );
    assert_eq!(
        outcome.transcript[4].content.as_deref(),
        Some(format!("Replaced 1 occurrence in {}", path).as_str())
    );
    assert_eq!(std::fs::read_to_string(&script).unwrap(), "x = 1\ny = 2\n");
}
