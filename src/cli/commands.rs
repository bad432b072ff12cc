//! CLI command definitions for data-tasks.
//!
//! The same binary is both the orchestrator (`list`, `resolve-image`,
//! `provision`, `attempt`) and the driver uploaded into each sandbox
//! (`run`, launched as `<workdir>/agent run`).

use crate::llm::{LiteLlmClient, DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::runner::{
    discover_tasks, resolve_image, DockerSandboxClient, ImageResolution, ProvisionConfig,
    RunConfig, SandboxClient, TaskDescriptor, TaskProvisioner, TaskRunner, DEFAULT_DATASET_PATH,
    DEFAULT_DOCKER_IMAGE, DEFAULT_WORKDIR,
};
use crate::scaffold::prompts::TURN_LIMIT_NOTICE;
use crate::scaffold::{
    build_system_prompt, write_error_log, AgentConfig, AgentLoop, ExecutionContext,
    TerminationReason, DEFAULT_ERROR_LOG_PATH, DEFAULT_MAX_TURNS, DEFAULT_USER_PROMPT,
};
use anyhow::Context;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Exit code when the wall-clock ceiling of `run` fires.
const EXIT_TIMEOUT: u8 = 2;

/// Sandboxed data-analysis tasks driven by an LLM agent.
#[derive(Parser)]
#[command(name = "data-tasks")]
#[command(about = "Provision sandboxes for data tasks and drive an LLM agent through them")]
#[command(version)]
#[command(
    long_about = "data-tasks prepares a sandbox per task (packages, generated data, driver) and runs a bounded tool-calling agent inside it.\n\nExample usage:\n  data-tasks list --dataset ./tasks\n  data-tasks attempt --dataset ./tasks --tasks sales-forecast\n  data-tasks run --max-turns 60"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// List the tasks in a dataset.
    #[command(alias = "ls")]
    List(ListArgs),

    /// Print the runtime image a task resolves to.
    ResolveImage(ResolveImageArgs),

    /// Provision an existing Docker container for a task.
    Provision(ProvisionArgs),

    /// Run the agent loop in the current environment (the sandbox driver).
    #[command(alias = "agent")]
    Run(RunArgs),

    /// Run full attempts: create sandbox, provision, launch the driver, tear down.
    Attempt(AttemptArgs),
}

/// Arguments for `data-tasks list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Dataset directory with one sub-directory per task.
    #[arg(short, long, default_value = DEFAULT_DATASET_PATH)]
    pub dataset: PathBuf,

    /// Comma-separated task names to restrict to.
    #[arg(short, long, value_delimiter = ',')]
    pub tasks: Option<Vec<String>>,

    /// Default image for tasks without an override.
    #[arg(long, default_value = DEFAULT_DOCKER_IMAGE)]
    pub default_image: String,

    /// Output JSON instead of a table.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `data-tasks resolve-image`.
#[derive(Parser, Debug)]
pub struct ResolveImageArgs {
    /// Task name.
    pub task: String,

    #[arg(short, long, default_value = DEFAULT_DATASET_PATH)]
    pub dataset: PathBuf,

    #[arg(long, default_value = DEFAULT_DOCKER_IMAGE)]
    pub default_image: String,
}

/// Arguments for `data-tasks provision`.
#[derive(Parser, Debug)]
pub struct ProvisionArgs {
    /// Task name.
    #[arg(long, env = "TASK_NAME")]
    pub task: String,

    /// Id or name of a running container.
    #[arg(long, env = "SANDBOX_ID")]
    pub sandbox_id: String,

    #[arg(short, long, default_value = DEFAULT_DATASET_PATH)]
    pub dataset: PathBuf,

    /// Working directory inside the sandbox.
    #[arg(long, default_value = DEFAULT_WORKDIR)]
    pub workdir: String,

    /// Driver program to upload (defaults to this executable).
    #[arg(long)]
    pub driver: Option<PathBuf>,

    /// Extra driver environment, as KEY=VALUE. Never overwritten by defaults.
    #[arg(short, long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Output the provisioning report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `data-tasks run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Model identifier.
    #[arg(short, long, env = "OPENAI_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// API key for the chat-completions endpoint.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of the chat-completions endpoint.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_API_BASE)]
    pub base_url: String,

    /// Maximum number of model calls.
    #[arg(long, default_value_t = DEFAULT_MAX_TURNS)]
    pub max_turns: usize,

    /// Hard ceiling on the whole run, in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Timeout for each bash tool call, in seconds.
    #[arg(long, default_value = "300")]
    pub bash_timeout_secs: u64,

    /// Character cap on each tool output stream.
    #[arg(long, default_value = "5000")]
    pub max_output_chars: usize,

    /// Working directory for tools; the default system prompt points here.
    #[arg(long, default_value = DEFAULT_WORKDIR)]
    pub workdir: PathBuf,

    /// Where API failures and timeouts are logged.
    #[arg(long, default_value = DEFAULT_ERROR_LOG_PATH)]
    pub error_log: PathBuf,

    /// File whose content replaces the default system prompt.
    #[arg(long)]
    pub system_prompt_file: Option<PathBuf>,

    /// Initial user message.
    #[arg(long, default_value = DEFAULT_USER_PROMPT)]
    pub user_prompt: String,

    /// Write the final transcript as JSON to this path.
    #[arg(long)]
    pub transcript_out: Option<PathBuf>,

    #[arg(long, env = "TASK_NAME")]
    pub task: Option<String>,

    #[arg(long, env = "SANDBOX_ID")]
    pub sandbox_id: Option<String>,
}

/// Arguments for `data-tasks attempt`.
#[derive(Parser, Debug)]
pub struct AttemptArgs {
    #[arg(short, long, default_value = DEFAULT_DATASET_PATH)]
    pub dataset: PathBuf,

    /// Comma-separated task names (default: all tasks).
    #[arg(short, long, value_delimiter = ',')]
    pub tasks: Option<Vec<String>>,

    #[arg(long, default_value = DEFAULT_DOCKER_IMAGE)]
    pub default_image: String,

    #[arg(long, default_value = DEFAULT_WORKDIR)]
    pub workdir: String,

    #[arg(long, default_value = "2")]
    pub cpus: f64,

    #[arg(long, default_value = "4096")]
    pub memory_mb: u64,

    /// Ceiling on each driver run, in seconds.
    #[arg(long, default_value = "3600")]
    pub driver_timeout_secs: u64,

    /// Driver program to upload (defaults to this executable).
    #[arg(long)]
    pub driver: Option<PathBuf>,

    /// Extra driver environment, as KEY=VALUE.
    #[arg(short, long = "env", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Leave sandboxes running afterwards.
    #[arg(long)]
    pub keep: bool,

    /// Output one JSON object per attempt.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Parse a `KEY=VALUE` pair.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<ExitCode> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::List(args) => run_list_command(args).map(|_| ExitCode::SUCCESS),
        Commands::ResolveImage(args) => run_resolve_image_command(args).map(|_| ExitCode::SUCCESS),
        Commands::Provision(args) => run_provision_command(args).await.map(|_| ExitCode::SUCCESS),
        Commands::Run(args) => run_agent_command(args).await,
        Commands::Attempt(args) => run_attempt_command(args).await,
    }
}

fn describe_resolution(resolution: &ImageResolution) -> String {
    match resolution {
        ImageResolution::Declared { image } => format!("{} (task.toml)", image),
        ImageResolution::Default { image, reason } => {
            format!("{} (default: {})", image, reason.as_str())
        }
    }
}

fn run_list_command(args: ListArgs) -> anyhow::Result<()> {
    let tasks = discover_tasks(&args.dataset, args.tasks.as_deref())?;

    if args.json {
        let entries: Vec<serde_json::Value> = tasks
            .iter()
            .map(|task| {
                serde_json::json!({
                    "name": task.name,
                    "dir": task.dir,
                    "image": resolve_image(&task.dir, &args.default_image),
                    "has_prepare_script": task.prepare_script().is_some(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for task in &tasks {
        let resolution = resolve_image(&task.dir, &args.default_image);
        let data = if task.prepare_script().is_some() {
            "prepare_data.py"
        } else {
            "-"
        };
        println!("{:<32} {:<16} {}", task.name, data, describe_resolution(&resolution));
    }
    info!(count = tasks.len(), dataset = %args.dataset.display(), "Listed tasks");
    Ok(())
}

fn run_resolve_image_command(args: ResolveImageArgs) -> anyhow::Result<()> {
    let task = TaskDescriptor::load(&args.dataset, &args.task)?;
    let resolution = resolve_image(&task.dir, &args.default_image);
    println!("{}", describe_resolution(&resolution));
    Ok(())
}

fn provision_config(driver: Option<PathBuf>, workdir: &str) -> anyhow::Result<ProvisionConfig> {
    let config = match driver {
        Some(path) => ProvisionConfig::new(path),
        None => ProvisionConfig::for_current_exe().context("Failed to locate the current executable")?,
    };
    Ok(config.with_workdir(workdir))
}

async fn run_provision_command(args: ProvisionArgs) -> anyhow::Result<()> {
    let task = TaskDescriptor::load(&args.dataset, &args.task)?;
    let client: Arc<dyn SandboxClient> = Arc::new(DockerSandboxClient::new()?);
    let provisioner = TaskProvisioner::new(client, provision_config(args.driver, &args.workdir)?);

    let caller_env: BTreeMap<String, String> = args.env.into_iter().collect();
    let report = provisioner
        .provision(&args.sandbox_id, &task, &caller_env)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (step, outcome) in &report.steps {
            println!("{:?}: {:?}", step, outcome);
        }
        println!("launch: {}", report.launch_command);
    }
    Ok(())
}

/// The prompt file's contents, or the default prompt rewritten for `workdir`.
fn load_system_prompt(path: Option<&Path>, workdir: &Path) -> anyhow::Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read system prompt from {}", path.display())),
        None => Ok(build_system_prompt(&workdir.to_string_lossy())),
    }
}

async fn run_agent_command(args: RunArgs) -> anyhow::Result<ExitCode> {
    let api_key = args
        .api_key
        .filter(|key| !key.is_empty())
        .ok_or(crate::error::LlmError::MissingApiKey)?;
    let client = LiteLlmClient::new(&args.base_url, Some(api_key), &args.model)?;

    let execution = ExecutionContext::new(&args.workdir)
        .with_timeout(Duration::from_secs(args.bash_timeout_secs))
        .with_max_output_chars(args.max_output_chars);
    let config = AgentConfig::new()
        .with_model(&args.model)
        .with_max_turns(args.max_turns)
        .with_system_prompt(load_system_prompt(
            args.system_prompt_file.as_deref(),
            &args.workdir,
        )?)
        .with_user_prompt(&args.user_prompt)
        .with_error_log_path(&args.error_log)
        .with_execution_context(execution);

    let agent = AgentLoop::new(Arc::new(client), config);
    let mut state = agent.initial_state();
    state.task_name = args.task.clone();
    state.sandbox_id = args.sandbox_id.clone();

    info!(
        model = %args.model,
        max_turns = args.max_turns,
        task = args.task.as_deref().unwrap_or("-"),
        sandbox = args.sandbox_id.as_deref().unwrap_or("-"),
        "Starting agent"
    );

    let outcome = match args.timeout_secs {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), agent.run(state)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let message = format!("Agent timed out after {} seconds", secs);
                warn!(seconds = secs, "Agent timed out");
                write_error_log(&args.error_log, &message).await;
                eprintln!("{}", message);
                return Ok(ExitCode::from(EXIT_TIMEOUT));
            }
        },
        None => agent.run(state).await,
    };

    if let Some(path) = &args.transcript_out {
        let json = serde_json::to_string_pretty(&outcome.transcript)?;
        if let Err(e) = std::fs::write(path, json) {
            warn!(path = %path.display(), error = %e, "Failed to write transcript");
        }
    }

    match &outcome.reason {
        TerminationReason::NaturalCompletion => {
            if let Some(answer) = &outcome.final_answer {
                println!("{}", answer);
            }
        }
        TerminationReason::TurnLimitExceeded => println!("{}", TURN_LIMIT_NOTICE),
        TerminationReason::ApiError { turn, message } => {
            eprintln!("API error on turn {}: {}", turn, message);
        }
    }
    println!("{}", outcome.summary());

    Ok(ExitCode::from(outcome.reason.exit_code() as u8))
}

/// Exit status of `attempt`: non-zero when any attempt errored.
fn attempt_exit_status(failures: usize) -> u8 {
    if failures == 0 {
        0
    } else {
        1
    }
}

async fn run_attempt_command(args: AttemptArgs) -> anyhow::Result<ExitCode> {
    let tasks = discover_tasks(&args.dataset, args.tasks.as_deref())?;
    if tasks.is_empty() {
        warn!(dataset = %args.dataset.display(), "No tasks found");
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = RunConfig::new(provision_config(args.driver, &args.workdir)?)
        .with_dataset(&args.dataset)
        .with_default_image(&args.default_image)
        .with_cpu_cores(args.cpus)
        .with_memory_mb(args.memory_mb)
        .with_driver_timeout(Duration::from_secs(args.driver_timeout_secs))
        .with_keep_sandbox(args.keep);
    for (key, value) in args.env {
        config = config.with_env(key, value);
    }

    let runner = TaskRunner::new(Arc::new(DockerSandboxClient::new()?), config);
    let mut failures = 0usize;

    for task in &tasks {
        match runner.run_task(task).await {
            Ok(attempt) => {
                if args.json {
                    println!("{}", serde_json::to_string(&attempt)?);
                } else {
                    println!(
                        "{:<32} {:<24} {:?} ({:.1}s)",
                        attempt.task_name,
                        attempt.image.image(),
                        attempt.driver,
                        attempt.duration_secs
                    );
                }
            }
            Err(e) => {
                failures += 1;
                if args.json {
                    println!(
                        "{}",
                        serde_json::json!({"task_name": task.name, "error": e.to_string()})
                    );
                } else {
                    println!("{:<32} ERROR: {}", task.name, e);
                }
            }
        }
    }

    info!(tasks = tasks.len(), failures, "Attempts finished");
    Ok(ExitCode::from(attempt_exit_status(failures)))
}
