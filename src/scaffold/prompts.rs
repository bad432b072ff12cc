//! Default prompts for the data-analysis agent.
//!
//! These are only defaults; [`AgentConfig`](super::AgentConfig) carries the
//! prompts actually sent.

/// Working directory the default prompts refer to.
pub const DEFAULT_PROMPT_WORKDIR: &str = "/app";

/// System prompt for the data-scientist agent.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert data scientist. \
You have tools: bash, read_file, write_file, str_replace. \
STRATEGY: read /task/instruction.md, then write a COMPLETE Python analysis script to \
/app/analyze.py using write_file (using pandas/numpy/matplotlib), then run it with \
bash('python /app/analyze.py'). \
The script must produce ALL required output files in /app/submission/. \
Data files are already in /app/, do NOT try to read large CSVs with read_file. \
After running the script, verify outputs with bash('ls /app/submission/'). \
Fix any errors in the script and rerun. When outputs exist, stop.";

/// First user message of every attempt.
pub const DEFAULT_USER_PROMPT: &str =
    "Read /task/instruction.md and complete the data analysis task.";

/// Printed when the loop stops at the turn limit.
pub const TURN_LIMIT_NOTICE: &str = "Agent reached maximum number of turns.";

/// Build the system prompt for an agent whose working directory is `workdir`.
pub fn build_system_prompt(workdir: &str) -> String {
    let workdir = workdir.trim_end_matches('/');
    if workdir.is_empty() || workdir == DEFAULT_PROMPT_WORKDIR {
        return DEFAULT_SYSTEM_PROMPT.to_string();
    }
    DEFAULT_SYSTEM_PROMPT.replace("/app/", &format!("{}/", workdir))
}
