use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{prompts, ReasoningFunction, ReasoningRequest, ReasoningResponse};
use crate::config::ReasoningSettings;
use crate::error::ReasoningError;

const EXHAUSTION_MARKERS: &[&str] = &[
    "prompt is too long",
    "context window",
    "context length",
    "maximum context",
    "too many tokens",
    "token limit",
    "conversation is too long",
    "max_turns",
];
const MAX_ERROR_CHARS: usize = 500;

fn truncate(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= MAX_ERROR_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_ERROR_CHARS).collect();
    format!("{head}…")
}

/// Map a failure message onto the error taxonomy.
pub fn classify_failure(message: &str) -> ReasoningError {
    let lower = message.to_ascii_lowercase();
    if EXHAUSTION_MARKERS.iter().any(|m| lower.contains(m)) {
        ReasoningError::ContextExhausted(truncate(message))
    } else {
        ReasoningError::Invocation(truncate(message))
    }
}

fn extract_json(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        if v.is_object() || v.is_array() {
            return Some(v);
        }
    }
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            if let Ok(v) = serde_json::from_str::<Value>(body[..end].trim()) {
                return Some(v);
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end]).ok()
}

/// Pull the JSON answer (and session id, if any) out of an agent's stdout.
///
/// Accepts a bare JSON document, JSON embedded in prose or a fenced block,
/// or a wrapper object `{"result": "<text>", "session_id": "..."}`.
pub fn parse_agent_output(stdout: &str) -> Result<(Value, Option<String>), ReasoningError> {
    let Some(value) = extract_json(stdout) else {
        return Err(ReasoningError::Malformed(format!(
            "no JSON in output: {}",
            truncate(stdout)
        )));
    };
    let wrapped = value.get("result").is_some()
        && (value.get("session_id").is_some() || value.get("type").is_some());
    if !wrapped {
        return Ok((value, None));
    }
    let session_id = value
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let is_error = value
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let inner = &value["result"];
    if is_error {
        let text = inner
            .as_str()
            .map(str::to_string)
            .or_else(|| value.get("subtype").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| inner.to_string());
        return Err(classify_failure(&text));
    }
    let output = match inner {
        Value::String(text) => extract_json(text).ok_or_else(|| {
            ReasoningError::Malformed(format!("no JSON in result: {}", truncate(text)))
        })?,
        other => other.clone(),
    };
    Ok((output, session_id))
}

/// Runs an external agent CLI: prompt on stdin, JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandReasoner {
    settings: ReasoningSettings,
    workdir: PathBuf,
}

impl CommandReasoner {
    pub fn new(settings: ReasoningSettings, workdir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            workdir: workdir.into(),
        }
    }

    fn args_for(&self, request: &ReasoningRequest) -> Vec<String> {
        let mut args = self.settings.args.clone();
        if let (Some(flag), Some(id)) = (&self.settings.resume_flag, &request.session_id) {
            args.push(flag.clone());
            args.push(id.clone());
        }
        let tools = request.tools.allowed_tools();
        if let Some(flag) = &self.settings.tools_flag {
            if !tools.is_empty() {
                args.push(flag.clone());
                args.push(tools.join(","));
            }
        }
        args
    }
}

#[async_trait]
impl ReasoningFunction for CommandReasoner {
    async fn call(&self, request: ReasoningRequest) -> Result<ReasoningResponse, ReasoningError> {
        let prompt = prompts::render(&request);
        let args = self.args_for(&request);
        debug!(
            target: "tome::reasoning",
            kind = request.kind.as_str(),
            command = %self.settings.command,
            resume = request.session_id.is_some(),
            prompt_bytes = prompt.len(),
            "invoking reasoning command"
        );
        let mut cmd = tokio::process::Command::new(&self.settings.command);
        cmd.args(&args)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|e| {
            ReasoningError::Invocation(format!("spawn {}: {e}", self.settings.command))
        })?;
        let stdin = child.stdin.take();
        let run = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };
        let output = match timeout(self.settings.timeout, run).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ReasoningError::Invocation(e.to_string())),
            Err(_) => {
                warn!(target: "tome::reasoning", kind = request.kind.as_str(), "reasoning command timed out");
                return Err(ReasoningError::Timeout(self.settings.timeout.as_secs()));
            }
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = if stderr.trim().is_empty() {
                stdout.to_string()
            } else {
                stderr.to_string()
            };
            return Err(classify_failure(&format!("exit {}: {}", output.status, detail)));
        }
        let (output, session_id) = parse_agent_output(&stdout)?;
        Ok(ReasoningResponse { output, session_id })
    }
}
