//! LLM-written walkthrough over an OpenAI-compatible chat completions API.
//!
//! Each step is sent with the task and the seven steps before it; the model
//! answers with a JSON object `{"instruction": …, "context": …}`. Replies
//! that cannot be parsed fall back to the inferred wording for that step,
//! so one bad answer never costs the whole walkthrough.
//!
//! Requests go through `curl` with streaming enabled. There is no total
//! timeout, only an activity timeout while tokens are arriving; endpoints
//! that do not stream are retried without it.

use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::template::{infer_instruction, render_tutorial};
use super::{NarrativeError, NarrativeGenerator, NarrativeResult, StepNote};
use crate::config;
use crate::model::{Step, TaskRun};

/// How many earlier steps accompany each request
pub const CONTEXT_WINDOW: usize = 7;

static JSON_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid JSON object pattern"));

const SYSTEM_PROMPT: &str = "You write step-by-step tutorials for web applications. \
For the step you are given, reply with a single JSON object with two string fields: \
\"instruction\", one imperative sentence telling the reader what to do, and \
\"context\", one sentence describing what the reader should see afterwards. \
Reply with the JSON object only.";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat completions URL
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    /// Timeout for initial connection (seconds)
    pub connection_timeout: u64,
    /// Timeout for inactivity during streaming (seconds)
    pub activity_timeout: u64,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            endpoint: cfg.llm.endpoint.clone(),
            model: cfg.llm.model.clone(),
            max_tokens: cfg.llm.max_tokens,
            connection_timeout: cfg.llm.connect_timeout,
            activity_timeout: cfg.llm.activity_timeout,
            api_key: cfg.llm.api_key.clone(),
        }
    }
}

impl LlmConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn activity_timeout(mut self, seconds: u64) -> Self {
        self.activity_timeout = seconds;
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Header lines in curl config syntax, fed on stdin so the key never
    /// shows up in the process arguments
    fn curl_config(&self) -> String {
        let mut config = String::from("header = \"Content-Type: application/json\"\n");
        if let Some(key) = &self.api_key {
            let escaped = key.replace('\\', "\\\\").replace('"', "\\\"");
            config.push_str(&format!("header = \"Authorization: Bearer {}\"\n", escaped));
        }
        config
    }

    /// Arguments for a POST of `body`; headers come from [`Self::curl_config`]
    fn curl_args(&self, body: &str, streaming: bool) -> Vec<String> {
        let mut args = vec!["-s".to_string()];
        if streaming {
            args.push("-N".to_string());
        }
        args.extend(
            [
                "--config", "-",
                "-X", "POST", &self.endpoint,
                "-d", body,
                "--connect-timeout", &self.connection_timeout.to_string(),
            ]
            .map(str::to_string),
        );
        args
    }

    fn spawn_curl(&self, body: &str, streaming: bool) -> NarrativeResult<Child> {
        let mut child = Command::new("curl")
            .args(self.curl_args(body, streaming))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        // Dropping stdin after the write ends the config input
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| NarrativeError::Io(std::io::Error::other("Failed to capture stdin")))?;
        stdin.write_all(self.curl_config().as_bytes())?;
        Ok(child)
    }
}

/// Check if the endpoint's server accepts connections.
///
/// Any HTTP status counts as reachable; curl reports `000` when the
/// connection itself failed.
pub fn check_health(endpoint: &str, timeout_secs: u64) -> NarrativeResult<bool> {
    let parsed = Url::parse(endpoint)
        .map_err(|e| NarrativeError::Unreachable(format!("invalid endpoint '{}': {}", endpoint, e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| NarrativeError::Unreachable(format!("endpoint '{}' has no host", endpoint)))?;
    let origin = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };

    let output = Command::new("curl")
        .args([
            "-s",
            "-o", "/dev/null",
            "-w", "%{http_code}",
            "--connect-timeout", &timeout_secs.to_string(),
            "--max-time", &timeout_secs.to_string(),
            "-I",
            &origin,
        ])
        .output()?;

    let status = String::from_utf8_lossy(&output.stdout);
    let code: u16 = status.trim().parse().unwrap_or(0);
    Ok(code > 0)
}

/// Send one chat request and return the assistant's text
pub fn complete(config: &LlmConfig, messages: &serde_json::Value) -> NarrativeResult<String> {
    let request = serde_json::json!({
        "model": config.model,
        "messages": messages,
        "max_tokens": config.max_tokens,
        "stream": true
    });
    let request_json =
        serde_json::to_string(&request).map_err(|e| NarrativeError::Request(e.to_string()))?;

    let mut child = config.spawn_curl(&request_json, true)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| NarrativeError::Io(std::io::Error::other("Failed to capture stdout")))?;

    let (tx, rx) = mpsc::channel();
    let activity_timeout = Duration::from_secs(config.activity_timeout);

    thread::spawn(move || {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });

    let mut content = String::new();
    let mut last_activity = Instant::now();

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Ok(line)) => {
                last_activity = Instant::now();
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    break;
                }
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(data)
                    && let Some(delta) = json["choices"][0]["delta"]["content"].as_str()
                {
                    content.push_str(delta);
                }
            }
            Ok(Err(e)) => return Err(NarrativeError::Io(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if last_activity.elapsed() > activity_timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(NarrativeError::ActivityTimeout(activity_timeout));
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = child.wait()?;
    if !status.success() && content.is_empty() {
        return Err(NarrativeError::Request(format!("curl exited with {}", status)));
    }

    if content.is_empty() {
        debug!("no streamed content, retrying without streaming");
        return complete_non_streaming(config, messages);
    }
    Ok(content)
}

/// Fallback for endpoints that ignore `"stream": true`
fn complete_non_streaming(config: &LlmConfig, messages: &serde_json::Value) -> NarrativeResult<String> {
    let request = serde_json::json!({
        "model": config.model,
        "messages": messages,
        "max_tokens": config.max_tokens
    });
    let request_json =
        serde_json::to_string(&request).map_err(|e| NarrativeError::Request(e.to_string()))?;

    let output = config.spawn_curl(&request_json, false)?.wait_with_output()?;

    if !output.status.success() {
        return Err(NarrativeError::Request(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }

    let response: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| NarrativeError::InvalidResponse(e.to_string()))?;

    if let Some(message) = response["error"]["message"].as_str() {
        return Err(NarrativeError::Request(message.to_string()));
    }

    response["choices"][0]["message"]["content"]
        .as_str()
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .ok_or_else(|| NarrativeError::InvalidResponse("reply has no message content".to_string()))
}

/// Prompt for `steps[index]`, with up to [`CONTEXT_WINDOW`] earlier steps
pub fn build_step_prompt(task_instruction: &str, steps: &[Step], index: usize) -> String {
    let mut prompt = format!("Task: {}\n\n", task_instruction);

    let start = index.saturating_sub(CONTEXT_WINDOW);
    if start < index {
        prompt.push_str("Previous steps:\n");
        for step in &steps[start..index] {
            prompt.push_str(&describe_step(step));
        }
        prompt.push('\n');
    }

    if let Some(step) = steps.get(index) {
        prompt.push_str("Current step:\n");
        prompt.push_str(&describe_step(step));
        let previous = index.checked_sub(1).and_then(|i| steps.get(i));
        prompt.push_str(&format!("  Suggested wording: {}\n", infer_instruction(step, previous)));
    }
    prompt
}

fn describe_step(step: &Step) -> String {
    let action = step
        .action_from_previous
        .as_ref()
        .map(|a| format!("{} ({})", a.description, a.action_type))
        .unwrap_or_else(|| "none".to_string());
    format!(
        "- Step {}: url={} action={} state={}\n",
        step.step_index + 1,
        step.url,
        action,
        step.state_description
    )
}

/// Pull the `{instruction, context}` object out of a model reply
pub fn parse_step_reply(reply: &str) -> NarrativeResult<StepNote> {
    let object = JSON_OBJECT
        .find(reply)
        .ok_or_else(|| NarrativeError::InvalidResponse("no JSON object in reply".to_string()))?;
    let note: StepNote = serde_json::from_str(object.as_str())
        .map_err(|e| NarrativeError::InvalidResponse(e.to_string()))?;
    if note.instruction.trim().is_empty() {
        return Err(NarrativeError::InvalidResponse("empty instruction".to_string()));
    }
    Ok(note)
}

#[derive(Debug, Clone, Default)]
pub struct LlmNarrator {
    config: LlmConfig,
}

impl LlmNarrator {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }

    fn note_for(&self, run: &TaskRun, steps: &[Step], index: usize) -> NarrativeResult<StepNote> {
        let messages = serde_json::json!([
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": build_step_prompt(&run.task_instruction, steps, index)}
        ]);
        let reply = complete(&self.config, &messages)?;
        parse_step_reply(&reply)
    }
}

impl NarrativeGenerator for LlmNarrator {
    fn generate(&self, run: &TaskRun, steps: &[Step]) -> NarrativeResult<String> {
        let reachable = check_health(&self.config.endpoint, self.config.connection_timeout)
            .map_err(|e| NarrativeError::Unreachable(format!("{}: {}", self.config.endpoint, e)))?;
        if !reachable {
            return Err(NarrativeError::Unreachable(self.config.endpoint.clone()));
        }
        info!(model = %self.config.model, steps = steps.len(), "writing walkthrough with LLM");

        let mut notes = Vec::with_capacity(steps.len());
        for index in 0..steps.len() {
            match self.note_for(run, steps, index) {
                Ok(note) => notes.push(Some(note)),
                Err(NarrativeError::InvalidResponse(reason)) => {
                    warn!(step = index, %reason, "unusable reply, keeping inferred wording");
                    notes.push(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(render_tutorial(run, steps, &notes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, ActionType, TaskStatus};
    use chrono::Utc;
    use std::path::PathBuf;

    fn steps(n: usize) -> Vec<Step> {
        (0..n)
            .map(|i| Step {
                step_index: i,
                screenshot_path: PathBuf::from(format!("step_{:03}.png", i)),
                url: format!("https://app.test/page-{}", i),
                has_unique_url: true,
                action_from_previous: (i > 0).then(|| Action::new(ActionType::Click, format!("Open page {}", i))),
                state_description: format!("Page {}", i),
                timestamp: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_prompt_limits_context_window() {
        let steps = steps(10);
        let prompt = build_step_prompt("tour the app", &steps, 9);
        assert!(prompt.starts_with("Task: tour the app"));
        // Steps 3..=9 (1-based) precede step 10
        assert!(!prompt.contains("Step 2:"));
        assert!(prompt.contains("Step 3:"));
        assert!(prompt.contains("Step 9:"));
        assert!(prompt.contains("Current step:\n- Step 10:"));
        assert!(prompt.contains("Suggested wording: Open page 9"));
    }

    #[test]
    fn test_prompt_for_first_step_has_no_history() {
        let steps = steps(3);
        let prompt = build_step_prompt("tour the app", &steps, 0);
        assert!(!prompt.contains("Previous steps"));
        assert!(prompt.contains("action=none"));
    }

    #[test]
    fn test_parse_reply_inside_code_fence() {
        let reply = "```json\n{\"instruction\": \"Click 'New'\", \"context\": \"An empty editor opens\"}\n```";
        let note = parse_step_reply(reply).unwrap();
        assert_eq!(note.instruction, "Click 'New'");
        assert_eq!(note.context.as_deref(), Some("An empty editor opens"));
    }

    #[test]
    fn test_parse_reply_rejects_prose() {
        assert!(matches!(
            parse_step_reply("Click the button."),
            Err(NarrativeError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_step_reply(r#"{"instruction": ""}"#),
            Err(NarrativeError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = LlmConfig::new("http://localhost:11434/v1/chat/completions")
            .model("llama3.1")
            .max_tokens(200)
            .activity_timeout(30)
            .api_key("sk-test");

        assert_eq!(config.model, "llama3.1");
        assert_eq!(config.max_tokens, 200);
        assert_eq!(config.activity_timeout, 30);
    }

    #[test]
    fn test_api_key_stays_out_of_arguments() {
        let config = LlmConfig::new("http://localhost:11434/v1/chat/completions").api_key("sk-test");

        let args = config.curl_args("{}", true);
        assert!(args.iter().all(|a| !a.contains("sk-test")));
        assert!(args.windows(2).any(|w| w[0] == "--config" && w[1] == "-"));
        assert!(config.curl_config().contains("header = \"Authorization: Bearer sk-test\"\n"));
    }

    #[test]
    fn test_curl_config_escapes_quotes() {
        let config = LlmConfig::new("http://localhost/v1").api_key(r#"a"b\c"#);
        assert!(config.curl_config().contains(r#"Bearer a\"b\\c""#));

        let mut config = LlmConfig::new("http://localhost/v1");
        config.api_key = None;
        assert_eq!(config.curl_config(), "header = \"Content-Type: application/json\"\n");
    }

    #[test]
    fn test_unreachable_endpoint() {
        let mut run = TaskRun::start("tour the app", "scripted");
        run.finalize(TaskStatus::Success, 2).unwrap();
        let mut config = LlmConfig::new("http://127.0.0.1:1/v1/chat/completions");
        config.connection_timeout = 1;
        let narrator = LlmNarrator::new(config);

        let err = narrator.generate(&run, &steps(2)).unwrap_err();
        assert!(matches!(err, NarrativeError::Unreachable(_)));
    }
}
