//! External browser driver spoken to over line-delimited JSON.
//!
//! The driver is any program (a Playwright or browser-use script, say)
//! that reads one JSON request per line on stdin and answers with one JSON
//! line on stdout:
//!
//! | Request | Response payload |
//! |---------|------------------|
//! | `{"cmd":"initialize","task":"…"}` | none |
//! | `{"cmd":"advance"}` | none |
//! | `{"cmd":"observe"}` | `url`, `description`, `screenshot` (base64 PNG) |
//! | `{"cmd":"last_action"}` | `action` (`{"type","description","element_index"}` or null) |
//! | `{"cmd":"is_done"}` | `done` |
//! | `{"cmd":"release"}` | none |
//!
//! Every response carries `"ok": true`, or `"ok": false` with an `error`.
//! Lines that are not JSON (driver logging) are skipped.

use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::{AutomationAgent, AutomationError, AutomationResult};
use crate::model::{Action, ObservedState};

/// How long `release()` waits for the driver to acknowledge and then to exit
const RELEASE_GRACE: Duration = Duration::from_secs(3);

/// How to launch the driver process
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Wall-clock limit per request; None waits indefinitely
    pub response_timeout: Option<Duration>,
}

impl DriverConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            response_timeout: None,
        }
    }

    /// Split a shell-style command line on whitespace
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).args(parts))
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Deserialize)]
struct DriverResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    screenshot: Option<String>,
    #[serde(default)]
    action: Option<Action>,
    #[serde(default)]
    done: Option<bool>,
}

struct DriverProcess {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<std::io::Result<String>>,
}

pub struct DriverAgent {
    config: DriverConfig,
    process: Option<DriverProcess>,
    done: bool,
}

impl DriverAgent {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            process: None,
            done: false,
        }
    }

    fn spawn(&mut self) -> AutomationResult<()> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                AutomationError::Initialize(format!(
                    "Failed to spawn driver '{}': {}",
                    self.config.program, e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AutomationError::Initialize("Failed to capture driver stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AutomationError::Initialize("Failed to capture driver stdout".to_string()))?;

        // Reader thread so requests can time out
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        });

        self.process = Some(DriverProcess {
            child,
            stdin,
            lines: rx,
        });
        Ok(())
    }

    fn request(&mut self, payload: serde_json::Value) -> AutomationResult<DriverResponse> {
        let timeout = self.config.response_timeout;
        self.request_within(payload, timeout)
    }

    fn request_within(
        &mut self,
        payload: serde_json::Value,
        timeout: Option<Duration>,
    ) -> AutomationResult<DriverResponse> {
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| AutomationError::Protocol("driver is not running".to_string()))?;

        let line = serde_json::to_string(&payload)
            .map_err(|e| AutomationError::Protocol(e.to_string()))?;
        trace!(request = %line, "driver request");
        writeln!(process.stdin, "{}", line)?;
        process.stdin.flush()?;

        loop {
            let received = match timeout {
                Some(limit) => match process.lines.recv_timeout(limit) {
                    Ok(line) => line,
                    Err(RecvTimeoutError::Timeout) => return Err(AutomationError::Timeout(limit)),
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(AutomationError::Protocol("driver closed its output".to_string()));
                    }
                },
                None => process
                    .lines
                    .recv()
                    .map_err(|_| AutomationError::Protocol("driver closed its output".to_string()))?,
            };
            let text = received?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<DriverResponse>(trimmed) {
                Ok(response) => return Ok(response),
                Err(_) => {
                    // Not a protocol line; drivers often print their own logs
                    debug!(line = %trimmed, "driver output");
                }
            }
        }
    }

    fn expect_ok(
        &mut self,
        payload: serde_json::Value,
        wrap: fn(String) -> AutomationError,
    ) -> AutomationResult<DriverResponse> {
        let response = self.request(payload)?;
        if !response.ok {
            return Err(wrap(
                response
                    .error
                    .unwrap_or_else(|| "driver reported failure".to_string()),
            ));
        }
        Ok(response)
    }
}

impl AutomationAgent for DriverAgent {
    fn name(&self) -> &str {
        "driver"
    }

    fn initialize(&mut self, task_instruction: &str) -> AutomationResult<()> {
        self.spawn()?;
        self.done = false;
        self.expect_ok(
            json!({"cmd": "initialize", "task": task_instruction}),
            AutomationError::Initialize,
        )?;
        debug!(program = %self.config.program, "driver initialized");
        Ok(())
    }

    fn advance(&mut self) -> AutomationResult<()> {
        self.expect_ok(json!({"cmd": "advance"}), AutomationError::Advance)?;
        // Cache completion so is_done() needs no round trip of its own
        let response = self.expect_ok(json!({"cmd": "is_done"}), AutomationError::Advance)?;
        self.done = response.done.unwrap_or(false);
        Ok(())
    }

    fn observe_state(&mut self) -> AutomationResult<ObservedState> {
        let response = self.expect_ok(json!({"cmd": "observe"}), AutomationError::Observe)?;
        let screenshot = match response.screenshot {
            Some(encoded) if !encoded.is_empty() => Some(
                base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| AutomationError::Observe(format!("Invalid screenshot: {}", e)))?,
            ),
            _ => None,
        };
        Ok(ObservedState {
            url: response.url.filter(|u| !u.is_empty()),
            description: response.description.unwrap_or_default(),
            screenshot,
        })
    }

    fn last_action(&mut self) -> AutomationResult<Option<Action>> {
        let response = self.expect_ok(json!({"cmd": "last_action"}), AutomationError::Protocol)?;
        Ok(response.action)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn release(&mut self) {
        if self.process.is_none() {
            return;
        }
        // Bounded even when requests may otherwise wait forever
        if let Err(e) = self.request_within(json!({"cmd": "release"}), Some(RELEASE_GRACE)) {
            warn!(error = %e, "driver did not acknowledge release");
        }
        if let Some(mut process) = self.process.take() {
            drop(process.stdin);
            // Give the driver a moment to close its browser, then make sure it is gone
            let deadline = std::time::Instant::now() + RELEASE_GRACE;
            while std::time::Instant::now() < deadline {
                if let Ok(Some(_)) = process.child.try_wait() {
                    return;
                }
                thread::sleep(Duration::from_millis(50));
            }
            let _ = process.child.kill();
            let _ = process.child.wait();
        }
    }
}

impl Drop for DriverAgent {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_command_line() {
        let config = DriverConfig::from_command_line("node driver.js --headless").unwrap();
        assert_eq!(config.program, "node");
        assert_eq!(config.args, vec!["driver.js", "--headless"]);
        assert!(DriverConfig::from_command_line("   ").is_none());
    }

    #[test]
    fn test_parse_observe_response() {
        let response: DriverResponse = serde_json::from_str(
            r#"{"ok": true, "url": "https://app.test/", "description": "Home", "screenshot": "iVBORw0KGgo="}"#,
        )
        .unwrap();
        assert!(response.ok);
        assert_eq!(response.url.as_deref(), Some("https://app.test/"));
        let png = base64::engine::general_purpose::STANDARD
            .decode(response.screenshot.unwrap())
            .unwrap();
        assert_eq!(&png[0..4], &[0x89, 0x50, 0x4E, 0x47]);
    }

    #[test]
    fn test_parse_error_response() {
        let response: DriverResponse =
            serde_json::from_str(r#"{"ok": false, "error": "element 12 not found"}"#).unwrap();
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("element 12 not found"));
    }

    #[test]
    fn test_spawn_failure_is_initialize_error() {
        let mut agent = DriverAgent::new(DriverConfig::new("/nonexistent/ui-trail-driver"));
        let err = agent.initialize("task").unwrap_err();
        assert!(matches!(err, AutomationError::Initialize(_)));
        // Releasing a driver that never started is a no-op
        agent.release();
        agent.release();
    }

    /// Driver implemented as an inline shell loop
    #[cfg(unix)]
    fn shell_driver(script: &str) -> DriverAgent {
        DriverAgent::new(DriverConfig::new("sh").args(["-c", script]))
    }

    #[cfg(unix)]
    #[test]
    fn test_last_action_error_is_surfaced() {
        let mut agent = shell_driver(
            r#"while IFS= read -r line; do
                case "$line" in
                    *'"last_action"'*) echo '{"ok":false,"error":"driver lost page"}' ;;
                    *) echo '{"ok":true}' ;;
                esac
            done"#,
        );
        agent.initialize("t").unwrap();
        agent.advance().unwrap();
        let err = agent.last_action().unwrap_err();
        assert!(matches!(err, AutomationError::Protocol(_)));
        assert!(err.to_string().contains("driver lost page"));
        agent.release();
    }

    #[cfg(unix)]
    #[test]
    fn test_release_does_not_wait_on_a_silent_driver() {
        let mut agent = shell_driver(
            r#"while IFS= read -r line; do
                case "$line" in
                    *'"release"'*) sleep 30 ;;
                    *) echo '{"ok":true}' ;;
                esac
            done"#,
        );
        agent.initialize("t").unwrap();

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            agent.release();
            let _ = tx.send(());
        });
        // Acknowledge wait plus exit wait, with slack
        assert!(rx.recv_timeout(RELEASE_GRACE * 4).is_ok(), "release blocked on the driver");
    }
}
