//! Configuration management with environment variable support.
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `UI_TRAIL_OUTPUT_DIR` | Base directory for run artifacts | `outputs` |
//! | `UI_TRAIL_MAX_STEPS` | Iteration budget per task | `20` |
//! | `UI_TRAIL_DRIVER` | Command line of the browser driver | *(unset)* |
//! | `UI_TRAIL_DRIVER_TIMEOUT` | Per-request driver timeout in seconds, 0 = none | `0` |
//! | `UI_TRAIL_LLM_ENDPOINT` | Chat completions endpoint for walkthrough text | `https://api.openai.com/v1/chat/completions` |
//! | `UI_TRAIL_LLM_MODEL` | Model name | `gpt-4o-mini` |
//! | `UI_TRAIL_LLM_MAX_TOKENS` | Maximum tokens per reply | `400` |
//! | `UI_TRAIL_LLM_TIMEOUT` | Activity timeout while streaming (seconds) | `60` |
//! | `UI_TRAIL_LLM_CONNECT_TIMEOUT` | Connection timeout (seconds) | `10` |
//! | `OPENAI_API_KEY` | Bearer token sent to the endpoint | *(unset)* |
//!
//! # Example
//!
//! ```bash
//! export UI_TRAIL_LLM_ENDPOINT="http://localhost:11434/v1/chat/completions"
//! export UI_TRAIL_LLM_MODEL="llama3.1"
//! export UI_TRAIL_DRIVER="node drivers/playwright.js"
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

pub const DEFAULT_OUTPUT_DIR: &str = "outputs";

pub const DEFAULT_MAX_STEPS: usize = 20;

pub const DEFAULT_LLM_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

pub const DEFAULT_LLM_MAX_TOKENS: u32 = 400;

pub const DEFAULT_LLM_CONNECT_TIMEOUT: u64 = 10;

pub const DEFAULT_LLM_ACTIVITY_TIMEOUT: u64 = 60;

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_OUTPUT_DIR: &str = "UI_TRAIL_OUTPUT_DIR";

pub const ENV_MAX_STEPS: &str = "UI_TRAIL_MAX_STEPS";

pub const ENV_DRIVER: &str = "UI_TRAIL_DRIVER";

pub const ENV_DRIVER_TIMEOUT: &str = "UI_TRAIL_DRIVER_TIMEOUT";

pub const ENV_LLM_ENDPOINT: &str = "UI_TRAIL_LLM_ENDPOINT";

pub const ENV_LLM_MODEL: &str = "UI_TRAIL_LLM_MODEL";

pub const ENV_LLM_MAX_TOKENS: &str = "UI_TRAIL_LLM_MAX_TOKENS";

pub const ENV_LLM_CONNECT_TIMEOUT: &str = "UI_TRAIL_LLM_CONNECT_TIMEOUT";

pub const ENV_LLM_ACTIVITY_TIMEOUT: &str = "UI_TRAIL_LLM_TIMEOUT";

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

#[derive(Debug, Clone)]
pub struct Config {
    pub run: RunSettings,
    pub driver: DriverSettings,
    pub llm: LlmSettings,
}

/// Settings for the task loop and its artifacts
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub output_dir: PathBuf,
    pub max_steps: usize,
}

/// Settings for the external browser driver
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub command: Option<String>,
    pub response_timeout: Option<Duration>,
}

/// Settings for the LLM that writes walkthrough text
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Activity timeout during streaming (seconds)
    pub activity_timeout: u64,
    pub api_key: Option<String>,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            run: RunSettings::from_env(),
            driver: DriverSettings::from_env(),
            llm: LlmSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            run: RunSettings::defaults(),
            driver: DriverSettings::defaults(),
            llm: LlmSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RunSettings {
    pub fn from_env() -> Self {
        Self {
            output_dir: env::var(ENV_OUTPUT_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            max_steps: parse_env(ENV_MAX_STEPS)
                .filter(|n: &usize| *n >= 1)
                .unwrap_or(DEFAULT_MAX_STEPS),
        }
    }

    pub fn defaults() -> Self {
        Self {
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl DriverSettings {
    pub fn from_env() -> Self {
        Self {
            command: env::var(ENV_DRIVER).ok().filter(|s| !s.trim().is_empty()),
            response_timeout: parse_env(ENV_DRIVER_TIMEOUT)
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn defaults() -> Self {
        Self {
            command: None,
            response_timeout: None,
        }
    }
}

impl LlmSettings {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_LLM_ENDPOINT).unwrap_or_else(|_| DEFAULT_LLM_ENDPOINT.to_string()),
            model: env::var(ENV_LLM_MODEL).unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            max_tokens: parse_env(ENV_LLM_MAX_TOKENS).unwrap_or(DEFAULT_LLM_MAX_TOKENS),
            connect_timeout: parse_env(ENV_LLM_CONNECT_TIMEOUT).unwrap_or(DEFAULT_LLM_CONNECT_TIMEOUT),
            activity_timeout: parse_env(ENV_LLM_ACTIVITY_TIMEOUT)
                .unwrap_or(DEFAULT_LLM_ACTIVITY_TIMEOUT),
            api_key: env::var(ENV_API_KEY).ok().filter(|k| !k.is_empty()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            max_tokens: DEFAULT_LLM_MAX_TOKENS,
            connect_timeout: DEFAULT_LLM_CONNECT_TIMEOUT,
            activity_timeout: DEFAULT_LLM_ACTIVITY_TIMEOUT,
            api_key: None,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Base directory for run artifacts (convenience function)
pub fn output_dir() -> PathBuf {
    get().run.output_dir.clone()
}

/// Default iteration budget (convenience function)
pub fn max_steps() -> usize {
    get().run.max_steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.run.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(config.run.max_steps, DEFAULT_MAX_STEPS);
        assert!(config.driver.command.is_none());
        assert_eq!(config.llm.model, DEFAULT_LLM_MODEL);
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn test_parse_env_ignores_garbage() {
        // Variable names unique to this test so parallel tests do not interfere
        unsafe {
            env::set_var("UI_TRAIL_TEST_PARSE_OK", " 42 ");
            env::set_var("UI_TRAIL_TEST_PARSE_BAD", "forty-two");
        }
        assert_eq!(parse_env::<usize>("UI_TRAIL_TEST_PARSE_OK"), Some(42));
        assert_eq!(parse_env::<usize>("UI_TRAIL_TEST_PARSE_BAD"), None);
        assert_eq!(parse_env::<usize>("UI_TRAIL_TEST_PARSE_MISSING"), None);
    }
}
