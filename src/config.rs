//! Configuration for the mock server.
//!
//! A config file (YAML or JSON, detected by extension) supplies server
//! settings, response rules, startup faults, the Markov corpus source, and
//! the MCP state. Everything can also be set programmatically.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MockError, MockResult};
use crate::fault::Fault;
use crate::mcp::McpConfig;
use crate::rules::Rule;
use crate::toolcall::ToolCallTemplate;

/// Default delay between streamed token chunks.
pub const DEFAULT_TOKEN_DELAY: Duration = Duration::from_millis(15);

/// Full configuration for an llmock server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub defaults: DefaultsConfig,
    pub rules: Vec<RuleConfig>,
    pub faults: Vec<Fault>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus_file: Option<PathBuf>,
    pub mcp: McpConfig,
}

/// Server-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on. Zero means "unset": the CLI falls back to the
    /// PORT environment variable and then the built-in default.
    pub port: u16,
    /// Enable the /_mock admin API and the MCP control plane.
    /// Enabled when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_api: Option<bool>,
    /// Log each request at info level.
    pub verbose: bool,
}

/// Default response behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Delay between streamed token chunks, in milliseconds. Absent means
    /// the 15 ms default; an explicit zero disables the delay for tests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_delay_ms: Option<u64>,
    /// Deterministic random seed. Absent means OS entropy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Auto-generate tool calls from request schemas when no rule fires.
    pub auto_tool_calls: bool,
    /// Model name reported when a request omits the model field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Config-file representation of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub pattern: String,
    #[serde(default)]
    pub responses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_calls: Option<u32>,
}

impl Config {
    /// Read a config file. `.json` parses as JSON, anything else as YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> MockResult<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| MockError::Config(format!("reading config file: {e}")))?;
        Self::parse(&data, path)
    }

    /// Parse config data; the path is used only for format detection.
    pub fn parse<P: AsRef<Path>>(data: &str, path: P) -> MockResult<Self> {
        let is_json = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let config: Self = if is_json {
            serde_json::from_str(data)
                .map_err(|e| MockError::Config(format!("parsing JSON config: {e}")))?
        } else {
            serde_yaml::from_str(data)
                .map_err(|e| MockError::Config(format!("parsing YAML config: {e}")))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration: every rule must compile and carry at
    /// least one response or a tool call.
    pub fn validate(&self) -> MockResult<()> {
        self.compile_rules()?;
        Ok(())
    }

    /// Compile the configured rules.
    pub fn compile_rules(&self) -> MockResult<Vec<Rule>> {
        self.rules
            .iter()
            .map(|rc| {
                Rule::compile(
                    &rc.pattern,
                    rc.responses.clone(),
                    rc.tool_call.clone(),
                    rc.max_calls,
                )
            })
            .collect()
    }

    /// The effective inter-chunk streaming delay.
    pub fn token_delay(&self) -> Duration {
        match self.defaults.token_delay_ms {
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_TOKEN_DELAY,
        }
    }

    /// Whether the admin API (and control plane) is enabled. Defaults on.
    pub fn admin_enabled(&self) -> bool {
        self.server.admin_api.unwrap_or(true)
    }
}

/// Look for `llmock.yaml` or `llmock.json` in the current directory.
pub fn find_default_config() -> Option<PathBuf> {
    ["llmock.yaml", "llmock.json"]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}
