//! # llmock
//!
//! Offline mock LLM API server for testing chat-completion clients.
//!
//! llmock emulates the OpenAI Chat Completions, Anthropic Messages, and
//! Google Gemini generateContent wire protocols, plus a Model Context
//! Protocol (MCP) JSON-RPC endpoint. Responses are produced by an ordered
//! regex rule list with a Markov-chain fallback, so client retry, timeout,
//! parsing, and tool-use logic can be exercised without calling real
//! providers.
//!
//! ## Features
//!
//! - **Three wire protocols**: OpenAI, Anthropic, Gemini, each with
//!   non-streaming and SSE streaming responses
//! - **Rule-based responses**: regex patterns with templated expansion and
//!   simulated tool calls
//! - **Fault injection**: errors, delays, timeouts, malformed bodies, rate
//!   limits, with probability and count controls
//! - **Runtime admin API**: mutate rules and faults and inspect the request
//!   log while the server runs, over HTTP or MCP
//! - **Deterministic**: seed-based RNG for reproducible tests
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use llmock::{Config, run_server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     run_server(config).await
//! }
//! ```

pub mod admin;
pub mod autotool;
pub mod cli;
pub mod config;
pub mod error;
pub mod fault;
pub mod markov;
pub mod mcp;
pub mod providers;
pub mod rules;
pub mod server;
pub mod telemetry;
pub mod toolcall;
pub mod types;

pub use config::Config;
pub use error::{MockError, MockResult};
pub use fault::{Fault, FaultKind};
pub use rules::{Rule, RuleResponder};
pub use server::{create_router, run_server, AppState};
pub use types::{EchoResponder, InternalMessage, Reply, Responder, Response};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default server port
pub const DEFAULT_PORT: u16 = 9090;

/// Default model name used when a request omits the model field
pub const DEFAULT_MODEL: &str = "llmock-1";
