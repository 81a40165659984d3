//! HTTP server assembly: application state, router, and lifecycle.

pub mod streaming;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::admin::{self, AdminResponder, AdminState};
use crate::config::Config;
use crate::error::MockError;
use crate::fault::FaultState;
use crate::markov::{seeded_rng, MarkovResponder, DEFAULT_CORPUS};
use crate::mcp::{self, control::ControlPlane, McpState};
use crate::providers;
use crate::rules::{Rule, RuleResponder};
use crate::types::{EchoResponder, Responder};
use crate::{MockResult, DEFAULT_MODEL, DEFAULT_PORT};

struct ServerCore {
    responder: Arc<dyn Responder>,
    markov: Arc<MarkovResponder>,
    admin: Option<Arc<AdminState>>,
    control: Option<Arc<ControlPlane>>,
    faults: Arc<FaultState>,
    mcp: Arc<McpState>,
    rng: Mutex<StdRng>,
    token_delay: Duration,
    auto_tool_calls: bool,
    default_model: String,
}

/// Shared application state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<ServerCore>,
}

impl AppState {
    /// Build the full server state from a configuration. The responder is
    /// an echo responder unless rules are configured.
    pub fn new(config: Config) -> MockResult<Self> {
        Self::build(config, None)
    }

    /// Build state with an explicit responder, bypassing the configured
    /// rules. Useful for tests and embedding.
    pub fn with_responder(config: Config, responder: Arc<dyn Responder>) -> MockResult<Self> {
        Self::build(config, Some(responder))
    }

    fn build(config: Config, responder: Option<Arc<dyn Responder>>) -> MockResult<Self> {
        config.validate()?;
        let seed = config.defaults.seed;

        let corpus = match &config.corpus_file {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|e| MockError::Config(format!("reading corpus file: {e}")))?,
            None => DEFAULT_CORPUS.to_string(),
        };
        let markov = Arc::new(MarkovResponder::new(&corpus, seed));

        let (responder, baseline): (Arc<dyn Responder>, Vec<Arc<Rule>>) = match responder {
            Some(r) => (r, Vec::new()),
            None if config.rules.is_empty() => (Arc::new(EchoResponder) as Arc<dyn Responder>, Vec::new()),
            None => {
                let rules = config.compile_rules()?;
                let rr = Arc::new(RuleResponder::new(rules, markov.clone(), seed));
                let baseline = rr.rules().to_vec();
                (rr as Arc<dyn Responder>, baseline)
            }
        };

        let faults = Arc::new(FaultState::new(config.faults.clone(), seed));
        let mcp = Arc::new(McpState::new(config.mcp.clone()));

        // Admin rules are tried first; the configured responder is the
        // fallback. The control plane shares the same state.
        let (admin, control, responder) = if config.admin_enabled() {
            let admin = Arc::new(AdminState::new(baseline));
            let control = Arc::new(ControlPlane::new(admin.clone(), faults.clone()));
            let wrapped: Arc<dyn Responder> = Arc::new(AdminResponder::new(
                admin.clone(),
                responder,
                markov.clone(),
                seed,
            ));
            (Some(admin), Some(control), wrapped)
        } else {
            (None, None, responder)
        };

        Ok(Self {
            inner: Arc::new(ServerCore {
                responder,
                markov,
                admin,
                control,
                faults,
                mcp,
                rng: Mutex::new(seeded_rng(seed)),
                token_delay: config.token_delay(),
                auto_tool_calls: config.defaults.auto_tool_calls,
                default_model: config
                    .defaults
                    .model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            }),
        })
    }

    pub fn responder(&self) -> &dyn Responder {
        self.inner.responder.as_ref()
    }

    pub fn markov(&self) -> &MarkovResponder {
        &self.inner.markov
    }

    pub fn admin(&self) -> Option<&Arc<AdminState>> {
        self.inner.admin.as_ref()
    }

    pub fn control(&self) -> Option<&Arc<ControlPlane>> {
        self.inner.control.as_ref()
    }

    pub fn faults(&self) -> &FaultState {
        &self.inner.faults
    }

    pub fn mcp(&self) -> &McpState {
        &self.inner.mcp
    }

    /// The server RNG, shared by the stream tokenizer and auto tool-call
    /// generation.
    pub fn rng(&self) -> &Mutex<StdRng> {
        &self.inner.rng
    }

    pub fn token_delay(&self) -> Duration {
        self.inner.token_delay
    }

    pub fn auto_tool_calls(&self) -> bool {
        self.inner.auto_tool_calls
    }

    pub fn default_model(&self) -> &str {
        &self.inner.default_model
    }
}

/// Build the router with all provider, MCP, and admin routes.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/v1/chat/completions", post(providers::openai::chat_completions))
        .route("/v1/messages", post(providers::anthropic::messages))
        .route("/v1beta/models/:model_call", post(providers::gemini::model_call))
        .route("/mcp", post(mcp::handle_mcp));

    if state.admin().is_some() {
        router = router
            .route("/mcp/control", post(mcp::control::handle_control))
            .route(
                "/_mock/rules",
                get(admin::get_rules)
                    .post(admin::post_rules)
                    .delete(admin::delete_rules),
            )
            .route(
                "/_mock/faults",
                get(admin::get_faults)
                    .post(admin::post_faults)
                    .delete(admin::delete_faults),
            )
            .route(
                "/_mock/requests",
                get(admin::get_requests).delete(admin::delete_requests),
            )
            .route("/_mock/reset", post(admin::post_reset))
            .route(
                "/_mock/mcp/tools",
                get(mcp::get_mcp_tools)
                    .post(mcp::post_mcp_tools)
                    .delete(mcp::delete_mcp_tools),
            )
            .route(
                "/_mock/mcp/resources",
                get(mcp::get_mcp_resources)
                    .post(mcp::post_mcp_resources)
                    .delete(mcp::delete_mcp_resources),
            )
            .route(
                "/_mock/mcp/prompts",
                get(mcp::get_mcp_prompts)
                    .post(mcp::post_mcp_prompts)
                    .delete(mcp::delete_mcp_prompts),
            );
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the server until ctrl-c.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let port = if config.server.port > 0 {
        config.server.port
    } else {
        DEFAULT_PORT
    };

    let rule_count = config.rules.len();
    let corpus_info = config
        .corpus_file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "default".to_string());
    let admin_status = if config.admin_enabled() { "enabled" } else { "disabled" };

    let state = AppState::new(config)?;
    info!(
        port,
        rules = rule_count,
        corpus = %corpus_info,
        admin = admin_status,
        "llmock listening"
    );
    serve(state, port).await
}

/// Bind and serve an already-built state until ctrl-c.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
