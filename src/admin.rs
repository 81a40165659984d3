//! Runtime admin state: the mutable rule list, the request log, and the
//! `/_mock/*` HTTP surface.
//!
//! Injected rules are consulted before the baseline responder, so tests can
//! add overrides for specific inputs while leaving configured rules in
//! place for everything else.

use std::collections::VecDeque;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::MockError;
use crate::fault::Fault;
use crate::markov::{seeded_rng, MarkovResponder};
use crate::rules::{match_rules, Rule};
use crate::server::AppState;
use crate::toolcall::ToolCallTemplate;
use crate::types::{extract_input, InternalMessage, Reply, Responder};

/// How many request log entries are kept before the oldest is dropped.
const REQUEST_LOG_CAPACITY: usize = 100;

/// One recorded request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogEntry {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub user_message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub matched_rule: String,
    pub response: String,
}

struct AdminInner {
    rules: Vec<Arc<Rule>>,
    request_log: VecDeque<RequestLogEntry>,
}

/// Mutable admin state: the live rule list, the baseline for resets, and
/// the bounded request log. One reader-preferred lock covers both the
/// rules and the log; readers snapshot under the lock and use the snapshot
/// for the whole response.
pub struct AdminState {
    inner: RwLock<AdminInner>,
    baseline: Vec<Arc<Rule>>,
}

impl AdminState {
    pub fn new(initial: Vec<Arc<Rule>>) -> Self {
        Self {
            inner: RwLock::new(AdminInner {
                rules: initial.clone(),
                request_log: VecDeque::new(),
            }),
            baseline: initial,
        }
    }

    /// A copy of the current rule list, safe to match against without
    /// holding the lock.
    pub fn snapshot(&self) -> Vec<Arc<Rule>> {
        self.inner.read().rules.clone()
    }

    /// Insert rules at the given priority position:
    /// 0 prepends (default), -1 appends, a positive value inserts at that
    /// index clamped to the list length.
    pub fn add_rules(&self, rules: Vec<Rule>, priority: i64) {
        let mut rules: Vec<Arc<Rule>> = rules.into_iter().map(Arc::new).collect();
        let mut inner = self.inner.write();
        match priority {
            0 => {
                rules.extend(inner.rules.drain(..));
                inner.rules = rules;
            }
            -1 => inner.rules.extend(rules),
            p => {
                let idx = usize::try_from(p).unwrap_or(0).min(inner.rules.len());
                inner.rules.splice(idx..idx, rules);
            }
        }
    }

    /// Restore the rule list to the startup baseline. Fresh rule instances
    /// mean fresh tool-call counters.
    pub fn reset_rules(&self) {
        let fresh: Vec<Arc<Rule>> = self
            .baseline
            .iter()
            .map(|r| Arc::new(r.fresh_clone()))
            .collect();
        self.inner.write().rules = fresh;
    }

    /// Restore rules and clear the request log. Faults are deliberately
    /// untouched; they have their own clear endpoint.
    pub fn full_reset(&self) {
        let fresh: Vec<Arc<Rule>> = self
            .baseline
            .iter()
            .map(|r| Arc::new(r.fresh_clone()))
            .collect();
        let mut inner = self.inner.write();
        inner.rules = fresh;
        inner.request_log.clear();
    }

    /// Append to the request log, keeping the last 100 entries.
    pub fn log_request(&self, entry: RequestLogEntry) {
        let mut inner = self.inner.write();
        inner.request_log.push_back(entry);
        while inner.request_log.len() > REQUEST_LOG_CAPACITY {
            inner.request_log.pop_front();
        }
    }

    pub fn requests(&self) -> Vec<RequestLogEntry> {
        self.inner.read().request_log.iter().cloned().collect()
    }

    pub fn clear_requests(&self) {
        self.inner.write().request_log.clear();
    }

    /// The current rules in their JSON representation.
    pub fn rules_json(&self) -> Vec<RuleJson> {
        self.inner
            .read()
            .rules
            .iter()
            .map(|r| RuleJson {
                pattern: r.pattern.to_string(),
                responses: r.responses.clone(),
                tool_call: r.tool_call.clone(),
                max_calls: r.max_calls,
            })
            .collect()
    }
}

/// JSON representation of a rule for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct RuleJson {
    pub pattern: String,
    pub responses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallTemplate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_calls: Option<u32>,
}

/// Body for `POST /_mock/rules`.
#[derive(Debug, Deserialize)]
pub struct AddRulesRequest {
    #[serde(default)]
    pub rules: Vec<AddRuleEntry>,
}

#[derive(Debug, Deserialize)]
pub struct AddRuleEntry {
    pub pattern: String,
    #[serde(default)]
    pub responses: Vec<String>,
    #[serde(default)]
    pub tool_call: Option<ToolCallTemplate>,
    #[serde(default)]
    pub max_calls: Option<u32>,
    #[serde(default)]
    pub priority: Option<i64>,
}

/// Compile admin-submitted rule entries, returning the insert priority
/// alongside (the last entry that sets one wins).
pub fn compile_admin_rules(entries: &[AddRuleEntry]) -> Result<(Vec<Rule>, i64), MockError> {
    let mut rules = Vec::with_capacity(entries.len());
    let mut priority = 0;
    for entry in entries {
        rules.push(Rule::compile(
            &entry.pattern,
            entry.responses.clone(),
            entry.tool_call.clone(),
            entry.max_calls,
        )?);
        if let Some(p) = entry.priority {
            priority = p;
        }
    }
    Ok((rules, priority))
}

/// A responder that consults the admin rule list first, delegating to the
/// baseline responder when nothing matches.
pub struct AdminResponder {
    state: Arc<AdminState>,
    fallback: Arc<dyn Responder>,
    markov: Arc<MarkovResponder>,
    rng: Mutex<StdRng>,
}

impl AdminResponder {
    pub fn new(
        state: Arc<AdminState>,
        fallback: Arc<dyn Responder>,
        markov: Arc<MarkovResponder>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            state,
            fallback,
            markov,
            rng: Mutex::new(seeded_rng(seed)),
        }
    }
}

impl Responder for AdminResponder {
    fn respond(&self, messages: &[InternalMessage]) -> Result<Reply, MockError> {
        let input = extract_input(messages);
        if input.is_empty() {
            return Err(MockError::NoMessages);
        }
        let rules = self.state.snapshot();
        if let Some(reply) = match_rules(&rules, &input, &self.markov, &self.rng) {
            return Ok(reply);
        }
        self.fallback.respond(messages)
    }
}

// ============== /_mock/* handlers ==============

fn ok_body() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// GET /_mock/rules
pub async fn get_rules(State(state): State<AppState>) -> Response {
    match state.admin() {
        Some(admin) => Json(json!({"rules": admin.rules_json()})).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// POST /_mock/rules
pub async fn post_rules(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, MockError> {
    let Some(admin) = state.admin() else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let req: AddRulesRequest = serde_json::from_slice(&body)?;
    if req.rules.is_empty() {
        return Err(MockError::EmptyMessages("rules"));
    }
    let (rules, priority) = compile_admin_rules(&req.rules)?;
    admin.add_rules(rules, priority);
    Ok((StatusCode::CREATED, ok_body()).into_response())
}

/// DELETE /_mock/rules
pub async fn delete_rules(State(state): State<AppState>) -> Response {
    match state.admin() {
        Some(admin) => {
            admin.reset_rules();
            ok_body().into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// POST /_mock/reset — restores rules and clears the request log; active
/// faults are kept.
pub async fn post_reset(State(state): State<AppState>) -> Response {
    match state.admin() {
        Some(admin) => {
            admin.full_reset();
            ok_body().into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /_mock/requests
pub async fn get_requests(State(state): State<AppState>) -> Response {
    match state.admin() {
        Some(admin) => Json(json!({"requests": admin.requests()})).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// DELETE /_mock/requests
pub async fn delete_requests(State(state): State<AppState>) -> Response {
    match state.admin() {
        Some(admin) => {
            admin.clear_requests();
            ok_body().into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /_mock/faults
pub async fn get_faults(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({"faults": state.faults().list()}))
}

/// Body for `POST /_mock/faults`.
#[derive(Debug, Deserialize)]
pub struct AddFaultsRequest {
    #[serde(default)]
    pub faults: Vec<Fault>,
}

/// POST /_mock/faults
pub async fn post_faults(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, MockError> {
    let req: AddFaultsRequest = serde_json::from_slice(&body)?;
    if req.faults.is_empty() {
        return Err(MockError::EmptyMessages("faults"));
    }
    state.faults().add_faults(req.faults);
    Ok((StatusCode::CREATED, ok_body()).into_response())
}

/// DELETE /_mock/faults
pub async fn delete_faults(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.faults().clear();
    ok_body()
}
