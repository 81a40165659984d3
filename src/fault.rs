//! Fault injection: errors, delays, timeouts, malformed bodies, rate limits.
//!
//! Faults are evaluated before the responder runs. Evaluation walks the
//! active fault list in insertion order under one mutex; the probability
//! draw and the count decrement (with possible removal) are a single
//! atomic step.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{protocol_error, ApiFlavor};
use crate::markov::seeded_rng;
use crate::server::streaming::{hanging_sse_response, SseFrame};

/// The kind of fault to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// HTTP error response with the configured status and message.
    Error,
    /// Added latency before responding normally.
    Delay,
    /// Accept the connection, optionally start streaming, then hang.
    Timeout,
    /// Invalid JSON or a broken SSE stream.
    Malformed,
    /// 429 with a Retry-After header and the appropriate error body.
    RateLimit,
}

/// A fault to inject into the request pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fault {
    #[serde(rename = "type")]
    pub kind: FaultKind,
    #[serde(default, skip_serializing_if = "is_zero_u16")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub delay_ms: u64,
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub probability: f64,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub count: u32,
}

fn is_zero_u16(v: &u16) -> bool {
    *v == 0
}
fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}
fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

impl Fault {
    pub fn new(kind: FaultKind) -> Self {
        Self {
            kind,
            status: 0,
            message: String::new(),
            error_type: String::new(),
            delay_ms: 0,
            probability: 0.0,
            count: 0,
        }
    }
}

/// A fault with remaining-count tracking. Zero means unlimited.
#[derive(Debug, Clone)]
struct ActiveFault {
    fault: Fault,
    remaining: u32,
}

struct FaultInner {
    faults: Vec<ActiveFault>,
    rng: StdRng,
}

/// The global fault list shared across requests.
pub struct FaultState {
    inner: Mutex<FaultInner>,
}

impl FaultState {
    pub fn new(initial: Vec<Fault>, seed: Option<u64>) -> Self {
        let faults = initial
            .into_iter()
            .map(|f| ActiveFault {
                remaining: f.count,
                fault: f,
            })
            .collect();
        Self {
            inner: Mutex::new(FaultInner {
                faults,
                rng: seeded_rng(seed),
            }),
        }
    }

    /// Check whether a fault should fire for this request. Decrements
    /// count-limited faults and removes exhausted ones.
    pub fn evaluate(&self) -> Option<Fault> {
        let mut inner = self.inner.lock();
        let mut i = 0;
        while i < inner.faults.len() {
            // probability <= 0 means "always": the configuration shape
            // makes omission mean fire on every request.
            let prob = inner.faults[i].fault.probability;
            let prob = if prob <= 0.0 { 1.0 } else { prob };
            if prob < 1.0 && inner.rng.gen::<f64>() >= prob {
                i += 1;
                continue;
            }
            let fault = inner.faults[i].fault.clone();
            if inner.faults[i].remaining > 0 {
                inner.faults[i].remaining -= 1;
                if inner.faults[i].remaining == 0 {
                    inner.faults.remove(i);
                }
            }
            return Some(fault);
        }
        None
    }

    pub fn add_faults(&self, faults: Vec<Fault>) {
        let mut inner = self.inner.lock();
        for f in faults {
            inner.faults.push(ActiveFault {
                remaining: f.count,
                fault: f,
            });
        }
    }

    pub fn clear(&self) {
        self.inner.lock().faults.clear();
    }

    /// A copy of the current faults for inspection.
    pub fn list(&self) -> Vec<Fault> {
        self.inner.lock().faults.iter().map(|f| f.fault.clone()).collect()
    }
}

/// The result of executing a fault.
pub enum FaultOutcome {
    /// The pipeline continues normally (delay faults after sleeping).
    Continue,
    /// The fault fully handled the request.
    Respond(Response),
}

/// Execute an already-triggered fault. Delay faults sleep and continue;
/// every other kind produces the final response. Timeout faults never
/// resolve: the future (or stream) pends until the client disconnects and
/// the runtime drops it.
pub async fn execute_fault(fault: &Fault, flavor: ApiFlavor, streaming: bool) -> FaultOutcome {
    match fault.kind {
        FaultKind::Delay => {
            if fault.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(fault.delay_ms)).await;
            }
            FaultOutcome::Continue
        }

        FaultKind::Error => {
            let status = StatusCode::from_u16(fault.status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            FaultOutcome::Respond(fault_error_response(
                flavor,
                status,
                &fault.error_type,
                &fault.message,
            ))
        }

        FaultKind::RateLimit => {
            let message = if fault.message.is_empty() {
                "rate limit exceeded"
            } else {
                &fault.message
            };
            let mut response = fault_error_response(
                flavor,
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                message,
            );
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
            FaultOutcome::Respond(response)
        }

        FaultKind::Timeout => {
            if streaming {
                FaultOutcome::Respond(hanging_sse_response(vec![timeout_open_frame(flavor)]))
            } else {
                // Block until the client gives up; the request future is
                // dropped on disconnect.
                futures::future::pending().await
            }
        }

        FaultKind::Malformed => {
            let response = if streaming {
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    "data: {\"broken json\n\ndata: not-valid\n\n",
                )
                    .into_response()
            } else {
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    r#"{"broken": json, not valid}"#,
                )
                    .into_response()
            };
            FaultOutcome::Respond(response)
        }
    }
}

fn fault_error_response(
    flavor: ApiFlavor,
    status: StatusCode,
    error_type: &str,
    message: &str,
) -> Response {
    let error_type = if error_type.is_empty() {
        "server_error"
    } else {
        error_type
    };
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("error")
    } else {
        message
    };
    protocol_error(flavor, status, error_type, message)
}

/// The minimal opening event written before a streaming timeout hangs.
fn timeout_open_frame(flavor: ApiFlavor) -> SseFrame {
    match flavor {
        ApiFlavor::Anthropic => SseFrame::event(
            "message_start",
            json!({
                "type": "message_start",
                "message": {"id": "msg_timeout", "type": "message", "role": "assistant"}
            })
            .to_string(),
        ),
        ApiFlavor::Gemini => SseFrame::data(
            json!({
                "candidates": [
                    {"content": {"role": "model", "parts": [{"text": ""}]}}
                ]
            })
            .to_string(),
        ),
        ApiFlavor::OpenAi => SseFrame::data(
            json!({
                "id": "chatcmpl-timeout",
                "object": "chat.completion.chunk",
                "choices": [{"delta": {"role": "assistant"}, "index": 0}]
            })
            .to_string(),
        ),
    }
}
