//! Common test utilities: server spawning, request builders, SSE parsing.

use std::net::SocketAddr;

use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use llmock::server::{create_router, AppState};
use llmock::Config;

/// A mock server bound to an ephemeral port, shut down on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub base_url: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

/// Deterministic test configuration: fixed seed, no streaming delay.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.defaults.seed = Some(42);
    config.defaults.token_delay_ms = Some(0);
    config
}

/// Parse a YAML config on top of the deterministic test defaults.
pub fn config_from_yaml(yaml: &str) -> Config {
    let mut config = Config::parse(yaml, "test.yaml").expect("test config");
    if config.defaults.seed.is_none() {
        config.defaults.seed = Some(42);
    }
    if config.defaults.token_delay_ms.is_none() {
        config.defaults.token_delay_ms = Some(0);
    }
    config
}

impl TestServer {
    /// Spawn with the deterministic defaults (echo responder).
    pub async fn spawn() -> Self {
        Self::spawn_with_config(test_config()).await
    }

    pub async fn spawn_with_config(config: Config) -> Self {
        let state = AppState::new(config).expect("valid test config");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = create_router(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            base_url: format!("http://{addr}"),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn post_raw(&self, path: &str, body: &str) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client.delete(self.url(path)).send().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A minimal OpenAI chat request.
pub fn chat_request(model: &str, message: &str) -> Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": message}]
    })
}

/// A minimal Anthropic messages request.
pub fn anthropic_request(model: &str, message: &str) -> Value {
    json!({
        "model": model,
        "max_tokens": 1024,
        "messages": [{"role": "user", "content": message}]
    })
}

/// A minimal Gemini generateContent request.
pub fn gemini_request(message: &str) -> Value {
    json!({
        "contents": [{"role": "user", "parts": [{"text": message}]}]
    })
}

/// Extract the payloads of all `data:` lines from an SSE body.
pub fn sse_data_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

/// Extract `(event, data)` pairs from a named-event SSE body.
pub fn sse_events(body: &str) -> Vec<(String, String)> {
    let mut events = Vec::new();
    let mut current_event = String::new();
    for line in body.lines() {
        if let Some(name) = line.strip_prefix("event: ") {
            current_event = name.to_string();
        } else if let Some(data) = line.strip_prefix("data: ") {
            events.push((current_event.clone(), data.to_string()));
        }
    }
    events
}
