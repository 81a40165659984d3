//! Control plane over newline-delimited JSON-RPC.
//!
//! Reads one JSON-RPC request per line, dispatches it through the control
//! plane, and writes the response as a single line. Typically wired to
//! stdin/stdout so an MCP client can drive the server as a subprocess.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::control::ControlPlane;
use super::handle_jsonrpc_bytes;

/// Maximum accepted line length (1 MiB), for oversized JSON-RPC messages.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Runs the MCP control plane over a reader/writer pair.
pub struct StdioTransport {
    control: Arc<ControlPlane>,
}

impl StdioTransport {
    pub fn new(control: Arc<ControlPlane>) -> Self {
        Self { control }
    }

    /// Read requests line by line until EOF, writing one response line per
    /// request. Blank lines are skipped.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: tokio::io::AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::with_capacity(64 * 1024, reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                continue;
            }
            if line.len() > MAX_LINE_BYTES {
                continue;
            }
            let response =
                handle_jsonrpc_bytes(line.as_bytes(), |req| self.control.dispatch(req));
            let mut data = serde_json::to_vec(&response).unwrap_or_default();
            data.push(b'\n');
            writer.write_all(&data).await?;
            writer.flush().await?;
        }
        Ok(())
    }
}
