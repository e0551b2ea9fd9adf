//! Newline-delimited JSON-RPC 2.0 over stdin/stdout
//!
//! Each request runs on its own task so a long export never blocks queries
//! or `cancel_export`. Responses go through one writer task; stdout carries
//! nothing but protocol lines.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use super::server::AbletonMcp;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn error_response(id: Value, err: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": err.code, "message": err.message }
    })
}

/// Serve MCP on the process's stdin/stdout until stdin closes
pub async fn serve_stdio(mcp: Arc<AbletonMcp>) -> Result<()> {
    serve(mcp, tokio::io::stdin(), tokio::io::stdout()).await
}

pub async fn serve<R, W>(mcp: Arc<AbletonMcp>, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    info!("📡 MCP server listening on stdio");
    let mut lines = LinesStream::new(BufReader::new(reader).lines());
    let mut requests = JoinSet::new();

    while let Some(line) = lines.next().await {
        let line = line.context("Failed to read from stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!("Unparseable JSON-RPC line: {}", e);
                let response = error_response(Value::Null, RpcError::new(PARSE_ERROR, format!("Parse error: {}", e)));
                let _ = tx.send(response.to_string());
                continue;
            },
        };

        let mcp = Arc::clone(&mcp);
        let tx = tx.clone();
        requests.spawn(async move {
            if let Some(response) = handle_message(&mcp, message).await {
                let _ = tx.send(response.to_string());
            }
        });

        // Reap finished requests as we go
        while let Some(done) = requests.try_join_next() {
            if let Err(e) = done {
                warn!("Request task failed: {}", e);
            }
        }
    }

    debug!("stdin closed; waiting for {} in-flight request(s)", requests.len());
    while let Some(done) = requests.join_next().await {
        if let Err(e) = done {
            warn!("Request task failed: {}", e);
        }
    }

    drop(tx);
    writer_task
        .await
        .context("Writer task panicked")?
        .context("Failed to write to stdout")?;
    info!("MCP session ended");
    Ok(())
}

/// Handle one JSON-RPC message; `None` for notifications and stray responses
async fn handle_message(mcp: &AbletonMcp, message: Value) -> Option<Value> {
    let Some(object) = message.as_object() else {
        return Some(error_response(
            Value::Null,
            RpcError::new(INVALID_REQUEST, "Invalid Request: expected an object"),
        ));
    };

    let id = object.get("id").cloned();
    let Some(method) = object.get("method").and_then(Value::as_str) else {
        // A response to something we never sent, or garbage with an id
        return id.map(|id| error_response(id, RpcError::new(INVALID_REQUEST, "Invalid Request: missing method")));
    };
    let params = object.get("params").cloned().unwrap_or_else(|| json!({}));

    let outcome = match method {
        "initialize" => Ok(initialize_result(&params)),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(AbletonMcp::list_tools()),
        "tools/call" => call_tool(mcp, &params).await,
        m if m.starts_with("notifications/") => {
            debug!("notification {}", m);
            return None;
        },
        _ => Err(RpcError::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))),
    };

    // Notifications never get a response, even on error
    let id = id?;
    Some(match outcome {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(err) => error_response(id, err),
    })
}

fn initialize_result(params: &Value) -> Value {
    let version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(PROTOCOL_VERSION);
    if let Some(client) = params.get("clientInfo").and_then(|c| c.get("name")) {
        info!("🤝 MCP client connected: {}", client);
    }
    json!({
        "protocolVersion": version,
        "capabilities": { "tools": {} },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

async fn call_tool(mcp: &AbletonMcp, params: &Value) -> Result<Value, RpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::new(INVALID_PARAMS, "tools/call requires a tool name"))?;
    if !AbletonMcp::has_tool(name) {
        return Err(RpcError::new(INVALID_PARAMS, format!("Unknown tool: {}", name)));
    }
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    Ok(mcp.handle_tool_call(name, &arguments).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::context::BridgeContext;
    use crate::export::GuiAutomation;
    use crate::osc::OscTransport;
    use crate::testing::{demo_set, FakeAutomation, FakeLive};
    use tokio::io::AsyncReadExt;

    fn mcp() -> Arc<AbletonMcp> {
        let ctx = BridgeContext::with_parts(
            AppConfig::default(),
            Arc::new(FakeLive::new(demo_set())) as Arc<dyn OscTransport>,
            Arc::new(FakeAutomation::new()) as Arc<dyn GuiAutomation>,
        );
        Arc::new(AbletonMcp::new(Arc::new(ctx)))
    }

    async fn exchange(input: &str) -> Vec<Value> {
        let (mut client, server_side) = tokio::io::duplex(1 << 16);
        serve(mcp(), input.as_bytes(), server_side).await.unwrap();

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn by_id(responses: &[Value], id: i64) -> &Value {
        responses.iter().find(|r| r["id"] == id).unwrap()
    }

    #[tokio::test]
    async fn test_session_over_stdio() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","clientInfo":{"name":"test"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"list_groups","arguments":{}}}"#,
            "\n",
        );
        let responses = exchange(input).await;

        // The notification and the blank line produce nothing
        assert_eq!(responses.len(), 3);
        assert_eq!(by_id(&responses, 1)["result"]["serverInfo"]["name"], "ableton-mcp");
        assert_eq!(
            by_id(&responses, 2)["result"]["tools"].as_array().unwrap().len(),
            13
        );
        let call = &by_id(&responses, 3)["result"];
        assert_eq!(call["isError"], false);
        assert!(call["content"][0]["text"].as_str().unwrap().contains("Amin - 143bpm"));
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let input = concat!(
            "{not json\n",
            r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":8,"method":"tools/call","params":{"name":"format_disk"}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":10,"method":"ping"}"#,
            "\n",
        );
        let responses = exchange(input).await;

        let parse_error = responses.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(parse_error["error"]["code"], PARSE_ERROR);
        assert_eq!(by_id(&responses, 7)["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(by_id(&responses, 8)["error"]["code"], INVALID_PARAMS);
        assert_eq!(by_id(&responses, 9)["error"]["code"], INVALID_PARAMS);
        assert_eq!(by_id(&responses, 10)["result"], json!({}));
    }

    #[tokio::test]
    async fn test_tool_failure_is_in_band() {
        let responses = exchange(concat!(
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"get_track_info","arguments":{"track_index":40}}}"#,
            "\n"
        ))
        .await;

        let result = &by_id(&responses, 4)["result"];
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("NotFoundError"));
    }
}
