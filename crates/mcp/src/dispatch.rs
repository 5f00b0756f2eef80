//! JSON-RPC 2.0 dispatch over the tool layer (spec §6/§7), and the stdio
//! server loop the `roux` binary runs.

use crate::tools;
use roux_store::Store;
use serde_json::{json, Value};
use std::io::{self, BufRead, Write as IoWrite};

const PROTOCOL_VERSION: &str = "2025-06-18";

/// Handle one parsed JSON-RPC request/notification. Returns `None` for
/// notifications, which produce no response.
pub fn dispatch_jsonrpc(store: &Store, msg: &Value) -> Option<Value> {
    let method = msg["method"].as_str().unwrap_or("");
    let id = msg.get("id").cloned();

    if id.is_none() || method.starts_with("notifications/") {
        return None;
    }

    let response = match method {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": false } },
                "serverInfo": { "name": "roux", "version": env!("CARGO_PKG_VERSION") }
            }
        }),
        "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "tools": tools::tool_definitions() }
        }),
        "tools/call" => {
            let tool_name = msg["params"]["name"].as_str().unwrap_or("");
            let arguments = msg["params"].get("arguments").cloned().unwrap_or(json!({}));
            json!({ "jsonrpc": "2.0", "id": id, "result": call_tool(store, tool_name, &arguments) })
        }
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": "Method not found" }
        }),
    };

    Some(response)
}

/// Invoke one tool and shape its outcome into the MCP content envelope.
/// Every outcome — success or the structured `{code, message}` error from
/// §7 — rides back as a normal JSON-RPC *result*; only malformed requests
/// (unknown method, bad JSON) use the JSON-RPC `error` field.
fn call_tool(store: &Store, name: &str, arguments: &Value) -> Value {
    match tools::call(store, name, arguments) {
        Ok(result) => json!({
            "content": [{ "type": "text", "text": result.to_string() }],
            "structuredContent": result,
            "isError": false
        }),
        Err(e) => {
            let error = json!({ "code": e.kind.code(), "message": e.message });
            json!({
                "content": [{ "type": "text", "text": error.to_string() }],
                "structuredContent": { "error": error },
                "isError": true
            })
        }
    }
}

/// Run the JSON-RPC stdio loop: one request per line on stdin, one
/// response per line on stdout. Per-line parse failures are reported and
/// do not terminate the loop.
pub fn run_stdio_loop(store: &Store) {
    let stdin = io::stdin();
    let stdout = io::stdout();

    tracing::info!("roux MCP server ready, reading JSON-RPC from stdin");

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                write_response(&stdout, &json!({
                    "jsonrpc": "2.0",
                    "id": Value::Null,
                    "error": { "code": -32700, "message": "Parse error" }
                }));
                continue;
            }
        };

        if let Some(response) = dispatch_jsonrpc(store, &msg) {
            write_response(&stdout, &response);
        }
    }
}

fn write_response(stdout: &io::Stdout, response: &Value) {
    let mut out = stdout.lock();
    if writeln!(out, "{response}").is_ok() {
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roux_core::types::{CacheConfig, Config, ProvidersConfig, SourceConfig, WatcherConfig};

    fn test_store(dir: &std::path::Path) -> Store {
        std::fs::write(dir.join("a.md"), "Links to [[b]].").unwrap();
        let config = Config {
            source: SourceConfig { path: dir.to_string_lossy().to_string() },
            cache: CacheConfig::default(),
            providers: ProvidersConfig::default(),
            watcher: WatcherConfig::default(),
            extensions: vec![".md".to_string()],
        };
        Store::open(config).unwrap()
    }

    #[test]
    fn notification_produces_no_response() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let msg = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        assert!(dispatch_jsonrpc(&store, &msg).is_none());
    }

    #[test]
    fn unknown_method_is_jsonrpc_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let msg = json!({ "jsonrpc": "2.0", "id": 1, "method": "bogus" });
        let resp = dispatch_jsonrpc(&store, &msg).unwrap();
        assert_eq!(resp["error"]["code"], -32601);
    }

    #[test]
    fn tool_call_success_has_structured_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let msg = json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": { "name": "list_nodes", "arguments": {} }
        });
        let resp = dispatch_jsonrpc(&store, &msg).unwrap();
        assert_eq!(resp["result"]["isError"], false);
        assert!(resp["result"]["structuredContent"]["total"].as_u64().is_some());
    }

    #[test]
    fn tool_call_failure_carries_code_and_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let msg = json!({
            "jsonrpc": "2.0", "id": 1, "method": "tools/call",
            "params": { "name": "get_node", "arguments": { "id": "missing.md" } }
        });
        let resp = dispatch_jsonrpc(&store, &msg).unwrap();
        assert_eq!(resp["result"]["isError"], true);
        assert_eq!(resp["result"]["structuredContent"]["error"]["code"], "node_not_found");
    }
}
