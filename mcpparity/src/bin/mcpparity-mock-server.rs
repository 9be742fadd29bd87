//! A scriptable MCP server over stdio, used by the end-to-end tests.
//!
//! Behaviour is selected through environment variables:
//!
//! - `MOCK_BANNER=1`: print non-protocol lines on stdout before serving
//! - `MOCK_HANDSHAKE=error|hang|exit|nocaps`: misbehave during the handshake
//! - `MOCK_STRING_IDS=1`: echo request ids back as strings
//! - `MOCK_TOOLS=a,b`: override the advertised tool list
//!
//! Tools:
//!
//! - `echo {text}`: a text entry with `text`
//! - `fail {message}`: an `isError` result
//! - `error`: a JSON-RPC error response
//! - `slow {ms, text}`: `echo`, answered from a thread after `ms`
//! - `hang`: never answered
//! - `crash`: the process exits without answering
//! - `image`: a base64 image entry

#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{Value, json};

const TOOLS: &[&str] = &["echo", "fail", "error", "slow", "hang", "crash", "image"];

type Out = Arc<Mutex<io::Stdout>>;

fn emit(out: &Out, line: &str) {
    if let Ok(mut stdout) = out.lock() {
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }
}

fn flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1")
}

struct Server {
    out: Out,
    handshake: Option<String>,
    string_ids: bool,
    tools: Vec<String>,
}

impl Server {
    fn reply(&self, id: &Value, body: Value) {
        emit(&self.out, &self.envelope(id, body).to_string());
    }

    fn envelope(&self, id: &Value, body: Value) -> Value {
        let id = match id {
            Value::Number(n) if self.string_ids => Value::String(n.to_string()),
            other => other.clone(),
        };
        let mut message = json!({"jsonrpc": "2.0", "id": id});
        if let (Some(target), Some(body)) = (message.as_object_mut(), body.as_object()) {
            target.extend(body.clone());
        }
        message
    }

    fn handle(&self, request: &Value) {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");

        match method {
            "initialize" => self.initialize(&id),
            "notifications/initialized" => eprintln!("mock: client initialized"),
            "tools/list" => {
                let tools: Vec<Value> = self
                    .tools
                    .iter()
                    .map(|name| json!({"name": name, "inputSchema": {"type": "object"}}))
                    .collect();
                self.reply(&id, json!({"result": {"tools": tools}}));
            }
            "tools/call" => self.call(&id, request.get("params").unwrap_or(&Value::Null)),
            _ if id.is_null() => {}
            other => self.reply(
                &id,
                json!({"error": {"code": -32601, "message": format!("Method not found: {other}")}}),
            ),
        }
    }

    fn initialize(&self, id: &Value) {
        match self.handshake.as_deref() {
            Some("error") => self.reply(
                id,
                json!({"error": {"code": -32603, "message": "initialization refused"}}),
            ),
            Some("hang") => {}
            Some("exit") => std::process::exit(4),
            Some("nocaps") => self.reply(id, json!({"result": {"protocolVersion": "2025-06-18"}})),
            _ => self.reply(
                id,
                json!({"result": {
                    "protocolVersion": "2025-06-18",
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": "mcpparity-mock-server", "version": env!("CARGO_PKG_VERSION")}
                }}),
            ),
        }
    }

    fn call(&self, id: &Value, params: &Value) {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);
        let text = |key: &str, default: &str| {
            args.get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };

        match name {
            "echo" => self.reply(id, text_result(&text("text", ""))),
            "fail" => self.reply(
                id,
                json!({"result": {
                    "content": [{"type": "text", "text": text("message", "intentional failure")}],
                    "isError": true
                }}),
            ),
            "error" => self.reply(
                id,
                json!({"error": {"code": -32000, "message": "tool error requested"}}),
            ),
            "slow" => {
                let delay = Duration::from_millis(args.get("ms").and_then(Value::as_u64).unwrap_or(200));
                let message = self.envelope(id, text_result(&text("text", "")));
                let out = Arc::clone(&self.out);
                thread::spawn(move || {
                    thread::sleep(delay);
                    emit(&out, &message.to_string());
                });
            }
            "hang" => {}
            "crash" => {
                eprintln!("mock: crashing on request");
                std::process::exit(3);
            }
            "image" => self.reply(
                id,
                json!({"result": {"content": [
                    {"type": "image", "data": "iVBORw0KGgo=", "mimeType": "image/png"}
                ]}}),
            ),
            other => self.reply(
                id,
                json!({"error": {"code": -32602, "message": format!("Unknown tool: {other}")}}),
            ),
        }
    }
}

fn text_result(text: &str) -> Value {
    json!({"result": {"content": [{"type": "text", "text": text}]}})
}

fn main() {
    let out: Out = Arc::new(Mutex::new(io::stdout()));
    let server = Server {
        out: Arc::clone(&out),
        handshake: std::env::var("MOCK_HANDSHAKE").ok(),
        string_ids: flag("MOCK_STRING_IDS"),
        tools: std::env::var("MOCK_TOOLS").map_or_else(
            |_| TOOLS.iter().map(ToString::to_string).collect(),
            |list| list.split(',').map(str::to_string).collect(),
        ),
    };

    eprintln!("mock: starting");
    if flag("MOCK_BANNER") {
        emit(&out, "mcpparity mock server starting up...");
        emit(&out, r#"{"level":"info","msg":"listening on stdio"}"#);
        emit(&out, "");
    }

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        let Ok(request) = serde_json::from_str::<Value>(&line) else {
            eprintln!("mock: ignoring unparsable line");
            continue;
        };
        server.handle(&request);
    }
    eprintln!("mock: stdin closed");
}
