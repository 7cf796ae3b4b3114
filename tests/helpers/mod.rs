//! Shared fixtures: an in-memory MCP client, a hub stack with a mux
//! listener on an ephemeral port, and a scriptable fake proxy.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use mcphub::error::HubError;
use mcphub::mux::MuxServer;
use mcphub::prompts::PromptsRegistry;
use mcphub::protocol::mcp::ServerInfo;
use mcphub::registry::provider::ToolContext;
use mcphub::registry::ToolsRegistry;
use mcphub::session::McpSession;
use mcphub::transport::JsonRpcCodec;

/// An MCP client talking to the hub over an in-memory duplex stream.
pub struct TestClient {
    writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    reader: BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
}

impl TestClient {
    pub async fn send(&mut self, value: Value) {
        let line = format!("{}\n", value);
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    /// Read the next frame of any kind.
    pub async fn recv(&mut self) -> Value {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "hub closed the client transport");
        serde_json::from_str(&line).unwrap()
    }

    /// Read frames until the response with the given id arrives,
    /// collecting notifications seen on the way.
    pub async fn recv_response(&mut self, id: i64) -> Value {
        for _ in 0..32 {
            let frame = self.recv().await;
            if frame.get("id") == Some(&json!(id)) {
                return frame;
            }
            assert!(
                frame.get("method").is_some(),
                "unexpected frame while waiting for id {}: {}",
                id,
                frame
            );
        }
        panic!("no response for id {}", id);
    }

    /// Run the initialize handshake.
    pub async fn initialize(&mut self) {
        self.send(json!({
            "jsonrpc": "2.0", "id": 1, "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "clientInfo": {"name": "test-client", "version": "0.1"},
                "capabilities": {}
            }
        }))
        .await;
        let reply = self.recv_response(1).await;
        assert!(reply.get("result").is_some(), "initialize failed: {}", reply);
        self.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
    }
}

/// A running hub stack: client session plus mux listener.
pub struct TestHub {
    pub client: TestClient,
    pub mux_addr: SocketAddr,
    pub registry: Arc<ToolsRegistry>,
    pub token: CancellationToken,
    pub session_task: tokio::task::JoinHandle<Result<(), HubError>>,
    pub mux_task: tokio::task::JoinHandle<Result<(), HubError>>,
}

/// Start a hub with an empty registry, an in-memory client transport,
/// and a mux listener on an ephemeral loopback port.
pub async fn start_hub() -> TestHub {
    let token = CancellationToken::new();
    let registry = Arc::new(ToolsRegistry::new());
    registry
        .prepare(&ToolContext::new(token.clone()), &[])
        .await
        .unwrap();

    let (ours, theirs) = duplex(16 * 1024);
    let (read_half, write_half) = split(ours);
    let codec = JsonRpcCodec::new("mcp", read_half, write_half, None, token.clone());
    let session = McpSession::new(
        ServerInfo {
            name: "test-hub".into(),
            version: "0.0.0".into(),
        },
        registry.clone(),
        Arc::new(PromptsRegistry::empty()),
        codec,
    )
    .with_call_timeout(Duration::from_secs(5));
    let notifier = session.notifier();

    let mux = MuxServer::bind("127.0.0.1:0", registry.clone(), notifier)
        .await
        .unwrap();
    let mux_addr = mux.local_addr().unwrap();

    let session_task = tokio::spawn(session.run(token.clone()));
    let mux_task = tokio::spawn(mux.run(token.clone()));

    let (peer_read, peer_write) = split(theirs);
    TestHub {
        client: TestClient {
            writer: peer_write,
            reader: BufReader::new(peer_read),
        },
        mux_addr,
        registry,
        token,
        session_task,
        mux_task,
    }
}

/// A fake proxy process speaking raw JSON lines over TCP.
pub struct FakeProxy {
    writer: tokio::net::tcp::OwnedWriteHalf,
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    next_id: i64,
}

impl FakeProxy {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Self {
            writer: write_half,
            reader: BufReader::new(read_half),
            next_id: 1,
        }
    }

    pub async fn send(&mut self, value: Value) {
        let line = format!("{}\n", value);
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    /// Read the next frame; None on EOF (hub closed the session).
    pub async fn recv(&mut self) -> Option<Value> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        if n == 0 {
            return None;
        }
        Some(serde_json::from_str(&line).unwrap())
    }

    /// Register under a proxy id, optionally with tools, and return the
    /// register result.
    pub async fn register(&mut self, proxy_id: &str, tools: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        self.send(json!({
            "jsonrpc": "2.0", "id": id, "method": "proxy/register",
            "params": {
                "protocolVersion": "1.0",
                "proxyId": proxy_id,
                "proxy": {
                    "workingDirectory": "/work",
                    "command": "fake-proxy",
                    "args": []
                },
                "serverInfo": {"name": "fake-backend", "version": "1.0"},
                "tools": tools
            }
        }))
        .await;
        let reply = self.recv().await.expect("register reply");
        assert_eq!(reply["id"], id);
        reply
    }

    /// The echo tool descriptor used across the forwarding scenarios.
    pub fn echo_tool() -> Value {
        json!([{
            "name": "echo",
            "description": "Echo text back",
            "inputSchema": {
                "type": "object",
                "required": ["text"],
                "properties": {"text": {"type": "string"}}
            }
        }])
    }
}
