//! Framed JSON-RPC codec.
//!
//! Wraps one bidirectional byte stream in line-delimited JSON-RPC 2.0:
//! one UTF-8 JSON object per line, `\n` terminated. Each codec owns a
//! reader task and a writer task; every send goes through the writer's
//! queue so the transport has a single writer and notifications stay
//! ordered relative to each other.
//!
//! Outgoing request IDs are assigned from a monotonically increasing
//! counter starting at 1. The codec keeps an `outgoing id -> method`
//! table so an arriving response can be tagged with the method of the
//! request that caused it; a response that matches nothing in the table
//! is logged and dropped, never surfaced.
//!
//! Malformed input is answered at this layer: a structurally invalid
//! message that still carried an `id` gets an error response on the same
//! transport, anything else is logged and discarded.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::HubError;
use crate::protocol::jsonrpc::{
    parse_message, JsonRpcId, JsonRpcRequest, JsonRpcResponse, ParsedMessage,
};

/// Outbound queue depth per transport.
const OUTBOUND_QUEUE: usize = 64;

/// Inbound queue depth per transport.
const INBOUND_QUEUE: usize = 64;

/// Append-only debug sink recording every frame on a transport.
///
/// Created from `logging.protocolDebugFile`; the file is truncated at
/// startup and shared by all transports that are given the sink.
pub struct ProtocolDebugSink {
    file: Mutex<std::fs::File>,
}

impl ProtocolDebugSink {
    /// Open (and truncate) the debug file.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            file: Mutex::new(std::fs::File::create(path)?),
        })
    }

    fn record(&self, label: &str, direction: &str, line: &str) {
        if let Ok(mut file) = self.file.lock() {
            // Best effort; the debug sink must never take the hub down.
            let _ = writeln!(file, "{} {} {}", label, direction, line);
        }
    }
}

/// Clonable sending half of a codec.
#[derive(Clone)]
pub struct CodecHandle {
    label: Arc<str>,
    outbound: mpsc::Sender<String>,
    next_id: Arc<AtomicI64>,
    pending: Arc<Mutex<HashMap<i64, String>>>,
}

impl CodecHandle {
    /// Send a request, assigning the next outgoing ID.
    ///
    /// Returns the assigned ID so the caller can correlate the response.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcId, HubError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.pending.lock().expect("pending table poisoned");
            pending.insert(id, method.to_string());
        }
        let request = JsonRpcRequest::new(JsonRpcId::Number(id), method, params);
        let line = serde_json::to_string(&request).map_err(|e| HubError::Internal {
            correlation_id: format!("encode request: {}", e),
        })?;
        if let Err(e) = self.send_line(line).await {
            let mut pending = self.pending.lock().expect("pending table poisoned");
            pending.remove(&id);
            return Err(e);
        }
        Ok(JsonRpcId::Number(id))
    }

    /// Send a success response for the given request ID.
    pub async fn send_response(&self, id: JsonRpcId, result: Value) -> Result<(), HubError> {
        let response = JsonRpcResponse::success(id, result);
        let line = serde_json::to_string(&response).map_err(|e| HubError::Internal {
            correlation_id: format!("encode response: {}", e),
        })?;
        self.send_line(line).await
    }

    /// Send an error response for the given request ID.
    pub async fn send_error(&self, id: JsonRpcId, error: &HubError) -> Result<(), HubError> {
        debug!(
            transport = %self.label,
            code = error.to_jsonrpc_code(),
            error_type = error.error_type_name(),
            "sending error response"
        );
        let response = JsonRpcResponse::error(id, error.to_jsonrpc_error());
        let line = serde_json::to_string(&response).map_err(|e| HubError::Internal {
            correlation_id: format!("encode error: {}", e),
        })?;
        self.send_line(line).await
    }

    /// Send a notification. No ID, no response expected.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), HubError> {
        let notification = JsonRpcRequest::notification(method, params);
        let line = serde_json::to_string(&notification).map_err(|e| HubError::Internal {
            correlation_id: format!("encode notification: {}", e),
        })?;
        self.send_line(line).await
    }

    async fn send_line(&self, line: String) -> Result<(), HubError> {
        self.outbound
            .send(line)
            .await
            .map_err(|_| HubError::Transport {
                details: format!("transport '{}' closed", self.label),
            })
    }
}

/// A framed JSON-RPC codec bound to one byte stream.
pub struct JsonRpcCodec {
    handle: CodecHandle,
    inbound: mpsc::Receiver<ParsedMessage>,
}

impl JsonRpcCodec {
    /// Wrap a stream's read and write halves.
    ///
    /// Spawns the reader and writer tasks immediately. The reader stops
    /// on EOF, on a read error, or when `token` is cancelled; the writer
    /// stops when every [`CodecHandle`] clone is gone or the underlying
    /// write fails permanently.
    pub fn new<R, W>(
        label: &str,
        reader: R,
        writer: W,
        debug_sink: Option<Arc<ProtocolDebugSink>>,
        token: CancellationToken,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let label: Arc<str> = Arc::from(label);
        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ParsedMessage>(INBOUND_QUEUE);

        let handle = CodecHandle {
            label: label.clone(),
            outbound: outbound_tx,
            next_id: Arc::new(AtomicI64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
        };

        tokio::spawn(write_loop(
            label.clone(),
            writer,
            outbound_rx,
            debug_sink.clone(),
        ));
        tokio::spawn(read_loop(
            label,
            reader,
            inbound_tx,
            handle.clone(),
            debug_sink,
            token,
        ));

        Self {
            handle,
            inbound: inbound_rx,
        }
    }

    /// A clonable sending handle for this transport.
    pub fn handle(&self) -> CodecHandle {
        self.handle.clone()
    }

    /// Receive the next inbound message.
    ///
    /// Returns `None` once the transport reached EOF or was cancelled.
    pub async fn recv(&mut self) -> Option<ParsedMessage> {
        self.inbound.recv().await
    }
}

/// Writer task: the transport's single writer.
async fn write_loop<W>(
    label: Arc<str>,
    mut writer: W,
    mut outbound: mpsc::Receiver<String>,
    debug_sink: Option<Arc<ProtocolDebugSink>>,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    while let Some(line) = outbound.recv().await {
        if let Some(sink) = &debug_sink {
            sink.record(&label, ">>>", &line);
        }
        let frame = format!("{}\n", line);
        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            error!(transport = %label, error = %e, "write failed, closing transport");
            return;
        }
        if let Err(e) = writer.flush().await {
            error!(transport = %label, error = %e, "flush failed, closing transport");
            return;
        }
    }
}

/// Reader task: reads lines until EOF or cancellation, classifies them,
/// and forwards requests and matched responses to the session.
async fn read_loop<R>(
    label: Arc<str>,
    reader: R,
    inbound: mpsc::Sender<ParsedMessage>,
    handle: CodecHandle,
    debug_sink: Option<Arc<ProtocolDebugSink>>,
    token: CancellationToken,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => {
                debug!(transport = %label, "reader cancelled");
                return;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(transport = %label, "transport reached EOF");
                return;
            }
            Err(e) => {
                warn!(transport = %label, error = %e, "read failed, closing transport");
                return;
            }
        };

        if line.trim().is_empty() {
            continue;
        }
        if let Some(sink) = &debug_sink {
            sink.record(&label, "<<<", &line);
        }

        let message = match parse_message(&line) {
            Ok(message) => message,
            Err(failure) => {
                warn!(
                    transport = %label,
                    error = %failure.error,
                    "discarding unparseable frame"
                );
                if let Some(id) = failure.id {
                    // Best effort: the peer may already be gone.
                    let _ = handle.send_error(id, &failure.error).await;
                }
                continue;
            }
        };

        let message = match message {
            ParsedMessage::Response(mut response) => {
                let method = response.id.as_number().and_then(|n| {
                    let mut pending = handle.pending.lock().expect("pending table poisoned");
                    pending.remove(&n)
                });
                match method {
                    Some(method) => {
                        response.method = Some(method);
                        ParsedMessage::Response(response)
                    }
                    None => {
                        warn!(
                            transport = %label,
                            id = %response.id,
                            "response matches no outstanding request, discarding"
                        );
                        continue;
                    }
                }
            }
            request => request,
        };

        if inbound.send(message).await.is_err() {
            // Session is gone; nothing left to deliver to.
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// A codec on one end of an in-memory stream, with raw access to the
    /// other end.
    fn codec_pair() -> (
        JsonRpcCodec,
        tokio::io::WriteHalf<tokio::io::DuplexStream>,
        BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
    ) {
        let (ours, theirs) = duplex(4096);
        let (read_half, write_half) = split(ours);
        let codec = JsonRpcCodec::new(
            "test",
            read_half,
            write_half,
            None,
            CancellationToken::new(),
        );
        let (peer_read, peer_write) = split(theirs);
        (codec, peer_write, BufReader::new(peer_read))
    }

    #[tokio::test]
    async fn test_inbound_request_delivery() {
        let (mut codec, mut peer, _peer_read) = codec_pair();
        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n")
            .await
            .unwrap();

        match codec.recv().await.unwrap() {
            ParsedMessage::Request(req) => {
                assert_eq!(req.method, "tools/list");
                assert_eq!(req.id, Some(JsonRpcId::Number(1)));
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_response_framing() {
        let (codec, _peer, mut peer_read) = codec_pair();
        codec
            .handle()
            .send_response(JsonRpcId::Number(2), serde_json::json!({"tools": []}))
            .await
            .unwrap();

        let mut line = String::new();
        peer_read.read_line(&mut line).await.unwrap();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 2);
        assert_eq!(value["result"]["tools"], serde_json::json!([]));
        assert!(value.get("error").is_none());
    }

    #[tokio::test]
    async fn test_outgoing_ids_start_at_one_and_increase() {
        let (codec, _peer, mut peer_read) = codec_pair();
        let handle = codec.handle();

        let first = handle.send_request("tools/call", None).await.unwrap();
        let second = handle.send_request("tools/call", None).await.unwrap();
        assert_eq!(first, JsonRpcId::Number(1));
        assert_eq!(second, JsonRpcId::Number(2));

        let mut line = String::new();
        peer_read.read_line(&mut line).await.unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 1);
    }

    #[tokio::test]
    async fn test_response_tagged_with_request_method() {
        let (mut codec, mut peer, mut peer_read) = codec_pair();
        let id = codec
            .handle()
            .send_request("tools/call", Some(serde_json::json!({"name": "echo"})))
            .await
            .unwrap();

        // Drain the request from the peer side, then respond to it.
        let mut line = String::new();
        peer_read.read_line(&mut line).await.unwrap();
        let reply = format!(
            "{{\"jsonrpc\":\"2.0\",\"id\":{},\"result\":{{\"content\":[],\"isError\":false}}}}\n",
            id.as_number().unwrap()
        );
        peer.write_all(reply.as_bytes()).await.unwrap();

        match codec.recv().await.unwrap() {
            ParsedMessage::Response(resp) => {
                assert_eq!(resp.method.as_deref(), Some("tools/call"));
                assert_eq!(resp.id, id);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unmatched_response_discarded() {
        let (mut codec, mut peer, _peer_read) = codec_pair();
        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":99,\"result\":{}}\n")
            .await
            .unwrap();
        // Follow with a request so recv() has something to yield; the
        // spurious response must not come through first.
        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();

        match codec.recv().await.unwrap() {
            ParsedMessage::Request(req) => assert_eq!(req.method, "ping"),
            other => panic!("spurious response was forwarded: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_message_with_id_gets_error_reply() {
        let (_codec, mut peer, mut peer_read) = codec_pair();
        peer.write_all(b"{\"id\":5,\"method\":\"x\"}\n").await.unwrap();

        let mut line = String::new();
        peer_read.read_line(&mut line).await.unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 5);
        assert_eq!(value["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_unparseable_line_without_id_discarded() {
        let (mut codec, mut peer, _peer_read) = codec_pair();
        peer.write_all(b"not json at all\n").await.unwrap();
        peer.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"n\"}\n")
            .await
            .unwrap();

        match codec.recv().await.unwrap() {
            ParsedMessage::Request(req) => assert!(req.is_notification()),
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eof_ends_stream() {
        let (mut codec, peer, _peer_read) = codec_pair();
        drop(peer);
        drop(_peer_read);
        assert!(codec.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream() {
        let (ours, _theirs) = duplex(4096);
        let (read_half, write_half) = split(ours);
        let token = CancellationToken::new();
        let mut codec = JsonRpcCodec::new("test", read_half, write_half, None, token.clone());
        token.cancel();
        assert!(codec.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_notifications_keep_send_order() {
        let (codec, _peer, mut peer_read) = codec_pair();
        let handle = codec.handle();
        for i in 0..10 {
            handle
                .send_notification(
                    "notifications/resources/updated",
                    Some(serde_json::json!({"uri": format!("file:///{i}")})),
                )
                .await
                .unwrap();
        }
        for i in 0..10 {
            let mut line = String::new();
            peer_read.read_line(&mut line).await.unwrap();
            let value: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(value["params"]["uri"], format!("file:///{i}"));
        }
    }
}
