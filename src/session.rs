//! Client-facing MCP session.
//!
//! Applies the protocol state machine to messages arriving on the
//! primary transport and emits the replies:
//!
//! ```text
//! awaiting_initialize -> initializing -> initialized -> terminated
//! ```
//!
//! Any request other than `initialize` is rejected until the client's
//! `initialized` notification arrives. Tool calls run in their own tasks
//! so the session keeps servicing other requests while a tool is
//! pending; on shutdown the in-flight calls are drained, bounded by the
//! drain deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::prompts::PromptsRegistry;
use crate::protocol::jsonrpc::{JsonRpcId, ParsedMessage, ParsedRequest};
use crate::protocol::mcp::{
    self, ClientInfo, InitializeParams, InitializeResult, PromptsGetParams, PromptsListResult,
    ResourcesListResult, ServerCapabilities, ServerInfo, ToolsCallParams, ToolsListResult,
};
use crate::registry::provider::ToolContext;
use crate::registry::ToolsRegistry;
use crate::transport::{CodecHandle, JsonRpcCodec};

/// Default deadline for a single tool call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// How long in-flight tool calls get to finish once the session ends.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Protocol state of the client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    AwaitingInitialize,
    Initializing,
    Initialized,
    Terminated,
}

/// Handle for emitting hub-initiated notifications on the client session.
///
/// Sends are suppressed until the client has completed initialization.
#[derive(Clone)]
pub struct Notifier {
    handle: CodecHandle,
    client_ready: Arc<AtomicBool>,
}

impl Notifier {
    /// Tell the client that the tool set changed.
    pub async fn tools_list_changed(&self) {
        self.notify(mcp::NOTIF_TOOLS_LIST_CHANGED, None).await;
    }

    /// Tell the client that the resource list changed.
    pub async fn resources_list_changed(&self) {
        self.notify(mcp::NOTIF_RESOURCES_LIST_CHANGED, None).await;
    }

    /// Tell the client that one resource's content changed.
    pub async fn resources_updated(&self, uri: &str) {
        let params = serde_json::to_value(mcp::ResourcesUpdatedParams {
            uri: uri.to_string(),
        })
        .expect("params serialize");
        self.notify(mcp::NOTIF_RESOURCES_UPDATED, Some(params)).await;
    }

    async fn notify(&self, method: &str, params: Option<Value>) {
        if !self.client_ready.load(Ordering::Acquire) {
            debug!(method, "client not initialized, suppressing notification");
            return;
        }
        if let Err(e) = self.handle.send_notification(method, params).await {
            warn!(method, error = %e, "failed to send notification");
        }
    }
}

/// One client session on the primary transport.
pub struct McpSession {
    server_info: ServerInfo,
    registry: Arc<ToolsRegistry>,
    prompts: Arc<PromptsRegistry>,
    codec: JsonRpcCodec,
    handle: CodecHandle,
    client_ready: Arc<AtomicBool>,
    phase: SessionPhase,
    client_info: Option<ClientInfo>,
    call_timeout: Duration,
    drain_timeout: Duration,
}

impl McpSession {
    pub fn new(
        server_info: ServerInfo,
        registry: Arc<ToolsRegistry>,
        prompts: Arc<PromptsRegistry>,
        codec: JsonRpcCodec,
    ) -> Self {
        let handle = codec.handle();
        Self {
            server_info,
            registry,
            prompts,
            codec,
            handle,
            client_ready: Arc::new(AtomicBool::new(false)),
            phase: SessionPhase::AwaitingInitialize,
            client_info: None,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Override the per-call deadline.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Notification handle, valid for the session's whole life.
    pub fn notifier(&self) -> Notifier {
        Notifier {
            handle: self.handle.clone(),
            client_ready: self.client_ready.clone(),
        }
    }

    /// Drive the session until transport EOF or cancellation.
    ///
    /// EOF is reported as a shutdown error so the supervisor brings the
    /// rest of the hub down with it.
    pub async fn run(mut self, token: CancellationToken) -> Result<(), HubError> {
        let mut inflight = JoinSet::new();

        let exit = loop {
            tokio::select! {
                _ = token.cancelled() => break None,
                message = self.codec.recv() => match message {
                    Some(ParsedMessage::Request(request)) => {
                        self.handle_request(request, &token, &mut inflight).await?;
                    }
                    Some(ParsedMessage::Response(response)) => {
                        // The hub sends no requests on the primary transport.
                        warn!(id = %response.id, "unexpected response from client, ignoring");
                    }
                    None => {
                        break Some(HubError::Shutdown {
                            reason: "client closed the primary transport".to_string(),
                        });
                    }
                },
            }
        };

        self.phase = SessionPhase::Terminated;
        self.drain(inflight).await;

        match exit {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Give in-flight tool calls a bounded chance to reply.
    async fn drain(&self, mut inflight: JoinSet<()>) {
        if inflight.is_empty() {
            return;
        }
        info!(inflight = inflight.len(), "draining in-flight tool calls");
        let all_done = async {
            while inflight.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.drain_timeout, all_done).await.is_err() {
            warn!("drain deadline exceeded, abandoning remaining calls");
        }
    }

    async fn handle_request(
        &mut self,
        request: ParsedRequest,
        token: &CancellationToken,
        inflight: &mut JoinSet<()>,
    ) -> Result<(), HubError> {
        if request.is_notification() {
            self.handle_notification(&request);
            return Ok(());
        }
        let id = request.id.clone().expect("checked non-notification");
        let method = request.method.clone();

        // Everything except initialize waits for the handshake.
        match self.phase {
            SessionPhase::AwaitingInitialize => {
                if method == mcp::METHOD_INITIALIZE {
                    return self.handle_initialize(id, request.params).await;
                }
                return self
                    .handle
                    .send_error(id, &HubError::NotInitialized { method })
                    .await;
            }
            SessionPhase::Initializing => {
                let error = if method == mcp::METHOD_INITIALIZE {
                    HubError::InvalidRequest {
                        details: "initialize already received".to_string(),
                    }
                } else {
                    HubError::NotInitialized { method }
                };
                return self.handle.send_error(id, &error).await;
            }
            SessionPhase::Initialized | SessionPhase::Terminated => {}
        }

        match method.as_str() {
            mcp::METHOD_INITIALIZE => {
                self.handle
                    .send_error(
                        id,
                        &HubError::InvalidRequest {
                            details: "session is already initialized".to_string(),
                        },
                    )
                    .await
            }
            mcp::METHOD_TOOLS_LIST => {
                let tools = self.registry.list_tools().await;
                self.send_result(id, &ToolsListResult { tools }).await
            }
            mcp::METHOD_TOOLS_CALL => self.spawn_tool_call(id, request, token, inflight).await,
            mcp::METHOD_PROMPTS_LIST => {
                let prompts = self.prompts.list();
                self.send_result(id, &PromptsListResult { prompts }).await
            }
            mcp::METHOD_PROMPTS_GET => {
                let params: PromptsGetParams = match decode_params(request.params) {
                    Ok(params) => params,
                    Err(e) => return self.handle.send_error(id, &e).await,
                };
                match self.prompts.get(&params.name, &params.arguments) {
                    Ok(result) => self.send_result(id, &result).await,
                    Err(e) => self.handle.send_error(id, &e).await,
                }
            }
            mcp::METHOD_RESOURCES_LIST => {
                // Reserved: always empty.
                self.send_result(id, &ResourcesListResult { resources: vec![] })
                    .await
            }
            _ => {
                self.handle
                    .send_error(id, &HubError::MethodNotFound { method })
                    .await
            }
        }
    }

    fn handle_notification(&mut self, request: &ParsedRequest) {
        match request.method.as_str() {
            mcp::NOTIF_INITIALIZED => {
                if self.phase == SessionPhase::Initializing {
                    self.phase = SessionPhase::Initialized;
                    self.client_ready.store(true, Ordering::Release);
                    info!(
                        client = self.client_info.as_ref().map(|c| c.name.as_str()),
                        "client initialized"
                    );
                } else {
                    warn!("unexpected initialized notification, ignoring");
                }
            }
            other => {
                debug!(method = other, "ignoring notification");
            }
        }
    }

    async fn handle_initialize(
        &mut self,
        id: JsonRpcId,
        params: Option<Value>,
    ) -> Result<(), HubError> {
        let params: InitializeParams = match decode_params(params) {
            Ok(params) => params,
            Err(e) => return self.handle.send_error(id, &e).await,
        };

        // Version mismatches are logged but not fatal; the hub answers
        // with its own version and lets the client decide.
        if params.protocol_version != mcp::PROTOCOL_VERSION {
            warn!(
                expected = mcp::PROTOCOL_VERSION,
                received = %params.protocol_version,
                "protocol version mismatch"
            );
        }
        info!(
            client = %params.client_info.name,
            version = %params.client_info.version,
            "initialize received"
        );
        self.client_info = Some(params.client_info);
        self.phase = SessionPhase::Initializing;

        let result = InitializeResult {
            protocol_version: mcp::PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: self.server_info.clone(),
        };
        self.send_result(id, &result).await
    }

    /// Run one tool call in its own task so the session stays responsive.
    async fn spawn_tool_call(
        &mut self,
        id: JsonRpcId,
        request: ParsedRequest,
        token: &CancellationToken,
        inflight: &mut JoinSet<()>,
    ) -> Result<(), HubError> {
        let params: ToolsCallParams = match decode_params(request.params) {
            Ok(params) => params,
            Err(e) => return self.handle.send_error(id, &e).await,
        };

        let registry = self.registry.clone();
        let handle = self.handle.clone();
        let ctx = ToolContext::new(token.child_token())
            .with_notifier(self.notifier())
            .with_request_id(id.clone());
        let call_timeout = self.call_timeout;
        let correlation_id = request.correlation_id;
        let received_at = request.received_at;

        inflight.spawn(async move {
            let result = registry
                .call_tool(&ctx, &params.name, params.arguments, Some(call_timeout))
                .await;

            let sent = match result {
                Ok(result) => match serde_json::to_value(&result) {
                    Ok(value) => handle.send_response(id, value).await,
                    Err(e) => {
                        warn!(%correlation_id, error = %e, "tool result failed to serialize");
                        let error = HubError::Internal {
                            correlation_id: correlation_id.to_string(),
                        };
                        handle.send_error(id, &error).await
                    }
                },
                Err(error) => {
                    debug!(
                        tool = %params.name,
                        error_type = error.error_type_name(),
                        "tool call failed"
                    );
                    handle.send_error(id, &error).await
                }
            };
            if let Err(e) = sent {
                warn!(tool = %params.name, error = %e, "failed to reply to tool call");
            }
            debug!(
                tool = %params.name,
                elapsed_ms = received_at.elapsed().as_millis() as u64,
                "tool call finished"
            );
        });
        Ok(())
    }

    async fn send_result<T: serde::Serialize>(
        &self,
        id: JsonRpcId,
        result: &T,
    ) -> Result<(), HubError> {
        let value = serde_json::to_value(result).map_err(|e| HubError::Internal {
            correlation_id: format!("encode result: {}", e),
        })?;
        self.handle.send_response(id, value).await
    }
}

/// Typed parameter decoding: any mismatch is an invalid-params error,
/// never a panic or a silent default.
fn decode_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, HubError> {
    let value = params.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(value).map_err(|e| HubError::InvalidParams {
        details: e.to_string(),
    })
}
