//! One proxy's session on the mux transport.
//!
//! Inbound: `proxy/register` (identity, optionally tools) and the legacy
//! `tools/register`. Outbound: `tools/call` requests produced by registry
//! dispatch, queued through the session's forward channel.
//!
//! Close semantics: when the session ends, its proxy's tools are purged
//! from the registry (unless a successor session already took over the
//! proxy id) and every pending forwarded call fails with a
//! proxy-disconnected error instead of hanging.

use std::sync::Arc;

use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::protocol::jsonrpc::{ParsedMessage, ParsedRequest, ParsedResponse};
use crate::protocol::mcp::ToolCallResult;
use crate::protocol::mux::{
    self, ProxyRegisterParams, ProxyRegisterResult, ToolsRegisterParams,
};
use crate::registry::provider::{ForwardedToolCall, ProxyRegistration};
use crate::registry::ToolsRegistry;
use crate::reqid::{PendingForward, RequestIdMap};
use crate::session::Notifier;
use crate::transport::{CodecHandle, JsonRpcCodec};

use super::server::{SessionHandle, SessionTable};

/// Forward queue depth per session.
const FORWARD_QUEUE: usize = 64;

pub(crate) struct MuxSession {
    session_id: String,
    registry: Arc<ToolsRegistry>,
    notifier: Notifier,
    table: Arc<SessionTable>,
    shared: Arc<SessionHandle>,
    codec: JsonRpcCodec,
    handle: CodecHandle,
    proxy_id: Option<String>,
    pending: RequestIdMap,
    forward_tx: mpsc::Sender<ForwardedToolCall>,
    forward_rx: mpsc::Receiver<ForwardedToolCall>,
}

impl MuxSession {
    pub fn new(
        session_id: String,
        stream: TcpStream,
        registry: Arc<ToolsRegistry>,
        notifier: Notifier,
        table: Arc<SessionTable>,
        shared: Arc<SessionHandle>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let codec = JsonRpcCodec::new(
            &format!("mux {}", session_id),
            read_half,
            write_half,
            None,
            shared.token.clone(),
        );
        let handle = codec.handle();
        let (forward_tx, forward_rx) = mpsc::channel(FORWARD_QUEUE);
        Self {
            session_id,
            registry,
            notifier,
            table,
            shared,
            codec,
            handle,
            proxy_id: None,
            pending: RequestIdMap::new(),
            forward_tx,
            forward_rx,
        }
    }

    /// Drive the session until the proxy disconnects, the registration is
    /// denied, or the scope is cancelled.
    pub async fn run(mut self) -> Result<(), HubError> {
        let token = self.shared.token.clone();
        let exit = loop {
            tokio::select! {
                _ = token.cancelled() => break Ok(()),
                message = self.codec.recv() => match message {
                    Some(ParsedMessage::Request(request)) => {
                        match self.handle_request(request).await {
                            Ok(true) => {}
                            Ok(false) => break Ok(()),
                            Err(e) => break Err(e),
                        }
                    }
                    Some(ParsedMessage::Response(response)) => self.handle_response(response),
                    None => {
                        debug!(session_id = %self.session_id, "proxy disconnected");
                        break Ok(());
                    }
                },
                forwarded = self.forward_rx.recv() => {
                    if let Some(forwarded) = forwarded {
                        self.forward(forwarded).await;
                    }
                }
            }
        };
        self.close().await;
        exit
    }

    /// Handle one inbound request. Returns false when the session must
    /// close (denied registration).
    async fn handle_request(&mut self, request: ParsedRequest) -> Result<bool, HubError> {
        let Some(id) = request.id.clone() else {
            debug!(method = %request.method, "ignoring notification from proxy");
            return Ok(true);
        };

        match request.method.as_str() {
            mux::METHOD_PROXY_REGISTER => self.handle_register(id, request.params).await,
            mux::METHOD_TOOLS_REGISTER => {
                self.handle_tools_register(id, request.params).await?;
                Ok(true)
            }
            other => {
                self.handle
                    .send_error(
                        id,
                        &HubError::MethodNotFound {
                            method: other.to_string(),
                        },
                    )
                    .await?;
                Ok(true)
            }
        }
    }

    async fn handle_register(
        &mut self,
        id: crate::protocol::jsonrpc::JsonRpcId,
        params: Option<Value>,
    ) -> Result<bool, HubError> {
        let params: ProxyRegisterParams =
            match serde_json::from_value(params.unwrap_or(Value::Null)) {
                Ok(params) => params,
                Err(e) => {
                    self.handle
                        .send_error(
                            id,
                            &HubError::InvalidParams {
                                details: e.to_string(),
                            },
                        )
                        .await?;
                    return Ok(true);
                }
            };

        if params.protocol_version != mux::MUX_PROTOCOL_VERSION {
            warn!(
                expected = mux::MUX_PROTOCOL_VERSION,
                received = %params.protocol_version,
                "mux protocol version mismatch"
            );
        }

        // An empty proxy id cannot be registered; deny and close.
        if params.proxy_id.is_empty() {
            warn!(session_id = %self.session_id, "denying registration with empty proxyId");
            let denied = ProxyRegisterResult {
                session_id: self.session_id.clone(),
                proxy_id: String::new(),
                persistent: false,
                denied: true,
            };
            self.send_result(id, &denied).await?;
            return Ok(false);
        }

        let registration = ProxyRegistration {
            proxy_id: params.proxy_id.clone(),
            proxy_name: params.server_info.name.clone(),
            working_directory: params.proxy.working_directory.clone(),
            command: params.proxy.command.clone(),
            args: params.proxy.args.clone(),
        };
        let persistent = self
            .registry
            .register_proxy(registration, &self.session_id, self.forward_tx.clone())
            .await?;

        // A prior session holding this proxy id is superseded, not kept.
        // The registry is already rebound, so the old session's teardown
        // cannot purge what now belongs to this one.
        self.table.supersede(&params.proxy_id, &self.session_id);

        self.proxy_id = Some(params.proxy_id.clone());
        *self
            .shared
            .proxy_id
            .lock()
            .expect("proxy id lock poisoned") = Some(params.proxy_id.clone());

        info!(
            session_id = %self.session_id,
            proxy_id = %params.proxy_id,
            server = %params.server_info.name,
            command = %params.proxy.command,
            persistent,
            "proxy registered"
        );

        // Tools submitted with the registration merge before the reply so
        // the proxy learns about a collision from this round trip.
        if !params.tools.is_empty() {
            if let Err(e) = self
                .registry
                .set_proxy_tools(&params.proxy_id, &self.session_id, params.tools)
                .await
            {
                self.handle.send_error(id, &e).await?;
                return Ok(true);
            }
        }

        let result = ProxyRegisterResult {
            session_id: self.session_id.clone(),
            proxy_id: params.proxy_id,
            persistent,
            denied: false,
        };
        self.send_result(id, &result).await?;
        self.notifier.tools_list_changed().await;
        Ok(true)
    }

    async fn handle_tools_register(
        &mut self,
        id: crate::protocol::jsonrpc::JsonRpcId,
        params: Option<Value>,
    ) -> Result<(), HubError> {
        let Some(proxy_id) = self.proxy_id.clone() else {
            return self
                .handle
                .send_error(
                    id,
                    &HubError::InvalidRequest {
                        details: "tools/register requires proxy/register first".to_string(),
                    },
                )
                .await;
        };
        let params: ToolsRegisterParams =
            match serde_json::from_value(params.unwrap_or(Value::Null)) {
                Ok(params) => params,
                Err(e) => {
                    return self
                        .handle
                        .send_error(
                            id,
                            &HubError::InvalidParams {
                                details: e.to_string(),
                            },
                        )
                        .await;
                }
            };

        let count = params.tools.len();
        match self
            .registry
            .set_proxy_tools(&proxy_id, &self.session_id, params.tools)
            .await
        {
            Ok(()) => {
                info!(proxy_id = %proxy_id, tools = count, "proxy tools registered");
                self.send_result(id, &serde_json::json!({})).await?;
                self.notifier.tools_list_changed().await;
                Ok(())
            }
            Err(e) => self.handle.send_error(id, &e).await,
        }
    }

    /// A proxy response: match it back to the forwarded call it answers.
    fn handle_response(&mut self, response: ParsedResponse) {
        let Some(outgoing) = response.id.as_number() else {
            warn!(id = %response.id, "proxy response with non-numeric id, discarding");
            return;
        };
        let Some(pending) = self.pending.take(outgoing) else {
            // The codec only lets matched responses through, so this means
            // the entry was evicted or already answered.
            warn!(outgoing, "proxy response with no pending forward, discarding");
            return;
        };

        debug!(
            outgoing,
            original_id = %pending.original_id,
            tool = %pending.tool,
            "forwarded call completed"
        );
        let result = translate_response(response, self.proxy_id.as_deref().unwrap_or(""));
        // The caller may have timed out and gone; that is fine.
        let _ = pending.reply.send(result);
    }

    /// Send one forwarded call to the proxy and remember the mapping.
    async fn forward(&mut self, forwarded: ForwardedToolCall) {
        let params = mux::ToolsCallParams {
            name: forwarded.name.clone(),
            args: forwarded.args,
        };
        let params = match serde_json::to_value(&params) {
            Ok(params) => params,
            Err(e) => {
                let _ = forwarded.reply.send(Err(HubError::Internal {
                    correlation_id: format!("encode forward: {}", e),
                }));
                return;
            }
        };

        match self
            .handle
            .send_request(mux::METHOD_TOOLS_CALL, Some(params))
            .await
        {
            Ok(outgoing_id) => {
                let outgoing = outgoing_id.as_number().expect("codec issues numeric ids");
                debug!(
                    outgoing,
                    original_id = %forwarded.original_id,
                    tool = %forwarded.name,
                    "forwarded tools/call to proxy"
                );
                let evicted = self.pending.put(
                    outgoing,
                    PendingForward {
                        original_id: forwarded.original_id,
                        tool: forwarded.name,
                        reply: forwarded.reply,
                    },
                );
                if let Some((evicted_id, evicted)) = evicted {
                    warn!(
                        evicted_id,
                        tool = %evicted.tool,
                        "forward table full, evicting oldest pending call"
                    );
                    let _ = evicted.reply.send(Err(HubError::ProxyUnavailable {
                        proxy_id: self.proxy_id.clone().unwrap_or_default(),
                    }));
                }
            }
            Err(_) => {
                let _ = forwarded.reply.send(Err(HubError::ProxyDisconnected {
                    proxy_id: self.proxy_id.clone().unwrap_or_default(),
                }));
            }
        }
    }

    /// Tear the session down: release the proxy id, purge its tools, and
    /// fail every pending forward.
    async fn close(&mut self) {
        self.shared.token.cancel();

        if let Some(proxy_id) = &self.proxy_id {
            let purged = self.registry.remove_proxy(proxy_id, &self.session_id).await;
            if purged {
                self.notifier.tools_list_changed().await;
            }
        }

        let proxy_id = self.proxy_id.clone().unwrap_or_default();
        for (outgoing, pending) in self.pending.drain() {
            debug!(
                outgoing,
                original_id = %pending.original_id,
                tool = %pending.tool,
                "failing pending forward on session close"
            );
            let _ = pending.reply.send(Err(HubError::ProxyDisconnected {
                proxy_id: proxy_id.clone(),
            }));
        }

        self.table.remove(&self.session_id);
        info!(session_id = %self.session_id, "mux session closed");
    }

    async fn send_result<T: serde::Serialize>(
        &self,
        id: crate::protocol::jsonrpc::JsonRpcId,
        result: &T,
    ) -> Result<(), HubError> {
        let value = serde_json::to_value(result).map_err(|e| HubError::Internal {
            correlation_id: format!("encode result: {}", e),
        })?;
        self.handle.send_response(id, value).await
    }
}

/// Translate a proxy's wire response into a tool call result.
///
/// Errors come back verbatim as tool failures; a malformed result body is
/// a tool failure too, not a hub crash.
fn translate_response(response: ParsedResponse, proxy_id: &str) -> Result<ToolCallResult, HubError> {
    if let Some(error) = response.error {
        return Err(HubError::ToolFailed {
            message: error.message,
            data: error.data,
        });
    }
    match response.result {
        Some(result) => serde_json::from_value(result).map_err(|e| HubError::ToolFailed {
            message: format!("proxy '{}' returned a malformed tool result: {}", proxy_id, e),
            data: None,
        }),
        None => Err(HubError::ToolFailed {
            message: format!("proxy '{}' returned an empty response", proxy_id),
            data: None,
        }),
    }
}
