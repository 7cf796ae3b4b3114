//! Tool providers and handlers.
//!
//! A provider owns zero or more tools and an optional configuration
//! schema. In-process providers run their handlers locally; proxy-backed
//! providers are registered by a live mux session and their calls are
//! forwarded over a per-session channel.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::HubError;
use crate::protocol::jsonrpc::JsonRpcId;
use crate::protocol::mcp::ToolCallResult;
use crate::session::Notifier;

/// Context handed to tool handlers and provider lifecycle hooks.
///
/// Carries the cancellation token of the current scope; long-running
/// handlers must observe it. The notifier, when present, reaches the
/// client session for resource-change notifications. The request id is
/// the client request that caused the call, carried along so forwarded
/// calls can be correlated end to end.
#[derive(Clone)]
pub struct ToolContext {
    pub token: CancellationToken,
    pub notifier: Option<Notifier>,
    pub request_id: Option<JsonRpcId>,
}

impl ToolContext {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            notifier: None,
            request_id: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_request_id(mut self, id: JsonRpcId) -> Self {
        self.request_id = Some(id);
        self
    }
}

/// A callable tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Invoke the tool. Arguments have already been validated against
    /// the tool's input schema.
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<ToolCallResult, HubError>;
}

/// One tool as declared by an in-process provider.
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

/// An in-process tool provider.
///
/// Lifecycle: registered while declared, configured and initialized
/// during registry preparation, then serving until the hub stops.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Unique provider name; also the key of its configuration section.
    fn name(&self) -> &str;

    /// JSON Schema its configuration section must satisfy, if any.
    fn config_schema(&self) -> Option<&Value> {
        None
    }

    /// Called once during preparation with the provider's validated
    /// configuration section.
    async fn initialize(&self, ctx: &ToolContext, config: Option<&Value>) -> Result<(), HubError> {
        let _ = (ctx, config);
        Ok(())
    }

    /// The provider's tool list, materialized during preparation.
    async fn tools(&self, ctx: &ToolContext) -> Result<Vec<Tool>, HubError>;
}

/// A tool call on its way to a proxy session.
///
/// Dispatch resolves the tool, validates the arguments, and pushes one of
/// these into the owning session's channel; the session performs the wire
/// exchange and fulfills `reply`.
#[derive(Debug)]
pub struct ForwardedToolCall {
    pub name: String,
    pub args: Value,
    /// The client request id behind this forward
    pub original_id: JsonRpcId,
    pub reply: oneshot::Sender<Result<ToolCallResult, HubError>>,
}

/// Identity and launch description of a registered proxy.
#[derive(Debug, Clone)]
pub struct ProxyRegistration {
    pub proxy_id: String,
    pub proxy_name: String,
    pub working_directory: String,
    pub command: String,
    pub args: Vec<String>,
}
