//! Error handling for the hub.
//!
//! One crate-level error enum covers every failure the hub can produce,
//! from protocol-level parse errors to proxy lifecycle failures. Each
//! variant maps to a JSON-RPC 2.0 error code via [`HubError::to_jsonrpc_code`].
//!
//! Protocol errors are returned to the peer that caused them and are never
//! fatal. The hub itself only dies on startup failures (configuration,
//! listener bind, primary transport) or an unrecoverable write error on the
//! primary transport.

pub mod jsonrpc;

use serde_json::Value;
use thiserror::Error;

use jsonrpc::JsonRpcError;

/// All error conditions the hub can report.
#[derive(Debug, Error)]
pub enum HubError {
    /// Input was not valid JSON.
    #[error("Invalid JSON: {details}")]
    Parse {
        /// Description of the parse error
        details: String,
    },

    /// Input was valid JSON but not a valid JSON-RPC 2.0 message.
    #[error("Invalid JSON-RPC request: {details}")]
    InvalidRequest {
        /// What made the message invalid
        details: String,
    },

    /// The requested method (or tool, or prompt) does not exist.
    #[error("Method '{method}' not found")]
    MethodNotFound {
        /// The method name that was not found
        method: String,
    },

    /// Named prompt does not exist. Same code as a missing method.
    #[error("Prompt '{name}' not found")]
    PromptNotFound {
        /// The prompt name that was not found
        name: String,
    },

    /// Method parameters failed typed decoding or schema validation.
    #[error("Invalid parameters: {details}")]
    InvalidParams {
        /// Description of the validation failure
        details: String,
    },

    /// A request arrived before the `initialize` handshake completed.
    #[error("Server not initialized: '{method}' before initialize")]
    NotInitialized {
        /// The method that arrived early
        method: String,
    },

    /// A tool handler (in-process or proxied) reported failure.
    ///
    /// The message and optional data are the tool's own, surfaced verbatim.
    #[error("{message}")]
    ToolFailed {
        /// The tool's error message
        message: String,
        /// The tool's error data, if any
        data: Option<Value>,
    },

    /// A forwarded call did not complete within the per-call deadline.
    ///
    /// The proxy is not told; its late response is discarded.
    #[error("Tool '{tool}' did not respond within {timeout_secs}s")]
    Timeout {
        /// The tool that timed out
        tool: String,
        /// The deadline in seconds
        timeout_secs: u64,
    },

    /// A tool resolved to a proxy with no live session.
    #[error("Proxy '{proxy_id}' is not connected")]
    ProxyUnavailable {
        /// The proxy that owns the tool
        proxy_id: String,
    },

    /// The proxy session closed while a forwarded call was pending.
    #[error("Proxy '{proxy_id}' disconnected before responding")]
    ProxyDisconnected {
        /// The proxy that went away
        proxy_id: String,
    },

    /// Shutdown was requested (signal, orphaned process, or transport EOF).
    #[error("Shutting down: {reason}")]
    Shutdown {
        /// What initiated the shutdown
        reason: String,
    },

    /// Something went wrong inside the hub. Logged with full detail;
    /// the client only sees the correlation id.
    #[error("Internal error. Reference: {correlation_id}")]
    Internal {
        /// Correlation id for log lookup
        correlation_id: String,
    },

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {details}")]
    Config {
        /// Description of the configuration problem
        details: String,
    },

    /// A transport could not be opened or suffered a permanent failure.
    #[error("Transport error: {details}")]
    Transport {
        /// Description of the transport failure
        details: String,
    },
}

impl HubError {
    /// Maps the error to its JSON-RPC 2.0 error code.
    ///
    /// Standard codes (-32700..-32600) cover protocol errors; -32002 is
    /// the conventional "server not initialized" code; application codes
    /// in the -32000 range distinguish tool and proxy failures so that a
    /// client can tell a dead proxy from a slow tool.
    pub fn to_jsonrpc_code(&self) -> i32 {
        match self {
            Self::Parse { .. } => jsonrpc::PARSE_ERROR,
            Self::InvalidRequest { .. } => jsonrpc::INVALID_REQUEST,
            Self::MethodNotFound { .. } | Self::PromptNotFound { .. } => {
                jsonrpc::METHOD_NOT_FOUND
            }
            Self::InvalidParams { .. } => jsonrpc::INVALID_PARAMS,
            Self::NotInitialized { .. } => -32002,
            Self::ToolFailed { .. } => -32000,
            Self::Timeout { .. } => -32001,
            Self::ProxyUnavailable { .. } => -32004,
            Self::ProxyDisconnected { .. } => -32005,
            Self::Shutdown { .. } => -32006,
            Self::Internal { .. } | Self::Config { .. } | Self::Transport { .. } => {
                jsonrpc::INTERNAL_ERROR
            }
        }
    }

    /// Machine-readable name used in logs.
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::MethodNotFound { .. } => "method_not_found",
            Self::PromptNotFound { .. } => "prompt_not_found",
            Self::InvalidParams { .. } => "invalid_params",
            Self::NotInitialized { .. } => "not_initialized",
            Self::ToolFailed { .. } => "tool_failed",
            Self::Timeout { .. } => "timeout",
            Self::ProxyUnavailable { .. } => "proxy_unavailable",
            Self::ProxyDisconnected { .. } => "proxy_disconnected",
            Self::Shutdown { .. } => "shutdown",
            Self::Internal { .. } => "internal_error",
            Self::Config { .. } => "configuration_error",
            Self::Transport { .. } => "transport_error",
        }
    }

    /// True when the error means the process should stop.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown { .. })
    }

    /// Converts the error into a wire-level JSON-RPC error object.
    ///
    /// Only tool-supplied data crosses the boundary; internal errors
    /// expose nothing beyond their correlation id.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        let data = match self {
            Self::ToolFailed { data, .. } => data.clone(),
            _ => None,
        };
        JsonRpcError {
            code: self.to_jsonrpc_code(),
            message: self.to_string(),
            data,
        }
    }
}
