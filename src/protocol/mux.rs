//! Proxy-facing multiplexer protocol surface.
//!
//! Spoken between the hub and each proxy process over the local socket.
//! Inbound: `proxy/register` and the legacy `tools/register`. Outbound:
//! `tools/call` requests produced by registry dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::mcp::{ServerInfo, ToolDescriptor};

/// Mux protocol revision.
pub const MUX_PROTOCOL_VERSION: &str = "1.0";

/// Inbound request method names.
pub const METHOD_PROXY_REGISTER: &str = "proxy/register";
pub const METHOD_TOOLS_REGISTER: &str = "tools/register";

/// Outbound request method name.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// How the proxy was launched, reported at registration for diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDescription {
    #[serde(default)]
    pub working_directory: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Parameters of `proxy/register`.
///
/// The optional `tools` array lets a proxy attach and publish its tool
/// list in one round trip; `tools/register` remains available for the
/// two-step flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRegisterParams {
    pub protocol_version: String,
    pub proxy_id: String,
    #[serde(default)]
    pub proxy: ProxyDescription,
    pub server_info: ServerInfo,
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// Result of `proxy/register`.
///
/// `persistent` is true when the proxy id was already known and the
/// session reclaimed it rather than creating it. `denied` is true when
/// the registration was refused; the session is closed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRegisterResult {
    pub session_id: String,
    pub proxy_id: String,
    pub persistent: bool,
    pub denied: bool,
}

/// Parameters of `tools/register`: the proxy's full tool list, replacing
/// any previously registered list atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsRegisterParams {
    pub tools: Vec<ToolDescriptor>,
}

/// Parameters of an outbound `tools/call` to a proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,
    pub args: Value,
}
