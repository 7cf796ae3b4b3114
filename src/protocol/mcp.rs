//! Client-facing MCP protocol surface.
//!
//! Typed parameter and result structures for the methods the hub
//! implements, plus the protocol version and method name constants.
//! Field casing follows the MCP wire format (camelCase).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol revision the hub speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Request method names.
pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_PROMPTS_LIST: &str = "prompts/list";
pub const METHOD_PROMPTS_GET: &str = "prompts/get";
pub const METHOD_RESOURCES_LIST: &str = "resources/list";

/// Notification method names.
pub const NOTIF_INITIALIZED: &str = "notifications/initialized";
pub const NOTIF_TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
pub const NOTIF_RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
pub const NOTIF_RESOURCES_UPDATED: &str = "notifications/resources/updated";

/// Client identity, sent once on `initialize` and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Server identity, reported in the `initialize` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub client_info: ClientInfo,
    #[serde(default)]
    pub capabilities: Value,
}

/// A capability block advertising list-changed notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListChangedCapability {
    pub list_changed: bool,
}

/// Server capabilities advertised in the `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ListChangedCapability,
    pub prompts: ListChangedCapability,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: ListChangedCapability { list_changed: true },
            prompts: ListChangedCapability { list_changed: true },
        }
    }
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
}

/// Name/description/schema triple describing one callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDescriptor>,
}

/// Parameters of `tools/call`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One item of tool or prompt content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

impl Content {
    /// Shorthand for a text content item.
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }
}

/// Result of `tools/call`: the tool's content plus its error flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<Content>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// A successful single-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }
}

/// Result of `resources/list`. The feature is reserved; the list is
/// always empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesListResult {
    pub resources: Vec<Value>,
}

/// Parameters of the `notifications/resources/updated` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesUpdatedParams {
    pub uri: String,
}

/// One argument a prompt template accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgumentDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Name/description/arguments triple describing one prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub arguments: Vec<PromptArgumentDescriptor>,
}

/// Result of `prompts/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsListResult {
    pub prompts: Vec<PromptDescriptor>,
}

/// Parameters of `prompts/get`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptsGetParams {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, Value>,
}

/// One rendered prompt message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: Content,
}

/// Result of `prompts/get`: the rendered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptsGetResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}
