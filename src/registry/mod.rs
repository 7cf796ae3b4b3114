//! Tools registry: provider lifecycle, name-keyed dispatch, validation.
//!
//! One map keyed by tool name holds every callable tool; the provider
//! kind is a tag on the entry. Names are disjoint across all providers -
//! a second registration of an existing name fails.
//!
//! `prepare` holds the write lock for the whole preparation pass;
//! `call_tool` takes the read lock only to resolve the name and releases
//! it before invoking the handler or awaiting a proxy, so a slow tool
//! never blocks the registry.

pub mod provider;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jsonschema::Validator;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::config::ToolConfig;
use crate::error::HubError;
use crate::protocol::mcp::{ToolCallResult, ToolDescriptor};
use provider::{ForwardedToolCall, ProxyRegistration, Tool, ToolContext, ToolProvider};

/// Where a registered tool's calls go.
#[derive(Clone)]
enum ToolBackend {
    InProcess(Arc<dyn provider::ToolHandler>),
    Proxy { proxy_id: String },
}

/// One entry of the name-keyed tool map.
#[derive(Clone)]
struct RegisteredTool {
    descriptor: ToolDescriptor,
    validator: Arc<Validator>,
    backend: ToolBackend,
}

/// A proxy-backed provider, alive as long as its mux session.
struct ProxyProvider {
    registration: ProxyRegistration,
    /// The mux session currently holding this proxy id. Guards removal:
    /// a superseded session must not purge its successor's tools.
    session_id: String,
    forward: mpsc::Sender<ForwardedToolCall>,
    tool_names: Vec<String>,
}

#[derive(Default)]
struct RegistryInner {
    providers: HashMap<String, Arc<dyn ToolProvider>>,
    proxies: HashMap<String, ProxyProvider>,
    tools: HashMap<String, RegisteredTool>,
    ready: bool,
}

/// The hub-wide tools registry.
pub struct ToolsRegistry {
    inner: RwLock<RegistryInner>,
}

impl ToolsRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register an in-process provider. Its tools materialize during
    /// [`ToolsRegistry::prepare`].
    pub async fn register_in_process(
        &self,
        tool_provider: Arc<dyn ToolProvider>,
    ) -> Result<(), HubError> {
        let mut inner = self.inner.write().await;
        let name = tool_provider.name().to_string();
        if inner.providers.contains_key(&name) {
            return Err(HubError::Config {
                details: format!("tool provider '{}' is already registered", name),
            });
        }
        info!(provider = %name, "registered tool provider");
        inner.providers.insert(name, tool_provider);
        Ok(())
    }

    /// Configure and initialize every in-process provider, then
    /// materialize their tool lists.
    ///
    /// Any validation or initialization failure aborts the preparation
    /// and leaves the registry not ready: no tools are callable.
    pub async fn prepare(
        &self,
        ctx: &ToolContext,
        tool_configs: &[ToolConfig],
    ) -> Result<(), HubError> {
        let mut inner = self.inner.write().await;

        let providers: Vec<Arc<dyn ToolProvider>> = inner.providers.values().cloned().collect();
        for tool_provider in &providers {
            let section = tool_configs
                .iter()
                .find(|c| c.name == tool_provider.name());
            if section.is_some_and(|c| c.is_disabled) {
                debug!(provider = %tool_provider.name(), "provider disabled by configuration");
                continue;
            }
            let config = section.and_then(|c| c.configuration.as_ref());

            if let (Some(schema), Some(config)) = (tool_provider.config_schema(), config) {
                validate_against_schema(schema, config).map_err(|details| HubError::Config {
                    details: format!(
                        "configuration for provider '{}' is invalid: {}",
                        tool_provider.name(),
                        details
                    ),
                })?;
            }

            tool_provider.initialize(ctx, config).await.map_err(|e| {
                HubError::Config {
                    details: format!(
                        "failed to initialize provider '{}': {}",
                        tool_provider.name(),
                        e
                    ),
                }
            })?;
        }

        // Stage the whole tool map before committing so a late collision
        // leaves nothing half-registered.
        let mut staged: HashMap<String, RegisteredTool> = HashMap::new();
        for tool_provider in &providers {
            let section = tool_configs
                .iter()
                .find(|c| c.name == tool_provider.name());
            if section.is_some_and(|c| c.is_disabled) {
                continue;
            }
            for tool in tool_provider.tools(ctx).await? {
                if staged.contains_key(&tool.name) || inner.tools.contains_key(&tool.name) {
                    return Err(HubError::Config {
                        details: format!(
                            "tool name '{}' from provider '{}' is already registered",
                            tool.name,
                            tool_provider.name()
                        ),
                    });
                }
                staged.insert(tool.name.clone(), compile_tool(tool)?);
            }
        }

        let count = staged.len();
        inner.tools.extend(staged);
        inner.ready = true;
        info!(tools = count, "tools registry prepared");
        Ok(())
    }

    /// Snapshot of every registered tool, stable within a hub lifetime.
    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        let inner = self.inner.read().await;
        let mut tools: Vec<ToolDescriptor> = inner
            .tools
            .values()
            .map(|t| t.descriptor.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Resolve a tool by name, validate the arguments against its input
    /// schema, and dispatch the call.
    ///
    /// `call_timeout` bounds the wait for the result; on expiry the
    /// caller gets a timeout error and a late proxy response is
    /// discarded by the session's mapping table.
    pub async fn call_tool(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: Value,
        call_timeout: Option<Duration>,
    ) -> Result<ToolCallResult, HubError> {
        let args = if args.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            args
        };

        let tool = {
            let inner = self.inner.read().await;
            if !inner.ready {
                return Err(HubError::ToolFailed {
                    message: "tools registry is not ready".to_string(),
                    data: None,
                });
            }
            match inner.tools.get(name) {
                Some(tool) => tool.clone(),
                None => {
                    return Err(HubError::MethodNotFound {
                        method: name.to_string(),
                    });
                }
            }
        };

        if let Err(details) = validate_with(&tool.validator, &args) {
            return Err(HubError::InvalidParams { details });
        }

        match tool.backend {
            ToolBackend::InProcess(handler) => {
                self.call_in_process(ctx, name, &*handler, args, call_timeout)
                    .await
            }
            ToolBackend::Proxy { proxy_id } => {
                self.call_proxy(ctx, name, &proxy_id, args, call_timeout)
                    .await
            }
        }
    }

    async fn call_in_process(
        &self,
        ctx: &ToolContext,
        name: &str,
        handler: &dyn provider::ToolHandler,
        args: Value,
        call_timeout: Option<Duration>,
    ) -> Result<ToolCallResult, HubError> {
        let call = handler.call(ctx, args);
        match call_timeout {
            Some(limit) => tokio::select! {
                _ = ctx.token.cancelled() => Err(cancelled(name)),
                outcome = tokio::time::timeout(limit, call) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(HubError::Timeout {
                        tool: name.to_string(),
                        timeout_secs: limit.as_secs(),
                    }),
                },
            },
            None => tokio::select! {
                _ = ctx.token.cancelled() => Err(cancelled(name)),
                result = call => result,
            },
        }
    }

    async fn call_proxy(
        &self,
        ctx: &ToolContext,
        name: &str,
        proxy_id: &str,
        args: Value,
        call_timeout: Option<Duration>,
    ) -> Result<ToolCallResult, HubError> {
        let forward = {
            let inner = self.inner.read().await;
            match inner.proxies.get(proxy_id) {
                Some(p) => p.forward.clone(),
                None => {
                    return Err(HubError::ProxyUnavailable {
                        proxy_id: proxy_id.to_string(),
                    });
                }
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        forward
            .send(ForwardedToolCall {
                name: name.to_string(),
                args,
                original_id: ctx
                    .request_id
                    .clone()
                    .unwrap_or(crate::protocol::jsonrpc::JsonRpcId::Null),
                reply: reply_tx,
            })
            .await
            .map_err(|_| HubError::ProxyUnavailable {
                proxy_id: proxy_id.to_string(),
            })?;

        let await_reply = async {
            reply_rx.await.unwrap_or_else(|_| {
                Err(HubError::ProxyDisconnected {
                    proxy_id: proxy_id.to_string(),
                })
            })
        };

        match call_timeout {
            Some(limit) => tokio::select! {
                _ = ctx.token.cancelled() => Err(cancelled(name)),
                outcome = tokio::time::timeout(limit, await_reply) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(HubError::Timeout {
                        tool: name.to_string(),
                        timeout_secs: limit.as_secs(),
                    }),
                },
            },
            None => tokio::select! {
                _ = ctx.token.cancelled() => Err(cancelled(name)),
                result = await_reply => result,
            },
        }
    }

    /// Register a proxy-backed provider for a mux session.
    ///
    /// Idempotent per proxy id: a re-registration keeps the existing
    /// provider (and its tools) and rebinds it to the new session.
    /// Returns true when the provider already existed.
    pub async fn register_proxy(
        &self,
        registration: ProxyRegistration,
        session_id: &str,
        forward: mpsc::Sender<ForwardedToolCall>,
    ) -> Result<bool, HubError> {
        if registration.proxy_id.is_empty() {
            return Err(HubError::InvalidParams {
                details: "proxyId must not be empty".to_string(),
            });
        }
        let mut inner = self.inner.write().await;
        match inner.proxies.get_mut(&registration.proxy_id) {
            Some(existing) => {
                existing.session_id = session_id.to_string();
                existing.forward = forward;
                existing.registration = registration;
                Ok(true)
            }
            None => {
                inner.proxies.insert(
                    registration.proxy_id.clone(),
                    ProxyProvider {
                        registration,
                        session_id: session_id.to_string(),
                        forward,
                        tool_names: Vec::new(),
                    },
                );
                Ok(false)
            }
        }
    }

    /// Replace a proxy's tool list atomically.
    ///
    /// Every submitted name must be free or already owned by this proxy;
    /// otherwise nothing changes and the registration fails.
    pub async fn set_proxy_tools(
        &self,
        proxy_id: &str,
        session_id: &str,
        descriptors: Vec<ToolDescriptor>,
    ) -> Result<(), HubError> {
        let mut inner = self.inner.write().await;
        let owner = match inner.proxies.get(proxy_id) {
            Some(p) if p.session_id == session_id => p,
            Some(_) => {
                return Err(HubError::InvalidRequest {
                    details: format!("proxy '{}' is owned by another session", proxy_id),
                });
            }
            None => {
                return Err(HubError::InvalidRequest {
                    details: format!("proxy '{}' is not registered", proxy_id),
                });
            }
        };
        let owned: Vec<String> = owner.tool_names.clone();

        let mut staged: HashMap<String, RegisteredTool> = HashMap::new();
        for descriptor in descriptors {
            let taken_elsewhere = inner.tools.contains_key(&descriptor.name)
                && !owned.contains(&descriptor.name);
            if taken_elsewhere || staged.contains_key(&descriptor.name) {
                return Err(HubError::InvalidRequest {
                    details: format!("tool name '{}' is already registered", descriptor.name),
                });
            }
            let validator = compile_schema(&descriptor.input_schema).map_err(|details| {
                HubError::InvalidParams {
                    details: format!(
                        "input schema of tool '{}' is invalid: {}",
                        descriptor.name, details
                    ),
                }
            })?;
            staged.insert(
                descriptor.name.clone(),
                RegisteredTool {
                    descriptor,
                    validator: Arc::new(validator),
                    backend: ToolBackend::Proxy {
                        proxy_id: proxy_id.to_string(),
                    },
                },
            );
        }

        for name in &owned {
            inner.tools.remove(name);
        }
        let names: Vec<String> = staged.keys().cloned().collect();
        debug!(proxy_id, tools = names.len(), "replaced proxy tool list");
        inner.tools.extend(staged);
        if let Some(p) = inner.proxies.get_mut(proxy_id) {
            p.tool_names = names;
        }
        Ok(())
    }

    /// Remove a proxy provider and purge its tools, but only when it is
    /// still bound to the given session. A superseded session calling in
    /// late is a no-op.
    pub async fn remove_proxy(&self, proxy_id: &str, session_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.proxies.get(proxy_id) {
            Some(p) if p.session_id == session_id => {}
            _ => return false,
        }
        let removed = inner.proxies.remove(proxy_id).expect("checked above");
        for name in &removed.tool_names {
            inner.tools.remove(name);
        }
        info!(
            proxy_id,
            proxy_name = %removed.registration.proxy_name,
            tools = removed.tool_names.len(),
            "proxy provider removed"
        );
        !removed.tool_names.is_empty()
    }
}

impl Default for ToolsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn cancelled(tool: &str) -> HubError {
    HubError::Shutdown {
        reason: format!("call to tool '{}' cancelled", tool),
    }
}

fn compile_tool(tool: Tool) -> Result<RegisteredTool, HubError> {
    let validator = compile_schema(&tool.input_schema).map_err(|details| HubError::Config {
        details: format!("input schema of tool '{}' is invalid: {}", tool.name, details),
    })?;
    Ok(RegisteredTool {
        descriptor: ToolDescriptor {
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
        },
        validator: Arc::new(validator),
        backend: ToolBackend::InProcess(tool.handler),
    })
}

fn compile_schema(schema: &Value) -> Result<Validator, String> {
    jsonschema::validator_for(schema).map_err(|e| e.to_string())
}

fn validate_against_schema(schema: &Value, instance: &Value) -> Result<(), String> {
    let validator = compile_schema(schema)?;
    validate_with(&validator, instance)
}

fn validate_with(validator: &Validator, instance: &Value) -> Result<(), String> {
    if validator.is_valid(instance) {
        return Ok(());
    }
    let details = validator
        .iter_errors(instance)
        .take(5)
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    if details.is_empty() {
        warn!("schema validation failed without detail");
        return Err("arguments do not match the input schema".to_string());
    }
    Err(details)
}
