//! Hub assembly: wires the registries, the client session, the mux
//! server, and the supervisor together from a loaded configuration.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::HubConfig;
use crate::error::HubError;
use crate::mux::MuxServer;
use crate::prompts::PromptsRegistry;
use crate::registry::provider::{ToolContext, ToolProvider};
use crate::registry::ToolsRegistry;
use crate::session::McpSession;
use crate::supervisor::{monitor_parent, watch_signals, Supervisor};
use crate::transport::{JsonRpcCodec, ProtocolDebugSink};

/// One configured hub instance.
///
/// In-process tool providers are registered between construction and
/// `run`; proxy-backed providers attach at runtime through the mux
/// server.
pub struct Hub {
    config: HubConfig,
    registry: Arc<ToolsRegistry>,
    prompts: Arc<PromptsRegistry>,
}

impl Hub {
    /// Build a hub from a validated configuration, loading the prompts
    /// file when one is configured.
    pub fn from_config(config: HubConfig) -> Result<Self, HubError> {
        let prompts = match &config.prompts {
            Some(prompts) => PromptsRegistry::from_file(&prompts.file)?,
            None => PromptsRegistry::empty(),
        };
        Ok(Self {
            config,
            registry: Arc::new(ToolsRegistry::new()),
            prompts: Arc::new(prompts),
        })
    }

    /// The hub-wide tools registry.
    pub fn registry(&self) -> Arc<ToolsRegistry> {
        self.registry.clone()
    }

    /// Register an in-process tool provider.
    pub async fn register_tool_provider(
        &self,
        provider: Arc<dyn ToolProvider>,
    ) -> Result<(), HubError> {
        self.registry.register_in_process(provider).await
    }

    /// Serve the MCP session on standard streams.
    pub async fn run(self) -> Result<(), HubError> {
        self.run_with_transport(tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    /// Serve the MCP session on an arbitrary byte transport.
    pub async fn run_with_transport<R, W>(self, reader: R, writer: W) -> Result<(), HubError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let token = CancellationToken::new();

        // The protocol debug file starts fresh on every run.
        let debug_sink = match self
            .config
            .logging
            .as_ref()
            .and_then(|l| l.protocol_debug_file.as_ref())
        {
            Some(path) => Some(Arc::new(ProtocolDebugSink::create(path).map_err(|e| {
                HubError::Config {
                    details: format!(
                        "cannot open protocol debug file {}: {}",
                        path.display(),
                        e
                    ),
                }
            })?)),
            None => None,
        };

        // Providers are initialized before anything is served.
        let prepare_ctx = ToolContext::new(token.clone());
        self.registry.prepare(&prepare_ctx, &self.config.tools).await?;

        let codec = JsonRpcCodec::new("mcp", reader, writer, debug_sink, token.clone());
        let session = McpSession::new(
            self.config.server_info.clone(),
            self.registry.clone(),
            self.prompts.clone(),
            codec,
        );
        let notifier = session.notifier();

        let mux_server = match &self.config.proxy {
            Some(proxy) if proxy.enabled => Some(
                MuxServer::bind(
                    &proxy.listen_address,
                    self.registry.clone(),
                    notifier.clone(),
                )
                .await?,
            ),
            _ => None,
        };

        let mut supervisor = Supervisor::new(token.clone());
        supervisor.spawn("signal watcher", watch_signals(supervisor.token()));
        supervisor.spawn("mcp server", session.run(supervisor.token()));
        if let Some(mux_server) = mux_server {
            supervisor.spawn("mux server", mux_server.run(supervisor.token()));
        }
        if let Some(monitor) = &self.config.parent_monitor {
            if monitor.enabled {
                let interval = std::time::Duration::from_secs(monitor.interval_seconds);
                supervisor.spawn("parent monitor", monitor_parent(supervisor.token(), interval));
            }
        }

        info!(
            server = %self.config.server_info.name,
            version = %self.config.server_info.version,
            "hub started"
        );
        let result = supervisor.run().await;
        info!("hub stopped");
        result
    }
}
