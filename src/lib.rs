//! mcphub - a Model Context Protocol hub.
//!
//! A long-running broker between one MCP client (typically an
//! LLM-hosted assistant on standard streams) and a collection of tool
//! providers. Providers are either in-process, registered through
//! [`hub::Hub::register_tool_provider`], or external proxy processes
//! that attach over a local socket and are multiplexed transparently
//! into the same client-facing session.
//!
//! # Architecture
//!
//! - [`transport`] - framed JSON-RPC codec over byte streams
//! - [`session`] - the client-facing MCP session state machine
//! - [`registry`] - providers, the name-keyed tool index, dispatch
//! - [`prompts`] - named prompt templates
//! - [`mux`] - proxy acceptor and per-proxy sessions
//! - [`reqid`] - correlation of forwarded calls with their responses
//! - [`supervisor`] - one cancellable scope over all workers

pub mod config;
pub mod error;
pub mod hub;
pub mod mux;
pub mod prompts;
pub mod protocol;
pub mod registry;
pub mod reqid;
pub mod session;
pub mod supervisor;
pub mod transport;
