//! Wire protocol definitions.
//!
//! - [`jsonrpc`] - JSON-RPC 2.0 framing shared by every transport
//! - [`mcp`] - the client-facing Model Context Protocol dialect
//! - [`mux`] - the proxy-facing multiplexer dialect

pub mod jsonrpc;
pub mod mcp;
pub mod mux;
