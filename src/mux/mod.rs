//! Proxy multiplexer: socket acceptor and per-proxy sessions.
//!
//! Proxy processes attach over a loopback socket, register under a
//! `proxyId`, and contribute their tools to the hub-wide registry. Tool
//! calls dispatched to a proxy-backed tool are forwarded over the
//! owning session's transport and re-correlated on the way back.

pub mod server;
pub mod session;

pub use server::MuxServer;
