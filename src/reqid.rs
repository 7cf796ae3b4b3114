//! Request-ID mapping for forwarded tool calls.
//!
//! When the hub forwards a client's `tools/call` to a proxy it issues a
//! fresh outgoing ID on the proxy transport. This table associates that
//! outgoing ID with the pending forward (the original request ID and the
//! reply slot) until the proxy's response arrives.
//!
//! The table is bounded. Past the high-water mark the oldest entry is
//! evicted and handed back to the caller, whose response thereby becomes
//! undeliverable; a `take` that matches nothing is a protocol violation
//! on the proxy's side and the response is discarded.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;

use crate::error::HubError;
use crate::protocol::jsonrpc::JsonRpcId;
use crate::protocol::mcp::ToolCallResult;

/// Default bound on in-flight forwards per proxy session.
pub const DEFAULT_CAPACITY: usize = 1024;

/// One forwarded call awaiting its proxy response.
#[derive(Debug)]
pub struct PendingForward {
    /// The client request ID that caused this forward (for logging)
    pub original_id: JsonRpcId,
    /// The tool being called
    pub tool: String,
    /// Where the translated response goes
    pub reply: oneshot::Sender<Result<ToolCallResult, HubError>>,
}

/// Bounded table of outgoing ID to pending forward.
#[derive(Debug)]
pub struct RequestIdMap {
    entries: HashMap<i64, PendingForward>,
    order: VecDeque<i64>,
    capacity: usize,
}

impl RequestIdMap {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert a pending forward under its outgoing ID.
    ///
    /// Returns the evicted oldest entry when the table was full; the
    /// caller must fail that forward rather than leave it hanging.
    pub fn put(&mut self, outgoing: i64, pending: PendingForward) -> Option<(i64, PendingForward)> {
        let evicted = if self.entries.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };
        self.entries.insert(outgoing, pending);
        self.order.push_back(outgoing);
        evicted
    }

    /// Remove and return the forward matching an outgoing ID.
    ///
    /// `None` means no matching request was outstanding; each ID can be
    /// taken at most once.
    pub fn take(&mut self, outgoing: i64) -> Option<PendingForward> {
        let pending = self.entries.remove(&outgoing)?;
        self.order.retain(|id| *id != outgoing);
        Some(pending)
    }

    /// Remove and return every outstanding forward, oldest first.
    pub fn drain(&mut self) -> Vec<(i64, PendingForward)> {
        let mut drained = Vec::with_capacity(self.entries.len());
        while let Some(id) = self.order.pop_front() {
            if let Some(pending) = self.entries.remove(&id) {
                drained.push((id, pending));
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) -> Option<(i64, PendingForward)> {
        while let Some(id) = self.order.pop_front() {
            if let Some(pending) = self.entries.remove(&id) {
                return Some((id, pending));
            }
        }
        None
    }
}

impl Default for RequestIdMap {
    fn default() -> Self {
        Self::new()
    }
}
