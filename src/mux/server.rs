//! Mux server: accepts proxy connections and runs their sessions.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::HubError;
use crate::registry::ToolsRegistry;
use crate::session::Notifier;

use super::session::MuxSession;

/// Shared view of one live session, used for supersession and shutdown.
pub(crate) struct SessionHandle {
    pub session_id: String,
    /// Set once the session completes `proxy/register`
    pub proxy_id: Mutex<Option<String>>,
    pub token: CancellationToken,
}

impl SessionHandle {
    pub fn claims(&self, proxy_id: &str) -> bool {
        self.proxy_id
            .lock()
            .expect("proxy id lock poisoned")
            .as_deref()
            == Some(proxy_id)
    }
}

/// List of live sessions, owned by the server.
#[derive(Default)]
pub(crate) struct SessionTable {
    sessions: Mutex<Vec<Arc<SessionHandle>>>,
}

impl SessionTable {
    pub fn insert(&self, handle: Arc<SessionHandle>) {
        self.sessions
            .lock()
            .expect("session table poisoned")
            .push(handle);
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions
            .lock()
            .expect("session table poisoned")
            .retain(|s| s.session_id != session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session table poisoned").len()
    }

    /// Cancel whichever other live session holds `proxy_id`.
    ///
    /// Returns true when a prior session was superseded. O(N) scan; the
    /// number of proxies per hub is small by design.
    pub fn supersede(&self, proxy_id: &str, claiming_session_id: &str) -> bool {
        let sessions = self.sessions.lock().expect("session table poisoned");
        let mut superseded = false;
        for session in sessions.iter() {
            if session.session_id != claiming_session_id && session.claims(proxy_id) {
                info!(
                    proxy_id,
                    old_session = %session.session_id,
                    new_session = claiming_session_id,
                    "superseding proxy session"
                );
                session.token.cancel();
                superseded = true;
            }
        }
        superseded
    }

    /// Cancel every live session.
    pub fn close_all(&self) {
        let sessions = self.sessions.lock().expect("session table poisoned");
        for session in sessions.iter() {
            session.token.cancel();
        }
    }
}

/// Accepts proxy connections on the configured local address.
pub struct MuxServer {
    listener: TcpListener,
    registry: Arc<ToolsRegistry>,
    notifier: Notifier,
    table: Arc<SessionTable>,
    session_seq: AtomicU64,
}

impl MuxServer {
    /// Bind the listener. A bind failure is fatal to startup.
    pub async fn bind(
        listen_address: &str,
        registry: Arc<ToolsRegistry>,
        notifier: Notifier,
    ) -> Result<Self, HubError> {
        let listener = TcpListener::bind(listen_address)
            .await
            .map_err(|e| HubError::Transport {
                details: format!("cannot bind mux listener on {}: {}", listen_address, e),
            })?;
        Ok(Self {
            listener,
            registry,
            notifier,
            table: Arc::new(SessionTable::default()),
            session_seq: AtomicU64::new(0),
        })
    }

    /// The bound address, useful when the configuration asked for port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, HubError> {
        self.listener.local_addr().map_err(|e| HubError::Transport {
            details: format!("mux listener has no local address: {}", e),
        })
    }

    /// Accept loop. Runs until the scope is cancelled, then closes every
    /// session before the listener.
    pub async fn run(self, token: CancellationToken) -> Result<(), HubError> {
        info!(addr = %self.local_addr()?, "mux server listening");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.start_session(stream, peer, &token),
                        Err(e) => {
                            error!(error = %e, "failed to accept proxy connection");
                        }
                    }
                }
            }
        }

        info!("mux server stopping, closing sessions");
        self.table.close_all();
        Ok(())
    }

    fn start_session(
        &self,
        stream: tokio::net::TcpStream,
        peer: SocketAddr,
        token: &CancellationToken,
    ) {
        let seq = self.session_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let session_id = format!("s-{:03}", seq);

        let handle = Arc::new(SessionHandle {
            session_id: session_id.clone(),
            proxy_id: Mutex::new(None),
            token: token.child_token(),
        });
        self.table.insert(handle.clone());
        info!(
            session_id = %session_id,
            peer = %peer,
            live_sessions = self.table.len(),
            "new proxy session"
        );

        let session = MuxSession::new(
            session_id.clone(),
            stream,
            self.registry.clone(),
            self.notifier.clone(),
            self.table.clone(),
            handle,
        );
        let table = self.table.clone();
        tokio::spawn(async move {
            if let Err(e) = session.run().await {
                error!(session_id = %session_id, error = %e, "mux session failed, removing it");
            }
            table.remove(&session_id);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(session_id: &str, proxy_id: Option<&str>) -> Arc<SessionHandle> {
        Arc::new(SessionHandle {
            session_id: session_id.to_string(),
            proxy_id: Mutex::new(proxy_id.map(String::from)),
            token: CancellationToken::new(),
        })
    }

    #[test]
    fn test_supersede_cancels_prior_claimant() {
        let table = SessionTable::default();
        let old = handle("s-001", Some("p1"));
        let unrelated = handle("s-002", Some("p2"));
        table.insert(old.clone());
        table.insert(unrelated.clone());

        assert!(table.supersede("p1", "s-003"));
        assert!(old.token.is_cancelled());
        assert!(!unrelated.token.is_cancelled());
    }

    #[test]
    fn test_supersede_ignores_claiming_session() {
        let table = SessionTable::default();
        let me = handle("s-001", Some("p1"));
        table.insert(me.clone());

        assert!(!table.supersede("p1", "s-001"));
        assert!(!me.token.is_cancelled());
    }

    #[test]
    fn test_remove_drops_session() {
        let table = SessionTable::default();
        table.insert(handle("s-001", None));
        table.insert(handle("s-002", None));
        assert_eq!(table.len(), 2);

        table.remove("s-001");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_close_all_cancels_everything() {
        let table = SessionTable::default();
        let a = handle("s-001", None);
        let b = handle("s-002", Some("p1"));
        table.insert(a.clone());
        table.insert(b.clone());

        table.close_all();
        assert!(a.token.is_cancelled());
        assert!(b.token.is_cancelled());
    }
}
