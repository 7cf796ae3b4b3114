//! Supervisor: one cancellable scope over every long-lived worker.
//!
//! Workers run concurrently; the first to return an error cancels the
//! scope and every other worker observes the cancellation and returns.
//! The supervisor's result is that first error. A requested shutdown
//! (signal, orphaned process, client EOF) travels through the same path
//! as a shutdown-flavored error and is mapped to a clean exit by `main`.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::HubError;

/// Runs a fixed set of workers under one cancellation scope.
pub struct Supervisor {
    token: CancellationToken,
    workers: JoinSet<(&'static str, Result<(), HubError>)>,
}

impl Supervisor {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            workers: JoinSet::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Add a named worker to the scope.
    pub fn spawn<F>(&mut self, name: &'static str, worker: F)
    where
        F: std::future::Future<Output = Result<(), HubError>> + Send + 'static,
    {
        self.workers.spawn(async move { (name, worker.await) });
    }

    /// Wait for every worker. The first non-ok result cancels the scope;
    /// the remaining workers are given the chance to wind down.
    pub async fn run(mut self) -> Result<(), HubError> {
        let mut first_error: Option<HubError> = None;

        while let Some(joined) = self.workers.join_next().await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    error!(error = %join_error, "worker panicked");
                    ("panicked worker", Err(HubError::Internal {
                        correlation_id: join_error.to_string(),
                    }))
                }
            };

            match result {
                Ok(()) => {
                    info!(worker = name, "worker finished");
                }
                Err(e) => {
                    if e.is_shutdown() {
                        info!(worker = name, reason = %e, "worker requested shutdown");
                    } else {
                        error!(worker = name, error = %e, "worker failed");
                    }
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                    self.token.cancel();
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Worker: completes when a termination signal arrives.
#[cfg(unix)]
pub async fn watch_signals(token: CancellationToken) -> Result<(), HubError> {
    use tokio::signal::unix::{signal, SignalKind};

    let install = |kind: SignalKind| {
        signal(kind).map_err(|e| HubError::Transport {
            details: format!("cannot install signal handler: {}", e),
        })
    };
    let mut interrupt = install(SignalKind::interrupt())?;
    let mut terminate = install(SignalKind::terminate())?;
    let mut hangup = install(SignalKind::hangup())?;
    let mut quit = install(SignalKind::quit())?;

    let received = tokio::select! {
        _ = token.cancelled() => return Ok(()),
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
        _ = quit.recv() => "SIGQUIT",
    };
    info!(signal = received, "received termination signal");
    Err(HubError::Shutdown {
        reason: format!("received {}", received),
    })
}

#[cfg(not(unix))]
pub async fn watch_signals(token: CancellationToken) -> Result<(), HubError> {
    tokio::select! {
        _ = token.cancelled() => Ok(()),
        result = tokio::signal::ctrl_c() => {
            result.map_err(|e| HubError::Transport {
                details: format!("cannot install signal handler: {}", e),
            })?;
            info!(signal = "ctrl-c", "received termination signal");
            Err(HubError::Shutdown {
                reason: "received ctrl-c".to_string(),
            })
        }
    }
}

/// Worker: shuts the hub down when the parent process goes away.
///
/// An MCP hub is started by its client; when it gets reparented to init
/// the client is gone and nobody will ever speak to stdin again.
pub async fn monitor_parent(token: CancellationToken, interval: Duration) -> Result<(), HubError> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        if orphaned() {
            warn!("parent process is init, shutting down");
            return Err(HubError::Shutdown {
                reason: "parent process exited".to_string(),
            });
        }
    }
}

#[cfg(unix)]
fn orphaned() -> bool {
    std::os::unix::process::parent_id() == 1
}

#[cfg(not(unix))]
fn orphaned() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_workers_ok() {
        let mut supervisor = Supervisor::new(CancellationToken::new());
        supervisor.spawn("a", async { Ok(()) });
        supervisor.spawn("b", async { Ok(()) });
        assert!(supervisor.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_first_error_cancels_scope() {
        let mut supervisor = Supervisor::new(CancellationToken::new());
        let token = supervisor.token();

        supervisor.spawn("failing", async {
            Err(HubError::Transport {
                details: "listener died".into(),
            })
        });
        let waiter_token = token.clone();
        supervisor.spawn("waiting", async move {
            waiter_token.cancelled().await;
            Ok(())
        });

        let result = supervisor.run().await;
        assert!(matches!(result, Err(HubError::Transport { .. })));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_error_is_preserved() {
        let mut supervisor = Supervisor::new(CancellationToken::new());
        let token = supervisor.token();

        supervisor.spawn("signals", async {
            Err(HubError::Shutdown {
                reason: "received SIGINT".into(),
            })
        });
        let waiter_token = token;
        supervisor.spawn("server", async move {
            waiter_token.cancelled().await;
            Ok(())
        });

        let result = supervisor.run().await;
        match result {
            Err(e) => assert!(e.is_shutdown()),
            Ok(()) => panic!("expected shutdown error"),
        }
    }

    #[tokio::test]
    async fn test_worker_panic_becomes_internal_error() {
        let mut supervisor = Supervisor::new(CancellationToken::new());
        supervisor.spawn("bad", async { panic!("boom") });
        let result = supervisor.run().await;
        assert!(matches!(result, Err(HubError::Internal { .. })));
    }

    #[tokio::test]
    async fn test_parent_monitor_stops_on_cancel() {
        let token = CancellationToken::new();
        let monitor = tokio::spawn(monitor_parent(token.clone(), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        let result = monitor.await.unwrap();
        assert!(result.is_ok());
    }
}
