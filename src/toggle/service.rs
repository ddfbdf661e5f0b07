//! Start/stop wrapper around the diagnostic HTTP listener.
//!
//! [`ControlledService`] owns at most one bound listener at a time. `start`
//! binds and then serves until the listener is shut down, so callers that must
//! stay responsive run it on its own task. `stop` signals a graceful shutdown
//! and waits (bounded by the grace period) for the serve loop to drain.

use axum::Router;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Listening parameters for the diagnostic server.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub addr: SocketAddr,
    /// Requests running longer than this are answered with `408 Request Timeout`.
    pub request_timeout: Option<Duration>,
    /// How long `stop` waits for in-flight requests before giving up.
    pub shutdown_grace: Duration,
}

impl ListenConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            request_timeout: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to bind diagnostic listener at {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("diagnostic server failed: {0}")]
    Serve(#[source] io::Error),
    #[error("diagnostic server did not drain within {grace:?}")]
    ShutdownTimeout { grace: Duration },
}

struct Active {
    generation: u64,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    finished: oneshot::Receiver<()>,
}

pub struct ControlledService {
    listen: ListenConfig,
    router: Router,
    // Guards bind and shutdown so the flag and the listener always change together.
    active: Mutex<Option<Active>>,
    is_up: AtomicBool,
    generation: AtomicU64,
}

impl ControlledService {
    pub fn new(listen: ListenConfig, router: Router) -> Self {
        Self {
            listen,
            router,
            active: Mutex::new(None),
            is_up: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn listen_config(&self) -> &ListenConfig {
        &self.listen
    }

    /// Binds and serves until [`stop`](Self::stop) is called.
    ///
    /// Returns `Ok(())` immediately if a listener is already active, and
    /// `Ok(())` after a graceful stop. Bind failures and serve-loop failures
    /// are returned as errors.
    pub async fn start(&self) -> Result<(), ServiceError> {
        self.start_unless(&CancellationToken::new()).await
    }

    /// Like [`start`](Self::start), but does not bind once `halt` has been
    /// cancelled. The check happens under the same lock `stop` takes, so a
    /// caller that cancels `halt` and then calls `stop` can be sure no
    /// listener outlives the pair.
    pub async fn start_unless(&self, halt: &CancellationToken) -> Result<(), ServiceError> {
        let (listener, guard) = {
            let mut active = self.active.lock().await;
            clear_if_finished(&mut active);
            if active.is_some() || halt.is_cancelled() {
                return Ok(());
            }
            let addr = self.listen.addr;
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| ServiceError::Bind { addr, source })?;
            let local_addr = listener.local_addr().unwrap_or(addr);
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let shutdown = CancellationToken::new();
            let (finished_tx, finished) = oneshot::channel();
            *active = Some(Active {
                generation,
                local_addr,
                shutdown: shutdown.clone(),
                finished,
            });
            self.is_up.store(true, Ordering::SeqCst);
            info!(
                target: SERVICE_TARGET,
                addr = %local_addr,
                "diagnostic listener bound"
            );
            let guard = ServeGuard {
                service: self,
                generation,
                shutdown,
                finished: Some(finished_tx),
            };
            (listener, guard)
        };

        let result = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(guard.shutdown.clone().cancelled_owned())
            .await;

        // Must happen before taking the lock: `stop` waits on `finished` while holding it.
        let generation = guard.generation;
        drop(guard);
        {
            let mut active = self.active.lock().await;
            if active.as_ref().is_some_and(|a| a.generation == generation) {
                *active = None;
            }
        }

        match result {
            Ok(()) => {
                info!(target: SERVICE_TARGET, "diagnostic listener closed");
                Ok(())
            }
            Err(e) => {
                warn!(target: SERVICE_TARGET, error = %e, "diagnostic server exited with error");
                Err(ServiceError::Serve(e))
            }
        }
    }

    /// Gracefully shuts the active listener down. No-op when nothing is
    /// running; waits for an in-progress `start` to finish binding first.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let mut active = self.active.lock().await;
        let Some(current) = active.take() else {
            return Ok(());
        };
        self.is_up.store(false, Ordering::SeqCst);
        current.shutdown.cancel();

        let grace = self.listen.shutdown_grace;
        match tokio::time::timeout(grace, current.finished).await {
            // Either the serve loop signalled, or its task went away: both mean drained.
            Ok(_) => Ok(()),
            Err(_) => Err(ServiceError::ShutdownTimeout { grace }),
        }
    }

    /// Current running flag; never waits on I/O.
    pub fn is_running(&self) -> bool {
        self.is_up.load(Ordering::SeqCst)
    }

    /// Address of the active listener, if any. Useful when binding port 0.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let mut active = self.active.lock().await;
        clear_if_finished(&mut active);
        active.as_ref().map(|a| a.local_addr)
    }
}

/// Lives as long as a serve loop. Dropping it, whether the loop returned or
/// the `start` future was abandoned, marks the listener as gone.
struct ServeGuard<'a> {
    service: &'a ControlledService,
    generation: u64,
    shutdown: CancellationToken,
    finished: Option<oneshot::Sender<()>>,
}

impl Drop for ServeGuard<'_> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if self.service.generation.load(Ordering::SeqCst) == self.generation {
            self.service.is_up.store(false, Ordering::SeqCst);
        }
        // Closing `finished` releases a waiting `stop` and lets the next lock
        // holder see the slot as stale if the cleanup below cannot run.
        drop(self.finished.take());
        if let Ok(mut active) = self.service.active.try_lock() {
            if active.as_ref().is_some_and(|a| a.generation == self.generation) {
                *active = None;
            }
        }
    }
}

/// Drops a slot whose serve loop has already gone away.
fn clear_if_finished(active: &mut Option<Active>) {
    let gone = active.as_mut().is_some_and(|a| {
        !matches!(a.finished.try_recv(), Err(oneshot::error::TryRecvError::Empty))
    });
    if gone {
        *active = None;
    }
}

impl std::fmt::Debug for ControlledService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlledService")
            .field("listen", &self.listen)
            .field("is_up", &self.is_running())
            .finish_non_exhaustive()
    }
}
