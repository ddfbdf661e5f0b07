//! Reconciliation loop that keeps the diagnostic listener in the state the
//! rules (or an operator) ask for.

use crate::toggle::asyncutil::TaskTracker;
use crate::toggle::engine;
use crate::toggle::routes;
use crate::toggle::rules::Rule;
use crate::toggle::service::{ControlledService, ListenConfig, ServiceError};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TOGGLER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::toggler");

/// Poll intervals below this are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ToggleError {
    #[error("no rules configured")]
    NoRules,
    #[error("listen configuration not specified")]
    MissingListenConfig,
    #[error("error trying rule [{name}]: {source:#}")]
    Rule {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("unable to start diagnostic server: {0}")]
    Start(#[source] ServiceError),
    #[error("unable to stop diagnostic server: {0}")]
    Stop(#[source] ServiceError),
    #[error("serve has already been called on this toggler")]
    AlreadyServed,
}

pub struct TogglerConfig {
    /// Extends the route path: `"/extra"` serves at `/extra/debug/pprof/...`.
    pub endpoint_prefix: String,
    /// Time between the end of one poll and the start of the next.
    pub poll_interval: Duration,
    /// Evaluated in order on every poll; at least one is required.
    pub rules: Vec<Box<dyn Rule>>,
    pub listen: Option<ListenConfig>,
    /// Extra routes mounted under `endpoint_prefix` next to the built-in ones.
    pub routes: Option<Router>,
}

impl TogglerConfig {
    pub fn new(listen: ListenConfig) -> Self {
        Self {
            endpoint_prefix: String::new(),
            poll_interval: MIN_POLL_INTERVAL,
            rules: Vec::new(),
            listen: Some(listen),
            routes: None,
        }
    }

    pub fn rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn endpoint_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.endpoint_prefix = prefix.into();
        self
    }

    pub fn routes(mut self, routes: Router) -> Self {
        self.routes = Some(routes);
        self
    }
}

/// Who decides the desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Rules are evaluated on every tick.
    Polling,
    /// An operator forced the state; rules are no longer consulted.
    Manual { desired: bool },
}

pub struct Toggler {
    poll_interval: Duration,
    rules: Vec<Box<dyn Rule>>,
    service: Arc<ControlledService>,
    tasks: TaskTracker,
    // Single override slot: `None` while polling, the forced state afterwards.
    force_tx: watch::Sender<Option<bool>>,
    force_rx: watch::Receiver<Option<bool>>,
    served: AtomicBool,
}

impl Toggler {
    pub fn new(cfg: TogglerConfig) -> Result<Self, ToggleError> {
        if cfg.rules.is_empty() {
            return Err(ToggleError::NoRules);
        }
        let listen = cfg.listen.ok_or(ToggleError::MissingListenConfig)?;

        let tasks = TaskTracker::new();
        let router = routes::diagnostic_router(
            &cfg.endpoint_prefix,
            tasks.clone(),
            cfg.routes,
            listen.request_timeout,
        );
        let (force_tx, force_rx) = watch::channel(None);

        Ok(Self {
            poll_interval: cfg.poll_interval.max(MIN_POLL_INTERVAL),
            rules: cfg.rules,
            service: Arc::new(ControlledService::new(listen, router)),
            tasks,
            force_tx,
            force_rx,
            served: AtomicBool::new(false),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Whether the diagnostic server is currently listening. Safe to call at
    /// any time, including before `serve` and after it returns.
    pub fn is_up(&self) -> bool {
        self.service.is_running()
    }

    pub fn mode(&self) -> Mode {
        match *self.force_rx.borrow() {
            None => Mode::Polling,
            Some(desired) => Mode::Manual { desired },
        }
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.service.local_addr().await
    }

    /// Forces the server up and stops rule polling for good.
    pub fn force_start(&self) {
        self.force(true);
    }

    /// Forces the server down and stops rule polling for good.
    pub fn force_stop(&self) {
        self.force(false);
    }

    /// Flips the pending override, or the current running state when no
    /// override has been issued yet.
    pub fn toggle(&self) {
        let running = self.is_up();
        let mut engaged = None;
        self.force_tx.send_modify(|slot| {
            let desired = match *slot {
                Some(pending) => !pending,
                None => {
                    engaged = Some(!running);
                    !running
                }
            };
            *slot = Some(desired);
        });
        if let Some(desired) = engaged {
            log_override_engaged(desired);
        }
    }

    fn force(&self, desired: bool) {
        let previous = self.force_tx.send_replace(Some(desired));
        if previous.is_none() {
            log_override_engaged(desired);
        }
    }

    /// Runs the reconciliation loop until `cancel` fires (returns `Ok`) or an
    /// unrecoverable rule or transition error occurs (returns that error).
    ///
    /// Whatever the exit reason, the server is not left running. May only be
    /// called once per toggler.
    pub async fn serve(&self, cancel: CancellationToken) -> Result<(), ToggleError> {
        if self.served.swap(true, Ordering::SeqCst) {
            return Err(ToggleError::AlreadyServed);
        }

        // Cancelled on exit so start attempts still queued behind the service
        // lock never bind after the final stop.
        let halt = CancellationToken::new();
        let (err_tx, mut err_rx) = mpsc::channel::<ToggleError>(1);
        let mut force = self.force_rx.clone();

        let ticker = tokio::time::sleep(self.poll_interval);
        tokio::pin!(ticker);

        info!(
            target: TOGGLER_TARGET,
            interval = ?self.poll_interval,
            rules = self.rules.len(),
            "toggler started"
        );

        let outcome = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                Some(e) = err_rx.recv() => break Err(e),
                Ok(()) = force.changed() => {
                    let desired = *force.borrow_and_update();
                    if let Some(desired) = desired {
                        if let Err(e) = self.reconcile(desired, &halt, &err_tx).await {
                            break Err(e);
                        }
                    }
                }
                () = &mut ticker => {
                    if let Err(e) = self.on_tick(&halt, &err_tx).await {
                        break Err(e);
                    }
                    ticker.as_mut().reset(Instant::now() + self.poll_interval);
                }
            }
        };

        halt.cancel();
        match &outcome {
            Ok(()) => {
                info!(target: TOGGLER_TARGET, "toggler cancelled");
                if let Err(e) = self.service.stop().await {
                    warn!(target: TOGGLER_TARGET, error = %e, "failed to stop diagnostic server on exit");
                }
            }
            Err(e) => {
                error!(target: TOGGLER_TARGET, error = %e, "toggler terminating");
                // Best-effort; the loop error is what gets reported.
                if let Err(stop_err) = self.service.stop().await {
                    warn!(target: TOGGLER_TARGET, error = %stop_err, "corrective stop failed");
                }
            }
        }
        outcome
    }

    async fn on_tick(
        &self,
        halt: &CancellationToken,
        err_tx: &mpsc::Sender<ToggleError>,
    ) -> Result<(), ToggleError> {
        let forced = *self.force_rx.borrow();
        let desired = match forced {
            Some(desired) => desired,
            None => {
                let ev = engine::evaluate(&self.rules)?;
                debug!(
                    target: TOGGLER_TARGET,
                    matched = ev.matched,
                    triggering = ?ev.triggering_names(),
                    "rules evaluated"
                );
                if ev.matched && !self.is_up() {
                    info!(
                        target: TOGGLER_TARGET,
                        triggering = ?ev.triggering_names(),
                        "rules matched"
                    );
                }
                ev.matched
            }
        };
        self.reconcile(desired, halt, err_tx).await
    }

    /// Issues at most one transition toward `desired`. Starts run on their own
    /// task and report failure through `err_tx`; stops complete inline.
    async fn reconcile(
        &self,
        desired: bool,
        halt: &CancellationToken,
        err_tx: &mpsc::Sender<ToggleError>,
    ) -> Result<(), ToggleError> {
        let running = self.is_up();
        if desired && !running {
            info!(target: TOGGLER_TARGET, addr = %self.service.listen_config().addr, "starting diagnostic server");
            let service = Arc::clone(&self.service);
            let halt = halt.clone();
            let err_tx = err_tx.clone();
            self.tasks.spawn(async move {
                if let Err(e) = service.start_unless(&halt).await {
                    let _ = err_tx.send(ToggleError::Start(e)).await;
                }
            });
        } else if !desired && running {
            info!(target: TOGGLER_TARGET, "stopping diagnostic server");
            self.service.stop().await.map_err(ToggleError::Stop)?;
        }
        Ok(())
    }
}

fn log_override_engaged(desired: bool) {
    info!(
        target: TOGGLER_TARGET,
        desired,
        "manual override engaged; rule polling disabled"
    );
}

impl std::fmt::Debug for Toggler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toggler")
            .field("poll_interval", &self.poll_interval)
            .field("rules", &self.rules.iter().map(|r| r.name()).collect::<Vec<_>>())
            .field("mode", &self.mode())
            .field("service", &self.service)
            .finish()
    }
}
