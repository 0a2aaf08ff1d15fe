//! The bridge service: the single owner of the running [`BridgeController`].
//!
//! A full settings update never mutates a running controller.  It tears the
//! current one down completely, waits for the listen port to be released, and
//! starts a fresh controller from the new configuration.  Only one such
//! rebuild may be in flight; a second request arriving meanwhile is rejected
//! rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::controller::{BridgeController, BridgeDeps};
use crate::domain::{
    BridgeConfig, BridgeEvent, ConfigError, EnumerationError, EventHub, EventKind, PortDescriptor,
    PortStatus, RawSettings, StatusEvent, SubscriptionId, TeardownError,
};

/// Errors returned by [`BridgeService`].
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("bridge is already running")]
    AlreadyRunning,

    #[error("a reconfiguration is already in progress")]
    ReconfigurationInProgress,

    #[error("invalid settings: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

/// Timing of the teardown-then-rebuild sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildPolicy {
    /// Pause between teardown and rebuild.
    pub settle_delay: Duration,
    /// Upper bound on waiting for the new listen port to become bindable.
    pub port_release_timeout: Duration,
    /// How often the port is probed while waiting.
    pub poll_interval: Duration,
}

impl Default for RebuildPolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(100),
            port_release_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(25),
        }
    }
}

/// Owns the bridge across full reconfigurations.
pub struct BridgeService {
    deps: BridgeDeps,
    policy: RebuildPolicy,
    events: Arc<EventHub>,
    controller: Mutex<Option<BridgeController>>,
    reconfiguring: AtomicBool,
}

impl BridgeService {
    pub fn new(deps: BridgeDeps, policy: RebuildPolicy) -> Self {
        Self {
            deps,
            policy,
            events: Arc::new(EventHub::new()),
            controller: Mutex::new(None),
            reconfiguring: AtomicBool::new(false),
        }
    }

    /// The registry every controller built by this service raises events on.
    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Builds and starts a controller for `config`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::AlreadyRunning`] if a controller exists.
    pub async fn start(&self, config: BridgeConfig) -> Result<(), ServiceError> {
        let mut slot = self.controller.lock().await;
        if slot.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }
        *slot = Some(BridgeController::start(config, self.deps.clone(), Arc::clone(&self.events)).await);
        Ok(())
    }

    /// Validates `settings`, then replaces the running controller with one
    /// built from them.
    ///
    /// The rebuild happens even when the values are identical to the current
    /// ones.  Starts a controller if none is running.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Config`] if `settings` are invalid; the running
    ///   controller is left untouched.
    /// - [`ServiceError::ReconfigurationInProgress`] if another update is in
    ///   flight.
    pub async fn apply_settings(&self, settings: &RawSettings) -> Result<BridgeConfig, ServiceError> {
        let config = settings.validate()?;

        let Some(_guard) = ReconfigGuard::acquire(&self.reconfiguring) else {
            warn!("settings update rejected: another update is in progress");
            self.events
                .emit_status(StatusEvent::ReconfigurationRejected {
                    reason: "another reconfiguration is in progress".to_string(),
                });
            return Err(ServiceError::ReconfigurationInProgress);
        };

        let mut slot = self.controller.lock().await;
        if let Some(old) = slot.take() {
            info!("applying settings: {config}");
            self.events
                .emit_status(StatusEvent::Reconfiguring { what: "all settings" });
            if let Err(e) = old.shutdown().await {
                warn!("{e}; rebuilding anyway");
            }
            self.settle(&config).await;
        }

        *slot = Some(
            BridgeController::start(config.clone(), self.deps.clone(), Arc::clone(&self.events))
                .await,
        );
        Ok(config)
    }

    /// Tears down the running controller, if any.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Teardown`] if either leaf failed to shut down cleanly.
    pub async fn stop(&self) -> Result<(), ServiceError> {
        let controller = self.controller.lock().await.take();
        match controller {
            Some(c) => Ok(c.shutdown().await?),
            None => Ok(()),
        }
    }

    /// `Disconnected` when no controller is running.
    pub async fn port_status(&self) -> PortStatus {
        self.controller
            .lock()
            .await
            .as_ref()
            .map_or(PortStatus::Disconnected, BridgeController::port_status)
    }

    /// Closes the serial side of the running controller, if any.
    pub async fn close_serial_port(&self) {
        if let Some(controller) = self.controller.lock().await.as_mut() {
            controller.close_serial_port().await;
        }
    }

    /// The configuration of the running controller, if any.
    pub async fn current_config(&self) -> Option<BridgeConfig> {
        self.controller
            .lock()
            .await
            .as_ref()
            .map(|c| c.config().clone())
    }

    pub async fn is_running(&self) -> bool {
        self.controller.lock().await.is_some()
    }

    /// Works whether or not a controller is running.
    ///
    /// # Errors
    ///
    /// [`EnumerationError`] if the platform query fails.
    pub fn available_ports(&self) -> Result<Vec<PortDescriptor>, EnumerationError> {
        self.deps.enumerator.available_ports()
    }

    /// Runs `f` against the running controller.
    ///
    /// Returns `None` if no controller is running.
    pub async fn with_controller<R>(&self, f: impl FnOnce(&BridgeController) -> R) -> Option<R> {
        self.controller.lock().await.as_ref().map(f)
    }

    /// Waits out the settle delay, then until the next listen port can be
    /// bound or the release timeout expires.
    async fn settle(&self, next: &BridgeConfig) {
        sleep(self.policy.settle_delay).await;

        let addr = next.listen_addr();
        let deadline = Instant::now() + self.policy.port_release_timeout;
        loop {
            match TcpListener::bind(addr).await {
                Ok(_) => return,
                Err(e) if Instant::now() >= deadline => {
                    warn!(
                        "{addr} still unavailable after {:?} ({e}); starting anyway",
                        self.policy.port_release_timeout
                    );
                    return;
                }
                Err(e) => {
                    debug!("waiting for {addr} to be released: {e}");
                    sleep(self.policy.poll_interval).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for BridgeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeService")
            .field("policy", &self.policy)
            .field("reconfiguring", &self.reconfiguring.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Clears the in-flight flag on drop.
struct ReconfigGuard<'a>(&'a AtomicBool);

impl<'a> ReconfigGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ReconfigGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
