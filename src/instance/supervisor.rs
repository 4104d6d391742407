//! Per-instance supervision: idle tracking and teardown.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::container::{ExitStatus, ServerContainer};
use crate::ports::{PortLease, PortOffset};
use crate::server_api::ServerApi;

/// Lifecycle state of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Container and server are being set up.
    Provisioning,
    /// Up and waiting for the next occupancy check.
    Running,
    /// Querying the player list.
    Checking,
    /// A stop request has been sent to the runtime.
    Stopping,
    /// Port released; nothing else may happen to this instance.
    Terminated,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Provisioning => "provisioning",
            InstanceState::Running => "running",
            InstanceState::Checking => "checking",
            InstanceState::Stopping => "stopping",
            InstanceState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a monitoring loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Nobody played for the whole idle timeout; the server was stopped.
    IdleTimeout,
    /// The worker is shutting down; the server was stopped.
    Shutdown,
    /// The container exited by itself.
    ContainerExited(ExitStatus),
}

/// Result of a single occupancy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    /// Players are connected, or the check failed (treated as occupied).
    Occupied,
    /// Empty, but still inside the idle timeout.
    Idle,
    /// Empty for at least the idle timeout.
    Expired,
}

/// Timing of the monitoring loop.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    /// How long a server may stay empty before it is stopped.
    pub idle_timeout: Duration,
    /// Delay between player checks.
    pub check_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5 * 60),
            check_interval: Duration::from_secs(30),
        }
    }
}

/// One game server instance and everything it owns.
pub struct Instance {
    id: Uuid,
    lease: Option<PortLease>,
    container: ServerContainer,
    api: Arc<dyn ServerApi>,
    last_activity: Instant,
    shutdown: CancellationToken,
    settings: MonitorSettings,
    state: InstanceState,
}

impl Instance {
    /// Create an instance in `Provisioning`, with the idle clock starting now.
    pub fn new(
        lease: PortLease,
        container: ServerContainer,
        api: Arc<dyn ServerApi>,
        shutdown: CancellationToken,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lease: Some(lease),
            container,
            api,
            last_activity: Instant::now(),
            shutdown,
            settings,
            state: InstanceState::Provisioning,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Reserved port offset, `None` once it has been released.
    pub fn offset(&self) -> Option<PortOffset> {
        self.lease.as_ref().map(PortLease::offset)
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn container(&self) -> &ServerContainer {
        &self.container
    }

    pub fn container_mut(&mut self) -> &mut ServerContainer {
        &mut self.container
    }

    pub fn api(&self) -> &Arc<dyn ServerApi> {
        &self.api
    }

    fn set_state(&mut self, state: InstanceState) {
        if self.state != state {
            tracing::debug!(instance = %self.id, from = %self.state, to = %state, "Instance state change");
            self.state = state;
        }
    }

    /// Mark provisioning as finished.
    pub(crate) fn mark_running(&mut self) {
        self.set_state(InstanceState::Running);
    }

    /// Hand the port offset back to the pool. Only the first call releases.
    fn release_port(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release();
        }
    }

    /// Issue a stop request, logging failures.
    async fn stop_server(&mut self) {
        self.set_state(InstanceState::Stopping);
        tracing::info!(instance = %self.id, "Shutting down server");
        if let Err(e) = self.container.stop().await {
            tracing::error!(instance = %self.id, "Caught error while stopping container: {}", e);
        }
    }

    /// Query the player list and update the idle clock.
    ///
    /// A failed query counts as occupied so an unreachable server is never
    /// reclaimed for idleness.
    pub async fn check_occupancy(&mut self) -> Occupancy {
        self.set_state(InstanceState::Checking);
        tracing::debug!(instance = %self.id, "Checking player status of server");

        let outcome = match self.api.get_players().await {
            Err(e) => {
                tracing::error!(instance = %self.id, "Caught error while checking player count: {}", e);
                Occupancy::Occupied
            }
            Ok(players) if !players.is_empty() => {
                self.last_activity = Instant::now();
                Occupancy::Occupied
            }
            Ok(_) if self.last_activity.elapsed() < self.settings.idle_timeout => Occupancy::Idle,
            Ok(_) => Occupancy::Expired,
        };

        self.set_state(InstanceState::Running);
        outcome
    }

    /// Abandon an instance whose provisioning failed.
    ///
    /// Stops the container if it got as far as running, then releases the
    /// port. No monitor is ever started for this instance.
    pub(crate) async fn abort_provisioning(mut self) {
        if self.container.container_id().is_some() {
            self.stop_server().await;
        }
        self.release_port();
        self.set_state(InstanceState::Terminated);
    }

    /// Supervise the running server until it stops, then release its port.
    pub async fn monitor(mut self) -> Termination {
        self.mark_running();
        let mut container_exit = self.container.wait_for_not_running();
        let shutdown = self.shutdown.clone();

        let termination = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.stop_server().await;
                    break Termination::Shutdown;
                }
                exit = &mut container_exit => {
                    let status = exit.unwrap_or(ExitStatus::Unknown);
                    tracing::info!(instance = %self.id, "Container exited with code {}", status);
                    break Termination::ContainerExited(status);
                }
                _ = tokio::time::sleep(self.settings.check_interval) => {
                    // A slow player query must not hold up shutdown.
                    let checked = tokio::select! {
                        _ = shutdown.cancelled() => None,
                        occupancy = self.check_occupancy() => Some(occupancy),
                    };
                    let Some(occupancy) = checked else {
                        self.stop_server().await;
                        break Termination::Shutdown;
                    };
                    if occupancy == Occupancy::Expired {
                        tracing::info!(
                            instance = %self.id,
                            idle_for = ?self.last_activity.elapsed(),
                            "No players connected within the idle timeout"
                        );
                        self.stop_server().await;
                        break Termination::IdleTimeout;
                    }
                }
            }
        };

        self.release_port();
        self.set_state(InstanceState::Terminated);
        termination
    }

    /// Run [`monitor`](Self::monitor) as a detached task tracked by `tracker`.
    pub fn spawn_monitor(self, tracker: &TaskTracker) -> JoinHandle<Termination> {
        let span = tracing::info_span!(
            "instance",
            id = %self.id,
            offset = self.offset().unwrap_or_default()
        );
        tracker.spawn(self.monitor().instrument(span))
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("offset", &self.offset())
            .field("state", &self.state)
            .field("container", &self.container)
            .finish()
    }
}
