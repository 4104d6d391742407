//! Creates instances, provisions them and coordinates shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::container::{ContainerRuntime, ContainerSettings, ServerContainer};
use crate::error::ProvisionError;
use crate::events::{ProgressSink, ServerEvent, ServerEventType, StartRequest};
use crate::instance::supervisor::{Instance, MonitorSettings};
use crate::ports::{PortOffset, PortPool};
use crate::server_api::ServerApiConnector;

/// Settings applied to every instance the manager provisions.
#[derive(Debug, Clone)]
pub struct InstanceSettings {
    /// Prepended to the requested name to form the display name.
    pub name_prefix: String,
    /// Overall budget for the server API to come online.
    pub ready_timeout: Duration,
    pub monitor: MonitorSettings,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            name_prefix: "CommNode server ".to_string(),
            ready_timeout: Duration::from_secs(5),
            monitor: MonitorSettings::default(),
        }
    }
}

/// Summary of a successfully provisioned server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedInstance {
    pub id: Uuid,
    pub display_name: String,
    pub offset: PortOffset,
    pub api_port: u16,
    pub game_port: u16,
    pub container_id: String,
}

/// Owns the port pool and every instance's background monitor.
pub struct LifecycleManager {
    pool: Arc<PortPool>,
    runtime: Arc<dyn ContainerRuntime>,
    connector: Arc<dyn ServerApiConnector>,
    container_settings: Arc<ContainerSettings>,
    settings: InstanceSettings,
    shutdown: CancellationToken,
    monitors: TaskTracker,
}

impl LifecycleManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        connector: Arc<dyn ServerApiConnector>,
        container_settings: ContainerSettings,
        settings: InstanceSettings,
    ) -> Self {
        Self {
            pool: Arc::new(PortPool::new()),
            runtime,
            connector,
            container_settings: Arc::new(container_settings),
            settings,
            shutdown: CancellationToken::new(),
            monitors: TaskTracker::new(),
        }
    }

    pub fn pool(&self) -> &Arc<PortPool> {
        &self.pool
    }

    /// Number of instances whose monitor is still running.
    pub fn active_instances(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Reserve a port offset and build an instance around it.
    ///
    /// Nothing touches the container runtime yet, so the caller can still
    /// roll back cheaply.
    pub fn create_instance(&self) -> Result<Instance, ProvisionError> {
        if self.shutdown.is_cancelled() {
            return Err(ProvisionError::ShuttingDown);
        }

        let lease = self.pool.lease().ok_or(ProvisionError::PortsExhausted)?;
        let container = match ServerContainer::new(
            Arc::clone(&self.runtime),
            Arc::clone(&self.container_settings),
            lease.offset(),
        ) {
            Ok(container) => container,
            Err(e) => {
                lease.release();
                return Err(e.into());
            }
        };
        let api = self.connector.connect(container.api_port());

        Ok(Instance::new(
            lease,
            container,
            api,
            self.shutdown.clone(),
            self.settings.monitor,
        ))
    }

    /// Provision a server and hand it to a background monitor.
    ///
    /// Returns as soon as the server is ready; the monitor keeps running
    /// independently of the caller. On failure the port is released (and a
    /// started container stopped) before the error is returned.
    pub async fn start(
        &self,
        request: &StartRequest,
        progress: &dyn ProgressSink,
    ) -> Result<StartedInstance, ProvisionError> {
        tracing::info!("Starting server with name: {}", request.name);

        let mut instance = self.create_instance()?;
        let display_name = format!("{}{}", self.settings.name_prefix, request.name);

        if let Err(e) = self.provision(&mut instance, &display_name, progress).await {
            tracing::warn!(
                instance = %instance.id(),
                offset = ?instance.offset(),
                "Provisioning failed, rolling back: {}",
                e
            );
            instance.abort_provisioning().await;
            return Err(e);
        }

        let container = instance.container();
        let started = StartedInstance {
            id: instance.id(),
            display_name,
            offset: instance.offset().unwrap_or_default(),
            api_port: container.api_port(),
            game_port: container.game_port(),
            container_id: container.container_id().unwrap_or_default().to_string(),
        };

        instance.mark_running();
        instance.spawn_monitor(&self.monitors);

        tracing::info!(
            instance = %started.id,
            game_port = started.game_port,
            "Server '{}' ready",
            started.display_name
        );
        Ok(started)
    }

    async fn provision(
        &self,
        instance: &mut Instance,
        display_name: &str,
        progress: &dyn ProgressSink,
    ) -> Result<(), ProvisionError> {
        instance.container_mut().start(progress).await?;

        let image = instance.container().image().to_string();
        progress
            .send_event(ServerEvent::new(ServerEventType::SettingUpServer, image))
            .await?;

        let api = Arc::clone(instance.api());
        api.wait_for_online(self.settings.ready_timeout)
            .await
            .map_err(ProvisionError::NotReady)?;
        api.set_server_name(display_name)
            .await
            .map_err(ProvisionError::Configure)?;

        progress
            .send_event(ServerEvent::new(ServerEventType::ServerReady, display_name))
            .await?;
        Ok(())
    }

    /// Tell every live instance to stop. Does not wait for them.
    ///
    /// Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        tracing::info!(
            instances = self.monitors.len(),
            "Broadcasting shutdown to all servers"
        );
        self.shutdown.cancel();
        self.monitors.close();
    }

    /// Wait up to `grace` for every monitor to finish.
    ///
    /// Returns `false` if some were still running when the grace period ran
    /// out. Only meaningful after [`shutdown`](Self::shutdown).
    pub async fn wait_for_instances(&self, grace: Duration) -> bool {
        self.monitors.close();
        tokio::time::timeout(grace, self.monitors.wait())
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    use super::*;
    use crate::container::ContainerError;
    use crate::events::ProgressClosed;
    use crate::testing::{RuntimeCall, StubConnector, StubRuntime, StubServerApi};

    /// Accepts events until one of type `closes_on` arrives, then reports closed.
    struct ClosingSink {
        closes_on: ServerEventType,
    }

    #[async_trait]
    impl ProgressSink for ClosingSink {
        async fn send_event(&self, event: ServerEvent) -> Result<(), ProgressClosed> {
            if event.event_type == self.closes_on {
                Err(ProgressClosed)
            } else {
                Ok(())
            }
        }
    }

    fn manager(runtime: &Arc<StubRuntime>, api: &Arc<StubServerApi>) -> LifecycleManager {
        LifecycleManager::new(
            Arc::clone(runtime) as Arc<dyn ContainerRuntime>,
            Arc::new(StubConnector::new(Arc::clone(api))),
            ContainerSettings::default(),
            InstanceSettings::default(),
        )
    }

    fn request(name: &str) -> StartRequest {
        StartRequest {
            name: name.to_string(),
        }
    }

    async fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEventType> {
        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type);
        }
        types
    }

    #[test]
    fn test_create_instance_allocates_sequential_offsets() {
        let runtime = Arc::new(StubRuntime::new());
        let api = Arc::new(StubServerApi::new());
        let manager = manager(&runtime, &api);

        let a = manager.create_instance().unwrap();
        let b = manager.create_instance().unwrap();
        assert_eq!(a.offset(), Some(0));
        assert_eq!(b.offset(), Some(1));
        assert_eq!(b.container().api_port(), 8081);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_streams_all_stages() {
        let runtime = Arc::new(StubRuntime::new());
        let api = Arc::new(StubServerApi::new());
        let manager = manager(&runtime, &api);
        let (tx, mut rx) = mpsc::channel(16);

        let started = manager.start(&request("alpha"), &tx).await.unwrap();

        assert_eq!(
            drain(&mut rx).await,
            vec![
                ServerEventType::ImagePull,
                ServerEventType::ContainerStart,
                ServerEventType::SettingUpServer,
                ServerEventType::ServerReady,
            ]
        );
        assert_eq!(started.display_name, "CommNode server alpha");
        assert_eq!(started.offset, 0);
        assert_eq!(started.game_port, 7808);
        assert_eq!(started.container_id, "container-0");
        assert_eq!(api.names(), vec!["CommNode server alpha".to_string()]);
        assert_eq!(manager.active_instances(), 1);

        manager.shutdown();
        assert!(manager.wait_for_instances(Duration::from_secs(1)).await);
    }

    async fn assert_rolled_back(
        manager: &LifecycleManager,
        result: Result<StartedInstance, ProvisionError>,
    ) {
        assert!(result.is_err());
        assert_eq!(manager.active_instances(), 0);
        assert_eq!(manager.pool().free_count(), 1);
        assert_eq!(manager.create_instance().unwrap().offset(), Some(0));
    }

    #[tokio::test]
    async fn test_pull_failure_rolls_back() {
        let runtime = Arc::new(StubRuntime::new().fail_pull());
        let api = Arc::new(StubServerApi::new());
        let manager = manager(&runtime, &api);
        let (tx, _rx) = mpsc::channel(16);

        let result = manager.start(&request("alpha"), &tx).await;
        assert!(matches!(result, Err(ProvisionError::Container(_))));
        assert_rolled_back(&manager, result).await;
        assert_eq!(runtime.stop_count(), 0);
    }

    #[tokio::test]
    async fn test_create_failure_rolls_back() {
        let runtime = Arc::new(StubRuntime::new().fail_create());
        let api = Arc::new(StubServerApi::new());
        let manager = manager(&runtime, &api);
        let (tx, _rx) = mpsc::channel(16);

        let result = manager.start(&request("alpha"), &tx).await;
        assert_rolled_back(&manager, result).await;
    }

    #[tokio::test]
    async fn test_start_failure_rolls_back() {
        let runtime = Arc::new(StubRuntime::new().fail_start());
        let api = Arc::new(StubServerApi::new());
        let manager = manager(&runtime, &api);
        let (tx, _rx) = mpsc::channel(16);

        let result = manager.start(&request("alpha"), &tx).await;
        assert_rolled_back(&manager, result).await;
        assert!(
            runtime
                .calls()
                .contains(&RuntimeCall::Remove("container-0".to_string()))
        );
    }

    #[tokio::test]
    async fn test_readiness_failure_stops_container_and_rolls_back() {
        let runtime = Arc::new(StubRuntime::new());
        let api = Arc::new(StubServerApi::new().not_ready());
        let manager = manager(&runtime, &api);
        let (tx, _rx) = mpsc::channel(16);

        let result = manager.start(&request("alpha"), &tx).await;
        assert!(matches!(result, Err(ProvisionError::NotReady(_))));
        assert_rolled_back(&manager, result).await;
        assert_eq!(runtime.stop_count(), 1);
        assert!(api.names().is_empty());
    }

    #[tokio::test]
    async fn test_configure_failure_rolls_back() {
        let runtime = Arc::new(StubRuntime::new());
        let api = Arc::new(StubServerApi::new().fail_configure());
        let manager = manager(&runtime, &api);
        let (tx, mut rx) = mpsc::channel(16);

        let result = manager.start(&request("alpha"), &tx).await;
        assert!(matches!(result, Err(ProvisionError::Configure(_))));
        assert!(!drain(&mut rx).await.contains(&ServerEventType::ServerReady));
        assert_rolled_back(&manager, result).await;
        assert_eq!(runtime.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_sink_closed_at_setup_stops_container() {
        let runtime = Arc::new(StubRuntime::new());
        let api = Arc::new(StubServerApi::new());
        let manager = manager(&runtime, &api);
        let sink = ClosingSink {
            closes_on: ServerEventType::SettingUpServer,
        };

        let result = manager.start(&request("alpha"), &sink).await;
        assert!(matches!(result, Err(ProvisionError::ProgressClosed(_))));
        assert_eq!(runtime.stop_count(), 1);
        assert_eq!(manager.pool().free_count(), 1);
        assert_eq!(manager.active_instances(), 0);
        assert!(api.names().is_empty());
    }

    #[tokio::test]
    async fn test_sink_closed_at_ready_stops_container() {
        let runtime = Arc::new(StubRuntime::new());
        let api = Arc::new(StubServerApi::new());
        let manager = manager(&runtime, &api);
        let sink = ClosingSink {
            closes_on: ServerEventType::ServerReady,
        };

        let result = manager.start(&request("alpha"), &sink).await;
        assert!(matches!(result, Err(ProvisionError::ProgressClosed(_))));
        assert_eq!(runtime.stop_count(), 1);
        assert_eq!(manager.pool().free_count(), 1);
        assert_eq!(manager.active_instances(), 0);
        assert_eq!(api.names(), vec!["CommNode server alpha".to_string()]);
    }

    #[tokio::test]
    async fn test_port_overflow_releases_offset() {
        let runtime = Arc::new(StubRuntime::new());
        let api = Arc::new(StubServerApi::new());
        let manager = LifecycleManager::new(
            Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
            Arc::new(StubConnector::new(Arc::clone(&api))),
            ContainerSettings {
                api_base_port: u16::MAX - 1,
                ..ContainerSettings::default()
            },
            InstanceSettings::default(),
        );

        let _a = manager.create_instance().unwrap();
        let b = manager.create_instance().unwrap();
        assert_eq!(b.container().api_port(), u16::MAX);

        let (tx, _rx) = mpsc::channel(16);
        let result = manager.start(&request("alpha"), &tx).await;
        assert!(matches!(
            result,
            Err(ProvisionError::Container(ContainerError::PortOutOfRange { offset: 2 }))
        ));
        assert_eq!(manager.pool().free_count(), 1);
        assert_eq!(manager.active_instances(), 0);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_after_shutdown_is_rejected() {
        let runtime = Arc::new(StubRuntime::new());
        let api = Arc::new(StubServerApi::new());
        let manager = manager(&runtime, &api);
        manager.shutdown();

        let (tx, _rx) = mpsc::channel(16);
        let result = manager.start(&request("late"), &tx).await;
        assert!(matches!(result, Err(ProvisionError::ShuttingDown)));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_instance_once() {
        let runtime = Arc::new(StubRuntime::new());
        let api = Arc::new(StubServerApi::new());
        let manager = manager(&runtime, &api);

        for name in ["a", "b", "c", "d"] {
            let (tx, _rx) = mpsc::channel(16);
            manager.start(&request(name), &tx).await.unwrap();
        }
        assert_eq!(manager.active_instances(), 4);

        manager.shutdown();
        manager.shutdown();
        assert!(manager.wait_for_instances(Duration::from_secs(1)).await);

        assert_eq!(runtime.stop_count(), 4);
        let mut stopped = runtime.stopped_ids();
        stopped.sort();
        assert_eq!(
            stopped,
            vec!["container-0", "container-1", "container-2", "container-3"]
        );
        assert_eq!(manager.pool().free_count(), 4);
        assert_eq!(manager.active_instances(), 0);
    }
}
