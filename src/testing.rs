//! In-memory stand-ins for the container runtime and the server API.
//!
//! Provides:
//! - [`StubRuntime`]: a [`ContainerRuntime`] that records every call and lets
//!   tests fail individual operations or make containers exit
//! - [`StubServerApi`]: a [`ServerApi`] with a configurable player count
//! - [`StubConnector`]: hands the same [`StubServerApi`] to every instance
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use commnode_worker::container::ContainerSettings;
//! use commnode_worker::instance::{InstanceSettings, LifecycleManager};
//! use commnode_worker::testing::{StubConnector, StubRuntime, StubServerApi};
//!
//! let api = Arc::new(StubServerApi::new());
//! let manager = LifecycleManager::new(
//!     Arc::new(StubRuntime::new()),
//!     Arc::new(StubConnector::new(api)),
//!     ContainerSettings::default(),
//!     InstanceSettings::default(),
//! );
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::container::{ContainerRuntime, ContainerSpec, RuntimeError, WaitOutcome};
use crate::server_api::{Player, ServerApi, ServerApiConnector, ServerApiError};

/// Exit code reported for containers stopped through the runtime.
const STOPPED_EXIT_CODE: i64 = 0;

/// A call observed by [`StubRuntime`]. Waits are not recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Pull(String),
    Create,
    Start(String),
    Stop(String),
    Remove(String),
    List(String),
}

#[derive(Default)]
struct RuntimeLog {
    calls: Vec<RuntimeCall>,
    stop_times: Vec<Instant>,
    specs: Vec<ContainerSpec>,
}

/// Container runtime stub. Container ids are `container-0`, `container-1`, ...
#[derive(Default)]
pub struct StubRuntime {
    log: Mutex<RuntimeLog>,
    exits: Mutex<HashMap<String, watch::Sender<Option<i64>>>>,
    next_id: AtomicU32,
    labelled: Vec<String>,
    fail_pull: bool,
    fail_create: bool,
    fail_start: bool,
    fail_stop: bool,
    fail_wait: bool,
}

impl StubRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pull stream yields one progress line, then an error.
    pub fn fail_pull(mut self) -> Self {
        self.fail_pull = true;
        self
    }

    pub fn fail_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Stop requests are recorded but fail.
    pub fn fail_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn fail_wait(mut self) -> Self {
        self.fail_wait = true;
        self
    }

    /// Containers returned by `list_labelled`, whatever the label.
    pub fn with_labelled(mut self, ids: Vec<&str>) -> Self {
        self.labelled = ids.into_iter().map(String::from).collect();
        self
    }

    fn log(&self) -> MutexGuard<'_, RuntimeLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: RuntimeCall) {
        self.log().calls.push(call);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.log().calls.clone()
    }

    /// Specs passed to `create_container`, in order.
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.log().specs.clone()
    }

    /// Number of stop requests, including failed ones.
    pub fn stop_count(&self) -> usize {
        self.log().stop_times.len()
    }

    /// When each stop request arrived.
    pub fn stop_times(&self) -> Vec<Instant> {
        self.log().stop_times.clone()
    }

    /// Ids of every container a stop was requested for.
    pub fn stopped_ids(&self) -> Vec<String> {
        self.log()
            .calls
            .iter()
            .filter_map(|call| match call {
                RuntimeCall::Stop(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Make a container exit on its own with `code`.
    pub fn exit_container(&self, id: &str, code: i64) {
        self.exit_sender(id).send_replace(Some(code));
    }

    fn exit_sender(&self, id: &str) -> watch::Sender<Option<i64>> {
        let mut exits = self.exits.lock().unwrap_or_else(|e| e.into_inner());
        exits
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }
}

fn stub_error(op: &str) -> RuntimeError {
    RuntimeError::Api(format!("stubbed {op} failure"))
}

#[async_trait]
impl ContainerRuntime for StubRuntime {
    fn pull_image(&self, image: &str) -> BoxStream<'static, Result<String, RuntimeError>> {
        self.record(RuntimeCall::Pull(image.to_string()));
        let mut lines = vec![Ok(format!("Pulling from {image}"))];
        if self.fail_pull {
            lines.push(Err(stub_error("pull")));
        } else {
            lines.push(Ok(format!("Status: Image is up to date for {image}")));
        }
        stream::iter(lines).boxed()
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        {
            let mut log = self.log();
            log.calls.push(RuntimeCall::Create);
            log.specs.push(spec.clone());
        }
        if self.fail_create {
            return Err(stub_error("create"));
        }
        let id = format!("container-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.exit_sender(&id);
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Start(id.to_string()));
        if self.fail_start {
            return Err(stub_error("start"));
        }
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &str,
        _timeout: Option<Duration>,
    ) -> Result<(), RuntimeError> {
        {
            let mut log = self.log();
            log.calls.push(RuntimeCall::Stop(id.to_string()));
            log.stop_times.push(Instant::now());
        }
        if self.fail_stop {
            return Err(stub_error("stop"));
        }
        self.exit_container(id, STOPPED_EXIT_CODE);
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Remove(id.to_string()));
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<WaitOutcome, RuntimeError> {
        if self.fail_wait {
            return Err(stub_error("wait"));
        }
        let mut rx = self.exit_sender(id).subscribe();
        let code = *rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| stub_error("wait"))?;
        Ok(WaitOutcome {
            status_code: code.unwrap_or(STOPPED_EXIT_CODE),
            error: None,
        })
    }

    async fn list_labelled(&self, label: &str) -> Result<Vec<String>, RuntimeError> {
        self.record(RuntimeCall::List(label.to_string()));
        Ok(self.labelled.clone())
    }
}

/// Server API stub.
///
/// Reports `players` empty players from `get_players` and records every name
/// it is given.
#[derive(Default)]
pub struct StubServerApi {
    players: AtomicUsize,
    fail_players: AtomicBool,
    player_queries: AtomicU32,
    names: Mutex<Vec<String>>,
    not_ready: bool,
    fail_configure: bool,
    hang_players: bool,
}

impl StubServerApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// `wait_for_online` always times out.
    pub fn not_ready(mut self) -> Self {
        self.not_ready = true;
        self
    }

    /// `set_server_name` always fails.
    pub fn fail_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    /// `get_players` never answers.
    pub fn hang_players(mut self) -> Self {
        self.hang_players = true;
        self
    }

    /// Number of players reported by the next checks.
    pub fn set_players(&self, count: usize) {
        self.players.store(count, Ordering::Relaxed);
    }

    /// Toggle whether player checks fail.
    pub fn fail_players(&self, fail: bool) {
        self.fail_players.store(fail, Ordering::Relaxed);
    }

    /// How many times the player list was requested.
    pub fn player_queries(&self) -> u32 {
        self.player_queries.load(Ordering::Relaxed)
    }

    /// Names set so far, in order.
    pub fn names(&self) -> Vec<String> {
        self.names.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ServerApi for StubServerApi {
    async fn wait_for_online(&self, timeout: Duration) -> crate::server_api::Result<()> {
        if self.not_ready {
            return Err(ServerApiError::NotReady(timeout));
        }
        Ok(())
    }

    async fn set_server_name(&self, name: &str) -> crate::server_api::Result<()> {
        if self.fail_configure {
            return Err(ServerApiError::Status {
                endpoint: "server".to_string(),
                status: 500,
            });
        }
        self.names
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(name.to_string());
        Ok(())
    }

    async fn get_players(&self) -> crate::server_api::Result<Vec<Player>> {
        self.player_queries.fetch_add(1, Ordering::Relaxed);
        if self.hang_players {
            std::future::pending::<()>().await;
        }
        if self.fail_players.load(Ordering::Relaxed) {
            return Err(ServerApiError::Status {
                endpoint: "player".to_string(),
                status: 503,
            });
        }
        Ok(vec![Player::default(); self.players.load(Ordering::Relaxed)])
    }
}

/// Connector that returns the same [`StubServerApi`] for every port.
pub struct StubConnector {
    api: Arc<StubServerApi>,
    ports: Mutex<Vec<u16>>,
}

impl StubConnector {
    pub fn new(api: Arc<StubServerApi>) -> Self {
        Self {
            api,
            ports: Mutex::new(Vec::new()),
        }
    }

    /// API ports clients were requested for, in order.
    pub fn connected_ports(&self) -> Vec<u16> {
        self.ports.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ServerApiConnector for StubConnector {
    fn connect(&self, api_port: u16) -> Arc<dyn ServerApi> {
        self.ports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(api_port);
        Arc::clone(&self.api) as Arc<dyn ServerApi>
    }
}
