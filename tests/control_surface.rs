//! Control surface served over a real socket.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use commnode_worker::container::{ContainerRuntime, ContainerSettings};
use commnode_worker::control::{HealthResponse, control_router, serve};
use commnode_worker::instance::{InstanceSettings, LifecycleManager};
use commnode_worker::testing::{StubConnector, StubRuntime, StubServerApi};

struct Harness {
    base_url: String,
    manager: Arc<LifecycleManager>,
    runtime: Arc<StubRuntime>,
    stop_tx: oneshot::Sender<()>,
    server: tokio::task::JoinHandle<std::io::Result<()>>,
}

async fn spawn_worker(runtime: StubRuntime) -> Harness {
    let runtime = Arc::new(runtime);
    let manager = Arc::new(LifecycleManager::new(
        Arc::clone(&runtime) as Arc<dyn ContainerRuntime>,
        Arc::new(StubConnector::new(Arc::new(StubServerApi::new()))),
        ContainerSettings::default(),
        InstanceSettings::default(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let on_stop = Arc::clone(&manager);
    let server = tokio::spawn(serve(
        listener,
        control_router(Arc::clone(&manager)),
        async move {
            let _ = stop_rx.await;
            on_stop.shutdown();
        },
    ));

    Harness {
        base_url,
        manager,
        runtime,
        stop_tx,
        server,
    }
}

async fn start_stream(base_url: &str, name: &str) -> String {
    reqwest::Client::new()
        .post(format!("{base_url}/v1/servers/start"))
        .json(&serde_json::json!({ "name": name }))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap()
}

/// Names of the SSE events in `body`, in order.
fn event_names(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("event:"))
        .map(|name| name.trim().to_string())
        .collect()
}

async fn health(base_url: &str) -> HealthResponse {
    reqwest::get(format!("{base_url}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn start_then_graceful_shutdown() {
    let harness = spawn_worker(StubRuntime::new()).await;

    let body = start_stream(&harness.base_url, "alpha").await;
    assert_eq!(event_names(&body), vec!["server_event"; 4]);
    assert!(body.contains(r#""type":"ServerReady""#));
    assert!(body.contains("CommNode server alpha"));

    let status = health(&harness.base_url).await;
    assert_eq!(status.status, "ok");
    assert_eq!(status.active_instances, 1);

    harness.stop_tx.send(()).unwrap();
    harness.server.await.unwrap().unwrap();
    assert!(
        harness
            .manager
            .wait_for_instances(Duration::from_secs(5))
            .await
    );
    assert_eq!(harness.runtime.stop_count(), 1);
    assert_eq!(harness.manager.pool().free_count(), 1);
}

#[tokio::test]
async fn failed_pull_is_reported_on_the_stream() {
    let harness = spawn_worker(StubRuntime::new().fail_pull()).await;

    let body = start_stream(&harness.base_url, "alpha").await;
    assert_eq!(event_names(&body), vec!["server_event", "error"]);
    assert!(body.contains("Failed to pull image"));

    assert_eq!(health(&harness.base_url).await.active_instances, 0);
    assert_eq!(harness.manager.pool().free_count(), 1);

    harness.stop_tx.send(()).unwrap();
    harness.server.await.unwrap().unwrap();
}
