//! axum router and server for the control surface.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;

use crate::control::types::{ErrorEvent, HealthResponse};
use crate::events::{ServerEvent, StartRequest};
use crate::instance::LifecycleManager;

/// SSE event name for progress notifications.
pub const PROGRESS_EVENT: &str = "server_event";
/// SSE event name for the terminal failure notification.
pub const ERROR_EVENT: &str = "error";

/// Progress events buffered per start request.
const EVENT_BUFFER: usize = 16;

#[derive(Clone)]
struct ControlState {
    manager: Arc<LifecycleManager>,
}

/// Build the control surface router.
pub fn control_router(manager: Arc<LifecycleManager>) -> Router {
    Router::new()
        .route("/v1/servers/start", post(start_handler))
        .route("/health", get(health_handler))
        .with_state(ControlState { manager })
        .layer(TraceLayer::new_for_http())
}

/// Serve `router` on `listener` until `shutdown` resolves.
///
/// In-flight start streams are allowed to finish.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Control surface listening on {}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

fn progress_event(event: &ServerEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(PROGRESS_EVENT).data(data)
}

fn error_event(message: String) -> Event {
    let data = serde_json::to_string(&ErrorEvent { message }).unwrap_or_default();
    Event::default().event(ERROR_EVENT).data(data)
}

/// Provision a server, streaming progress as server-sent events.
///
/// Provisioning runs in its own task. If the client goes away the task
/// notices at its next progress report and rolls the instance back.
async fn start_handler(
    State(state): State<ControlState>,
    Json(request): Json<StartRequest>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let (tx, rx) = mpsc::channel::<ServerEvent>(EVENT_BUFFER);
    let manager = Arc::clone(&state.manager);

    let task = tokio::spawn(async move { manager.start(&request, &tx).await });

    let progress =
        ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(progress_event(&event)));
    let outcome = futures::stream::once(async move {
        match task.await {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                tracing::error!("Failed to start server: {}", e);
                Some(Ok(error_event(e.to_string())))
            }
            Err(e) => {
                tracing::error!("Provisioning task failed: {}", e);
                Some(Ok(error_event("provisioning task failed".to_string())))
            }
        }
    })
    .filter_map(futures::future::ready);

    Sse::new(progress.chain(outcome)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text(""),
    )
}

async fn health_handler(State(state): State<ControlState>) -> Json<HealthResponse> {
    let status = if state.manager.is_shutting_down() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status: status.to_string(),
        active_instances: state.manager.active_instances(),
    })
}
