//! HTTP control surface used by the CommNode control plane.
//!
//! - `POST /v1/servers/start` `{"name": ...}` streams provisioning progress
//!   as server-sent events named `server_event`, ending with `ServerReady` or
//!   a single `error` event.
//! - `GET /health` reports whether new servers are accepted and how many are
//!   running.

pub mod server;
pub mod types;

pub use server::{ERROR_EVENT, PROGRESS_EVENT, control_router, serve};
pub use types::{ErrorEvent, HealthResponse};
