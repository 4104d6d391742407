//! Container orchestration for game server instances.
//!
//! Every server runs in its own container created from a shared image. The
//! orchestrator drives one container through its lifecycle against the
//! [`ContainerRuntime`] trait; [`DockerRuntime`] is the production
//! implementation.
//!
//! ```text
//!   start(progress)
//!         │
//!         ▼
//!   ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//!   │ Pull Image   │────▶│ Create       │────▶│ Start        │
//!   │ (log stream) │     │ (ports,mount)│     │ (record id)  │
//!   └──────────────┘     └──────────────┘     └──────────────┘
//!                                                    │
//!                     wait_for_not_running() ◀───────┤
//!                     (oneshot ExitStatus)           │
//!                                                    ▼
//!                                             stop() ─▶ auto-remove
//! ```
//!
//! Containers carry the [`CONTAINER_LABEL`] label so that a fresh worker can
//! find and stop anything a crashed predecessor left running
//! ([`stop_labelled_containers`]).

pub mod docker;
pub mod error;
pub mod orchestrator;
pub mod runtime;

pub use docker::DockerRuntime;
pub use error::{ContainerError, Result, RuntimeError};
pub use orchestrator::{
    CONTAINER_LABEL, ContainerSettings, ExitStatus, ServerContainer, stop_labelled_containers,
};
pub use runtime::{BindMount, ContainerRuntime, ContainerSpec, Protocol, PublishedPort, WaitOutcome};
