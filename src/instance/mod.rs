//! Game server instances and the manager that owns them.
//!
//! ```text
//!  start request ──► LifecycleManager::start
//!                        │  lease port offset
//!                        │  pull / create / start container
//!                        │  wait for API, set display name
//!                        ▼
//!                    Instance::spawn_monitor ──► check players every interval
//!                        │                          │
//!                        │     idle timeout / shutdown / container exit
//!                        ▼                          ▼
//!                    stop container ──────────► release port offset
//! ```

pub mod manager;
pub mod supervisor;

pub use manager::{InstanceSettings, LifecycleManager, StartedInstance};
pub use supervisor::{Instance, InstanceState, MonitorSettings, Occupancy, Termination};
