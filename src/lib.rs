//! Game server worker for CommNode.
//!
//! Starts dedicated server containers on request, streams their setup
//! progress, and stops them again once nobody has played on them for the
//! idle timeout.

pub mod cli;
pub mod config;
pub mod container;
pub mod control;
pub mod error;
pub mod events;
pub mod instance;
pub mod ports;
pub mod server_api;
pub mod testing;
