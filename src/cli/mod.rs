//! CLI command handling.
//!
//! Provides subcommands for:
//! - Serving start requests (`run`, the default)
//! - Stopping server containers left behind by a previous run (`cleanup`)

use std::net::SocketAddr;

use clap::{ColorChoice, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "commnode-worker")]
#[command(about = "Provisions and supervises ephemeral game servers for CommNode")]
#[command(
    long_about = "Starts game server containers on request, streams their setup progress and stops them once they sit empty.\nExamples:\n  commnode-worker          # Serve on 0.0.0.0:50051\n  commnode-worker cleanup  # Stop stale server containers"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Control surface listen address (overrides WORKER_LISTEN_ADDR)
    #[arg(long, global = true)]
    pub listen: Option<SocketAddr>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Serve start requests (default if no subcommand given)
    Run,

    /// Stop every labelled server container and exit
    Cleanup,
}

impl Cli {
    /// The subcommand to run, `run` when none was given.
    pub fn effective_command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }
}
