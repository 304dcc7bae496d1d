use clap::{Args, Subcommand};
use std::path::PathBuf;

use pipelink_endpoint::EndpointConfig;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod control;
pub mod send;
pub mod serve;
pub mod version;

/// Settings shared by every subcommand.
pub struct Context {
    pub format: OutputFormat,
    pub config: EndpointConfig,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a server channel and print the messages clients send to it.
    Serve(ServeArgs),
    /// Connect to a channel and send a single message.
    Send(SendArgs),
    /// Host the JSON-lines control surface on stdin/stdout.
    Control(ControlArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, ctx: Context) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, &ctx),
        Command::Send(args) => send::run(args, &ctx),
        Command::Control(args) => control::run(args, ctx),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Channel name to create.
    pub name: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Exit after N client sessions have ended.
    #[arg(long)]
    pub sessions: Option<u64>,
    /// Send every received message back to its sender.
    #[arg(long)]
    pub echo: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Channel name to connect to.
    pub name: String,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Wait for one reply message and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug, Default)]
pub struct ControlArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
