mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;
use pipelink_endpoint::EndpointConfig;
use pipelink_transport::PipeNamespace;

use crate::cmd::{Command, Context};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "pipelink", version, about = "Named-channel message passing")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// Directory holding channel sockets (ignored on Windows).
    #[arg(long, value_name = "DIR", env = "PIPELINK_NAMESPACE", global = true)]
    namespace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn endpoint_config(&self) -> EndpointConfig {
        let namespace = match &self.namespace {
            Some(root) => PipeNamespace::with_root(root),
            None => PipeNamespace::default(),
        };
        EndpointConfig::default().with_namespace(namespace)
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let ctx = Context {
        format: cli.format.unwrap_or_else(OutputFormat::default_for_stdout),
        config: cli.endpoint_config(),
    };
    let result = cmd::run(cli.command, ctx);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from(["pipelink", "send", "alpha", "--data", "hello", "--wait"])
            .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.name, "alpha");
                assert!(args.wait);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "pipelink", "send", "alpha", "--file", "/tmp/x", "--data", "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_serve_with_limits() {
        let cli = Cli::try_parse_from(["pipelink", "serve", "alpha", "--count", "2", "--echo"])
            .expect("serve args should parse");
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.count, Some(2));
                assert!(args.echo);
                assert!(args.sessions.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn namespace_flag_sets_root() {
        let cli = Cli::try_parse_from(["pipelink", "--namespace", "/tmp/pl-ns", "control"])
            .expect("control args should parse");
        let config = cli.endpoint_config();
        if cfg!(unix) {
            assert_eq!(config.namespace.root(), std::path::Path::new("/tmp/pl-ns"));
        }
        assert!(matches!(cli.command, Command::Control(_)));
    }
}
