use pipelink_control::{serve_lines, Dispatcher};
use tracing::info;

use crate::cmd::{Context, ControlArgs};
use crate::exit::{io_error, CliResult, SUCCESS};

/// Answer JSON-lines requests from stdin until EOF, then release every endpoint.
pub fn run(_args: ControlArgs, ctx: Context) -> CliResult<i32> {
    let dispatcher = Dispatcher::new(ctx.config);
    info!("control surface ready on stdin/stdout");

    let stdin = std::io::stdin();
    let result = serve_lines(&dispatcher, stdin.lock(), std::io::stdout());
    dispatcher.registry().close_all();

    let handled = result.map_err(|err| io_error("reading requests failed", err))?;
    info!(requests = handled, "control input closed");
    Ok(SUCCESS)
}
